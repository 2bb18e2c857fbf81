/// Scoped references: `$id`, `#id`, `$.` and their `.property` suffixes.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::context::SelfBinding;
use crate::schema::quality::{QualityStates, QualityType, QualityValue, Value};
use crate::schema::registry::ContentRegistry;

/// Which state map a reference reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// `$` - the player's qualities.
    Local,
    /// `#` - world qualities.
    World,
    /// `$.` - the quality currently being rendered.
    SelfRef,
}

impl Scope {
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Local => "$",
            Self::World => "#",
            Self::SelfRef => "$.",
        }
    }
}

/// The part of a quality a reference asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Property {
    /// Level for numeric types, string value for text qualities.
    Value,
    Level,
    ChangePoints,
    Type,
    Name,
    Description,
    /// Definition plural, or name + "s".
    Plural,
    /// Value with its first letter upper-cased.
    Capital,
    /// Any key of the definition's text variants.
    Variant(String),
}

impl Property {
    pub fn parse(name: &str) -> Self {
        match name {
            "level" => Self::Level,
            "cp" | "change_points" | "changePoints" => Self::ChangePoints,
            "type" => Self::Type,
            "name" => Self::Name,
            "description" => Self::Description,
            "plural" => Self::Plural,
            "capital" => Self::Capital,
            other => Self::Variant(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Value => "",
            Self::Level => "level",
            Self::ChangePoints => "cp",
            Self::Type => "type",
            Self::Name => "name",
            Self::Description => "description",
            Self::Plural => "plural",
            Self::Capital => "capital",
            Self::Variant(key) => key,
        }
    }
}

/// A parsed reference such as `$clues.name`. `id` is empty for `$.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedRef {
    pub scope: Scope,
    pub id: String,
    pub property: Property,
}

impl ScopedRef {
    pub fn local(id: &str) -> Self {
        Self {
            scope: Scope::Local,
            id: id.to_string(),
            property: Property::Value,
        }
    }

    /// Parse a complete reference. Returns `None` if `input` holds anything
    /// beyond one reference.
    pub fn parse(input: &str) -> Option<ScopedRef> {
        let chars: Vec<char> = input.trim().chars().collect();
        match scan_ref(&chars, 0) {
            Some((reference, end)) if end == chars.len() => Some(reference),
            _ => None,
        }
    }
}

impl fmt::Display for ScopedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.scope, &self.property) {
            (Scope::SelfRef, Property::Value) => f.write_str("$."),
            (Scope::SelfRef, p) => write!(f, "$.{}", p.name()),
            (scope, Property::Value) => write!(f, "{}{}", scope.marker(), self.id),
            (scope, p) => write!(f, "{}{}.{}", scope.marker(), self.id, p.name()),
        }
    }
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn scan_ident(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    end
}

/// Scan a reference starting at `start` (which must hold `$` or `#`).
/// Returns the reference and the index just past it.
pub(crate) fn scan_ref(chars: &[char], start: usize) -> Option<(ScopedRef, usize)> {
    let scope = match chars.get(start)? {
        '$' => Scope::Local,
        '#' => Scope::World,
        _ => return None,
    };
    let mut i = start + 1;

    if scope == Scope::Local && chars.get(i) == Some(&'.') {
        i += 1;
        let prop_end = scan_ident(chars, i);
        let property = if prop_end > i && chars[i].is_alphabetic() {
            let name: String = chars[i..prop_end].iter().collect();
            i = prop_end;
            Property::parse(&name)
        } else {
            Property::Value
        };
        return Some((
            ScopedRef {
                scope: Scope::SelfRef,
                id: String::new(),
                property,
            },
            i,
        ));
    }

    let id_end = scan_ident(chars, i);
    if id_end == i {
        return None;
    }
    let id: String = chars[i..id_end].iter().collect();
    i = id_end;

    let mut property = Property::Value;
    if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| c.is_alphabetic()) {
        let prop_end = scan_ident(chars, i + 1);
        let name: String = chars[i + 1..prop_end].iter().collect();
        property = Property::parse(&name);
        i = prop_end;
    }

    Some((ScopedRef { scope, id, property }, i))
}

/// What a reference resolved to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolution {
    Plain(Value),
    /// Template text to expand with `owner` bound as self.
    Text { text: String, owner: SelfBinding },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolved {
    pub resolution: Resolution,
    /// Neither a state nor a definition exists for the id.
    pub unresolved: bool,
}

/// Resolve a reference against the state maps and registry. Never fails:
/// missing data yields `0`, `""` or the identifier itself.
pub(crate) fn resolve(
    reference: &ScopedRef,
    local: &QualityStates,
    world: &QualityStates,
    registry: &dyn ContentRegistry,
    self_binding: Option<&SelfBinding>,
) -> Resolved {
    let (id, state) = match reference.scope {
        Scope::Local => (reference.id.clone(), local.get(&reference.id).cloned()),
        Scope::World => (reference.id.clone(), world.get(&reference.id).cloned()),
        Scope::SelfRef => match self_binding {
            Some(binding) => (
                binding.id.clone(),
                binding
                    .state
                    .clone()
                    .or_else(|| local.get(&binding.id).cloned()),
            ),
            None => {
                return Resolved {
                    resolution: Resolution::Plain(Value::Int(0)),
                    unresolved: true,
                }
            }
        },
    };

    let definition = registry.quality(&id);
    let unresolved = state.is_none() && definition.is_none();
    let kind = state
        .as_ref()
        .map(|s| s.kind())
        .or_else(|| definition.map(|d| d.kind))
        .unwrap_or(QualityType::Counter);
    let value = state
        .as_ref()
        .map(|s| s.value.clone())
        .unwrap_or_else(|| QualityValue::empty(kind));
    let owner = SelfBinding {
        id: id.clone(),
        state,
    };
    let text = |text: String| Resolution::Text {
        text,
        owner: owner.clone(),
    };

    let resolution = match &reference.property {
        Property::Value => match &value {
            QualityValue::String { value } => text(value.clone()),
            numeric => Resolution::Plain(Value::Int(numeric.level())),
        },
        Property::Level => Resolution::Plain(Value::Int(value.level())),
        Property::ChangePoints => Resolution::Plain(Value::Int(value.change_points())),
        Property::Type => Resolution::Plain(Value::from(kind.label())),
        Property::Name => match definition {
            Some(def) => text(def.name.clone()),
            None => Resolution::Plain(Value::String(id.clone())),
        },
        Property::Description => match definition {
            Some(def) => text(def.description.clone()),
            None => Resolution::Plain(Value::empty()),
        },
        Property::Plural => match definition {
            Some(def) => text(
                def.plural
                    .clone()
                    .unwrap_or_else(|| format!("{}s", def.name)),
            ),
            None => Resolution::Plain(Value::String(format!("{}s", id))),
        },
        Property::Capital => Resolution::Plain(Value::String(capitalize(
            &value.to_value().to_string(),
        ))),
        Property::Variant(key) => match definition.and_then(|d| d.text_variants.get(key)) {
            Some(variant) => text(variant.clone()),
            None => Resolution::Plain(Value::empty()),
        },
    };

    Resolved {
        resolution,
        unresolved,
    }
}

/// Upper-case the first character.
pub fn capitalize(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::quality::{QualityDefinition, QualityState};
    use crate::schema::registry::ContentSet;

    fn content() -> ContentSet {
        let mut set = ContentSet::new();
        let mut hat = QualityDefinition::new("hat", "Hat", QualityType::Item);
        hat.description = "A fine hat.".to_string();
        hat.text_variants
            .insert("possessive".to_string(), "its".to_string());
        set.insert_quality(hat);
        let mut mouse = QualityDefinition::new("mouse", "Mouse", QualityType::Counter);
        mouse.plural = Some("Mice".to_string());
        set.insert_quality(mouse);
        set
    }

    fn plain(resolved: Resolved) -> Value {
        match resolved.resolution {
            Resolution::Plain(v) => v,
            Resolution::Text { text, .. } => Value::String(text),
        }
    }

    #[test]
    fn parse_references() {
        let r = ScopedRef::parse("$clues").unwrap();
        assert_eq!(r.scope, Scope::Local);
        assert_eq!(r.id, "clues");
        assert_eq!(r.property, Property::Value);

        let r = ScopedRef::parse("#weather.name").unwrap();
        assert_eq!(r.scope, Scope::World);
        assert_eq!(r.property, Property::Name);

        let r = ScopedRef::parse("$.").unwrap();
        assert_eq!(r.scope, Scope::SelfRef);
        assert_eq!(r.property, Property::Value);

        let r = ScopedRef::parse("$.plural").unwrap();
        assert_eq!(r.scope, Scope::SelfRef);
        assert_eq!(r.property, Property::Plural);

        let r = ScopedRef::parse("$hat.possessive").unwrap();
        assert_eq!(r.property, Property::Variant("possessive".to_string()));

        assert!(ScopedRef::parse("clues").is_none());
        assert!(ScopedRef::parse("$clues >= 5").is_none());
        assert!(ScopedRef::parse("$").is_none());
    }

    #[test]
    fn display_round_trips() {
        for input in ["$clues", "#weather.name", "$.", "$.description"] {
            assert_eq!(ScopedRef::parse(input).unwrap().to_string(), input);
        }
    }

    #[test]
    fn resolve_defaults_for_missing_state() {
        let set = content();
        let local = QualityStates::new();
        let world = QualityStates::new();

        let resolved = resolve(&ScopedRef::local("hat"), &local, &world, &set, None);
        assert!(!resolved.unresolved);
        assert_eq!(plain(resolved), Value::Int(0));

        let resolved = resolve(&ScopedRef::local("ghost"), &local, &world, &set, None);
        assert!(resolved.unresolved);
        assert_eq!(plain(resolved), Value::Int(0));
    }

    #[test]
    fn resolve_properties() {
        let set = content();
        let local: QualityStates = [
            QualityState::item("hat", 2),
            QualityState::string("class", "rogue"),
        ]
        .into_iter()
        .collect();
        let world = QualityStates::new();
        let get = |input: &str| plain(resolve(&ScopedRef::parse(input).unwrap(), &local, &world, &set, None));

        assert_eq!(get("$hat"), Value::Int(2));
        assert_eq!(get("$hat.name"), Value::from("Hat"));
        assert_eq!(get("$hat.description"), Value::from("A fine hat."));
        assert_eq!(get("$hat.plural"), Value::from("Hats"));
        assert_eq!(get("$mouse.plural"), Value::from("Mice"));
        assert_eq!(get("$hat.possessive"), Value::from("its"));
        assert_eq!(get("$hat.object"), Value::empty());
        assert_eq!(get("$hat.type"), Value::from("Item"));
        assert_eq!(get("$class"), Value::from("rogue"));
        assert_eq!(get("$class.capital"), Value::from("Rogue"));
        // No definition: name falls back to the identifier.
        assert_eq!(get("$class.name"), Value::from("class"));
        assert_eq!(get("$class.description"), Value::empty());
    }

    #[test]
    fn resolve_self_binding() {
        let set = content();
        let local = QualityStates::new();
        let world = QualityStates::new();
        let binding = SelfBinding {
            id: "hat".to_string(),
            state: Some(QualityState::item("hat", 7)),
        };
        let reference = ScopedRef::parse("$.").unwrap();
        let resolved = resolve(&reference, &local, &world, &set, Some(&binding));
        assert_eq!(plain(resolved), Value::Int(7));

        let unbound = resolve(&reference, &local, &world, &set, None);
        assert!(unbound.unresolved);
    }

    #[test]
    fn capitalize_words() {
        assert_eq!(capitalize("rogue"), "Rogue");
        assert_eq!(capitalize(""), "");
        assert_eq!(capitalize("élan"), "Élan");
    }
}
