use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::effect::{Effect, PendingEvent};

/// Storage shape of a quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QualityType {
    /// Levels advance by spending change points: level `n` costs `n + 1`.
    Pyramidal,
    #[default]
    Counter,
    Item,
    Equipable,
    /// Text-valued quality; `level` is meaningless.
    String,
}

impl QualityType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pyramidal => "Pyramidal",
            Self::Counter => "Counter",
            Self::Item => "Item",
            Self::Equipable => "Equipable",
            Self::String => "String",
        }
    }
}

/// Static authoring data for a quality. Owned by the content registry.
///
/// `name`, `description`, `bonus` and every text variant are templates and may
/// embed script blocks, including `$.` references to the quality itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: QualityType,
    /// Comma-joined category tags, e.g. `"Skills, Social"`.
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub plural: Option<String>,
    /// Variant name → template, e.g. `subject`, `object`, `possessive`.
    #[serde(default)]
    pub text_variants: BTreeMap<String, String>,
    #[serde(default)]
    pub bonus: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl QualityDefinition {
    pub fn new(id: &str, name: &str, kind: QualityType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            kind,
            category: String::new(),
            plural: None,
            text_variants: BTreeMap::new(),
            bonus: String::new(),
            tags: Vec::new(),
            image: None,
        }
    }

    /// The individual category tags, trimmed.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.category
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Returns true if any category tag equals `category` (case-insensitive).
    pub fn in_category(&self, category: &str) -> bool {
        let wanted = category.trim();
        self.categories().any(|c| c.eq_ignore_ascii_case(wanted))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Runtime payload of a quality, one shape per [`QualityType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityValue {
    Pyramidal { level: i64, change_points: i64 },
    Counter { level: i64 },
    Item { level: i64 },
    Equipable { level: i64, bonus: Option<String> },
    String { value: String },
}

impl QualityValue {
    /// The zero value for a quality type.
    pub fn empty(kind: QualityType) -> Self {
        match kind {
            QualityType::Pyramidal => Self::Pyramidal {
                level: 0,
                change_points: 0,
            },
            QualityType::Counter => Self::Counter { level: 0 },
            QualityType::Item => Self::Item { level: 0 },
            QualityType::Equipable => Self::Equipable {
                level: 0,
                bonus: None,
            },
            QualityType::String => Self::String {
                value: String::new(),
            },
        }
    }

    pub fn kind(&self) -> QualityType {
        match self {
            Self::Pyramidal { .. } => QualityType::Pyramidal,
            Self::Counter { .. } => QualityType::Counter,
            Self::Item { .. } => QualityType::Item,
            Self::Equipable { .. } => QualityType::Equipable,
            Self::String { .. } => QualityType::String,
        }
    }

    /// Numeric level; `0` for text qualities.
    pub fn level(&self) -> i64 {
        match self {
            Self::Pyramidal { level, .. }
            | Self::Counter { level }
            | Self::Item { level }
            | Self::Equipable { level, .. } => *level,
            Self::String { .. } => 0,
        }
    }

    /// Text value; empty for numeric qualities.
    pub fn string_value(&self) -> &str {
        match self {
            Self::String { value } => value,
            _ => "",
        }
    }

    pub fn change_points(&self) -> i64 {
        match self {
            Self::Pyramidal { change_points, .. } => *change_points,
            _ => 0,
        }
    }

    /// The value a bare reference resolves to: level for numeric types,
    /// the string for text qualities.
    pub fn to_value(&self) -> Value {
        match self {
            Self::String { value } => Value::String(value.clone()),
            other => Value::Int(other.level()),
        }
    }
}

/// Per-player or per-world runtime state of one quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityState {
    pub quality_id: String,
    pub value: QualityValue,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub spent_towards_prune: i64,
}

impl QualityState {
    pub fn new(quality_id: &str, value: QualityValue) -> Self {
        Self {
            quality_id: quality_id.to_string(),
            value,
            sources: Vec::new(),
            spent_towards_prune: 0,
        }
    }

    pub fn counter(quality_id: &str, level: i64) -> Self {
        Self::new(quality_id, QualityValue::Counter { level })
    }

    pub fn pyramidal(quality_id: &str, level: i64, change_points: i64) -> Self {
        Self::new(
            quality_id,
            QualityValue::Pyramidal {
                level,
                change_points,
            },
        )
    }

    pub fn item(quality_id: &str, level: i64) -> Self {
        Self::new(quality_id, QualityValue::Item { level })
    }

    pub fn string(quality_id: &str, value: &str) -> Self {
        Self::new(
            quality_id,
            QualityValue::String {
                value: value.to_string(),
            },
        )
    }

    pub fn kind(&self) -> QualityType {
        self.value.kind()
    }

    pub fn level(&self) -> i64 {
        self.value.level()
    }

    pub fn string_value(&self) -> &str {
        self.value.string_value()
    }
}

/// A read-only snapshot of quality states for one scope (player or world).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityStates {
    states: FxHashMap<String, QualityState>,
}

impl QualityStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: QualityState) {
        self.states.insert(state.quality_id.clone(), state);
    }

    pub fn get(&self, id: &str) -> Option<&QualityState> {
        self.states.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut QualityState> {
        self.states.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<QualityState> {
        self.states.remove(id)
    }

    /// Level of `id`, or `0` when the quality is absent.
    pub fn level(&self, id: &str) -> i64 {
        self.get(id).map_or(0, QualityState::level)
    }

    /// String value of `id`, or `""` when the quality is absent.
    pub fn string_value(&self, id: &str) -> &str {
        self.get(id).map_or("", QualityState::string_value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QualityState> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl FromIterator<QualityState> for QualityStates {
    fn from_iter<T: IntoIterator<Item = QualityState>>(iter: T) -> Self {
        let mut states = Self::new();
        for state in iter {
            states.insert(state);
        }
        states
    }
}

/// The typed result of evaluating a script block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Quality ids, produced by `%pick` and `%all`.
    List(Vec<String>),
    /// Mutation intent; never written by the engine itself.
    Effect(Effect),
    Pending(PendingEvent),
}

impl Value {
    pub fn empty() -> Self {
        Self::String(String::new())
    }

    /// Numeric view. Strings parse if they hold a number; booleans do not.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => {
                let s = s.trim();
                !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false")
            }
            Self::List(ids) => !ids.is_empty(),
            Self::Effect(_) | Self::Pending(_) => true,
        }
    }

    /// Builds the narrowest numeric value: integers stay `Int`.
    pub fn number(n: f64) -> Self {
        if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
            Self::Int(n as i64)
        } else {
            Self::Float(n)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => match Self::number(*x) {
                Self::Int(i) => write!(f, "{}", i),
                _ => write!(f, "{}", x),
            },
            Self::String(s) => f.write_str(s),
            Self::List(ids) => f.write_str(&ids.join(", ")),
            // Mutations and scheduled events have no display form.
            Self::Effect(_) | Self::Pending(_) => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_definition() -> QualityDefinition {
        let mut def = QualityDefinition::new("investigation", "Investigation", QualityType::Pyramidal);
        def.category = "Skills, Mind".to_string();
        def.tags = vec!["core".to_string()];
        def
    }

    #[test]
    fn category_membership() {
        let def = make_definition();
        assert!(def.in_category("Skills"));
        assert!(def.in_category("mind"));
        assert!(!def.in_category("Items"));
        assert_eq!(def.categories().collect::<Vec<_>>(), vec!["Skills", "Mind"]);
    }

    #[test]
    fn has_tag() {
        let def = make_definition();
        assert!(def.has_tag("core"));
        assert!(!def.has_tag("rare"));
    }

    #[test]
    fn level_and_string_are_exclusive() {
        let counter = QualityState::counter("clues", 5);
        assert_eq!(counter.level(), 5);
        assert_eq!(counter.string_value(), "");

        let text = QualityState::string("class", "Rogue");
        assert_eq!(text.level(), 0);
        assert_eq!(text.string_value(), "Rogue");
        assert_eq!(text.value.to_value(), Value::String("Rogue".to_string()));
    }

    #[test]
    fn missing_quality_defaults() {
        let states: QualityStates = [QualityState::counter("clues", 3)].into_iter().collect();
        assert_eq!(states.level("clues"), 3);
        assert_eq!(states.level("nothing"), 0);
        assert_eq!(states.string_value("nothing"), "");
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::Int(4).to_string(), "4");
        assert_eq!(Value::Float(60.0).to_string(), "60");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(
            Value::List(vec!["a".to_string(), "b".to_string()]).to_string(),
            "a, b"
        );
    }

    #[test]
    fn value_truthiness() {
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::empty().is_truthy());
        assert!(!Value::from("false").is_truthy());
        assert!(Value::from("Rogue").is_truthy());
        assert!(!Value::List(Vec::new()).is_truthy());
    }

    #[test]
    fn ron_round_trip() {
        let state = QualityState::pyramidal("investigation", 3, 2);
        let serialized = ron::to_string(&state).unwrap();
        let deserialized: QualityState = ron::from_str(&serialized).unwrap();
        assert_eq!(deserialized, state);
    }
}
