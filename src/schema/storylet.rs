use serde::{Deserialize, Serialize};

/// Whether an event sits in a location (storylet) or is drawn from a deck
/// (opportunity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventKind {
    #[default]
    Storylet,
    Opportunity,
}

/// A storylet or opportunity card as authored.
///
/// Text fields are templates; requirement strings are conditions such as
/// `"$clues >= 5"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: String,
    #[serde(default)]
    pub kind: EventKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub options: Vec<EventOption>,
}

/// One choice offered by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOption {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Challenge expression, e.g. `"$investigation >> 30"`. No challenge
    /// means the option always succeeds.
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub success_effects: Vec<String>,
    #[serde(default)]
    pub failure_effects: Vec<String>,
}

impl EventDefinition {
    pub fn option(&self, id: &str) -> Option<&EventOption> {
        self.options.iter().find(|o| o.id == id)
    }

    /// Every template and script string carried by this event, for linting.
    pub fn scripts(&self) -> Vec<&str> {
        let mut scripts = vec![self.name.as_str(), self.description.as_str()];
        scripts.extend(self.requirements.iter().map(String::as_str));
        for option in &self.options {
            scripts.push(&option.name);
            scripts.push(&option.description);
            scripts.extend(option.requirements.iter().map(String::as_str));
            scripts.extend(option.challenge.as_deref());
            scripts.extend(option.success_effects.iter().map(String::as_str));
            scripts.extend(option.failure_effects.iter().map(String::as_str));
        }
        scripts
    }
}
