/// Content registry - read-only lookup of quality and event definitions.
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::quality::QualityDefinition;
use super::storylet::EventDefinition;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("duplicate quality id: {0}")]
    DuplicateQuality(String),
}

/// Lookup capability the script engine needs from authored content.
pub trait ContentRegistry {
    fn quality(&self, id: &str) -> Option<&QualityDefinition>;

    fn event(&self, id: &str) -> Option<&EventDefinition>;

    /// Definitions whose category list contains `category`, in load order.
    fn qualities_in_category(&self, category: &str) -> Vec<&QualityDefinition>;
}

/// In-memory registry loaded once per session.
#[derive(Debug, Clone, Default)]
pub struct ContentSet {
    qualities: Vec<QualityDefinition>,
    events: Vec<EventDefinition>,
    quality_index: FxHashMap<String, usize>,
    event_index: FxHashMap<String, usize>,
}

// On-disk shape: `(qualities: [...], events: [...])`.
#[derive(Debug, Deserialize, Serialize)]
struct RonContent {
    #[serde(default)]
    qualities: Vec<QualityDefinition>,
    #[serde(default)]
    events: Vec<EventDefinition>,
}

impl ContentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a content set from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<ContentSet, ContentError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a content set from a RON string. Duplicate quality ids within
    /// one file are rejected.
    pub fn parse_ron(input: &str) -> Result<ContentSet, ContentError> {
        let raw: RonContent = ron::from_str(input)?;
        let mut set = ContentSet::new();
        for quality in raw.qualities {
            if set.quality_index.contains_key(&quality.id) {
                return Err(ContentError::DuplicateQuality(quality.id));
            }
            set.insert_quality(quality);
        }
        for event in raw.events {
            set.insert_event(event);
        }
        Ok(set)
    }

    /// Serialize back to the on-disk RON shape.
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        let raw = RonContent {
            qualities: self.qualities.clone(),
            events: self.events.clone(),
        };
        ron::ser::to_string_pretty(&raw, ron::ser::PrettyConfig::default())
    }

    /// Insert or replace a quality definition.
    pub fn insert_quality(&mut self, quality: QualityDefinition) {
        match self.quality_index.get(&quality.id) {
            Some(&i) => self.qualities[i] = quality,
            None => {
                self.quality_index
                    .insert(quality.id.clone(), self.qualities.len());
                self.qualities.push(quality);
            }
        }
    }

    /// Insert or replace an event definition.
    pub fn insert_event(&mut self, event: EventDefinition) {
        match self.event_index.get(&event.id) {
            Some(&i) => self.events[i] = event,
            None => {
                self.event_index.insert(event.id.clone(), self.events.len());
                self.events.push(event);
            }
        }
    }

    /// Merge another content set into this one. Definitions from `other`
    /// override definitions in `self` with the same id.
    pub fn merge(&mut self, other: ContentSet) {
        for quality in other.qualities {
            self.insert_quality(quality);
        }
        for event in other.events {
            self.insert_event(event);
        }
    }

    pub fn qualities(&self) -> &[QualityDefinition] {
        &self.qualities
    }

    pub fn events(&self) -> &[EventDefinition] {
        &self.events
    }
}

impl ContentRegistry for ContentSet {
    fn quality(&self, id: &str) -> Option<&QualityDefinition> {
        self.quality_index.get(id).map(|&i| &self.qualities[i])
    }

    fn event(&self, id: &str) -> Option<&EventDefinition> {
        self.event_index.get(id).map(|&i| &self.events[i])
    }

    fn qualities_in_category(&self, category: &str) -> Vec<&QualityDefinition> {
        self.qualities
            .iter()
            .filter(|q| q.in_category(category))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::quality::QualityType;

    const CONTENT: &str = r#"(
        qualities: [
            (id: "investigation", name: "Investigation", kind: Pyramidal, category: "Skills"),
            (id: "persuasion", name: "Persuasion", kind: Pyramidal, category: "Skills, Social"),
            (id: "gold", name: "Gold", kind: Item, category: "Currency"),
        ],
        events: [
            (id: "alley", name: "A dark alley"),
        ],
    )"#;

    #[test]
    fn parse_and_lookup() {
        let set = ContentSet::parse_ron(CONTENT).unwrap();
        assert_eq!(set.qualities().len(), 3);
        assert_eq!(set.quality("gold").unwrap().kind, QualityType::Item);
        assert!(set.quality("silver").is_none());
        assert_eq!(set.event("alley").unwrap().name, "A dark alley");
        assert!(set.event("bridge").is_none());
    }

    #[test]
    fn category_listing_keeps_load_order() {
        let set = ContentSet::parse_ron(CONTENT).unwrap();
        let ids: Vec<&str> = set
            .qualities_in_category("Skills")
            .iter()
            .map(|q| q.id.as_str())
            .collect();
        assert_eq!(ids, vec!["investigation", "persuasion"]);
        assert_eq!(set.qualities_in_category("Social").len(), 1);
        assert!(set.qualities_in_category("Nothing").is_empty());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let input = r#"(qualities: [(id: "a"), (id: "a")])"#;
        assert!(matches!(
            ContentSet::parse_ron(input),
            Err(ContentError::DuplicateQuality(id)) if id == "a"
        ));
    }

    #[test]
    fn merge_precedence() {
        let mut base = ContentSet::parse_ron(CONTENT).unwrap();
        let overrides =
            ContentSet::parse_ron(r#"(qualities: [(id: "gold", name: "Sovereigns", kind: Counter)])"#)
                .unwrap();
        base.merge(overrides);
        assert_eq!(base.qualities().len(), 3);
        assert_eq!(base.quality("gold").unwrap().name, "Sovereigns");
        assert!(base.quality("investigation").is_some());
    }

    #[test]
    fn ron_round_trip() {
        let set = ContentSet::parse_ron(CONTENT).unwrap();
        let serialized = set.to_ron().unwrap();
        let reparsed = ContentSet::parse_ron(&serialized).unwrap();
        assert_eq!(reparsed.qualities(), set.qualities());
    }
}
