/// Quality renderer: resolves every text field of a definition with the
/// quality bound as `$.`.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::context::{EvaluationContext, Frame, SelfBinding};
use crate::schema::quality::{QualityDefinition, QualityState, QualityType, QualityValue};

/// A quality ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedQuality {
    pub id: String,
    pub kind: QualityType,
    pub name: String,
    pub description: String,
    pub plural: String,
    pub text_variants: BTreeMap<String, String>,
    pub bonus: String,
    pub level: i64,
    pub change_points: i64,
    pub string_value: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub image: Option<String>,
}

impl EvaluationContext<'_> {
    /// Render `id`. Without a definition the text fields are empty and the
    /// name falls back to the id.
    pub(crate) fn render_quality(
        &mut self,
        id: &str,
        definition: Option<&QualityDefinition>,
        state: Option<&QualityState>,
        depth: u32,
    ) -> RenderedQuality {
        let state = state.cloned().or_else(|| self.local.get(id).cloned());
        let kind = state
            .as_ref()
            .map(QualityState::kind)
            .or_else(|| definition.map(|d| d.kind))
            .unwrap_or_default();
        let value = state
            .as_ref()
            .map(|s| s.value.clone())
            .unwrap_or_else(|| QualityValue::empty(kind));
        let frame = Frame::new(depth, Some(SelfBinding::new(id, state)));

        let Some(definition) = definition else {
            return RenderedQuality {
                id: id.to_string(),
                kind,
                name: id.to_string(),
                description: String::new(),
                plural: format!("{}s", id),
                text_variants: BTreeMap::new(),
                bonus: String::new(),
                level: value.level(),
                change_points: value.change_points(),
                string_value: value.string_value().to_string(),
                categories: Vec::new(),
                tags: Vec::new(),
                image: None,
            };
        };

        let name = if definition.name.is_empty() {
            id.to_string()
        } else {
            self.expand_text(&definition.name, &frame)
        };
        let description = self.expand_text(&definition.description, &frame);
        let plural = match &definition.plural {
            Some(plural) => self.expand_text(plural, &frame),
            None => format!("{}s", name),
        };
        let text_variants = definition
            .text_variants
            .iter()
            .map(|(key, template)| (key.clone(), self.expand_text(template, &frame)))
            .collect();
        // An equipped item's own bonus wins over the definition's.
        let bonus_template = match &value {
            QualityValue::Equipable {
                bonus: Some(bonus), ..
            } => bonus.as_str(),
            _ => definition.bonus.as_str(),
        };
        let bonus = self.expand_text(bonus_template, &frame);

        RenderedQuality {
            id: id.to_string(),
            kind,
            name,
            description,
            plural,
            text_variants,
            bonus,
            level: value.level(),
            change_points: value.change_points(),
            string_value: value.string_value().to_string(),
            categories: definition.categories().map(str::to_string).collect(),
            tags: definition.tags.clone(),
            image: definition.image.clone(),
        }
    }
}
