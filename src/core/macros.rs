/// Evaluation of `%name[...]` macros.
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::core::context::{DiagnosticKind, EvaluationContext, Frame, SelfBinding};
use crate::core::effect::PendingEvent;
use crate::core::expr::{Expr, Macro};
use crate::schema::quality::Value;

impl EvaluationContext<'_> {
    pub(crate) fn eval_macro(&mut self, call: &Macro, frame: &Frame) -> Value {
        match call {
            Macro::Random { chance, invert } => {
                let percent = self.number(chance, frame).clamp(0.0, 100.0);
                let percent = if *invert { 100.0 - percent } else { percent };
                let draw: f64 = self.rng.gen_range(0.0..100.0);
                Value::Bool(draw < percent)
            }
            Macro::Pick {
                category,
                count,
                filter,
            } => {
                let candidates = self.candidates(category, filter.as_deref(), frame);
                let count = match count {
                    Some(expr) => self.number(expr, frame).max(0.0).round() as usize,
                    None => 1,
                };
                if candidates.is_empty() {
                    self.record(
                        DiagnosticKind::EmptySelection,
                        format!("%pick found nothing in {}", category),
                        category,
                    );
                }
                let picked = candidates
                    .choose_multiple(&mut *self.rng, count)
                    .cloned()
                    .collect();
                Value::List(picked)
            }
            Macro::Roll { category, filter } => {
                let candidates = self.candidates(category, filter.as_deref(), frame);
                let weights: Vec<i64> = candidates
                    .iter()
                    .map(|id| self.local.level(id).max(0))
                    .collect();
                match WeightedIndex::new(&weights) {
                    Ok(distribution) => {
                        let index = distribution.sample(&mut *self.rng);
                        Value::String(candidates[index].clone())
                    }
                    Err(_) => {
                        self.record(
                            DiagnosticKind::EmptySelection,
                            format!("%roll found no weighted candidate in {}", category),
                            category,
                        );
                        Value::empty()
                    }
                }
            }
            Macro::List {
                category,
                separator,
                filter,
            } => {
                let candidates = self.candidates(category, filter.as_deref(), frame);
                let names: Vec<String> = candidates
                    .iter()
                    .map(|id| self.display_name(id, frame))
                    .collect();
                Value::String(separator.join(&names))
            }
            Macro::All { category } => {
                let registry = self.registry;
                Value::List(
                    registry
                        .qualities_in_category(category)
                        .into_iter()
                        .map(|d| d.id.clone())
                        .collect(),
                )
            }
            Macro::Schedule {
                kind,
                effect,
                amount,
                unit,
            } => {
                let effect = self.eval_effects(effect, frame);
                let amount = self.number(amount, frame);
                Value::Pending(PendingEvent {
                    kind: *kind,
                    effect,
                    duration_ms: unit.to_millis(amount),
                })
            }
            Macro::Chance(challenge) => {
                Value::Int(self.challenge_percent(challenge, frame).round() as i64)
            }
        }
    }

    /// Ids of the qualities in `category` that pass `filter`, evaluated
    /// with each candidate bound as `$.`.
    fn candidates(&mut self, category: &str, filter: Option<&Expr>, frame: &Frame) -> Vec<String> {
        let registry = self.registry;
        let mut ids = Vec::new();
        for definition in registry.qualities_in_category(category) {
            let keep = match filter {
                Some(filter) => {
                    let bound = frame.rebind(SelfBinding::new(&definition.id, None));
                    self.eval(filter, &bound).is_truthy()
                }
                None => true,
            };
            if keep {
                ids.push(definition.id.clone());
            }
        }
        ids
    }

    /// Expanded display name of a quality, or its id when it has none.
    fn display_name(&mut self, id: &str, frame: &Frame) -> String {
        let registry = self.registry;
        let name = match registry.quality(id) {
            Some(definition) if !definition.name.is_empty() => definition.name.as_str(),
            _ => return id.to_string(),
        };
        if !name.contains('{') {
            return name.to_string();
        }
        match self.descend(frame, name) {
            Some(deeper) => self.expand_text(name, &deeper.rebind(SelfBinding::new(id, None))),
            None => name.to_string(),
        }
    }
}
