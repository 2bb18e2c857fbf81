/// The script engine: public entry points for text, conditions, typed
/// blocks, skill-check chances, quality rendering and storylet checks.
///
/// Every call builds its own [`EvaluationContext`] over borrowed state, so
/// one engine can serve concurrent requests.
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::core::config::{ConfigError, EngineConfig, MarginPolicy};
use crate::core::context::{Diagnostic, DiagnosticKind, EvaluationContext, Frame, SelfBinding};
use crate::core::effect::{Effect, PendingEvent};
use crate::core::evaluator::Mode;
use crate::core::expr::{parse_challenge, parse_leaf, Expr, Macro};
use crate::core::render::RenderedQuality;
use crate::core::scanner::Template;
use crate::schema::quality::{QualityDefinition, QualityState, QualityStates, Value};
use crate::schema::registry::{ContentError, ContentRegistry, ContentSet};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("content error: {0}")]
    Content(#[from] ContentError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("a custom registry cannot be combined with content files")]
    ConflictingContent,
}

/// The state snapshots one call reads: the player's qualities (`$`) and,
/// optionally, the world's (`#`).
#[derive(Debug, Clone, Copy)]
pub struct WorldState<'a> {
    pub local: &'a QualityStates,
    pub world: Option<&'a QualityStates>,
}

impl<'a> WorldState<'a> {
    pub fn new(local: &'a QualityStates) -> Self {
        Self { local, world: None }
    }

    pub fn with_world(mut self, world: &'a QualityStates) -> Self {
        self.world = Some(world);
        self
    }
}

/// Per-call options: the quality bound as `$.`, the starting depth, and
/// the random source. Without an injected source the engine creates one.
#[derive(Default)]
pub struct EvalOptions<'r> {
    pub self_binding: Option<SelfBinding>,
    pub depth: u32,
    pub rng: Option<&'r mut dyn RngCore>,
}

impl<'r> EvalOptions<'r> {
    pub fn bind_self(mut self, id: &str, state: Option<QualityState>) -> Self {
        self.self_binding = Some(SelfBinding::new(id, state));
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn rng(mut self, rng: &'r mut dyn RngCore) -> Self {
        self.rng = Some(rng);
        self
    }
}

/// A result together with the diagnostics recorded while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<T> {
    pub value: T,
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Evaluation<T> {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Evaluation<U> {
        Evaluation {
            value: f(self.value),
            diagnostics: self.diagnostics,
        }
    }
}

/// What choosing an event option produced. The effect is not applied.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionOutcome {
    pub passed: bool,
    /// Success percentage, when the option carries a challenge.
    pub chance: Option<f64>,
    pub effect: Effect,
    pub pending: Vec<PendingEvent>,
}

/// The script engine. Built via `ScriptEngine::builder()`.
pub struct ScriptEngine {
    registry: Arc<dyn ContentRegistry + Send + Sync>,
    config: EngineConfig,
    empty: QualityStates,
}

/// Builder for constructing a `ScriptEngine`.
#[derive(Default)]
pub struct ScriptEngineBuilder {
    registry: Option<Arc<dyn ContentRegistry + Send + Sync>>,
    /// Directly provided content (for testing without files).
    content: Option<ContentSet>,
    content_paths: Vec<PathBuf>,
    config: Option<EngineConfig>,
    config_path: Option<PathBuf>,
    max_depth: Option<u32>,
    seed: Option<u64>,
    default_margin: Option<MarginPolicy>,
}

impl ScriptEngine {
    pub fn builder() -> ScriptEngineBuilder {
        ScriptEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &dyn ContentRegistry {
        self.registry.as_ref()
    }

    /// Substitute every block in `template`.
    pub fn evaluate_text(
        &self,
        template: &str,
        state: &WorldState<'_>,
        options: EvalOptions<'_>,
    ) -> Evaluation<String> {
        self.run(state, options, |ctx, frame| ctx.expand_text(template, frame))
    }

    /// Evaluate a condition such as `$clues >= 5` or `{$clues >= 5}`.
    /// An empty condition holds.
    pub fn evaluate_condition(
        &self,
        condition: &str,
        state: &WorldState<'_>,
        options: EvalOptions<'_>,
    ) -> Evaluation<bool> {
        self.run(state, options, |ctx, frame| check(ctx, condition, frame))
    }

    /// The typed value of a template that is exactly one block; any other
    /// template yields its substituted text.
    pub fn evaluate_block(
        &self,
        template: &str,
        state: &WorldState<'_>,
        options: EvalOptions<'_>,
    ) -> Evaluation<Value> {
        self.run(state, options, |ctx, frame| {
            match Template::parse(template).ok().and_then(|t| t.single_block().map(str::to_string)) {
                Some(content) => ctx.evaluate_content(&content, frame, Mode::Standalone).value,
                None => Value::String(ctx.expand_text(template, frame)),
            }
        })
    }

    /// Rounded success percentage of a challenge expression, or `None`
    /// when `expr` is not one.
    pub fn calculate_skill_check_chance(
        &self,
        expr: &str,
        state: &WorldState<'_>,
        options: EvalOptions<'_>,
    ) -> Evaluation<Option<f64>> {
        self.run(state, options, |ctx, frame| {
            let content = block_content(expr);
            let challenge = match parse_leaf(content.trim()) {
                Ok(Expr::Challenge(challenge)) => challenge,
                Ok(Expr::Macro(Macro::Chance(challenge))) => *challenge,
                _ => return None,
            };
            Some(ctx.challenge_percent(&challenge, frame).round())
        })
    }

    /// Render a quality with its own state bound as `$.`. When `quality`
    /// is `None` the local state map is consulted.
    pub fn render_quality(
        &self,
        definition: &QualityDefinition,
        quality: Option<&QualityState>,
        state: &WorldState<'_>,
        options: EvalOptions<'_>,
    ) -> Evaluation<RenderedQuality> {
        self.run(state, options, |ctx, frame| {
            ctx.render_quality(&definition.id, Some(definition), quality, frame.depth)
        })
    }

    /// Render a quality by id. Unknown ids render with empty text.
    pub fn render_quality_by_id(
        &self,
        id: &str,
        state: &WorldState<'_>,
        options: EvalOptions<'_>,
    ) -> Evaluation<RenderedQuality> {
        let registry = self.registry.as_ref();
        self.run(state, options, |ctx, frame| {
            ctx.render_quality(id, registry.quality(id), None, frame.depth)
        })
    }

    /// Whether every requirement of an event holds. Unknown events are
    /// never available.
    pub fn is_event_available(
        &self,
        event_id: &str,
        state: &WorldState<'_>,
        options: EvalOptions<'_>,
    ) -> Evaluation<bool> {
        let Some(event) = self.registry.event(event_id) else {
            tracing::debug!(event_id, "availability check on unknown event");
            return Evaluation {
                value: false,
                diagnostics: Vec::new(),
            };
        };
        self.run(state, options, |ctx, frame| {
            event
                .requirements
                .iter()
                .all(|requirement| check(ctx, requirement, frame))
        })
    }

    /// Roll an option's challenge and evaluate the matching effect
    /// scripts. `None` when the event or option does not exist.
    pub fn resolve_option(
        &self,
        event_id: &str,
        option_id: &str,
        state: &WorldState<'_>,
        options: EvalOptions<'_>,
    ) -> Evaluation<Option<OptionOutcome>> {
        let Some(option) = self
            .registry
            .event(event_id)
            .and_then(|event| event.option(option_id))
        else {
            return Evaluation {
                value: None,
                diagnostics: Vec::new(),
            };
        };

        self.run(state, options, |ctx, frame| {
            let chance = option.challenge.as_deref().map(|challenge| {
                let content = block_content(challenge);
                match parse_challenge(content.trim()) {
                    Ok(parsed) => ctx.challenge_percent(&parsed, frame),
                    Err(err) => {
                        ctx.record(
                            DiagnosticKind::ParseDegrade,
                            err.to_string(),
                            challenge,
                        );
                        0.0
                    }
                }
            });
            let passed = match chance {
                Some(percent) => ctx.rng.gen_range(0.0..100.0) < percent,
                None => true,
            };

            let scripts = if passed {
                &option.success_effects
            } else {
                &option.failure_effects
            };
            let mut effect = Effect::default();
            let mut pending = Vec::new();
            for script in scripts {
                let content = block_content(script);
                match ctx.evaluate_content(&content, frame, Mode::Standalone).value {
                    Value::Effect(produced) => effect.changes.extend(produced.changes),
                    Value::Pending(event) => pending.push(event),
                    other => tracing::debug!(script = %script, value = %other, "effect script produced no change"),
                }
            }

            Some(OptionOutcome {
                passed,
                chance: chance.map(f64::round),
                effect,
                pending,
            })
        })
    }

    fn run<T>(
        &self,
        state: &WorldState<'_>,
        options: EvalOptions<'_>,
        f: impl FnOnce(&mut EvaluationContext<'_>, &Frame) -> T,
    ) -> Evaluation<T> {
        let mut fallback = None;
        let rng: &mut dyn RngCore = match options.rng {
            Some(rng) => rng,
            None => fallback.insert(self.fallback_rng()),
        };
        let world = state.world.unwrap_or(&self.empty);
        let mut ctx =
            EvaluationContext::new(state.local, world, self.registry.as_ref(), &self.config, rng);
        let frame = Frame::new(options.depth, options.self_binding);
        let value = f(&mut ctx, &frame);
        Evaluation {
            value,
            diagnostics: ctx.into_diagnostics(),
        }
    }

    fn fallback_rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Block contents when `input` is exactly one block, otherwise `input`.
fn block_content(input: &str) -> String {
    Template::parse(input)
        .ok()
        .and_then(|t| t.single_block().map(str::to_string))
        .unwrap_or_else(|| input.to_string())
}

fn check(ctx: &mut EvaluationContext<'_>, condition: &str, frame: &Frame) -> bool {
    let content = block_content(condition);
    if content.trim().is_empty() {
        return true;
    }
    ctx.evaluate_content(&content, frame, Mode::Standalone)
        .value
        .is_truthy()
}

impl ScriptEngineBuilder {
    /// Use a custom registry implementation.
    pub fn with_registry(mut self, registry: Arc<dyn ContentRegistry + Send + Sync>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Provide content directly (for testing without files).
    pub fn with_content(mut self, content: ContentSet) -> Self {
        self.content = Some(content);
        self
    }

    /// Load a RON content file. Later files override earlier ones.
    pub fn content_path(mut self, path: impl AsRef<Path>) -> Self {
        self.content_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn default_margin(mut self, margin: MarginPolicy) -> Self {
        self.default_margin = Some(margin);
        self
    }

    pub fn build(self) -> Result<ScriptEngine, EngineError> {
        let mut config = match (&self.config_path, self.config) {
            (_, Some(config)) => config,
            (Some(path), None) => EngineConfig::load_from_ron(path)?,
            (None, None) => EngineConfig::default(),
        };
        if let Some(max_depth) = self.max_depth {
            config.max_depth = max_depth;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(margin) = self.default_margin {
            config.default_margin = margin;
        }

        let registry: Arc<dyn ContentRegistry + Send + Sync> = match self.registry {
            Some(_) if self.content.is_some() || !self.content_paths.is_empty() => {
                return Err(EngineError::ConflictingContent);
            }
            Some(registry) => registry,
            None => {
                let mut content = self.content.unwrap_or_default();
                for path in &self.content_paths {
                    let loaded = ContentSet::load_from_ron(path)?;
                    tracing::debug!(
                        path = %path.display(),
                        qualities = loaded.qualities().len(),
                        events = loaded.events().len(),
                        "loaded content"
                    );
                    content.merge(loaded);
                }
                Arc::new(content)
            }
        };

        Ok(ScriptEngine {
            registry,
            config,
            empty: QualityStates::new(),
        })
    }
}
