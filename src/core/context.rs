/// Evaluation context - per-call alias table, diagnostics, and random source.
use rand::RngCore;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::config::EngineConfig;
use crate::schema::quality::{QualityState, QualityStates, Value};
use crate::schema::registry::ContentRegistry;

/// Category of a non-fatal evaluation problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A block matched no grammar rule and was emitted as literal text.
    ParseDegrade,
    /// A reference named a quality with neither state nor definition.
    UnresolvedReference,
    /// Nested expansion hit the depth ceiling; the raw text was kept.
    RecursionLimitExceeded,
    /// Zero margin or zero divisor; a fallback value was used.
    DivisionDegenerate,
    /// A `{` without a matching `}` or a stray `}`.
    UnbalancedBraces,
    /// An alias was assigned twice in one call; the first binding stands.
    AliasRebound,
    /// A random selection had nothing to choose from.
    EmptySelection,
}

/// A problem recorded during evaluation, surfaced to authoring tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// The script text the problem was found in.
    pub snippet: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {} in `{}`", self.kind, self.message, self.snippet)
    }
}

/// The quality `$.` refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfBinding {
    pub id: String,
    /// Explicit state; when `None`, the local state map is consulted.
    pub state: Option<QualityState>,
}

impl SelfBinding {
    pub fn new(id: &str, state: Option<QualityState>) -> Self {
        Self {
            id: id.to_string(),
            state,
        }
    }
}

/// Position in the expansion tree: recursion depth, the self binding in
/// effect, and the challenge target when evaluating a margin.
#[derive(Debug, Clone, Default)]
pub(crate) struct Frame {
    pub depth: u32,
    pub self_binding: Option<SelfBinding>,
    pub target: Option<f64>,
}

impl Frame {
    pub fn new(depth: u32, self_binding: Option<SelfBinding>) -> Self {
        Self {
            depth,
            self_binding,
            target: None,
        }
    }

    pub fn rebind(&self, binding: SelfBinding) -> Frame {
        Frame {
            self_binding: Some(binding),
            ..self.clone()
        }
    }

    pub fn with_target(&self, target: f64) -> Frame {
        Frame {
            target: Some(target),
            ..self.clone()
        }
    }
}

/// State owned by one top-level evaluation call. Shared content and state
/// maps are only borrowed; nothing here outlives the call.
pub struct EvaluationContext<'a> {
    pub(crate) local: &'a QualityStates,
    pub(crate) world: &'a QualityStates,
    pub(crate) registry: &'a dyn ContentRegistry,
    pub(crate) config: &'a EngineConfig,
    pub(crate) rng: &'a mut dyn RngCore,
    aliases: FxHashMap<String, Value>,
    diagnostics: Vec<Diagnostic>,
    expansions: u32,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        local: &'a QualityStates,
        world: &'a QualityStates,
        registry: &'a dyn ContentRegistry,
        config: &'a EngineConfig,
        rng: &'a mut dyn RngCore,
    ) -> Self {
        Self {
            local,
            world,
            registry,
            config,
            rng,
            aliases: FxHashMap::default(),
            diagnostics: Vec::new(),
            expansions: 0,
        }
    }

    pub fn alias(&self, name: &str) -> Option<&Value> {
        self.aliases.get(name)
    }

    /// Bind an alias. Aliases are write-once: a second assignment is
    /// ignored and recorded.
    pub fn bind_alias(&mut self, name: &str, value: Value) -> bool {
        if self.aliases.contains_key(name) {
            self.record(
                DiagnosticKind::AliasRebound,
                format!("alias @{} is already bound", name),
                name,
            );
            return false;
        }
        self.aliases.insert(name.to_string(), value);
        true
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Record a diagnostic once per kind and snippet, and log it.
    pub fn record(&mut self, kind: DiagnosticKind, message: String, snippet: &str) {
        match kind {
            DiagnosticKind::UnresolvedReference
            | DiagnosticKind::DivisionDegenerate
            | DiagnosticKind::EmptySelection => {
                tracing::debug!(?kind, snippet = %snippet, "{}", message)
            }
            _ => tracing::warn!(?kind, snippet = %snippet, "{}", message),
        }
        let seen = self
            .diagnostics
            .iter()
            .any(|d| d.kind == kind && d.snippet == snippet);
        if !seen {
            self.diagnostics.push(Diagnostic {
                kind,
                message,
                snippet: snippet.to_string(),
            });
        }
    }

    /// A frame one level deeper, or `None` when the depth ceiling or the
    /// expansion budget is exhausted.
    pub(crate) fn descend(&mut self, frame: &Frame, snippet: &str) -> Option<Frame> {
        if frame.depth >= self.config.max_depth || self.expansions >= self.config.expansion_budget
        {
            self.record(
                DiagnosticKind::RecursionLimitExceeded,
                format!("expansion stopped at depth {}", frame.depth),
                snippet,
            );
            return None;
        }
        self.expansions += 1;
        Some(Frame {
            depth: frame.depth + 1,
            ..frame.clone()
        })
    }
}
