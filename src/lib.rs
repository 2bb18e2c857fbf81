//! Storylet Engine - inline scripting for quality-based narrative content.
//!
//! Authored text embeds `{...}` blocks that read player and world
//! qualities, branch on conditions, compute skill-check chances, describe
//! state changes and call randomising macros. The engine evaluates them
//! against read-only state snapshots and never mutates that state itself.

pub mod core;
pub mod schema;

pub use crate::core::config::{EngineConfig, MarginPolicy};
pub use crate::core::context::{Diagnostic, DiagnosticKind, SelfBinding};
pub use crate::core::engine::{
    EngineError, EvalOptions, Evaluation, OptionOutcome, ScriptEngine, ScriptEngineBuilder,
    WorldState,
};
pub use crate::schema::quality::{QualityDefinition, QualityState, QualityStates, QualityType, Value};
pub use crate::schema::registry::{ContentRegistry, ContentSet};
