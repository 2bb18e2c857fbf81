pub mod chance;
pub mod config;
pub mod context;
pub mod effect;
pub mod engine;
pub mod evaluator;
pub mod expr;
pub mod macros;
pub mod render;
pub mod scanner;
pub mod scope;
