/// Engine configuration, loadable from RON.
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// How a challenge margin is chosen when the author omits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarginPolicy {
    /// The same margin for every challenge.
    Fixed(f64),
    /// `factor × target`.
    TargetMultiple(f64),
    /// A script expression evaluated with `target` bound, e.g. `"target / 2 + 5"`.
    Expression(String),
}

impl MarginPolicy {
    pub const DEFAULT_FACTOR: f64 = 2.0;
}

impl Default for MarginPolicy {
    fn default() -> Self {
        Self::TargetMultiple(Self::DEFAULT_FACTOR)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling on nested re-expansion of block results.
    pub max_depth: u32,
    /// Ceiling on the total number of nested expansions in one call.
    pub expansion_budget: u32,
    pub default_pivot: f64,
    pub default_min_cap: f64,
    pub default_max_cap: f64,
    pub default_margin: MarginPolicy,
    /// Seed for the fallback RNG used when a caller injects none.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            expansion_budget: 4096,
            default_pivot: 60.0,
            default_min_cap: 0.0,
            default_max_cap: 100.0,
            default_margin: MarginPolicy::default(),
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn load_from_ron(path: &Path) -> Result<EngineConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a config from RON. Omitted fields keep their defaults.
    pub fn parse_ron(input: &str) -> Result<EngineConfig, ConfigError> {
        Ok(ron::from_str(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.default_pivot, 60.0);
        assert_eq!(config.default_margin, MarginPolicy::TargetMultiple(2.0));
        assert!(config.seed.is_none());
    }

    #[test]
    fn partial_ron_keeps_defaults() {
        let config = EngineConfig::parse_ron(
            r#"(max_depth: 4, default_margin: Fixed(10.0), seed: Some(7))"#,
        )
        .unwrap();
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.default_margin, MarginPolicy::Fixed(10.0));
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.default_max_cap, 100.0);
    }

    #[test]
    fn expression_margin() {
        let config =
            EngineConfig::parse_ron(r#"(default_margin: Expression("target / 2"))"#).unwrap();
        assert_eq!(
            config.default_margin,
            MarginPolicy::Expression("target / 2".to_string())
        );
    }

    #[test]
    fn malformed_ron_is_an_error() {
        assert!(matches!(
            EngineConfig::parse_ron("(max_depth: \"ten\")"),
            Err(ConfigError::Ron(_))
        ));
    }
}
