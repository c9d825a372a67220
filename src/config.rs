//! Engine configuration, loadable from the environment.

use config::{Config, Environment};
use serde::Deserialize;

use crate::domain::error::{ChainError, ChainResult};

/// Defaults applied to every run unless a chain or step overrides them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Temperature used when neither the step nor the chain sets one.
    pub default_temperature: f32,
    /// Max tokens used when neither the step nor the chain sets one.
    pub default_max_tokens: u32,
    /// Model round-trip bound for the tool invocation loop.
    pub max_tool_depth: u32,
    /// Collective ceiling for one parallel LLM branch.
    pub parallel_branch_timeout_ms: u64,
    /// Token usage substituted when a provider reports none, keeping cost
    /// accounting deterministic under the mock provider.
    pub mock_prompt_tokens: u32,
    pub mock_completion_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_temperature: 0.7,
            default_max_tokens: 1000,
            max_tool_depth: 5,
            parallel_branch_timeout_ms: 30_000,
            mock_prompt_tokens: 10,
            mock_completion_tokens: 20,
        }
    }
}

impl EngineConfig {
    /// Load overrides from `LLM_CHAINS_*` environment variables on top of
    /// the defaults.
    pub fn load() -> ChainResult<Self> {
        let settings = Config::builder()
            .add_source(Environment::with_prefix("LLM_CHAINS"))
            .build()
            .map_err(|e| ChainError::configuration(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ChainError::configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_temperature, 0.7);
        assert_eq!(config.default_max_tokens, 1000);
        assert_eq!(config.max_tool_depth, 5);
        assert_eq!(config.parallel_branch_timeout_ms, 30_000);
    }

    #[test]
    fn test_load_without_env_uses_defaults() {
        let config = EngineConfig::load().expect("load");
        assert_eq!(config.max_tool_depth, EngineConfig::default().max_tool_depth);
    }
}
