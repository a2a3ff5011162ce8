//! Plain, `Default`-backed configuration structs for the orchestrator and
//! its caches/fallback layer, in the same spirit as the teacher's client
//! configuration types: no config file parser, just structs the embedding
//! application fills in and passes by value.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for [`crate::orchestrator::Orchestrator::orchestrate`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub llm_model: String,
    pub planning_temperature: f32,
    pub max_task_depth: u32,
    pub task_timeout: Duration,
    pub parallel_execution: bool,
    pub task_caching: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            llm_model: "gpt-4o-mini".to_string(),
            planning_temperature: 0.3,
            max_task_depth: 5,
            task_timeout: Duration::from_millis(60_000),
            parallel_execution: true,
            task_caching: true,
        }
    }
}

/// Tunables for the response/intent [`crate::cache::TtlLruCache`] instances.
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    pub max_size: usize,
    pub ttl: Duration,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Tunables for the [`crate::fallback::FallbackEngine`].
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub min_confidence: u8,
    pub max_rules: usize,
    pub rules_dir: PathBuf,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            min_confidence: 70,
            max_rules: 100,
            rules_dir: crate::fallback::default_rules_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_config_defaults_match_spec() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.planning_temperature, 0.3);
        assert_eq!(cfg.max_task_depth, 5);
        assert!(cfg.parallel_execution);
    }

    #[test]
    fn response_cache_config_defaults() {
        let cfg = ResponseCacheConfig::default();
        assert_eq!(cfg.max_size, 1000);
        assert_eq!(cfg.ttl, Duration::from_secs(3600));
    }
}
