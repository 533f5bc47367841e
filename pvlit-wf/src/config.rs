//! Configuration for pvlit-wf
//!
//! Resolution priority: environment overrides, then the TOML config file,
//! then compiled defaults. Misconfiguration warns and falls back rather than
//! refusing to start, except for structurally broken config files.

use pvlit_common::config::{env_override, load_toml_config, resolve_config_path, LoggingConfig};
use pvlit_common::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::endpoints::EndpointConfig;

/// Tunables for the guaranteed processing pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Auto-pass selection is applied over in-memory batches of this size
    pub batch_size: usize,
    /// Global worker pool bound
    pub max_concurrency: usize,
    /// Hard per-endpoint inflight cap, enforced even when the global budget
    /// is idle
    pub per_endpoint_concurrency: u32,
    /// Hard timeout per endpoint call; exceeding it counts as a failure
    pub request_timeout_secs: u64,
    /// Attempt budget per item before it becomes a durable failure
    pub max_attempts_per_item: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Consecutive failures before an endpoint is excluded from selection
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
    /// Short cooldown applied after every failure, streak or not
    pub endpoint_cooldown_ms: u64,
    /// Persist the job snapshot at most once per this many resolved items
    pub progress_persist_items: usize,
    /// ... or once this many seconds passed since the last persist
    pub progress_persist_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_concurrency: 8,
            per_endpoint_concurrency: 2,
            request_timeout_secs: 45,
            max_attempts_per_item: 6,
            backoff_base_ms: 500,
            backoff_cap_ms: 15_000,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown_secs: 60,
            endpoint_cooldown_ms: 250,
            progress_persist_items: 5,
            progress_persist_secs: 2,
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_secs)
    }

    pub fn endpoint_cooldown(&self) -> Duration {
        Duration::from_millis(self.endpoint_cooldown_ms)
    }

    /// Warn about values that undermine the pipeline's guarantees.
    ///
    /// The attempt budget should be at least twice the endpoint count so
    /// every item gets more than one shot at each endpoint before giving up.
    pub fn validate(&self, endpoint_count: usize) {
        if self.max_concurrency == 0 {
            warn!("max_concurrency is 0, pipeline will not make progress");
        }
        if endpoint_count > 0 && (self.max_attempts_per_item as usize) < endpoint_count * 2 {
            warn!(
                max_attempts_per_item = self.max_attempts_per_item,
                endpoint_count,
                "max_attempts_per_item below 2x endpoint count, items may fail before trying every endpoint"
            );
        }
    }
}

/// Full service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_address: String,
    /// SQLite database path; unset runs on the in-memory store
    pub database_path: Option<String>,
    pub logging: LoggingConfig,
    pub endpoints: Vec<EndpointConfig>,
    pub pipeline: PipelineConfig,
    /// Auto-pass percentage used when an organization has no explicit setting
    pub auto_pass_percent_default: u8,
    /// Default batch size for reviewer checkout when the request omits one
    pub allocation_batch_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5810".to_string(),
            database_path: None,
            logging: LoggingConfig::default(),
            endpoints: Vec::new(),
            pipeline: PipelineConfig::default(),
            auto_pass_percent_default: 0,
            allocation_batch_size: 10,
        }
    }
}

impl ServiceConfig {
    /// Load configuration: TOML file (if resolvable) plus env overrides
    pub fn load() -> Result<Self> {
        let mut config = match resolve_config_path("pvlit-wf") {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading config file");
                Self::from_file(&path)?
            }
            None => {
                tracing::info!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        load_toml_config(path)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(bind) = env_override::<String>("PVLIT_WF_BIND") {
            self.bind_address = bind;
        }
        if let Some(db) = env_override::<String>("PVLIT_WF_DATABASE") {
            self.database_path = Some(db);
        }
        if let Some(level) = env_override::<String>("PVLIT_WF_LOG") {
            self.logging.level = level;
        }
        if let Some(pct) = env_override::<u8>("PVLIT_WF_AUTO_PASS_PERCENT") {
            self.auto_pass_percent_default = pct;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = PipelineConfig::default();
        assert!(config.max_concurrency > 0);
        assert!(config.backoff_base() < config.backoff_cap());
        assert!(config.circuit_breaker_threshold > 0);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            bind_address = "0.0.0.0:8080"

            [[endpoints]]
            name = "clf-1"
            url = "http://clf-1.internal/classify"

            [pipeline]
            max_concurrency = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.pipeline.max_concurrency, 4);
        // Unspecified pipeline keys keep their defaults
        assert_eq!(
            config.pipeline.max_attempts_per_item,
            PipelineConfig::default().max_attempts_per_item
        );
    }
}
