//! Environment-sourced configuration for the store's backing directory and
//! cache/commit tuning.

pub mod error;

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use flow_store::PayloadStoreOptions;

pub use error::ConfigError;

fn default_cache_size() -> usize {
    1 << 20
}

fn default_commit_concurrency() -> usize {
    16
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

fn default_proactive_persist_interval_ms() -> u64 {
    100
}

/// Everything needed to stand up a `PayloadStore` over a libmdbx-backed
/// directory. Loaded from environment variables prefixed `FLOW_STORE_`.
#[derive(Clone, Debug, Deserialize)]
pub struct FlowStoreConfig {
    pub storage_path: PathBuf,

    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    #[serde(default = "default_commit_concurrency")]
    pub commit_concurrency: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_proactive_persist_interval_ms")]
    pub proactive_persist_interval_ms: u64,
}

impl FlowStoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = envy::prefixed("FLOW_STORE_")
            .from_env::<Self>()
            .map_err(ConfigError::from)?;
        tracing::info!(storage_path = ?config.storage_path, cache_size = config.cache_size, "loaded flow-store config from environment");
        Ok(config)
    }

    pub fn payload_store_options(&self) -> PayloadStoreOptions {
        PayloadStoreOptions {
            cache_size: self.cache_size,
            commit_concurrency: self.commit_concurrency,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            proactive_persist_interval: Duration::from_millis(self.proactive_persist_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_store_options_carries_env_overrides() {
        let config = FlowStoreConfig {
            storage_path: PathBuf::from("/tmp/flow-archive"),
            cache_size: 64,
            commit_concurrency: 4,
            flush_interval_ms: 500,
            proactive_persist_interval_ms: 50,
        };

        let options = config.payload_store_options();
        assert_eq!(options.cache_size, 64);
        assert_eq!(options.commit_concurrency, 4);
        assert_eq!(options.flush_interval, Duration::from_millis(500));
        assert_eq!(options.proactive_persist_interval, Duration::from_millis(50));
    }
}
