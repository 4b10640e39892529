//! Process-wide engine configuration.
//!
//! A single [`EngineConfig`] is constructed once per process and passed
//! explicitly through the API surface; workers receive a frozen `Arc` snapshot
//! rather than touching global mutable state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct EngineConfig {
    /// Opaque endpoint for the external cluster job runner. Out of scope to
    /// dial from this crate; kept only so it threads through the config the
    /// way the source system's `settings.py` carries it.
    #[serde(default)]
    pub job_server_endpoint: Option<String>,

    /// Default number of shuffle partitions when a query does not specify one.
    #[serde(default = "EngineConfig::default_partitions")]
    pub default_partitions: u32,

    /// Default capacity of a BitmapLRU for WIDE-indexed columns.
    #[serde(default = "EngineConfig::default_lru_size")]
    pub default_lru_size: usize,

    /// Initial mmap size for a writer's KVStore environment, in bytes.
    #[serde(default = "EngineConfig::default_map_size")]
    pub default_map_size: usize,

    /// Records buffered before a write transaction is committed and the
    /// map-growth check runs.
    #[serde(default = "EngineConfig::default_commit_threshold")]
    pub commit_threshold: u64,

    /// Map growth factor applied when free pages drop below the watermark.
    #[serde(default = "EngineConfig::default_growth_factor")]
    pub growth_factor: f64,

    /// Fraction of mapped pages that must remain free, else the map grows.
    #[serde(default = "EngineConfig::default_high_watermark")]
    pub high_watermark: f64,

    /// Number of retries `kv::Env::open` attempts on lock contention.
    #[serde(default = "EngineConfig::default_open_retries")]
    pub open_retries: u32,

    /// Delay between open retries.
    #[serde(default = "EngineConfig::default_open_retry_delay_ms")]
    pub open_retry_delay_ms: u64,

    /// Scratch directory for writer temp files and shuffle spill files.
    #[serde(default = "EngineConfig::default_tmp_dir")]
    pub tmp_dir: String,
}

impl EngineConfig {
    fn default_partitions() -> u32 {
        16
    }
    fn default_lru_size() -> usize {
        10_000
    }
    fn default_map_size() -> usize {
        100 * 1024 * 1024
    }
    fn default_commit_threshold() -> u64 {
        50_000
    }
    fn default_growth_factor() -> f64 {
        1.5
    }
    fn default_high_watermark() -> f64 {
        0.75
    }
    fn default_open_retries() -> u32 {
        11
    }
    fn default_open_retry_delay_ms() -> u64 {
        5_000
    }
    fn default_tmp_dir() -> String {
        std::env::temp_dir().to_string_lossy().into_owned()
    }

    /// Wrap in an `Arc` for sharing the frozen snapshot across worker tasks.
    pub fn frozen(self) -> Arc<EngineConfig> {
        Arc::new(self)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            job_server_endpoint: None,
            default_partitions: Self::default_partitions(),
            default_lru_size: Self::default_lru_size(),
            default_map_size: Self::default_map_size(),
            commit_threshold: Self::default_commit_threshold(),
            growth_factor: Self::default_growth_factor(),
            high_watermark: Self::default_high_watermark(),
            open_retries: Self::default_open_retries(),
            open_retry_delay_ms: Self::default_open_retry_delay_ms(),
            tmp_dir: Self::default_tmp_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_constants() {
        let c = EngineConfig::default();
        assert_eq!(c.default_partitions, 16);
        assert_eq!(c.default_lru_size, 10_000);
        assert_eq!(c.commit_threshold, 50_000);
        assert_eq!(c.open_retries, 11);
    }

    #[test]
    fn deserializes_with_partial_overrides() {
        let json = r#"{"default_partitions": 32}"#;
        let c: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(c.default_partitions, 32);
        assert_eq!(c.default_lru_size, 10_000);
    }
}
