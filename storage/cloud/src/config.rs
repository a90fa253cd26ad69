//! Tuning knobs of the cloud share I/O core.

use skyvault_primitives::PREFERRED_CHUNK_SIZE;
use std::time::Duration;

/// Chunk-sized admissions a read cache keeps in flight.
pub const PIPELINE_DEPTH: usize = 4;

/// Cache entries below which the retention pass stops evicting.
pub const MIN_CACHED_CHUNKS: usize = 3;

fn default_preferred_chunk_size() -> usize {
    PREFERRED_CHUNK_SIZE
}

fn default_pipeline_depth() -> usize {
    PIPELINE_DEPTH
}

fn default_backoff_schedule_secs() -> Vec<u64> {
    crate::retry::BACKOFF_SECONDS_FOR_5XX.to_vec()
}

fn default_min_cached_chunks() -> usize {
    MIN_CACHED_CHUNKS
}

/// Configuration of the cloud backend. All fields default to the tuned
/// constants above, so an empty config section is a valid one.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CloudStoreConfig {
    /// Chunk size for freshly created shares. Existing shares keep the
    /// chunk size they were written with.
    #[serde(default = "default_preferred_chunk_size")]
    pub preferred_chunk_size: usize,
    /// How many chunk fetches a share keeps in flight before its reader
    /// starts waiting on admission.
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
    /// Seconds to wait before each retry of a 5xx container failure; the
    /// schedule length bounds the retry count.
    #[serde(default = "default_backoff_schedule_secs")]
    pub backoff_schedule_secs: Vec<u64>,
    /// Floor under which the chunk cache's retention pass stops evicting.
    #[serde(default = "default_min_cached_chunks")]
    pub min_cached_chunks: usize,
}

impl Default for CloudStoreConfig {
    fn default() -> Self {
        Self {
            preferred_chunk_size: default_preferred_chunk_size(),
            pipeline_depth: default_pipeline_depth(),
            backoff_schedule_secs: default_backoff_schedule_secs(),
            min_cached_chunks: default_min_cached_chunks(),
        }
    }
}

impl CloudStoreConfig {
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        self.backoff_schedule_secs.iter().map(|&s| Duration::from_secs(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_the_tuned_defaults() {
        let config: CloudStoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CloudStoreConfig::default());
        assert_eq!(config.preferred_chunk_size, 512 * 1024);
        assert_eq!(config.pipeline_depth, 4);
        assert_eq!(config.backoff_schedule_secs, vec![0, 2, 10]);
        assert_eq!(config.min_cached_chunks, 3);
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let config: CloudStoreConfig =
            serde_json::from_str(r#"{"pipeline_depth": 8, "backoff_schedule_secs": [1]}"#)
                .unwrap();
        assert_eq!(config.pipeline_depth, 8);
        assert_eq!(config.backoff_schedule(), vec![Duration::from_secs(1)]);
        assert_eq!(config.preferred_chunk_size, 512 * 1024);
    }
}
