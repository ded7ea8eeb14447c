//! Engine configuration
//!
//! Plain configuration structs with named defaults. Loading them from files,
//! flags, or the environment is the embedding application's concern.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum number of records fetched into one partition batch
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Default upper bound on a single poll iteration, in milliseconds.
///
/// Polling is bounded so a cancelled run observes closure promptly.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10_000;

/// Floor for the per-partition event channel capacity
pub const MIN_EVENT_INPUT_CAPACITY: usize = 100;

/// Configuration for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Consumer group this engine instance joins
    pub group_id: String,

    /// Source topic the engine consumes
    pub topic: String,

    /// Changelog topic backing the per-partition state stores
    pub changelog_topic: String,

    /// Maximum records per fetched batch; also drives per-partition channel
    /// sizing
    pub max_batch_size: usize,

    /// Upper bound on a single poll iteration (milliseconds)
    pub poll_timeout_ms: u64,
}

impl EngineConfig {
    /// Create a configuration with defaults for everything but the names
    pub fn new(
        group_id: impl Into<String>,
        topic: impl Into<String>,
        changelog_topic: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            topic: topic.into(),
            changelog_topic: changelog_topic.into(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }

    /// Set the maximum batch size
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Set the poll timeout in milliseconds
    pub fn poll_timeout_ms(mut self, poll_timeout_ms: u64) -> Self {
        self.poll_timeout_ms = poll_timeout_ms;
        self
    }

    /// Capacity of the per-partition event channel
    pub fn event_input_capacity(&self) -> usize {
        (self.max_batch_size / 10).max(MIN_EVENT_INPUT_CAPACITY)
    }

    /// Capacity of the per-partition async-completion queue
    pub fn async_job_capacity(&self) -> usize {
        self.event_input_capacity() * 4
    }

    /// Poll timeout as a [`Duration`]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new("group", "orders", "orders-changelog");
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.poll_timeout_ms, DEFAULT_POLL_TIMEOUT_MS);
    }

    #[test]
    fn test_channel_sizing() {
        let config = EngineConfig::new("g", "t", "t-changelog").max_batch_size(10_000);
        assert_eq!(config.event_input_capacity(), 1000);
        assert_eq!(config.async_job_capacity(), 4000);
    }

    #[test]
    fn test_channel_sizing_floor() {
        let config = EngineConfig::new("g", "t", "t-changelog").max_batch_size(50);
        assert_eq!(config.event_input_capacity(), MIN_EVENT_INPUT_CAPACITY);
        assert_eq!(config.async_job_capacity(), MIN_EVENT_INPUT_CAPACITY * 4);
    }
}
