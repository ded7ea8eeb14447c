//! Durable commit log contract

use crate::error::Result;
use crate::partition::TopicPartition;
use async_trait::async_trait;

/// Durable record of per-partition processing progress, shared by every
/// partition of one engine instance.
///
/// Offset queries are infallible: implementations resolve transient faults
/// internally (retry, cache), because the engine has no meaningful fallback
/// for an unknown resume point. All methods must be safe for concurrent
/// per-partition calls.
#[async_trait]
pub trait CommitLog: Send + Sync {
    /// Start the commit log (sync its backing storage)
    async fn start(&self) -> Result<()>;

    /// Stop the commit log, flushing pending commits
    async fn stop(&self);

    /// Last offset whose processing committed for `partition`, or -1 when
    /// none. Authoritative; a worker reads it once before going live and
    /// uses it as the resume watermark.
    async fn last_processed(&self, partition: &TopicPartition) -> i64;

    /// Fast, possibly stale progress estimate, or -1 when unknown.
    ///
    /// Used to pick an initial consume position before `last_processed` is
    /// confirmed; the worker's duplicate-drop check covers the gap between
    /// the two.
    async fn watermark(&self, partition: &TopicPartition) -> i64;
}
