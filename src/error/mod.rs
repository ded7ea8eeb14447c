//! Error types for streamsource
//!
//! One crate-wide error enum plus a `Result` alias. Handler failures are
//! deliberately *not* propagated through this type on the hot path: the
//! worker logs them and leaves the offset uncommitted, so recovery happens
//! through durable-log replay after a restart rather than in-process retry.

use crate::partition::TopicPartition;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying consumer client has been closed; polling must stop.
    #[error("consumer client closed")]
    ClientClosed,

    #[error("commit log error: {0}")]
    CommitLog(String),

    #[error("changelog replay error: {0}")]
    Replay(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("partition not assigned: {0}")]
    PartitionNotFound(TopicPartition),

    #[error("rebalance protocol error: {0}")]
    Protocol(String),

    #[error("engine is shutting down")]
    ShuttingDown,
}
