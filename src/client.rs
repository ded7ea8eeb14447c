//! Consumer-group client contract
//!
//! The engine rides atop whatever protocol the underlying client speaks; it
//! only needs polling, closure, and rebalance-protocol introspection here.
//! Assignment and revocation notifications are delivered by the client layer
//! invoking [`crate::coordinator::GroupCoordinator::partitions_assigned`] and
//! [`crate::coordinator::GroupCoordinator::partitions_revoked`].

use crate::error::Result;
use crate::partition::TopicPartition;
use crate::record::ConsumerRecord;
use async_trait::async_trait;
use std::time::Duration;

/// One polled batch of records for a single partition
#[derive(Debug, Clone)]
pub struct FetchBatch {
    /// Partition the records were fetched from
    pub partition: TopicPartition,
    /// Records in fetch order
    pub records: Vec<ConsumerRecord>,
}

/// Active group-membership rebalance protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceProtocol {
    /// Stop-the-world reassignment
    Eager,
    /// Partitions are revoked and reassigned gradually
    IncrementalCooperative,
}

/// Wire-level consumer-group client the engine polls.
#[async_trait]
pub trait ConsumerClient: Send + Sync {
    /// Poll for records, waiting at most `max_wait`. An empty result on
    /// timeout is normal. Returns [`crate::error::EngineError::ClientClosed`]
    /// once the client has been closed.
    async fn poll(&self, max_wait: Duration) -> Result<Vec<FetchBatch>>;

    /// Close the client, leaving the group
    fn close(&self);

    /// Rebalance protocol the group is currently using
    async fn active_protocol(&self) -> Result<RebalanceProtocol>;
}

/// Optional incremental/cooperative rebalance extension.
///
/// Installed when the group's balance strategy supports gradual handoff; the
/// coordinator reports prep progress through it and consults it on leave.
#[async_trait]
pub trait IncrementalRebalancer: Send + Sync {
    /// A partition's changelog prep finished; it can be assigned here
    /// without a stop-the-world replay.
    fn partition_prepared(&self, partition: TopicPartition);

    /// The listed partitions are now owned by this member
    fn partitions_assigned(&self, partitions: Vec<TopicPartition>);

    /// Resolves once this member has voluntarily vacated every owned
    /// partition.
    async fn gracefully_leave_group(&self);
}
