//! Exactly-once producer pool contract

use crate::context::ProducerRegistration;
use crate::partition::TopicPartition;
use async_trait::async_trait;

/// Transactional producer shared by every partition of one engine instance.
///
/// Internally thread-safe; the engine only registers contexts and drains
/// partitions, it never locks around the pool.
#[async_trait]
pub trait ProducerPool: Send + Sync {
    /// Registers one event context for gated, transactional production.
    ///
    /// The pool must eventually resolve the registration's execute gate for
    /// every context it accepts: `true` when the context may proceed,
    /// `false` once its partition is revoked. An unresolved gate stalls the
    /// partition's dispatch loop.
    fn register(&self, registration: ProducerRegistration);

    /// Resolves once `partition`'s outstanding transactional work has
    /// settled. In-flight contexts are allowed to complete (or be
    /// abandoned), not cut off.
    async fn revoke_partition(&self, partition: &TopicPartition);
}
