//! Changelog replay contract and activation gating
//!
//! A freshly assigned partition may not process live events until its state
//! store has been rebuilt from the changelog. Each partition gets its own
//! [`ActivationGate`]; the replayer opens a gate as soon as that partition's
//! history is fully applied, so one slow partition never delays activation
//! of partitions whose replay already finished.

use crate::error::Result;
use crate::partition::TopicPartition;
use crate::store::{ChangeLogPartition, StateStore};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Blocks a worker's dispatch loop until its partition's changelog history
/// has been fully replayed.
#[derive(Clone)]
pub struct ActivationGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ActivationGate {
    /// A gate that has not opened yet
    pub fn closed() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A gate that is already open (partition prepped ahead of assignment)
    pub fn open_now() -> Self {
        let gate = Self::closed();
        gate.open();
        gate
    }

    /// Open the gate, releasing every waiter. Idempotent.
    pub fn open(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether the gate has opened
    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Complete once the gate opens; immediately if it already has
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// One partition's replay work: apply changelog history into `store`, then
/// open `gate`.
pub struct ReplayTask<T: StateStore> {
    /// Partition whose history is being replayed
    pub partition: TopicPartition,
    /// Store to reconstruct, via [`ChangeLogPartition::apply_change`]
    pub store: ChangeLogPartition<T>,
    /// Gate to open once this partition's history is fully applied
    pub gate: ActivationGate,
}

/// Bulk reconstruction of state stores ahead of live processing.
///
/// Implementations consume the changelog topic however they like; the engine
/// only requires that each task's gate opens once that partition's store is
/// fully rebuilt (per partition, not per batch), and that the call resolves
/// when all tasks have settled.
#[async_trait]
pub trait ChangelogReplayer<T: StateStore>: Send + Sync {
    /// Replay history for every task. Returns the number of changelog
    /// records applied.
    async fn replay(&self, tasks: Vec<ReplayTask<T>>) -> Result<u64>;
}
