//! Group coordination
//!
//! The [`GroupCoordinator`] bridges group-membership assign/revoke callbacks
//! into state-store and worker lifecycle, drives changelog replay for newly
//! assigned partitions, feeds polled record batches to the matching workers,
//! and exposes ad hoc interjection scheduling. It owns no per-record state
//! itself: everything per-partition lives in the workers, and the two maps
//! here are touched only on assignment, revocation, and interjection.

mod replay;

pub use replay::{ActivationGate, ChangelogReplayer, ReplayTask};

use crate::cancel::CancelScope;
use crate::client::{ConsumerClient, FetchBatch, IncrementalRebalancer, RebalanceProtocol};
use crate::commit::CommitLog;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::handler::EventHandler;
use crate::partition::TopicPartition;
use crate::producer::ProducerPool;
use crate::store::{ChangeLogRegistry, StateStore};
use crate::worker::{Interjection, InterjectionSpec, Interjector, PartitionWorker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

struct PartitionPrep {
    gate: ActivationGate,
    scope: CancelScope,
}

/// Bridges group membership into partition lifecycle and record routing.
pub struct GroupCoordinator<T: StateStore> {
    config: EngineConfig,
    scope: CancelScope,
    client: Arc<dyn ConsumerClient>,
    commit_log: Arc<dyn CommitLog>,
    producer_pool: Arc<dyn ProducerPool>,
    registry: Arc<ChangeLogRegistry<T>>,
    replayer: Arc<dyn ChangelogReplayer<T>>,
    handler: Arc<dyn EventHandler<T>>,
    interjections: Vec<InterjectionSpec<T>>,
    incremental: Option<Arc<dyn IncrementalRebalancer>>,
    workers: Mutex<HashMap<i32, PartitionWorker<T>>>,
    prepping: Mutex<HashMap<i32, PartitionPrep>>,
}

impl<T: StateStore> GroupCoordinator<T> {
    /// Create a coordinator.
    ///
    /// `scope` is the engine's cancellation root (or a fork of it); every
    /// partition worker gets its own child, so revoking one partition never
    /// disturbs another while cancelling `scope` tears everything down.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        scope: CancelScope,
        client: Arc<dyn ConsumerClient>,
        commit_log: Arc<dyn CommitLog>,
        producer_pool: Arc<dyn ProducerPool>,
        registry: Arc<ChangeLogRegistry<T>>,
        replayer: Arc<dyn ChangelogReplayer<T>>,
        handler: Arc<dyn EventHandler<T>>,
    ) -> Self {
        Self {
            config,
            scope,
            client,
            commit_log,
            producer_pool,
            registry,
            replayer,
            handler,
            interjections: Vec::new(),
            incremental: None,
            workers: Mutex::new(HashMap::new()),
            prepping: Mutex::new(HashMap::new()),
        }
    }

    /// Register recurring interjections, armed per partition on activation
    pub fn with_interjections(mut self, interjections: Vec<InterjectionSpec<T>>) -> Self {
        self.interjections = interjections;
        self
    }

    /// Install the incremental/cooperative rebalance extension
    pub fn with_incremental_rebalancer(mut self, rebalancer: Arc<dyn IncrementalRebalancer>) -> Self {
        self.incremental = Some(rebalancer);
        self
    }

    /// Partitions with a live worker
    pub fn owned_partitions(&self) -> Vec<i32> {
        let mut partitions: Vec<i32> = self.workers.lock().keys().copied().collect();
        partitions.sort_unstable();
        partitions
    }

    /// Handle to the live worker for `partition`, if any
    pub fn worker(&self, partition: i32) -> Option<PartitionWorker<T>> {
        self.workers.lock().get(&partition).cloned()
    }

    /// Group-membership assignment callback.
    ///
    /// Partitions already prepped by a prior incremental prepare phase
    /// transition straight to workers; the rest get a store assigned and one
    /// replay task each, dispatched as a single bulk job. Every worker's
    /// startup gate belongs to its own partition, so replay completion is
    /// observed per partition. Must be called from within the engine's tokio
    /// runtime.
    pub fn partitions_assigned(&self, topic: &str, partitions: &[i32]) {
        if partitions.is_empty() {
            return;
        }
        debug!(topic, ?partitions, "partitions assigned");

        let assigned: Vec<TopicPartition> = partitions
            .iter()
            .map(|&p| TopicPartition::new(topic, p))
            .collect();

        let mut workers = self.workers.lock();
        let mut prepping = self.prepping.lock();
        let mut replay_tasks = Vec::new();
        let mut replay_scopes = Vec::new();

        for &partition in partitions {
            if workers.contains_key(&partition) {
                continue;
            }
            let tp = TopicPartition::new(topic, partition);
            let store = self.registry.assign(partition);
            let (gate, scope) = match prepping.remove(&partition) {
                // prepped (or prepping) ahead of time: its gate opens when
                // that replay finishes, no bulk job needed
                Some(prep) => (prep.gate, prep.scope),
                None => {
                    let gate = ActivationGate::closed();
                    let scope = self.scope.child();
                    replay_tasks.push(ReplayTask {
                        partition: tp.clone(),
                        store: store.clone(),
                        gate: gate.clone(),
                    });
                    replay_scopes.push((tp.clone(), scope.clone()));
                    (gate, scope)
                }
            };
            let worker = PartitionWorker::spawn(
                tp,
                store,
                Arc::clone(&self.commit_log),
                Arc::clone(&self.producer_pool),
                Arc::clone(&self.handler),
                self.interjections.clone(),
                gate,
                scope,
                &self.config,
            );
            workers.insert(partition, worker);
        }
        drop(prepping);
        drop(workers);

        if !replay_tasks.is_empty() {
            self.spawn_bulk_replay(replay_tasks, replay_scopes);
        }
        if let Some(incremental) = &self.incremental {
            incremental.partitions_assigned(assigned);
        }
    }

    fn spawn_bulk_replay(
        &self,
        tasks: Vec<ReplayTask<T>>,
        scopes: Vec<(TopicPartition, CancelScope)>,
    ) {
        let replayer = Arc::clone(&self.replayer);
        tokio::spawn(async move {
            let started = Instant::now();
            let partitions = tasks.len();
            match replayer.replay(tasks).await {
                Ok(applied) => {
                    let elapsed = started.elapsed();
                    let tps = applied as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
                    info!(
                        partitions,
                        records = applied,
                        ?elapsed,
                        tps = tps as u64,
                        "changelog replay complete"
                    );
                }
                Err(e) => {
                    // fail safe: a partition whose history is unknown must
                    // not go live; halt it and let a restart replay cleanly
                    error!(partitions, error = %e, "changelog replay failed; halting affected partitions");
                    for (tp, scope) in scopes {
                        warn!(partition = %tp, "halting partition after failed replay");
                        scope.cancel();
                    }
                }
            }
        });
    }

    /// Group-membership revocation callback.
    ///
    /// Revokes the worker if present, then always tears the store down
    /// through the registry, whether or not a worker existed.
    pub fn partitions_revoked(&self, topic: &str, partitions: &[i32]) {
        if partitions.is_empty() {
            return;
        }
        debug!(topic, ?partitions, "partitions revoked");
        let mut workers = self.workers.lock();
        for &partition in partitions {
            if let Some(worker) = workers.remove(&partition) {
                worker.revoke();
            }
            self.registry.revoke(partition);
        }
    }

    /// Incremental-rebalance prepare instruction: rebuild `partition`'s
    /// store in the background so a later assignment activates instantly.
    /// Idempotent while a prep is pending.
    pub fn prepare_partition(&self, partition: TopicPartition) {
        let mut prepping = self.prepping.lock();
        if prepping.contains_key(&partition.partition) {
            return;
        }
        let store = self.registry.assign(partition.partition);
        let gate = ActivationGate::closed();
        let scope = self.scope.child();
        prepping.insert(
            partition.partition,
            PartitionPrep {
                gate: gate.clone(),
                scope: scope.clone(),
            },
        );
        drop(prepping);

        let task = ReplayTask {
            partition: partition.clone(),
            store,
            gate,
        };
        let replayer = Arc::clone(&self.replayer);
        let incremental = self.incremental.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            debug!(partition = %partition, "prepping partition");
            tokio::select! {
                result = replayer.replay(vec![task]) => match result {
                    Ok(applied) => {
                        info!(
                            partition = %partition,
                            records = applied,
                            elapsed = ?started.elapsed(),
                            "partition prepped"
                        );
                        if let Some(incremental) = incremental {
                            incremental.partition_prepared(partition);
                        }
                    }
                    Err(e) => {
                        error!(partition = %partition, error = %e, "partition prep failed");
                    }
                },
                _ = scope.cancelled() => {
                    debug!(partition = %partition, "partition prep cancelled");
                }
            }
        });
    }

    /// Incremental-rebalance instruction to discard a pending prep
    pub fn forget_prepared(&self, partition: &TopicPartition) {
        let removed = self.prepping.lock().remove(&partition.partition);
        match removed {
            Some(prep) => prep.scope.cancel(),
            // a double assignment could land here; nothing sound to do
            None => warn!(partition = %partition, "no pending prep to forget"),
        }
    }

    /// Replace proposed starting offsets with the authoritative resume point
    /// before the client subscribes to newly assigned partitions.
    ///
    /// The commit-log watermark, not the broker-tracked consumer offset, is
    /// the resume point; the worker's duplicate-drop check covers any
    /// staleness in it.
    pub async fn adjust_offsets_before_assign(&self, assignments: &mut HashMap<TopicPartition, i64>) {
        for (tp, proposed) in assignments.iter_mut() {
            let watermark = self.commit_log.watermark(tp).await;
            if watermark > 0 {
                info!(partition = %tp, offset = watermark + 1, "resuming consumption from commit log");
                *proposed = watermark + 1;
            }
        }
    }

    /// Start the commit log, then poll until cancelled or the client closes,
    /// routing each polled batch to its partition's worker.
    ///
    /// Each iteration is bounded by the configured poll timeout so a
    /// cancelled run observes closure promptly; timeouts surface as empty
    /// polls, not errors.
    pub async fn run(&self) -> Result<()> {
        self.commit_log.start().await?;
        loop {
            if self.scope.is_cancelled() {
                return Ok(());
            }
            match self.client.poll(self.config.poll_timeout()).await {
                Ok(batches) => {
                    for batch in batches {
                        self.route(batch).await;
                    }
                }
                Err(EngineError::ClientClosed) => {
                    info!(group = %self.config.group_id, "consumer client closed");
                    return Ok(());
                }
                Err(e) => {
                    error!(group = %self.config.group_id, error = %e, "poll failed");
                }
            }
        }
    }

    async fn route(&self, batch: FetchBatch) {
        if batch.records.is_empty() {
            return;
        }
        let worker = self.workers.lock().get(&batch.partition.partition).cloned();
        match worker {
            Some(worker) => worker.add(batch.records).await,
            None => {
                trace!(partition = %batch.partition, "no live worker; dropping batch");
            }
        }
    }

    /// Enqueue a one-off interjection for `partition`.
    ///
    /// If a worker is live the interjection is serialized with its events
    /// and `callback` fires on completion; if no worker is live, `callback`
    /// fires immediately with no work done. Either way it fires exactly
    /// once.
    pub async fn interject(
        &self,
        partition: i32,
        interjector: impl Interjector<T> + 'static,
        callback: impl FnOnce() + Send + 'static,
    ) {
        self.interject_dyn(partition, Arc::new(interjector), Box::new(callback))
            .await;
    }

    async fn interject_dyn(
        &self,
        partition: i32,
        interjector: Arc<dyn Interjector<T>>,
        callback: Box<dyn FnOnce() + Send>,
    ) {
        let worker = self.workers.lock().get(&partition).cloned();
        let Some(worker) = worker else {
            callback();
            return;
        };
        let interjection = Interjection::one_off(
            interjector,
            worker.topic_partition().clone(),
            worker.interjection_sender(),
            Some(callback),
        );
        worker.enqueue_interjection(interjection).await;
    }

    /// Interject into every currently owned partition, waiting for each
    /// before issuing the next.
    ///
    /// A convenience for cross-partition aggregate operations (store
    /// statistics, flushes) without a dedicated timer per partition.
    pub async fn for_each_partition_sync(&self, interjector: impl Interjector<T> + 'static) {
        let interjector: Arc<dyn Interjector<T>> = Arc::new(interjector);
        for partition in self.owned_partitions() {
            let (tx, rx) = oneshot::channel();
            self.interject_dyn(
                partition,
                Arc::clone(&interjector),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .await;
            let _ = rx.await;
        }
    }

    /// Interject into every currently owned partition, waiting for all of
    /// them concurrently.
    pub async fn for_each_partition_async(&self, interjector: impl Interjector<T> + 'static) {
        let interjector: Arc<dyn Interjector<T>> = Arc::new(interjector);
        let mut completions = Vec::new();
        for partition in self.owned_partitions() {
            let (tx, rx) = oneshot::channel();
            self.interject_dyn(
                partition,
                Arc::clone(&interjector),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .await;
            completions.push(rx);
        }
        for completion in completions {
            let _ = completion.await;
        }
    }

    /// Begin an orderly departure from the group.
    ///
    /// With a cooperative protocol and a rebalancer installed, owned
    /// partitions are vacated voluntarily before the client and commit log
    /// stop; otherwise the stop is immediate. The returned receiver fires
    /// once, when departure completes.
    pub async fn leave(&self) -> oneshot::Receiver<()> {
        info!(group = %self.config.group_id, "leave signaled");
        let (tx, rx) = oneshot::channel();
        let incremental = if self.protocol_is_incremental().await {
            self.incremental.clone()
        } else {
            None
        };
        match incremental {
            None => {
                self.stop().await;
                let _ = tx.send(());
            }
            Some(incremental) => {
                let client = Arc::clone(&self.client);
                let commit_log = Arc::clone(&self.commit_log);
                let group = self.config.group_id.clone();
                tokio::spawn(async move {
                    incremental.gracefully_leave_group().await;
                    client.close();
                    commit_log.stop().await;
                    info!(group = %group, "left group");
                    let _ = tx.send(());
                });
            }
        }
        rx
    }

    async fn protocol_is_incremental(&self) -> bool {
        if self.incremental.is_none() {
            return false;
        }
        match self.client.active_protocol().await {
            Ok(RebalanceProtocol::IncrementalCooperative) => true,
            Ok(RebalanceProtocol::Eager) => false,
            Err(e) => {
                // fail safe to non-incremental behavior
                error!(group = %self.config.group_id, error = %e, "could not confirm group protocol");
                false
            }
        }
    }

    /// Stop the client and commit log immediately, leaving the group
    /// abruptly.
    pub async fn stop(&self) {
        self.client.close();
        self.commit_log.stop().await;
        info!(group = %self.config.group_id, "left group");
    }
}
