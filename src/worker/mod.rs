//! Per-partition worker: record intake, event dispatch, asynchronous
//! completion, timer-driven interjections, and the revocation handshake.
//!
//! Two tasks serve each assigned partition:
//!
//! - The **intake pump** turns raw record batches into event contexts,
//!   registers each with the producer pool, and feeds the dispatch loop.
//! - The **dispatch loop** owns all of the partition's mutable state
//!   (resume watermark, counters) and serializes events, finished async
//!   jobs, and interjections.
//!
//! The loops share only atomic counters and bounded channels; no lock is
//! taken on the hot path. The dispatch loop moves through
//! Created → Prepping → Active → Stopping → Stopped: it blocks on the
//! activation gate until the partition's changelog has been fully replayed,
//! runs live, and on revocation lets outstanding transactional work settle
//! through the producer pool before terminating. Closing the channels
//! happens only after both loops agree the partition is idle.

mod async_complete;
mod interjection;

pub use async_complete::{AsyncCompleter, AsyncJob};
pub use interjection::{InterjectionSpec, Interjector};

pub(crate) use interjection::Interjection;

use crate::cancel::CancelScope;
use crate::commit::CommitLog;
use crate::config::EngineConfig;
use crate::context::{EventContext, ExecutionState};
use crate::coordinator::ActivationGate;
use crate::handler::EventHandler;
use crate::partition::TopicPartition;
use crate::producer::ProducerPool;
use crate::record::ConsumerRecord;
use crate::store::{ChangeLogPartition, StateStore, StoreHandle};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace};

struct WorkerShared {
    pending: AtomicI64,
    processed: AtomicI64,
    // written only by the dispatch loop; shared for observation
    highest_offset: AtomicI64,
    active: AtomicBool,
    stopped: AtomicBool,
    scope: CancelScope,
}

/// Handle to one partition's worker.
///
/// Cloning shares the same worker; dropping every handle closes the intake
/// side once the worker has stopped.
pub struct PartitionWorker<T> {
    partition: TopicPartition,
    shared: Arc<WorkerShared>,
    intake: mpsc::Sender<Vec<ConsumerRecord>>,
    interjections: mpsc::Sender<Arc<Interjection<T>>>,
    completer: AsyncCompleter<T>,
}

impl<T> Clone for PartitionWorker<T> {
    fn clone(&self) -> Self {
        Self {
            partition: self.partition.clone(),
            shared: Arc::clone(&self.shared),
            intake: self.intake.clone(),
            interjections: self.interjections.clone(),
            completer: self.completer.clone(),
        }
    }
}

impl<T: StateStore> PartitionWorker<T> {
    /// Spawn the intake pump and dispatch loop for one assigned partition.
    ///
    /// Normally called by the coordinator on assignment. `gate` must open
    /// only once the partition's changelog has been fully replayed: no live
    /// event reaches the store before its history is reconstructed. `scope`
    /// is the partition's own fork of the engine's cancellation tree.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        partition: TopicPartition,
        store: ChangeLogPartition<T>,
        commit_log: Arc<dyn CommitLog>,
        producer_pool: Arc<dyn ProducerPool>,
        handler: Arc<dyn EventHandler<T>>,
        interjections: Vec<InterjectionSpec<T>>,
        gate: ActivationGate,
        scope: CancelScope,
        config: &EngineConfig,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::channel(config.event_input_capacity());
        let (async_tx, async_rx) = mpsc::channel(config.async_job_capacity());
        let (interject_tx, interject_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (stopped_tx, stopped_rx) = mpsc::channel(1);

        let non_full = Arc::new(Notify::new());
        let completer = AsyncCompleter::new(async_tx, Arc::clone(&non_full));
        let shared = Arc::new(WorkerShared {
            pending: AtomicI64::new(0),
            processed: AtomicI64::new(0),
            highest_offset: AtomicI64::new(-1),
            active: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            scope: scope.clone(),
        });

        let pump = IntakePump {
            partition: partition.clone(),
            store: store.handle(),
            producer_pool: Arc::clone(&producer_pool),
            event_tx,
            scope: scope.clone(),
            shared: Arc::clone(&shared),
        };
        tokio::spawn(pump.run(intake_rx, stop_tx, stopped_rx));

        let dispatch = DispatchLoop {
            partition: partition.clone(),
            store,
            commit_log,
            producer_pool,
            handler,
            specs: interjections,
            gate,
            scope,
            shared: Arc::clone(&shared),
            interject_tx: interject_tx.clone(),
            non_full,
        };
        tokio::spawn(dispatch.run(event_rx, async_rx, interject_rx, stop_rx, stopped_tx));

        Self {
            partition,
            shared,
            intake: intake_tx,
            interjections: interject_tx,
            completer,
        }
    }

    /// Enqueue a batch of raw records; no-op once the partition is revoked.
    ///
    /// The intake queue holds one batch: a caller of a full queue blocks
    /// until the pump catches up. Backpressure here is intentional.
    pub async fn add(&self, records: Vec<ConsumerRecord>) {
        if self.shared.scope.is_cancelled() {
            return;
        }
        let count = records.len() as i64;
        self.shared.pending.fetch_add(count, Ordering::Relaxed);
        if self.intake.send(records).await.is_err() {
            // worker shut down between the check and the send
            self.shared.pending.fetch_sub(count, Ordering::Relaxed);
        }
    }

    /// Signal cancellation. Does not block for shutdown completion: the
    /// worker stops accepting intake immediately and drains asynchronously.
    pub fn revoke(&self) {
        self.shared.scope.cancel();
    }

    /// Partition this worker serves
    pub fn topic_partition(&self) -> &TopicPartition {
        &self.partition
    }

    /// Records accepted but not yet processed
    pub fn pending(&self) -> i64 {
        self.shared.pending.load(Ordering::Relaxed)
    }

    /// Records forwarded to the application handler
    pub fn processed(&self) -> i64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    /// Highest offset forwarded so far; monotonically non-decreasing.
    /// Events below this offset are dropped as already processed.
    pub fn highest_offset(&self) -> i64 {
        self.shared.highest_offset.load(Ordering::Relaxed)
    }

    /// Whether the dispatch loop has passed changelog replay and gone live
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Whether the worker has fully stopped (revocation drain included)
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Completer for jobs the application finishes off the dispatch loop
    pub fn async_completer(&self) -> AsyncCompleter<T> {
        self.completer.clone()
    }

    pub(crate) fn interjection_sender(&self) -> mpsc::Sender<Arc<Interjection<T>>> {
        self.interjections.clone()
    }

    /// Enqueue an armed interjection; fires its callback if the worker is
    /// already gone so the caller's completion guarantee holds.
    pub(crate) async fn enqueue_interjection(&self, interjection: Arc<Interjection<T>>) -> bool {
        match self.interjections.send(interjection).await {
            Ok(()) => true,
            Err(send_error) => {
                send_error.0.fire_callback();
                false
            }
        }
    }
}

/// Turns polled batches into registered event contexts.
struct IntakePump<T> {
    partition: TopicPartition,
    store: StoreHandle<T>,
    producer_pool: Arc<dyn ProducerPool>,
    event_tx: mpsc::Sender<EventContext<T>>,
    scope: CancelScope,
    shared: Arc<WorkerShared>,
}

impl<T: StateStore> IntakePump<T> {
    async fn run(
        self,
        mut intake_rx: mpsc::Receiver<Vec<ConsumerRecord>>,
        stop_tx: mpsc::Sender<()>,
        mut stopped_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                Some(records) = intake_rx.recv() => {
                    if self.scope.is_cancelled() {
                        continue;
                    }
                    for record in records {
                        let ec = EventContext::for_record(
                            self.scope.clone(),
                            self.partition.clone(),
                            record,
                            self.store.clone(),
                        );
                        self.producer_pool.register(ec.register());
                        if self.event_tx.send(ec).await.is_err() {
                            return;
                        }
                    }
                }
                _ = self.scope.cancelled() => {
                    debug!(partition = %self.partition, "closing worker");
                    let _ = stop_tx.send(()).await;
                    // close the channels only once the dispatch loop agrees
                    // the partition is idle
                    let _ = stopped_rx.recv().await;
                    self.shared.stopped.store(true, Ordering::Release);
                    debug!(partition = %self.partition, "closed worker");
                    return;
                }
            }
        }
    }
}

/// Owns the partition's mutable state and serializes all processing.
struct DispatchLoop<T> {
    partition: TopicPartition,
    store: ChangeLogPartition<T>,
    commit_log: Arc<dyn CommitLog>,
    producer_pool: Arc<dyn ProducerPool>,
    handler: Arc<dyn EventHandler<T>>,
    specs: Vec<InterjectionSpec<T>>,
    gate: ActivationGate,
    scope: CancelScope,
    shared: Arc<WorkerShared>,
    interject_tx: mpsc::Sender<Arc<Interjection<T>>>,
    non_full: Arc<Notify>,
}

impl<T: StateStore> DispatchLoop<T> {
    async fn run(
        self,
        mut event_rx: mpsc::Receiver<EventContext<T>>,
        mut async_rx: mpsc::Receiver<AsyncJob<T>>,
        mut interject_rx: mpsc::Receiver<Arc<Interjection<T>>>,
        mut stop_rx: mpsc::Receiver<()>,
        stopped_tx: mpsc::Sender<()>,
    ) {
        let started = Instant::now();

        // Prepping: fix the resume point, then wait out changelog replay.
        // Events at or below the last processed offset are dropped later.
        let last_processed = self.commit_log.last_processed(&self.partition).await;
        self.shared
            .highest_offset
            .store(last_processed + 1, Ordering::Relaxed);
        debug!(
            partition = %self.partition,
            last_processed,
            elapsed = ?started.elapsed(),
            "partition worker initialized"
        );

        tokio::select! {
            _ = self.gate.wait() => {}
            _ = self.scope.cancelled() => {}
        }

        let mut armed = Vec::with_capacity(self.specs.len());
        if !self.scope.is_cancelled() {
            for spec in &self.specs {
                let interjection =
                    Interjection::recurring(spec, self.partition.clone(), self.interject_tx.clone());
                interjection.tick();
                armed.push(interjection);
            }
            self.shared.active.store(true, Ordering::Release);
            info!(
                partition = %self.partition,
                elapsed = ?started.elapsed(),
                interjections = armed.len(),
                "partition worker activated"
            );
        }

        let (revoked_tx, mut revoked_rx) = mpsc::channel::<()>(1);
        loop {
            tokio::select! {
                Some(ec) = event_rx.recv() => {
                    self.handle_event(ec).await;
                }
                Some(job) = async_rx.recv() => {
                    let (ctx, state) = job.run();
                    match state {
                        Ok(ExecutionState::Complete) => ctx.complete(),
                        Ok(_) => {}
                        Err(e) => error!(
                            partition = %self.partition,
                            error = %e,
                            "async completion failed"
                        ),
                    }
                    // wake one producer blocked on a full async queue
                    self.non_full.notify_one();
                }
                Some(interjection) = interject_rx.recv() => {
                    self.handle_interjection(&interjection).await;
                    interjection.tick();
                }
                Some(()) = stop_rx.recv() => {
                    // Stopping: no more firings, then let the producer pool
                    // settle this partition's outstanding transactional work
                    // instead of abandoning it.
                    for interjection in &armed {
                        interjection.cancel();
                    }
                    let producer_pool = Arc::clone(&self.producer_pool);
                    let partition = self.partition.clone();
                    let revoked_tx = revoked_tx.clone();
                    tokio::spawn(async move {
                        producer_pool.revoke_partition(&partition).await;
                        let _ = revoked_tx.send(()).await;
                    });
                }
                Some(()) = revoked_rx.recv() => {
                    self.shared.active.store(false, Ordering::Release);
                    let _ = stopped_tx.send(()).await;
                    return;
                }
            }
        }
    }

    /// Process one event context. Returns whether the event was handled
    /// (including duplicates dropped without side effects).
    async fn handle_event(&self, ec: EventContext<T>) -> bool {
        if self.scope.is_cancelled() {
            return false;
        }
        let Some(offset) = ec.offset() else {
            return false;
        };
        let highest = self.shared.highest_offset.load(Ordering::Relaxed);
        if offset < highest {
            // The initial consume position comes from the fast watermark,
            // which can trail the authoritative commit log. Honor the
            // exactly-once promise by ignoring already-processed offsets.
            trace!(
                partition = %self.partition,
                offset,
                highest,
                "dropping already-processed record"
            );
            return true;
        }

        self.shared.pending.fetch_sub(1, Ordering::Relaxed);
        self.shared.highest_offset.store(offset, Ordering::Relaxed);
        self.shared.processed.fetch_add(1, Ordering::Relaxed);
        self.forward(ec).await;
        true
    }

    async fn forward(&self, ec: EventContext<T>) {
        if !ec.execute_allowed().await {
            // revoked mid-flight; the context never reaches the handler
            return;
        }
        let Some(record) = ec.input() else {
            return;
        };
        match self.handler.handle(&ec, record) {
            Ok(ExecutionState::Complete) => ec.complete(),
            Ok(ExecutionState::Incomplete) => {}
            Ok(ExecutionState::Fatal) => self.fatal(ec.offset()),
            Err(e) => error!(
                partition = %self.partition,
                offset = ec.offset(),
                error = %e,
                "event handler failed"
            ),
        }
    }

    async fn handle_interjection(&self, interjection: &Interjection<T>) {
        if self.scope.is_cancelled() {
            return;
        }
        let ec = EventContext::for_interjection(
            self.scope.clone(),
            self.partition.clone(),
            self.store.handle(),
        );
        self.producer_pool.register(ec.register());
        if !ec.execute_allowed().await {
            return;
        }
        match interjection.invoke(&ec) {
            Ok(ExecutionState::Complete) => ec.complete(),
            Ok(ExecutionState::Incomplete) => {}
            Ok(ExecutionState::Fatal) => self.fatal(None),
            Err(e) => error!(
                partition = %interjection.partition(),
                error = %e,
                "interjection failed"
            ),
        }
    }

    /// A fatal execution state halts the partition: intake stops, the
    /// producer pool drains, and the offset is left uncommitted for replay
    /// after restart.
    fn fatal(&self, offset: Option<i64>) {
        error!(
            partition = %self.partition,
            offset,
            "handler reported fatal state; halting partition"
        );
        self.scope.cancel();
    }
}
