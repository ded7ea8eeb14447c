//! Shared fixtures for streamsource integration tests
//!
//! In-memory doubles for every external collaborator the engine consumes:
//! commit log, producer pool, changelog replayer, consumer client, and
//! rebalancer, plus a minimal state store and assertion helpers.
//!
//! In your test file, add:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamsource::{
    ChangelogReplayer, CommitLog, ConsumerClient, ConsumerRecord, EngineError, FetchBatch,
    IncrementalRebalancer, ProducerPool, ProducerRegistration, RebalanceProtocol, ReplayTask,
    Result, StateStore, StoreFactory, TopicPartition,
};
use tokio::sync::Notify;

// ============================================================================
// State store
// ============================================================================

/// Minimal state store: remembers which changelog offsets were applied and
/// whether it has been revoked.
pub struct MapStore {
    pub applied: Vec<i64>,
    revoked: Arc<AtomicBool>,
}

impl StateStore for MapStore {
    fn receive_change(&mut self, record: ConsumerRecord) -> Result<()> {
        self.applied.push(record.offset);
        Ok(())
    }

    fn revoked(&mut self) {
        self.revoked.store(true, Ordering::SeqCst);
    }
}

/// Store factory that exposes each store's revoked flag, keyed by partition
pub fn tracked_store_factory() -> (
    StoreFactory<MapStore>,
    Arc<Mutex<HashMap<i32, Arc<AtomicBool>>>>,
) {
    let flags: Arc<Mutex<HashMap<i32, Arc<AtomicBool>>>> = Arc::new(Mutex::new(HashMap::new()));
    let registered = Arc::clone(&flags);
    let factory: StoreFactory<MapStore> = Arc::new(move |tp: TopicPartition| {
        let revoked = Arc::new(AtomicBool::new(false));
        registered.lock().insert(tp.partition, Arc::clone(&revoked));
        MapStore {
            applied: Vec::new(),
            revoked,
        }
    });
    (factory, flags)
}

// ============================================================================
// Commit log
// ============================================================================

/// In-memory commit log with separately settable authoritative offsets and
/// fast watermarks.
#[derive(Default)]
pub struct MemoryCommitLog {
    last: Mutex<HashMap<TopicPartition, i64>>,
    marks: Mutex<HashMap<TopicPartition, i64>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl MemoryCommitLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_last_processed(&self, tp: TopicPartition, offset: i64) {
        self.last.lock().insert(tp, offset);
    }

    pub fn set_watermark(&self, tp: TopicPartition, offset: i64) {
        self.marks.lock().insert(tp, offset);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommitLog for MemoryCommitLog {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn last_processed(&self, partition: &TopicPartition) -> i64 {
        self.last.lock().get(partition).copied().unwrap_or(-1)
    }

    async fn watermark(&self, partition: &TopicPartition) -> i64 {
        self.marks.lock().get(partition).copied().unwrap_or(-1)
    }
}

// ============================================================================
// Producer pool
// ============================================================================

/// Producer pool double: resolves execute gates immediately (`false` once
/// the partition is revoked), tracks outstanding contexts, and blocks
/// `revoke_partition` until they all settle (completed or abandoned).
pub struct TrackingProducerPool {
    outstanding: Arc<Mutex<HashMap<TopicPartition, i64>>>,
    revoked: Arc<Mutex<HashSet<TopicPartition>>>,
    completed: Arc<Mutex<Vec<Option<i64>>>>,
    settled: Arc<Notify>,
}

impl TrackingProducerPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outstanding: Arc::new(Mutex::new(HashMap::new())),
            revoked: Arc::new(Mutex::new(HashSet::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
            settled: Arc::new(Notify::new()),
        })
    }

    /// Offsets of contexts completed so far (`None` entries are
    /// interjections)
    pub fn completed(&self) -> Vec<Option<i64>> {
        self.completed.lock().clone()
    }

    pub fn outstanding(&self, partition: &TopicPartition) -> i64 {
        self.outstanding.lock().get(partition).copied().unwrap_or(0)
    }

    pub fn is_revoked(&self, partition: &TopicPartition) -> bool {
        self.revoked.lock().contains(partition)
    }
}

#[async_trait]
impl ProducerPool for TrackingProducerPool {
    fn register(&self, registration: ProducerRegistration) {
        let partition = registration.partition.clone();
        let permitted = !self.revoked.lock().contains(&partition);
        *self
            .outstanding
            .lock()
            .entry(partition.clone())
            .or_insert(0) += 1;
        let _ = registration.execute.send(permitted);

        let outstanding = Arc::clone(&self.outstanding);
        let completed = Arc::clone(&self.completed);
        let settled = Arc::clone(&self.settled);
        let completion = registration.completion;
        tokio::spawn(async move {
            // an Err here means the context was abandoned; either way the
            // partition's transactional slot is settled
            if let Ok(offset) = completion.await {
                completed.lock().push(offset);
            }
            if let Some(count) = outstanding.lock().get_mut(&partition) {
                *count -= 1;
            }
            settled.notify_waiters();
        });
    }

    async fn revoke_partition(&self, partition: &TopicPartition) {
        self.revoked.lock().insert(partition.clone());
        loop {
            let notified = self.settled.notified();
            if self.outstanding(partition) <= 0 {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// Changelog replayers
// ============================================================================

/// Replayer that applies scripted history and opens every gate immediately.
/// Set `fail` to make the next replay error without opening gates.
pub struct InstantReplayer {
    history: Mutex<HashMap<i32, Vec<ConsumerRecord>>>,
    pub fail: AtomicBool,
}

impl InstantReplayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            history: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn with_history(self: Arc<Self>, partition: i32, records: Vec<ConsumerRecord>) -> Arc<Self> {
        self.history.lock().insert(partition, records);
        self
    }
}

#[async_trait]
impl ChangelogReplayer<MapStore> for InstantReplayer {
    async fn replay(&self, tasks: Vec<ReplayTask<MapStore>>) -> Result<u64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Replay("scripted replay failure".to_string()));
        }
        let mut applied = 0u64;
        for task in tasks {
            let records = self.history.lock().remove(&task.partition.partition);
            if let Some(records) = records {
                for record in records {
                    task.store.apply_change(record)?;
                    applied += 1;
                }
            }
            task.gate.open();
        }
        Ok(applied)
    }
}

/// Replayer that holds chosen partitions' gates closed until released,
/// opening the rest immediately. Exercises per-partition activation.
pub struct GatedReplayer {
    held: Arc<Mutex<HashSet<i32>>>,
    released: Arc<Notify>,
}

impl GatedReplayer {
    pub fn holding(partitions: &[i32]) -> Arc<Self> {
        Arc::new(Self {
            held: Arc::new(Mutex::new(partitions.iter().copied().collect())),
            released: Arc::new(Notify::new()),
        })
    }

    pub fn release(&self, partition: i32) {
        self.held.lock().remove(&partition);
        self.released.notify_waiters();
    }
}

#[async_trait]
impl ChangelogReplayer<MapStore> for GatedReplayer {
    async fn replay(&self, tasks: Vec<ReplayTask<MapStore>>) -> Result<u64> {
        for task in tasks {
            loop {
                let notified = self.released.notified();
                if !self.held.lock().contains(&task.partition.partition) {
                    break;
                }
                notified.await;
            }
            task.gate.open();
        }
        Ok(0)
    }
}

// ============================================================================
// Consumer client
// ============================================================================

/// Scripted consumer client: polls pop queued batches; an empty queue
/// behaves like a fetch timeout.
pub struct ScriptedClient {
    queue: Mutex<VecDeque<Vec<FetchBatch>>>,
    closed: AtomicBool,
    protocol: Mutex<std::result::Result<RebalanceProtocol, String>>,
}

impl ScriptedClient {
    pub fn new(protocol: RebalanceProtocol) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            protocol: Mutex::new(Ok(protocol)),
        })
    }

    /// Make `active_protocol` fail, as when the broker cannot be reached
    pub fn with_protocol_error(self: Arc<Self>, message: &str) -> Arc<Self> {
        *self.protocol.lock() = Err(message.to_string());
        self
    }

    pub fn push(&self, batches: Vec<FetchBatch>) {
        self.queue.lock().push_back(batches);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumerClient for ScriptedClient {
    async fn poll(&self, max_wait: Duration) -> Result<Vec<FetchBatch>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ClientClosed);
        }
        if let Some(batches) = self.queue.lock().pop_front() {
            return Ok(batches);
        }
        tokio::time::sleep(max_wait.min(Duration::from_millis(20))).await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ClientClosed);
        }
        Ok(Vec::new())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn active_protocol(&self) -> Result<RebalanceProtocol> {
        self.protocol
            .lock()
            .clone()
            .map_err(EngineError::Protocol)
    }
}

// ============================================================================
// Incremental rebalancer
// ============================================================================

/// Records rebalancer notifications; `gracefully_leave_group` resolves
/// immediately and flags that it ran.
#[derive(Default)]
pub struct RecordingRebalancer {
    pub prepared: Mutex<Vec<TopicPartition>>,
    pub assigned: Mutex<Vec<TopicPartition>>,
    pub left: AtomicBool,
}

impl RecordingRebalancer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IncrementalRebalancer for RecordingRebalancer {
    fn partition_prepared(&self, partition: TopicPartition) {
        self.prepared.lock().push(partition);
    }

    fn partitions_assigned(&self, partitions: Vec<TopicPartition>) {
        self.assigned.lock().extend(partitions);
    }

    async fn gracefully_leave_group(&self) {
        self.left.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Install a test subscriber once so `RUST_LOG` controls engine output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a record with the given offset and a fixed payload
pub fn record(offset: i64) -> ConsumerRecord {
    ConsumerRecord::new(
        offset,
        1_700_000_000_000 + offset,
        None,
        Bytes::from_static(b"payload"),
    )
}

/// Build one fetch batch for `partition` of the `orders` topic
pub fn batch(partition: i32, offsets: &[i64]) -> FetchBatch {
    FetchBatch {
        partition: TopicPartition::new("orders", partition),
        records: offsets.iter().map(|&o| record(o)).collect(),
    }
}

/// Poll `cond` until it holds, panicking after ~5 seconds
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
