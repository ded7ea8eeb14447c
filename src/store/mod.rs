//! Per-partition state stores and their registry
//!
//! Each assigned partition owns exactly one state-store instance, created on
//! assignment and finalized on revocation. Stores are never shared across
//! partitions. The registry map is mutex-protected; operations occur only on
//! assignment and revocation, never on the hot path.

use crate::error::Result;
use crate::partition::TopicPartition;
use crate::record::ConsumerRecord;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle contract a partition-local state store must satisfy.
///
/// The engine depends on nothing else from the application's store type; it
/// does not prescribe a data structure.
pub trait StateStore: Send + Sync + 'static {
    /// Apply one changelog record during partition prep
    fn receive_change(&mut self, record: ConsumerRecord) -> Result<()>;

    /// Release the store once its partition has been revoked
    fn revoked(&mut self);
}

/// Shared handle to one partition's store.
///
/// Writers run in two mutually exclusive phases: changelog replay before the
/// partition's worker activates, then the worker's own dispatch loop. The
/// lock exists for memory safety across those phases and sees no contention.
pub struct StoreHandle<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for StoreHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> StoreHandle<T> {
    /// Wrap a freshly constructed store
    pub fn new(store: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Read access to the store
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Write access to the store
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }
}

/// One state-store instance bound to a partition of the changelog topic.
pub struct ChangeLogPartition<T> {
    handle: StoreHandle<T>,
    topic: String,
}

impl<T> Clone for ChangeLogPartition<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            topic: self.topic.clone(),
        }
    }
}

impl<T: StateStore> ChangeLogPartition<T> {
    fn new(store: T, topic: String) -> Self {
        Self {
            handle: StoreHandle::new(store),
            topic,
        }
    }

    /// Apply one replayed changelog record.
    ///
    /// Called only during partition prep, before the worker activates; no
    /// other task reads the store at that point.
    pub fn apply_change(&self, record: ConsumerRecord) -> Result<()> {
        self.handle.write().receive_change(record)
    }

    pub(crate) fn finalize_revoked(&self) {
        self.handle.write().revoked();
    }

    /// Handle suitable for event contexts
    pub fn handle(&self) -> StoreHandle<T> {
        self.handle.clone()
    }

    /// Name of the changelog topic backing this store
    pub fn changelog_topic(&self) -> &str {
        &self.topic
    }
}

/// Factory producing a fresh store for a newly assigned changelog partition
pub type StoreFactory<T> = Arc<dyn Fn(TopicPartition) -> T + Send + Sync>;

/// Owns one state store per currently assigned partition.
pub struct ChangeLogRegistry<T> {
    stores: Mutex<HashMap<i32, ChangeLogPartition<T>>>,
    factory: StoreFactory<T>,
    changelog_topic: String,
}

impl<T: StateStore> ChangeLogRegistry<T> {
    /// Create a registry that builds stores with `factory`, keyed by the
    /// changelog topic partition
    pub fn new(factory: StoreFactory<T>, changelog_topic: impl Into<String>) -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            factory,
            changelog_topic: changelog_topic.into(),
        }
    }

    /// Idempotent: returns the existing store for `partition` or constructs
    /// one through the factory
    pub fn assign(&self, partition: i32) -> ChangeLogPartition<T> {
        let mut stores = self.stores.lock();
        if let Some(existing) = stores.get(&partition) {
            return existing.clone();
        }
        debug!(partition, topic = %self.changelog_topic, "assigning state store");
        let store = (self.factory)(TopicPartition::new(self.changelog_topic.clone(), partition));
        let entry = ChangeLogPartition::new(store, self.changelog_topic.clone());
        stores.insert(partition, entry.clone());
        entry
    }

    /// Look up the store for `partition`
    pub fn get_store(&self, partition: i32) -> Option<ChangeLogPartition<T>> {
        self.stores.lock().get(&partition).cloned()
    }

    /// Remove and finalize the store for `partition`; no-op if absent
    pub fn revoke(&self, partition: i32) {
        let removed = self.stores.lock().remove(&partition);
        if let Some(store) = removed {
            debug!(partition, topic = %self.changelog_topic, "revoking state store");
            store.finalize_revoked();
        }
    }

    /// Number of live stores
    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    /// Whether no store is currently assigned
    pub fn is_empty(&self) -> bool {
        self.stores.lock().is_empty()
    }
}
