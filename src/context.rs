//! Per-event execution context
//!
//! An [`EventContext`] wraps either one input record or an interjection
//! trigger. It is created by the partition's intake pump (or dispatch loop,
//! for interjections), registered with the producer pool, and lives until it
//! is completed or abandoned. Contexts are cheaply cloneable so the
//! application can carry one into asynchronous work and complete it later
//! through the worker's async completer.

use crate::cancel::CancelScope;
use crate::partition::TopicPartition;
use crate::record::ConsumerRecord;
use crate::store::StoreHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Outcome of processing one unit of work.
///
/// Not an error state: a handler can fail with an `Err` and still leave the
/// partition running, whereas `Fatal` halts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Processing finished; the offset for the associated context may commit
    /// now.
    Complete,
    /// Processing is still ongoing and the application promises to fulfill
    /// the context later through the async completer. The offset must not
    /// commit yet.
    Incomplete,
    /// Unrecoverable condition. The partition is halted and drained; the
    /// offset is left uncommitted.
    Fatal,
}

/// Pool-side halves of a context registration.
///
/// `execute` resolves the context's gate: `true` permits processing, `false`
/// abandons it (the partition was revoked mid-flight). `completion` resolves
/// with the context's offset when the application completes it, or errors if
/// every clone of the context was dropped without completing.
pub struct ProducerRegistration {
    /// Partition the registered context belongs to
    pub partition: TopicPartition,
    /// Offset of the registered context; `None` for interjections
    pub offset: Option<i64>,
    /// Gate sender; the pool must eventually resolve every gate it holds
    pub execute: oneshot::Sender<bool>,
    /// Completion observer
    pub completion: oneshot::Receiver<Option<i64>>,
}

/// Context for one event or interjection on one partition.
pub struct EventContext<T> {
    inner: Arc<ContextInner<T>>,
}

struct ContextInner<T> {
    partition: TopicPartition,
    offset: Option<i64>,
    record: Option<ConsumerRecord>,
    store: StoreHandle<T>,
    scope: CancelScope,
    execute: Mutex<Option<oneshot::Receiver<bool>>>,
    done: Mutex<Option<oneshot::Sender<Option<i64>>>>,
}

impl<T> Clone for EventContext<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> EventContext<T> {
    pub(crate) fn for_record(
        scope: CancelScope,
        partition: TopicPartition,
        record: ConsumerRecord,
        store: StoreHandle<T>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                partition,
                offset: Some(record.offset),
                record: Some(record),
                store,
                scope,
                execute: Mutex::new(None),
                done: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn for_interjection(
        scope: CancelScope,
        partition: TopicPartition,
        store: StoreHandle<T>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                partition,
                offset: None,
                record: None,
                store,
                scope,
                execute: Mutex::new(None),
                done: Mutex::new(None),
            }),
        }
    }

    /// Partition this context belongs to
    pub fn topic_partition(&self) -> &TopicPartition {
        &self.inner.partition
    }

    /// Offset of the input record; `None` for interjections
    pub fn offset(&self) -> Option<i64> {
        self.inner.offset
    }

    /// The input record; `None` for interjections
    pub fn input(&self) -> Option<&ConsumerRecord> {
        self.inner.record.as_ref()
    }

    /// Handle to the partition's state store
    pub fn store(&self) -> StoreHandle<T> {
        self.inner.store.clone()
    }

    /// Whether the owning partition has been revoked
    pub fn is_revoked(&self) -> bool {
        self.inner.scope.is_cancelled()
    }

    /// Wires the producer-pool halves of this context.
    ///
    /// Called exactly once per context, before the context enters the
    /// dispatch channel.
    pub(crate) fn register(&self) -> ProducerRegistration {
        let (execute_tx, execute_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        *self.inner.execute.lock() = Some(execute_rx);
        *self.inner.done.lock() = Some(done_tx);
        ProducerRegistration {
            partition: self.inner.partition.clone(),
            offset: self.inner.offset,
            execute: execute_tx,
            completion: done_rx,
        }
    }

    /// Waits on the execute gate.
    ///
    /// Resolves `false` once the partition has been revoked, if the gate was
    /// already consumed, or if the pool dropped its sender.
    pub(crate) async fn execute_allowed(&self) -> bool {
        let gate = self.inner.execute.lock().take();
        match gate {
            Some(gate) => gate.await.unwrap_or(false),
            None => false,
        }
    }

    /// Marks the context complete, releasing its offset for commit.
    /// Idempotent; only the first call has an effect.
    pub fn complete(&self) {
        if let Some(done) = self.inner.done.lock().take() {
            let _ = done.send(self.inner.offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn context_for(offset: i64) -> EventContext<u32> {
        EventContext::for_record(
            CancelScope::root(),
            TopicPartition::new("orders", 0),
            ConsumerRecord::new(offset, 0, None, Bytes::from_static(b"v")),
            StoreHandle::new(0u32),
        )
    }

    #[tokio::test]
    async fn test_gate_resolution() {
        let ec = context_for(7);
        let registration = ec.register();
        registration.execute.send(true).unwrap();
        assert!(ec.execute_allowed().await);
        // the gate is single-use
        assert!(!ec.execute_allowed().await);
    }

    #[tokio::test]
    async fn test_gate_denied_when_sender_dropped() {
        let ec = context_for(7);
        let registration = ec.register();
        drop(registration.execute);
        assert!(!ec.execute_allowed().await);
    }

    #[tokio::test]
    async fn test_complete_resolves_registration() {
        let ec = context_for(42);
        let registration = ec.register();
        ec.complete();
        // idempotent
        ec.complete();
        assert_eq!(registration.completion.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_dropped_context_reports_abandoned() {
        let ec = context_for(42);
        let registration = ec.register();
        drop(ec);
        assert!(registration.completion.await.is_err());
    }

    #[tokio::test]
    async fn test_interjection_context_has_no_offset() {
        let ec: EventContext<u32> = EventContext::for_interjection(
            CancelScope::root(),
            TopicPartition::new("orders", 1),
            StoreHandle::new(0u32),
        );
        assert_eq!(ec.offset(), None);
        assert!(ec.input().is_none());
        let registration = ec.register();
        ec.complete();
        assert_eq!(registration.completion.await.unwrap(), None);
    }
}
