//! Timer- and demand-driven interjections
//!
//! An interjection is a callback scoped to exactly one partition and
//! serialized with that partition's regular events: the dispatch loop runs
//! it between events, never concurrently with them. Recurring interjections
//! are registered before the engine starts and armed per partition on
//! activation; one-off interjections are enqueued on demand through the
//! coordinator.

use crate::cancel::CancelScope;
use crate::context::{EventContext, ExecutionState};
use crate::error::Result;
use crate::partition::TopicPartition;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A callback executed with the same per-partition serialization guarantee
/// as a regular event.
pub trait Interjector<T>: Send + Sync {
    /// Run against the partition's context at `at`
    fn interject(&self, ctx: &EventContext<T>, at: DateTime<Utc>) -> Result<ExecutionState>;
}

impl<T, F> Interjector<T> for F
where
    F: Fn(&EventContext<T>, DateTime<Utc>) -> Result<ExecutionState> + Send + Sync,
{
    fn interject(&self, ctx: &EventContext<T>, at: DateTime<Utc>) -> Result<ExecutionState> {
        self(ctx, at)
    }
}

/// A recurring interjection, registered once and armed for every assigned
/// partition.
pub struct InterjectionSpec<T> {
    /// Interval between firings
    pub every: Duration,
    /// Callback to run
    pub interjector: Arc<dyn Interjector<T>>,
}

impl<T> Clone for InterjectionSpec<T> {
    fn clone(&self) -> Self {
        Self {
            every: self.every,
            interjector: Arc::clone(&self.interjector),
        }
    }
}

impl<T> InterjectionSpec<T> {
    /// Fire `interjector` every `every`, per assigned partition
    pub fn new(every: Duration, interjector: impl Interjector<T> + 'static) -> Self {
        Self {
            every,
            interjector: Arc::new(interjector),
        }
    }
}

/// An interjection armed against one partition's dispatch loop.
///
/// The carrying channel holds a single slot: at most one pending
/// interjection request per partition.
pub(crate) struct Interjection<T> {
    partition: TopicPartition,
    interjector: Arc<dyn Interjector<T>>,
    every: Option<Duration>,
    channel: mpsc::Sender<Arc<Interjection<T>>>,
    timer: CancelScope,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<T: Send + Sync + 'static> Interjection<T> {
    pub(crate) fn recurring(
        spec: &InterjectionSpec<T>,
        partition: TopicPartition,
        channel: mpsc::Sender<Arc<Interjection<T>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            partition,
            interjector: Arc::clone(&spec.interjector),
            every: Some(spec.every),
            channel,
            timer: CancelScope::root(),
            callback: Mutex::new(None),
        })
    }

    pub(crate) fn one_off(
        interjector: Arc<dyn Interjector<T>>,
        partition: TopicPartition,
        channel: mpsc::Sender<Arc<Interjection<T>>>,
        callback: Option<Box<dyn FnOnce() + Send>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            partition,
            interjector,
            every: None,
            channel,
            timer: CancelScope::root(),
            callback: Mutex::new(callback),
        })
    }

    /// Arm the next firing. No-op for one-off interjections, so the dispatch
    /// loop can re-arm unconditionally after handling.
    pub(crate) fn tick(self: &Arc<Self>) {
        let Some(every) = self.every else {
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(every) => {
                    // single-slot channel: blocks until the dispatch loop
                    // has room for another request
                    let _ = this.channel.send(Arc::clone(&this)).await;
                }
                _ = this.timer.cancelled() => {}
            }
        });
    }

    /// Cancel any pending future firing
    pub(crate) fn cancel(&self) {
        self.timer.cancel();
    }

    /// Run the interjector, then fire the one-shot callback if present
    pub(crate) fn invoke(&self, ctx: &EventContext<T>) -> Result<ExecutionState> {
        let state = self.interjector.interject(ctx, Utc::now());
        self.fire_callback();
        state
    }

    /// Fire the completion callback exactly once
    pub(crate) fn fire_callback(&self) {
        if let Some(callback) = self.callback.lock().take() {
            callback();
        }
    }

    pub(crate) fn partition(&self) -> &TopicPartition {
        &self.partition
    }
}
