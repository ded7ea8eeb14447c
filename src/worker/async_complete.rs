//! Asynchronous completion path
//!
//! Applications that return [`ExecutionState::Incomplete`] finish their work
//! off the dispatch loop and hand the result back through an
//! [`AsyncCompleter`]. Finalization runs on the partition's dispatch loop,
//! keeping async results serialized with regular events and interjections.

use crate::context::{EventContext, ExecutionState};
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// A deferred completion for one event context.
pub struct AsyncJob<T> {
    ctx: EventContext<T>,
    finalize: Box<dyn FnOnce() -> Result<ExecutionState> + Send>,
}

impl<T> AsyncJob<T> {
    /// Pair a context with the finalize step that settles it
    pub fn new(
        ctx: EventContext<T>,
        finalize: impl FnOnce() -> Result<ExecutionState> + Send + 'static,
    ) -> Self {
        Self {
            ctx,
            finalize: Box::new(finalize),
        }
    }

    pub(crate) fn run(self) -> (EventContext<T>, Result<ExecutionState>) {
        let state = (self.finalize)();
        (self.ctx, state)
    }

    pub(crate) fn context(&self) -> &EventContext<T> {
        &self.ctx
    }
}

/// Hands finished async work back to its partition's dispatch loop.
///
/// The queue is bounded. A submitter finding it full blocks on a single
/// "became non-full" notification and retries, so every job submitted while
/// the worker lives is delivered to its finalize step exactly once: bounded,
/// self-throttling backpressure rather than an unbounded queue or dropped
/// work.
pub struct AsyncCompleter<T> {
    jobs: mpsc::Sender<AsyncJob<T>>,
    non_full: Arc<Notify>,
}

impl<T> Clone for AsyncCompleter<T> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            non_full: Arc::clone(&self.non_full),
        }
    }
}

impl<T> AsyncCompleter<T> {
    pub(crate) fn new(jobs: mpsc::Sender<AsyncJob<T>>, non_full: Arc<Notify>) -> Self {
        Self { jobs, non_full }
    }

    /// Submit a finished job for finalization on the dispatch loop.
    ///
    /// Blocks only while the queue is full. Once the partition has fully
    /// stopped the job is discarded: its offset can no longer commit, and
    /// the durable log re-delivers the event after restart.
    pub async fn submit(&self, job: AsyncJob<T>) {
        let mut job = job;
        loop {
            match self.jobs.try_send(job) {
                Ok(()) => return,
                Err(TrySendError::Full(returned)) => {
                    trace!(
                        "async completion queue full; incoming events are outpacing async processing"
                    );
                    job = returned;
                    self.non_full.notified().await;
                }
                Err(TrySendError::Closed(returned)) => {
                    debug!(
                        partition = %returned.context().topic_partition(),
                        "partition stopped; discarding async completion"
                    );
                    return;
                }
            }
        }
    }
}
