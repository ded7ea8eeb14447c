//! Application event handler seam

use crate::context::{EventContext, ExecutionState};
use crate::error::Result;
use crate::record::ConsumerRecord;

/// Application processing hook, invoked once per in-order event per
/// partition.
///
/// A returned error is logged and the event's offset is left uncommitted;
/// recovery is via durable-log replay after restart, never an in-process
/// retry. Returning [`ExecutionState::Incomplete`] defers completion to the
/// async path: clone the context, finish the work elsewhere, and submit an
/// [`crate::worker::AsyncJob`] through the worker's completer.
pub trait EventHandler<T>: Send + Sync {
    /// Process one event
    fn handle(&self, ctx: &EventContext<T>, record: &ConsumerRecord) -> Result<ExecutionState>;
}

impl<T, F> EventHandler<T> for F
where
    F: Fn(&EventContext<T>, &ConsumerRecord) -> Result<ExecutionState> + Send + Sync,
{
    fn handle(&self, ctx: &EventContext<T>, record: &ConsumerRecord) -> Result<ExecutionState> {
        self(ctx, record)
    }
}
