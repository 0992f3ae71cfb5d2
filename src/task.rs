use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use crate::Context;

/// The function every dequeued item is passed to.
///
/// It may be invoked concurrently by every worker of the pool, so any state
/// it captures must be safe to share between threads.
pub type Handler<T> = Arc<dyn Fn(&Context, T) + Send + Sync + 'static>;

/// A callback that is told about every [`HandlerFault`].
pub type FaultHandler = Arc<dyn Fn(&HandlerFault) + Send + Sync + 'static>;

/// A handler invocation that panicked.
///
/// Faults never reach the submitter of the item. They are logged and
/// passed to the fault handler configured with
/// [`PoolBuilder::fault_handler`].
///
/// [`PoolBuilder::fault_handler`]: crate::PoolBuilder::fault_handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    /// The id of the worker that ran the item.
    pub worker: usize,
    /// The panic message, if the payload was a string.
    pub message: String,
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {} fatal error: {}", self.worker, self.message)
    }
}

/// Runs single items: derives the per-item context and contains panics.
pub(crate) struct TaskRunner<T> {
    pub(crate) handler: Handler<T>,
    pub(crate) fault_handler: Option<FaultHandler>,
    pub(crate) item_deadline: Duration,
    pub(crate) root: Context,
}

impl<T> TaskRunner<T> {
    /// Invokes the handler with `item` under a fresh context whose deadline
    /// is `item_deadline` from now.
    ///
    /// A panic inside the handler is caught here and reported; it never
    /// unwinds into the worker loop.
    pub(crate) fn run(&self, worker: usize, item: T) {
        let (ctx, cancel) = Context::with_timeout(&self.root, self.item_deadline);
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(&ctx, item)));
        cancel.cancel();

        if let Err(payload) = result {
            self.report(HandlerFault {
                worker,
                message: panic_message(payload.as_ref()),
            });
        }
    }

    fn report(&self, fault: HandlerFault) {
        tracing::error!(worker = fault.worker, message = %fault.message, "worker fatal error");

        if let Some(fault_handler) = &self.fault_handler {
            if panic::catch_unwind(AssertUnwindSafe(|| fault_handler(&fault))).is_err() {
                tracing::error!(worker = fault.worker, "fault handler panicked");
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
