use thiserror::Error;

/// An error returned from the [`Pool`] operations.
///
/// [`Pool`]: crate::Pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// The caller's context ended before the item could be queued.
    ///
    /// This covers both a congested queue and an exhausted caller budget;
    /// the two are deliberately indistinguishable.
    #[error("worker pipeline data sending timeout")]
    Timeout,

    /// The item was submitted after the pool was shut down.
    #[error("the worker pool is shut down")]
    Closed,

    /// A worker thread could not be spawned.
    #[error("failed to spawn a worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A worker thread terminated abnormally.
    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },
}

/// The reason a [`Context`] is done.
///
/// [`Context`]: crate::Context
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}
