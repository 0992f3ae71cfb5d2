use std::{sync::Arc, thread, time::Duration};

use crate::{
    task::{FaultHandler, Handler, HandlerFault},
    Context, Pool, ThreadFactory,
};

/// A builder of the [`Pool`], which is used to configure a new pool before
/// it starts.
///
/// Every setting is fixed once [`PoolBuilder::build`] returns, so workers
/// never observe a configuration change.
///
/// # Examples
///
/// ```
/// use workpipe::{Context, PoolBuilder};
/// use std::time::Duration;
///
/// let pool = PoolBuilder::default()
///     .queue_capacity(16)
///     .worker_count(4)
///     .item_deadline(Duration::from_secs(2))
///     .handler(|ctx: &Context, line: String| {
///         if !ctx.is_done() {
///             println!("{line}");
///         }
///     })
///     .fault_handler(|fault| eprintln!("{fault}"))
///     .thread_factory_fn(|id| std::thread::Builder::new().name(format!("printer-{id}")))
///     .build();
/// # drop(pool);
/// ```
pub struct PoolBuilder<T> {
    pub(crate) queue_capacity: usize,
    pub(crate) worker_count: usize,
    pub(crate) item_deadline: Duration,
    pub(crate) handler: Handler<T>,
    pub(crate) fault_handler: Option<FaultHandler>,
    pub(crate) parent: Context,
    pub(crate) drain_on_shutdown: bool,
    pub(crate) thread_factory: Arc<ThreadFactory>,
}

impl<T: Send + 'static> Default for PoolBuilder<T> {
    /// Creates a new builder with the default configuration.
    ///
    /// # Default Configuration
    /// - `queue_capacity`: 1000
    /// - `worker_count`: the number of logical cores of the current
    ///   system
    /// - `item_deadline`: 30 seconds
    /// - `handler`: a closure that discards every item
    /// - `fault_handler`: none, faults are only logged
    /// - `parent`: [`Context::background`]
    /// - `drain_on_shutdown`: `false`
    /// - `thread_factory`: threads named `workpipe-worker-{id}`
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            worker_count: num_cpus::get(),
            item_deadline: Duration::from_secs(30),
            handler: Arc::new(|_: &Context, _: T| {}),
            fault_handler: None,
            parent: Context::background(),
            drain_on_shutdown: false,
            thread_factory: Arc::new(|id: usize| {
                thread::Builder::new().name(format!("workpipe-worker-{id}"))
            }),
        }
    }
}

impl<T: Send + 'static> PoolBuilder<T> {
    /// Creates the base configuration for the new pool.
    ///
    /// See: [`PoolBuilder::default`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the four core parameters at once.
    ///
    /// A `queue_capacity` of 0 makes every submission a direct handoff to
    /// a ready worker. A `worker_count` of 0 is accepted but such a pool
    /// never processes anything.
    #[must_use]
    pub fn configure<F>(
        queue_capacity: usize,
        worker_count: usize,
        item_deadline: Duration,
        handler: F,
    ) -> Self
    where
        F: Fn(&Context, T) + Send + Sync + 'static,
    {
        Self::default()
            .queue_capacity(queue_capacity)
            .worker_count(worker_count)
            .item_deadline(item_deadline)
            .handler(handler)
    }

    /// Sets the capacity of the bounded intake queue.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets how long each item may run, counted from the moment it is
    /// dequeued.
    ///
    /// The deadline is advisory: the handler sees it through its
    /// [`Context`] and running handlers are never interrupted.
    #[must_use]
    pub fn item_deadline(mut self, deadline: Duration) -> Self {
        self.item_deadline = deadline;
        self
    }

    /// Sets the function that processes every item.
    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, T) + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Sets a callback that is invoked after a handler panicked.
    #[must_use]
    pub fn fault_handler<F>(mut self, fault_handler: F) -> Self
    where
        F: Fn(&HandlerFault) + Send + Sync + 'static,
    {
        self.fault_handler = Some(Arc::new(fault_handler));
        self
    }

    /// Sets the context that per-item contexts are derived from.
    ///
    /// Cancelling it is visible to every running and future handler.
    #[must_use]
    pub fn parent(mut self, parent: Context) -> Self {
        self.parent = parent;
        self
    }

    /// Makes workers run every item still queued when they observe the
    /// stop signal, instead of leaving them behind.
    #[must_use]
    pub fn drain_on_shutdown(mut self, drain: bool) -> Self {
        self.drain_on_shutdown = drain;
        self
    }

    /// Sets the factory function that creates the thread of the worker
    /// with the given id.
    #[must_use]
    pub fn thread_factory_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> thread::Builder + Send + Sync + 'static,
    {
        self.thread_factory = Arc::new(f);
        self
    }

    /// Creates the pool and allocates its queue. No worker is started
    /// until [`Pool::run`] is called.
    pub fn build(self) -> Pool<T> {
        Pool::from_builder(self)
    }
}
