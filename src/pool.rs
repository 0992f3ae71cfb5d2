use crate::{
    task::TaskRunner,
    worker::{Worker, WorkerShared},
    CancelHandle, Context, PoolBuilder, PoolError,
};

use crossbeam_channel::{bounded, Receiver, Select, Sender};

use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
    time::Duration,
};

/// A function that creates the thread of the worker with the given id.
pub type ThreadFactory = dyn Fn(usize) -> thread::Builder + Send + Sync + 'static;

enum Lifecycle {
    Configured,
    Running(Vec<Worker>),
    Terminated,
}

struct PoolControl<T> {
    sender: Sender<T>,
    // Dropping the sender is the stop signal.
    stop: Mutex<Option<Sender<()>>>,
    state: Mutex<Lifecycle>,
    worker_threads: Mutex<Vec<ThreadId>>,
    // Dropped by the shutdown call that joined the workers.
    joined: Mutex<Option<Sender<()>>>,
    joined_signal: Receiver<()>,
    root_cancel: CancelHandle,
    queue_capacity: usize,
    worker_count: usize,
    thread_factory: Arc<ThreadFactory>,
}

/// A `Pool` consists of a fixed number of worker threads and a bounded
/// queue that holds submitted items until a worker picks them up.
///
/// # Bounded Queue
///
/// The queue is the only point of backpressure. [`Pool::process`] waits
/// for a free slot, but never longer than the caller's [`Context`] allows.
/// With a capacity of 0 the queue buffers nothing and a submission only
/// succeeds once an idle worker takes the item directly.
///
/// # Workers
///
/// Each worker waits for either an item or the stop signal. For every item
/// it derives a fresh context from the pool's root context whose deadline
/// is [`item_deadline`] after the item was dequeued, and calls the handler
/// with it. The deadline is advisory: a handler that ignores it is never
/// interrupted.
///
/// A panicking handler is contained to its own item. The panic is logged,
/// passed to the configured fault handler, and the worker moves on to the
/// next item. Submitters never learn about the outcome of their items.
///
/// # Lifecycle
///
/// A pool is built by the [`PoolBuilder`], started with [`Pool::run`] and
/// stopped with [`Pool::shutdown`]. Both are idempotent. Shutdown does not
/// wait for the queue to empty: items still queued when a worker sees the
/// stop signal may be abandoned, unless the pool was built with
/// [`drain_on_shutdown`]. Callers that need every item processed can also
/// wait for [`Pool::queue_len`] to reach zero before shutting down.
///
/// Dropping every handle of a running pool raises the stop signal as well,
/// but nobody waits for the workers to exit.
///
/// # Examples
///
/// ```
/// use workpipe::{Context, PoolBuilder};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let sum = Arc::new(AtomicUsize::new(0));
/// let total = sum.clone();
/// let pool = PoolBuilder::configure(8, 2, Duration::from_secs(1), move |_: &Context, n: usize| {
///     total.fetch_add(n, Ordering::SeqCst);
/// })
/// .drain_on_shutdown(true)
/// .build();
/// pool.run().unwrap();
///
/// let (ctx, _cancel) = Context::with_timeout(&Context::background(), Duration::from_secs(5));
/// for n in 1..=10 {
///     pool.process(&ctx, n).unwrap();
/// }
///
/// pool.shutdown().unwrap();
/// assert_eq!(55, sum.load(Ordering::SeqCst));
/// ```
///
/// [`item_deadline`]: crate::PoolBuilder::item_deadline
/// [`drain_on_shutdown`]: crate::PoolBuilder::drain_on_shutdown
pub struct Pool<T> {
    shared: Arc<WorkerShared<T>>,
    control: Arc<PoolControl<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            control: self.control.clone(),
        }
    }
}

impl<T: Send + 'static> Pool<T> {
    pub(crate) fn from_builder(builder: PoolBuilder<T>) -> Self {
        let (sender, receiver) = bounded(builder.queue_capacity);
        let (stop_sender, stop) = bounded(0);
        let (joined, joined_signal) = bounded(0);
        let (root, root_cancel) = Context::with_cancel(&builder.parent);

        let shared = WorkerShared {
            receiver,
            stop,
            runner: TaskRunner {
                handler: builder.handler,
                fault_handler: builder.fault_handler,
                item_deadline: builder.item_deadline,
                root,
            },
            drain_on_shutdown: builder.drain_on_shutdown,
        };
        let control = PoolControl {
            sender,
            stop: Mutex::new(Some(stop_sender)),
            state: Mutex::new(Lifecycle::Configured),
            worker_threads: Mutex::new(Vec::new()),
            joined: Mutex::new(Some(joined)),
            joined_signal,
            root_cancel,
            queue_capacity: builder.queue_capacity,
            worker_count: builder.worker_count,
            thread_factory: builder.thread_factory,
        };

        Self {
            shared: Arc::new(shared),
            control: Arc::new(control),
        }
    }

    /// Submits `item` to the pool.
    ///
    /// Returns as soon as the item is in the queue, or fails once `ctx` is
    /// done, whichever happens first. On success the pool owns the item.
    ///
    /// # Errors
    ///
    /// 1. [`Timeout`]: `ctx` was cancelled or passed its deadline before a
    ///    queue slot became free.
    ///
    /// 2. [`Closed`]: the pool has been shut down.
    ///
    /// [`Timeout`]: crate::PoolError::Timeout
    /// [`Closed`]: crate::PoolError::Closed
    pub fn process(&self, ctx: &Context, item: T) -> Result<(), PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::Closed);
        }

        let sender = &self.control.sender;
        let stop = &self.shared.stop;
        let timer = ctx.timer();

        let mut sel = Select::new();
        let send = sel.send(sender);
        let stopped = sel.recv(stop);
        let first = ctx.watch(&mut sel, &timer);

        let oper = sel.select();
        match oper.index() {
            index if index == send => oper.send(sender, item).map_err(|_| PoolError::Closed),
            index if index == stopped => {
                let _ = oper.recv(stop);
                Err(PoolError::Closed)
            }
            _ => {
                let reason = ctx.finish(oper, &timer, first);
                tracing::trace!(%reason, queued = sender.len(), "submission timed out");
                Err(PoolError::Timeout)
            }
        }
    }

    /// Starts the workers. Only the first call has an effect; the workers
    /// run in the background and this returns immediately.
    ///
    /// # Errors
    ///
    /// [`Spawn`] if a worker thread could not be created. The workers
    /// spawned before the failure keep running until shutdown.
    ///
    /// [`Spawn`]: crate::PoolError::Spawn
    pub fn run(&self) -> Result<(), PoolError> {
        let mut state = self.state();
        if !matches!(*state, Lifecycle::Configured) {
            return Ok(());
        }

        let count = self.control.worker_count;
        let mut workers = Vec::with_capacity(count);
        let mut threads = self
            .control
            .worker_threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for id in 0..count {
            match Worker::spawn(id, &*self.control.thread_factory, self.shared.clone()) {
                Ok(worker) => {
                    threads.push(worker.handle.thread().id());
                    workers.push(worker);
                }
                Err(err) => {
                    *state = Lifecycle::Running(workers);
                    return Err(err.into());
                }
            }
        }
        *state = Lifecycle::Running(workers);

        tracing::debug!(
            workers = count,
            capacity = self.control.queue_capacity,
            "worker pool started"
        );
        Ok(())
    }

    /// Raises the stop signal and blocks until every worker has exited.
    ///
    /// Handlers that are running are waited for, not interrupted. Once the
    /// workers are gone the root context is cancelled. Calling this more
    /// than once, or before [`Pool::run`], is allowed; concurrent callers
    /// all wait for the workers to exit.
    ///
    /// If this is called from a handler, the worker running that handler
    /// is not waited for.
    ///
    /// # Errors
    ///
    /// [`WorkerPanicked`] for the first worker thread that terminated
    /// abnormally. The remaining workers are still joined. Only the call
    /// that joined the workers reports it.
    ///
    /// [`WorkerPanicked`]: crate::PoolError::WorkerPanicked
    pub fn shutdown(&self) -> Result<(), PoolError> {
        let raised = self
            .control
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if raised {
            tracing::debug!(queued = self.queue_len(), "worker pool shutting down");
        }

        let workers = match mem::replace(&mut *self.state(), Lifecycle::Terminated) {
            Lifecycle::Running(workers) => workers,
            Lifecycle::Configured => Vec::new(),
            Lifecycle::Terminated => {
                // Another call is joining the workers.
                if !self.on_worker_thread() {
                    let _ = self.control.joined_signal.recv();
                }
                return Ok(());
            }
        };

        let mut result = Ok(());
        for worker in workers {
            if let Err(err) = worker.join() {
                tracing::error!(%err, "worker exited abnormally");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        self.control.root_cancel.cancel();
        self.control
            .joined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!("worker pool terminated");
        result
    }

    fn on_worker_thread(&self) -> bool {
        self.control
            .worker_threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&thread::current().id())
    }

    fn state(&self) -> MutexGuard<'_, Lifecycle> {
        self.control
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Pool<T> {
    /// Returns the number of items waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.control.sender.len()
    }

    /// Returns the capacity of the queue.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.control.queue_capacity
    }

    /// Returns the configured number of workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.control.worker_count
    }

    /// Returns the deadline given to every item.
    #[must_use]
    pub fn item_deadline(&self) -> Duration {
        self.shared.runner.item_deadline
    }

    /// Returns the context every per-item context is derived from.
    ///
    /// It is cancelled when the pool has shut down.
    #[must_use]
    pub fn root_context(&self) -> Context {
        self.shared.runner.root.clone()
    }

    /// Returns `true` if the workers have been started and the pool is not
    /// shut down yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let state = self
            .control
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        matches!(*state, Lifecycle::Running(_)) && !self.is_shut_down()
    }

    /// Returns `true` once the stop signal has been raised.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.control
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
