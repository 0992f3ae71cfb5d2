use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{select, Receiver};

use crate::{task::TaskRunner, PoolError, ThreadFactory};

/// The state every worker reads. It is never mutated after the pool is
/// built.
pub(crate) struct WorkerShared<T> {
    pub(crate) receiver: Receiver<T>,
    pub(crate) stop: Receiver<()>,
    pub(crate) runner: TaskRunner<T>,
    pub(crate) drain_on_shutdown: bool,
}

/// A worker holds a thread handle that is running the worker loop.
pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) handle: JoinHandle<()>,
}

impl<T> WorkerShared<T> {
    /// Receives and runs items until the stop signal is observed.
    ///
    /// Both events are waited on together. When an item and the stop
    /// signal are ready at the same time either may win, so items can be
    /// left in the queue unless `drain_on_shutdown` is set.
    fn run_loop(&self, id: usize) {
        tracing::debug!(worker = id, "worker started");
        loop {
            select! {
                recv(self.receiver) -> item => match item {
                    Ok(item) => self.runner.run(id, item),
                    Err(_) => break,
                },
                recv(self.stop) -> _ => {
                    if self.drain_on_shutdown {
                        self.drain(id);
                    }
                    break;
                }
            }
        }
        tracing::debug!(worker = id, "worker stopped");
    }

    fn drain(&self, id: usize) {
        let mut drained = 0_usize;
        while let Ok(item) = self.receiver.try_recv() {
            self.runner.run(id, item);
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!(worker = id, drained, "drained queued items");
        }
    }
}

impl Worker {
    /// Spawns a thread built by `thread_factory` that runs the worker loop.
    pub(crate) fn spawn<T: Send + 'static>(
        id: usize,
        thread_factory: &ThreadFactory,
        shared: Arc<WorkerShared<T>>,
    ) -> io::Result<Self> {
        let handle = thread_factory(id).spawn(move || shared.run_loop(id))?;
        Ok(Worker { id, handle })
    }

    /// Waits for the worker thread to exit.
    ///
    /// Joining from the worker's own thread is skipped, which lets a
    /// handler shut down the pool that is running it.
    pub(crate) fn join(self) -> Result<(), PoolError> {
        if self.handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        self.handle
            .join()
            .map_err(|payload| PoolError::WorkerPanicked {
                worker: self.id,
                message: crate::task::panic_message(payload.as_ref()),
            })
    }
}
