use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crossbeam_channel::{
    at, bounded, never, Receiver, Select, SelectedOperation, Sender, TryRecvError,
};

use crate::ContextError;

/// A cancellation scope with an optional absolute deadline.
///
/// Contexts form a tree: a child derived with [`Context::with_cancel`],
/// [`Context::with_deadline`] or [`Context::with_timeout`] is done as soon
/// as its own [`CancelHandle`] is cancelled, its deadline passes, or any of
/// its ancestors is done.
///
/// The pool hands a fresh context to the handler for every item, and
/// callers pass one to [`Pool::process`] to bound how long a submission
/// may wait for a queue slot.
///
/// # Examples
///
/// ```
/// use workpipe::{Context, ContextError};
/// use std::time::Duration;
///
/// let (ctx, cancel) = Context::with_timeout(&Context::background(), Duration::from_secs(5));
/// assert!(ctx.deadline().is_some());
/// assert!(!ctx.is_done());
///
/// cancel.cancel();
/// assert_eq!(Some(ContextError::Cancelled), ctx.err());
/// ```
///
/// [`Pool::process`]: crate::Pool::process
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    deadline: Option<Instant>,
    // One receiver per cancellable scope from the root down to this one.
    // Nothing is ever sent: a disconnected receiver means cancelled.
    signals: Vec<Receiver<()>>,
}

/// Cancels the [`Context`] it was created with.
///
/// Dropping the handle cancels the context as well, so keep it alive for
/// as long as the context should stay open.
pub struct CancelHandle {
    sender: Mutex<Option<Sender<()>>>,
}

impl CancelHandle {
    /// Cancels the associated context and all of its descendants.
    ///
    /// Calling this more than once has no further effect.
    pub fn cancel(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

impl Context {
    /// Returns a root context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                deadline: None,
                signals: Vec::new(),
            }),
        }
    }

    /// Derives a child context that can be cancelled through the returned
    /// handle.
    #[must_use]
    pub fn with_cancel(parent: &Context) -> (Self, CancelHandle) {
        Self::derive(parent, parent.deadline())
    }

    /// Derives a child context that is done at `deadline` at the latest.
    ///
    /// The effective deadline is the earlier one of `deadline` and the
    /// parent's deadline.
    #[must_use]
    pub fn with_deadline(parent: &Context, deadline: Instant) -> (Self, CancelHandle) {
        let deadline = match parent.deadline() {
            Some(inherited) if inherited < deadline => inherited,
            _ => deadline,
        };
        Self::derive(parent, Some(deadline))
    }

    /// Derives a child context that is done after `timeout` has elapsed.
    ///
    /// A zero `timeout` yields a context that is already done.
    #[must_use]
    pub fn with_timeout(parent: &Context, timeout: Duration) -> (Self, CancelHandle) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::with_deadline(parent, deadline),
            None => Self::with_cancel(parent),
        }
    }

    fn derive(parent: &Context, deadline: Option<Instant>) -> (Self, CancelHandle) {
        let (sender, receiver) = bounded(0);
        let mut signals = parent.inner.signals.clone();
        signals.push(receiver);

        let ctx = Self {
            inner: Arc::new(ContextInner { deadline, signals }),
        };
        let handle = CancelHandle {
            sender: Mutex::new(Some(sender)),
        };
        (ctx, handle)
    }

    /// Returns the instant at which this context expires, if any.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns the time left until the deadline, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns why the context is done, or `None` while it is still open.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self
            .inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Some(ContextError::DeadlineExceeded);
        }

        let cancelled = self
            .inner
            .signals
            .iter()
            .any(|signal| matches!(signal.try_recv(), Err(TryRecvError::Disconnected)));
        cancelled.then_some(ContextError::Cancelled)
    }

    /// Returns `true` if the context is cancelled or past its deadline.
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Blocks the current thread until the context is done.
    ///
    /// This never returns for a context without a deadline that can not be
    /// cancelled, such as [`Context::background`].
    pub fn wait(&self) -> ContextError {
        let timer = self.timer();
        let mut sel = Select::new();
        let first = self.watch(&mut sel, &timer);
        let oper = sel.select();
        self.finish(oper, &timer, first)
    }

    /// Blocks the current thread until the context is done or `timeout`
    /// has elapsed. Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ContextError> {
        let timer = self.timer();
        let mut sel = Select::new();
        let first = self.watch(&mut sel, &timer);
        sel.select_timeout(timeout)
            .ok()
            .map(|oper| self.finish(oper, &timer, first))
    }

    /// A channel that fires at the deadline, or never.
    pub(crate) fn timer(&self) -> Receiver<Instant> {
        self.inner.deadline.map_or_else(never, at)
    }

    /// Registers every event that ends this context with `sel`.
    ///
    /// Returns the index of the first registered operation; the timer comes
    /// first, then the cancellation signals from the root down.
    pub(crate) fn watch<'a>(&'a self, sel: &mut Select<'a>, timer: &'a Receiver<Instant>) -> usize {
        let first = sel.recv(timer);
        for signal in &self.inner.signals {
            sel.recv(signal);
        }
        first
    }

    /// Completes an operation selected from the events added by
    /// [`Context::watch`].
    pub(crate) fn finish(
        &self,
        oper: SelectedOperation<'_>,
        timer: &Receiver<Instant>,
        first: usize,
    ) -> ContextError {
        match oper.index() - first {
            0 => {
                let _ = oper.recv(timer);
                ContextError::DeadlineExceeded
            }
            n => {
                let _ = oper.recv(&self.inner.signals[n - 1]);
                ContextError::Cancelled
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish()
    }
}
