use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::types::{clone_error, CheckpointError, Result};

type Listener = Box<dyn FnOnce(&Result<()>) + Send>;

/// Fan-in completion tracker for a dynamically growing set of tasks.
///
/// The future starts with a number of reserved slots. Every party that forks
/// a task calls [`increment_tasks_count`](Self::increment_tasks_count) before
/// the task can possibly finish, and every task reports exactly once through
/// [`on_done`](Self::on_done). When the pending count reaches zero the future
/// resolves: successfully if no task failed, otherwise with the first error
/// recorded. Clones share the same state.
#[derive(Clone)]
pub struct CompletionFuture {
    inner: Arc<Inner>,
}

struct Inner {
    pending: AtomicUsize,
    state: Mutex<State>,
    cv: Condvar,
}

#[derive(Default)]
struct State {
    first_error: Option<CheckpointError>,
    /// Final outcome while listeners run, before waiters are released.
    resolving: Option<Result<()>>,
    outcome: Option<Result<()>>,
    listeners: Vec<Listener>,
}

impl State {
    fn settled(&self) -> Option<Result<()>> {
        self.outcome
            .as_ref()
            .or(self.resolving.as_ref())
            .map(copy_outcome)
    }
}

fn copy_outcome(outcome: &Result<()>) -> Result<()> {
    match outcome {
        Ok(()) => Ok(()),
        Err(err) => Err(clone_error(err)),
    }
}

impl CompletionFuture {
    /// Creates a future with `initial_pending` reserved slots.
    ///
    /// Returns [`CheckpointError::Invalid`] when `initial_pending` is zero; a
    /// future that starts resolved cannot track anything.
    pub fn new(initial_pending: usize) -> Result<Self> {
        if initial_pending == 0 {
            return Err(CheckpointError::Invalid(
                "completion future needs at least one pending slot",
            ));
        }
        Ok(Self::with_pending(initial_pending))
    }

    /// Creates a future holding one reserved slot, the submission guard a
    /// forking party releases once it has registered every initial task.
    pub fn single() -> Self {
        Self::with_pending(1)
    }

    fn with_pending(initial_pending: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicUsize::new(initial_pending),
                state: Mutex::new(State::default()),
                cv: Condvar::new(),
            }),
        }
    }

    /// Reserves a slot for a task that is about to be forked.
    ///
    /// Must happen strictly before the forked task can report completion.
    /// Fails once the future has resolved.
    pub fn increment_tasks_count(&self) -> Result<()> {
        self.inner
            .pending
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |n| {
                if n == 0 {
                    None
                } else {
                    Some(n + 1)
                }
            })
            .map(|_| ())
            .map_err(|_| CheckpointError::Invalid("task registered on a completed future"))
    }

    /// Releases one slot, recording `outcome` if it is the first failure.
    ///
    /// Returns `true` when this call resolved the future.
    pub fn on_done(&self, outcome: Result<()>) -> bool {
        if let Err(err) = outcome {
            let mut state = self.inner.state.lock();
            if state.settled().is_some() {
                warn!(error = %err, "completion.on_done.after_resolve");
                return false;
            }
            if state.first_error.is_none() {
                state.first_error = Some(err);
            }
        }
        let released = self.inner.pending.fetch_update(
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
            |n| n.checked_sub(1),
        );
        match released {
            Ok(1) => {
                self.resolve();
                true
            }
            Ok(_) => false,
            Err(_) => {
                warn!("completion.on_done.extra_report");
                false
            }
        }
    }

    /// Runs listeners first, then publishes the outcome to waiters, so a
    /// listener's effects are visible once `wait` returns.
    fn resolve(&self) {
        let (outcome, listeners) = {
            let mut state = self.inner.state.lock();
            let outcome = match state.first_error.as_ref() {
                Some(err) => Err(clone_error(err)),
                None => Ok(()),
            };
            state.resolving = Some(copy_outcome(&outcome));
            (outcome, std::mem::take(&mut state.listeners))
        };
        for listener in listeners {
            listener(&outcome);
        }
        let mut state = self.inner.state.lock();
        state.resolving = None;
        state.outcome = Some(outcome);
        self.inner.cv.notify_all();
    }

    /// Registers a callback run once with the final outcome.
    ///
    /// Runs immediately on the calling thread if the future already resolved,
    /// otherwise on the thread that releases the last slot. Waiters are
    /// released only after every listener registered before resolution has
    /// returned, so a listener must not block on this future.
    pub fn listen<F>(&self, listener: F)
    where
        F: FnOnce(&Result<()>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.inner.state.lock();
            match state.settled() {
                Some(outcome) => outcome,
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(&outcome);
    }

    /// Blocks until the future resolves and returns its outcome.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        loop {
            match state.outcome.as_ref() {
                Some(Ok(())) => return Ok(()),
                Some(Err(err)) => return Err(clone_error(err)),
                None => self.inner.cv.wait(&mut state),
            }
        }
    }

    /// Blocks for at most `timeout`; returns `None` if still unresolved.
    ///
    /// A timeout too large to represent as a deadline waits indefinitely.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let mut state = self.inner.state.lock();
        if let Some(outcome) = state.outcome.as_ref() {
            return Some(copy_outcome(outcome));
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            drop(state);
            return Some(self.wait());
        };
        loop {
            match state.outcome.as_ref() {
                Some(Ok(())) => return Some(Ok(())),
                Some(Err(err)) => return Some(Err(clone_error(err))),
                None => {
                    if self.inner.cv.wait_until(&mut state, deadline).timed_out()
                        && state.outcome.is_none()
                    {
                        return None;
                    }
                }
            }
        }
    }

    /// Whether the pending count has reached zero.
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    /// Number of slots still outstanding.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(AtomicOrdering::Acquire)
    }

    /// Returns the outcome without blocking, if resolved.
    pub fn try_outcome(&self) -> Option<Result<()>> {
        self.inner.state.lock().outcome.as_ref().map(copy_outcome)
    }
}

impl fmt::Debug for CompletionFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionFuture")
            .field("pending", &self.pending())
            .field("done", &self.is_done())
            .finish()
    }
}
