//! Fan-in completion tracking and the checkpoint runner pool.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::debug;

use crate::types::{CheckpointError, Result};

mod countdown;
mod pool;

pub use countdown::CompletionFuture;
pub use pool::{CheckpointThreadPool, Job, RunnerTask, CANCELLED_BY_SHUTDOWN, CHECKPOINT_RUNNER};

/// Runs `action` and reports its outcome to `done` exactly once.
///
/// Errors and panics are both turned into a failed report so a misbehaving
/// action can never leave a slot of `done` unreleased.
pub struct ReportingTask<F> {
    action: F,
    done: CompletionFuture,
}

impl<F> ReportingTask<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    /// Wraps `action`; the caller must already hold a slot on `done`.
    pub fn new(action: F, done: CompletionFuture) -> Self {
        Self { action, done }
    }

    /// Runs the action on the current thread and reports.
    pub fn run_inline(self) {
        let Self { action, done } = self;
        let outcome = run_guarded(action);
        done.on_done(outcome);
    }
}

impl<F> RunnerTask for ReportingTask<F>
where
    F: FnOnce() -> Result<()> + Send,
{
    fn run(self: Box<Self>) {
        (*self).run_inline();
    }

    fn cancel(self: Box<Self>, reason: &'static str) {
        debug!(reason, "checkpoint.task.cancelled");
        self.done.on_done(Err(CheckpointError::Cancelled(reason)));
    }
}

/// Calls `action`, converting a panic into [`CheckpointError::TaskPanicked`].
pub fn run_guarded<F>(action: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(action)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(CheckpointError::TaskPanicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
