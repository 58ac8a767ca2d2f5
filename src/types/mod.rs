#![forbid(unsafe_code)]

//! Identifiers and the error type shared by every checkpoint component.

use std::io;
use std::time::Duration;

mod page;

pub use page::{sequential_page_order, FullPageId, PartitionId};

/// Errors produced while scheduling or executing checkpoint writes.
#[derive(thiserror::Error, Debug)]
pub enum CheckpointError {
    /// I/O failure from a write action or from spawning runner threads.
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    /// A write action reported a failure.
    #[error("page write failed: {0}")]
    Write(String),
    /// A task panicked; the panic was caught at the task boundary.
    #[error("checkpoint task panicked: {0}")]
    TaskPanicked(String),
    /// A queued task was discarded before it could run.
    #[error("checkpoint task cancelled: {0}")]
    Cancelled(&'static str),
    /// Runner threads were still busy when the shutdown grace period ran out.
    #[error("checkpoint runners did not stop within {grace:?}")]
    ShutdownTimeout {
        /// The grace period that elapsed.
        grace: Duration,
    },
    /// The checkpointer has been shut down and accepts no new work.
    #[error("checkpointer is shut down")]
    Stopped,
    /// Invalid argument or state transition.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Duplicates an error so every waiter on a shared outcome gets its own copy.
pub fn clone_error(err: &CheckpointError) -> CheckpointError {
    match err {
        CheckpointError::Io(io_err) => {
            CheckpointError::Io(io::Error::new(io_err.kind(), io_err.to_string()))
        }
        CheckpointError::Write(msg) => CheckpointError::Write(msg.clone()),
        CheckpointError::TaskPanicked(msg) => CheckpointError::TaskPanicked(msg.clone()),
        CheckpointError::Cancelled(msg) => CheckpointError::Cancelled(msg),
        CheckpointError::ShutdownTimeout { grace } => {
            CheckpointError::ShutdownTimeout { grace: *grace }
        }
        CheckpointError::Stopped => CheckpointError::Stopped,
        CheckpointError::Invalid(msg) => CheckpointError::Invalid(msg),
    }
}
