//! Parallel checkpoint page-write scheduling.
//!
//! `pagesync` takes the set of dirty pages collected for a checkpoint, splits
//! it into chunks that are each sorted by group, partition and page index,
//! and writes those chunks on a pool of checkpoint runner threads. Callers get
//! a completion handle back immediately.

#![warn(missing_docs)]

pub mod checkpoint;
pub mod primitives;
pub mod types;

pub use checkpoint::{
    CheckpointPhase, CheckpointWrite, Checkpointer, CheckpointerOptions, PageSet, WriteAction,
    WriteTaskFactory,
};
pub use primitives::concurrency::{CheckpointThreadPool, CompletionFuture};
pub use types::{CheckpointError, FullPageId, Result};
