//! Checkpoint write scheduling.
//!
//! A checkpoint persists the set of pages dirtied since the previous one.
//! The [`Checkpointer`] splits that set into chunks sorted in device order
//! and writes the chunks in parallel on a dedicated runner pool, reporting
//! completion through a single fan-in future.

mod checkpointer;
mod metrics;
mod options;
mod page_set;
mod splitter;

pub use checkpointer::{
    CheckpointPhase, CheckpointWrite, Checkpointer, WriteAction, WriteTaskFactory,
};
pub use metrics::{default_metrics, CheckpointMetrics, CounterMetrics, NoopMetrics};
pub use options::{
    CheckpointerOptions, ConfigError, DEFAULT_CHECKPOINT_THREADS, DEFAULT_SHUTDOWN_GRACE,
};
pub use page_set::PageSet;
pub use splitter::{chunk_size, SortingTaskSplitter, Split};
