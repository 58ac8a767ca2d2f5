use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking checkpoint write scheduling.
///
/// Implementations collect statistics about checkpoint writes: how many pages
/// each checkpoint covered, how the page set was split into tasks, how many
/// pages reached storage, and how often the runner pool was saturated. This
/// information can be used for monitoring and for tuning the thread count
/// and chunk size.
///
/// Hooks are called from runner threads as well as the submitting thread,
/// so implementations must be cheap and thread-safe.
pub trait CheckpointMetrics: Send + Sync {
    /// Records that a checkpoint write was accepted.
    ///
    /// # Parameters
    /// * `pages` - Number of pages in the checkpoint snapshot.
    fn checkpoint_started(&self, pages: usize);

    /// Records that a checkpoint write resolved.
    ///
    /// Called before any waiter of the write is released.
    ///
    /// # Parameters
    /// * `ok` - Whether every chunk was written successfully.
    fn checkpoint_finished(&self, ok: bool);

    /// Records a span partitioned into two split tasks.
    fn split_task(&self);

    /// Records a leaf write task being forked.
    ///
    /// # Parameters
    /// * `pages` - Number of pages in the chunk.
    fn leaf_task(&self, pages: usize);

    /// Records a leaf write task that completed successfully.
    ///
    /// # Parameters
    /// * `pages` - Number of pages the task wrote.
    fn pages_written(&self, pages: usize);

    /// Records a leaf write task that returned an error or panicked.
    fn write_failed(&self);

    /// Records a task the runner pool rejected, which then ran on the
    /// submitting thread.
    ///
    /// Frequent rejections mean the queue capacity is too small for the
    /// chunk count.
    fn rejected_inline(&self);
}

/// A no-op implementation of [`CheckpointMetrics`] that discards all
/// recorded metrics.
///
/// Used when the caller does not supply a metrics sink.
#[derive(Default)]
pub struct NoopMetrics;

impl CheckpointMetrics for NoopMetrics {
    fn checkpoint_started(&self, _pages: usize) {}
    fn checkpoint_finished(&self, _ok: bool) {}
    fn split_task(&self) {}
    fn leaf_task(&self, _pages: usize) {}
    fn pages_written(&self, _pages: usize) {}
    fn write_failed(&self) {}
    fn rejected_inline(&self) {}
}

/// Atomic counter implementation of [`CheckpointMetrics`].
///
/// Every field is a monotonically increasing counter updated with relaxed
/// ordering; read them with `load` for dashboards or assertions in tests.
#[derive(Default)]
pub struct CounterMetrics {
    /// Checkpoint writes accepted.
    pub checkpoints_started: AtomicU64,

    /// Checkpoint writes that resolved successfully.
    pub checkpoints_succeeded: AtomicU64,

    /// Checkpoint writes that resolved with an error.
    pub checkpoints_failed: AtomicU64,

    /// Spans partitioned into two split tasks.
    pub split_tasks: AtomicU64,

    /// Leaf write tasks forked.
    pub leaf_tasks: AtomicU64,

    /// Pages handed to leaf write tasks.
    pub pages_scheduled: AtomicU64,

    /// Pages whose leaf write task succeeded.
    pub pages_written: AtomicU64,

    /// Leaf write tasks that failed.
    pub write_failures: AtomicU64,

    /// Tasks run on the submitting thread after pool rejection.
    pub rejected_inline: AtomicU64,
}

impl CheckpointMetrics for CounterMetrics {
    fn checkpoint_started(&self, _pages: usize) {
        self.checkpoints_started.fetch_add(1, Ordering::Relaxed);
    }

    fn checkpoint_finished(&self, ok: bool) {
        if ok {
            self.checkpoints_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.checkpoints_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn split_task(&self) {
        self.split_tasks.fetch_add(1, Ordering::Relaxed);
    }

    fn leaf_task(&self, pages: usize) {
        self.leaf_tasks.fetch_add(1, Ordering::Relaxed);
        self.pages_scheduled
            .fetch_add(pages as u64, Ordering::Relaxed);
    }

    fn pages_written(&self, pages: usize) {
        self.pages_written.fetch_add(pages as u64, Ordering::Relaxed);
    }

    fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn rejected_inline(&self) {
        self.rejected_inline.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn CheckpointMetrics> {
    Arc::new(NoopMetrics)
}
