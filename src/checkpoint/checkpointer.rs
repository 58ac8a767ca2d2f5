use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::metrics::{default_metrics, CheckpointMetrics};
use super::options::CheckpointerOptions;
use super::page_set::PageSet;
use super::splitter::{chunk_size, SortingTaskSplitter, Split};
use crate::primitives::concurrency::{
    run_guarded, CheckpointThreadPool, CompletionFuture, ReportingTask,
};
use crate::types::{CheckpointError, FullPageId, Result};

/// Deferred write of one chunk of pages.
pub type WriteAction = Box<dyn FnOnce() -> Result<()> + Send>;

/// Turns a sorted chunk of page ids into the action that persists it.
///
/// Implemented for any `Fn(Vec<FullPageId>) -> WriteAction`.
pub trait WriteTaskFactory: Send + Sync {
    /// Builds the write action for `pages`, sorted ascending.
    fn create(&self, pages: Vec<FullPageId>) -> WriteAction;
}

impl<F> WriteTaskFactory for F
where
    F: Fn(Vec<FullPageId>) -> WriteAction + Send + Sync,
{
    fn create(&self, pages: Vec<FullPageId>) -> WriteAction {
        self(pages)
    }
}

/// Lifecycle of a single checkpoint write request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckpointPhase {
    /// Snapshotting the page set.
    Building,
    /// Forking the root split task.
    Forking,
    /// All submission done; waiting for chunks to report.
    AwaitingCompletion,
    /// Every chunk was written.
    Succeeded,
    /// At least one chunk failed, or the request was refused.
    Failed,
}

impl CheckpointPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Building,
            1 => Self::Forking,
            _ => Self::AwaitingCompletion,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Building => 0,
            Self::Forking => 1,
            Self::AwaitingCompletion | Self::Succeeded | Self::Failed => 2,
        }
    }
}

/// Handle to an in-flight checkpoint write.
pub struct CheckpointWrite {
    id: u64,
    pages: usize,
    phase: Arc<AtomicU8>,
    future: CompletionFuture,
}

impl CheckpointWrite {
    /// Sequence number of this write within its checkpointer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of pages scheduled.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Current phase; terminal phases are read off the future.
    pub fn phase(&self) -> CheckpointPhase {
        match self.future.try_outcome() {
            Some(Ok(())) => CheckpointPhase::Succeeded,
            Some(Err(_)) => CheckpointPhase::Failed,
            None => CheckpointPhase::from_u8(self.phase.load(AtomicOrdering::Acquire)),
        }
    }

    /// The fan-in future resolved when every chunk has reported.
    pub fn future(&self) -> &CompletionFuture {
        &self.future
    }

    /// Consumes the handle, keeping only the future.
    pub fn into_future(self) -> CompletionFuture {
        self.future
    }

    /// Blocks until every chunk has reported.
    pub fn wait(&self) -> Result<()> {
        self.future.wait()
    }
}

impl fmt::Debug for CheckpointWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointWrite")
            .field("id", &self.id)
            .field("pages", &self.pages)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Pool plus metrics; shared by the checkpointer and every task it forks.
struct Runner {
    pool: CheckpointThreadPool,
    metrics: Arc<dyn CheckpointMetrics>,
}

impl Runner {
    /// Registers a task on `done`, then hands it to the pool.
    fn fork<F>(&self, action: F, done: &CompletionFuture) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        done.increment_tasks_count()?;
        self.execute(ReportingTask::new(action, done.clone()));
        Ok(())
    }

    fn execute<F>(&self, task: ReportingTask<F>)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if let Err(job) = self.pool.execute(Box::new(task)) {
            self.metrics.rejected_inline();
            debug!(
                instance = self.pool.instance(),
                shutdown = self.pool.is_shutdown(),
                "checkpoint.runner.rejected"
            );
            job.run();
        }
    }
}

/// Everything a split task needs to keep forking.
struct WritePlan {
    runner: Arc<Runner>,
    factory: Arc<dyn WriteTaskFactory>,
    done: CompletionFuture,
    checkpoint: u64,
}

fn fork_split(plan: &Arc<WritePlan>, splitter: SortingTaskSplitter) -> Result<()> {
    let task_plan = Arc::clone(plan);
    plan.runner
        .fork(move || run_split(&task_plan, splitter), &plan.done)
}

fn run_split(plan: &Arc<WritePlan>, splitter: SortingTaskSplitter) -> Result<()> {
    match splitter.split() {
        Split::Leaf(pages) => {
            let count = pages.len();
            let first = pages.first().copied();
            let action = plan.factory.create(pages);
            let metrics = Arc::clone(&plan.runner.metrics);
            let checkpoint = plan.checkpoint;
            metrics.leaf_task(count);
            plan.runner.fork(
                move || match run_guarded(action) {
                    Ok(()) => {
                        metrics.pages_written(count);
                        Ok(())
                    }
                    Err(err) => {
                        metrics.write_failed();
                        warn!(
                            checkpoint,
                            pages = count,
                            first = ?first,
                            error = %err,
                            "checkpoint.write.chunk_failed"
                        );
                        Err(err)
                    }
                },
                &plan.done,
            )
        }
        Split::Halves(left, right) => {
            plan.runner.metrics.split_task();
            fork_split(plan, left)?;
            fork_split(plan, right)
        }
    }
}

/// Schedules checkpoint page writes across a dedicated runner pool.
///
/// A checkpoint write snapshots the dirty page set, splits it into chunks
/// that are each sorted in device order, and writes the chunks in parallel.
/// The caller gets a [`CheckpointWrite`] back immediately and decides whether
/// to wait on it.
pub struct Checkpointer {
    runner: Arc<Runner>,
    options: CheckpointerOptions,
    stopped: AtomicBool,
    next_id: AtomicU64,
}

impl Checkpointer {
    /// Starts a checkpointer with its own runner pool.
    pub fn new(options: CheckpointerOptions) -> Result<Self> {
        Self::with_metrics(options, default_metrics())
    }

    /// Starts a checkpointer reporting to `metrics`.
    pub fn with_metrics(
        options: CheckpointerOptions,
        metrics: Arc<dyn CheckpointMetrics>,
    ) -> Result<Self> {
        let options = options.normalize();
        let pool = CheckpointThreadPool::new(
            options.threads,
            &options.instance_name,
            options.queue_capacity,
        )?;
        Ok(Self {
            runner: Arc::new(Runner { pool, metrics }),
            options,
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    /// Writes every page in `pages` using actions built by `factory`.
    ///
    /// Returns without waiting. The returned write resolves once every chunk
    /// has reported, failing with the first chunk error if any chunk failed.
    /// After [`shutdown`](Self::shutdown) the write is already failed with
    /// [`CheckpointError::Stopped`].
    pub fn checkpoint_write<F>(&self, pages: &PageSet, factory: F) -> CheckpointWrite
    where
        F: WriteTaskFactory + 'static,
    {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let phase = Arc::new(AtomicU8::new(CheckpointPhase::Building.as_u8()));
        // The extra slot keeps early finishers from resolving the future
        // before the root task has been forked.
        let done = CompletionFuture::single();
        let snapshot = pages.to_array();
        let write = CheckpointWrite {
            id,
            pages: snapshot.len(),
            phase: Arc::clone(&phase),
            future: done.clone(),
        };

        if self.stopped.load(AtomicOrdering::Acquire) {
            warn!(checkpoint = id, "checkpoint.write.refused");
            phase.store(CheckpointPhase::Forking.as_u8(), AtomicOrdering::Release);
            done.on_done(Err(CheckpointError::Stopped));
            return write;
        }

        let metrics = Arc::clone(&self.runner.metrics);
        metrics.checkpoint_started(snapshot.len());
        let started = Instant::now();
        let total = snapshot.len();
        done.listen(move |outcome| {
            metrics.checkpoint_finished(outcome.is_ok());
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match outcome {
                Ok(()) => info!(checkpoint = id, pages = total, elapsed_ms, "checkpoint.write.done"),
                Err(err) => error!(
                    checkpoint = id,
                    pages = total,
                    elapsed_ms,
                    error = %err,
                    "checkpoint.write.failed"
                ),
            }
        });

        if snapshot.is_empty() {
            phase.store(
                CheckpointPhase::AwaitingCompletion.as_u8(),
                AtomicOrdering::Release,
            );
            done.on_done(Ok(()));
            return write;
        }

        let chunk = chunk_size(total, self.options.threads, self.options.max_chunk_pages);
        debug!(
            checkpoint = id,
            pages = total,
            chunk,
            threads = self.options.threads,
            "checkpoint.write.begin"
        );
        phase.store(CheckpointPhase::Forking.as_u8(), AtomicOrdering::Release);
        let plan = Arc::new(WritePlan {
            runner: Arc::clone(&self.runner),
            factory: Arc::new(factory),
            done: done.clone(),
            checkpoint: id,
        });
        match fork_split(&plan, SortingTaskSplitter::new(snapshot, chunk)) {
            Ok(()) => {
                phase.store(
                    CheckpointPhase::AwaitingCompletion.as_u8(),
                    AtomicOrdering::Release,
                );
                done.on_done(Ok(()));
            }
            Err(err) => {
                done.on_done(Err(err));
            }
        }
        write
    }

    /// Runs `action` on the runner pool and reports its outcome to `done`.
    ///
    /// The caller must already have reserved a slot on `done` for it. If the
    /// pool rejects the action it runs on the calling thread instead.
    pub fn execute<F>(&self, action: F, done: &CompletionFuture)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.runner
            .execute(ReportingTask::new(action, done.clone()));
    }

    /// Stops accepting checkpoint writes and shuts the runner pool down.
    ///
    /// Queued tasks are cancelled, failing their checkpoint writes. Running
    /// tasks get the configured grace period; past it the runners are left
    /// detached and [`CheckpointError::ShutdownTimeout`] is returned.
    pub fn shutdown(&self) -> Result<()> {
        let first = !self.stopped.swap(true, AtomicOrdering::AcqRel);
        if first {
            info!(
                instance = %self.options.instance_name,
                "checkpoint.checkpointer.shutdown"
            );
        }
        self.runner
            .pool
            .shutdown(self.options.shutdown_grace_duration())
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(AtomicOrdering::Acquire)
    }

    /// Effective options after normalization.
    pub fn options(&self) -> &CheckpointerOptions {
        &self.options
    }

    /// Metrics sink this checkpointer reports to.
    pub fn metrics(&self) -> Arc<dyn CheckpointMetrics> {
        Arc::clone(&self.runner.metrics)
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        if self.is_shutdown() {
            return;
        }
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "checkpoint.checkpointer.drop_shutdown_failed");
        }
    }
}

impl fmt::Debug for Checkpointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpointer")
            .field("options", &self.options)
            .field("pool", &self.runner.pool)
            .field("stopped", &self.is_shutdown())
            .finish()
    }
}
