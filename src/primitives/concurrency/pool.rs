use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::types::{CheckpointError, Result};

/// Prefix of every runner thread name.
pub const CHECKPOINT_RUNNER: &str = "checkpoint-runner";

/// Reason attached to tasks discarded by [`CheckpointThreadPool::shutdown`].
pub const CANCELLED_BY_SHUTDOWN: &str = "checkpoint runner pool shut down";

/// A unit of work accepted by [`CheckpointThreadPool`].
///
/// Exactly one of `run` or `cancel` is invoked for every accepted task.
pub trait RunnerTask: Send {
    /// Executes the task on a runner thread.
    fn run(self: Box<Self>);
    /// Discards the task without running it.
    fn cancel(self: Box<Self>, reason: &'static str);
}

/// Boxed task as stored in the runner queue.
pub type Job = Box<dyn RunnerTask>;

/// Fixed-size pool of named runner threads fed from a shared queue.
///
/// Submission never blocks: when the queue is full or the pool is shut down
/// the job is handed back to the caller, which decides how to run it.
pub struct CheckpointThreadPool {
    instance: String,
    threads: usize,
    sender: RwLock<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    stopping: Arc<AtomicBool>,
    live: Arc<LiveWorkers>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct LiveWorkers {
    count: Mutex<usize>,
    cv: Condvar,
}

struct LiveGuard(Arc<LiveWorkers>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count = count.saturating_sub(1);
        self.0.cv.notify_all();
    }
}

impl CheckpointThreadPool {
    /// Spawns `threads` runner threads named after `instance`.
    ///
    /// `queue_capacity` bounds the number of queued jobs; `None` leaves the
    /// queue unbounded.
    pub fn new(threads: usize, instance: &str, queue_capacity: Option<usize>) -> Result<Self> {
        if threads == 0 {
            return Err(CheckpointError::Invalid(
                "checkpoint runner pool needs at least one thread",
            ));
        }
        let (sender, receiver) = match queue_capacity {
            Some(cap) => crossbeam_channel::bounded(cap.max(1)),
            None => crossbeam_channel::unbounded(),
        };
        let pool = Self {
            instance: instance.to_string(),
            threads,
            sender: RwLock::new(Some(sender)),
            receiver,
            stopping: Arc::new(AtomicBool::new(false)),
            live: Arc::new(LiveWorkers {
                count: Mutex::new(0),
                cv: Condvar::new(),
            }),
            workers: Mutex::new(Vec::with_capacity(threads)),
        };
        for idx in 0..threads {
            if let Err(err) = pool.spawn_worker(idx) {
                let _ = pool.shutdown(Duration::from_secs(5));
                return Err(err);
            }
        }
        info!(
            instance = %pool.instance,
            threads,
            queue_capacity = ?queue_capacity,
            "checkpoint.runner.started"
        );
        Ok(pool)
    }

    fn spawn_worker(&self, idx: usize) -> Result<()> {
        let receiver = self.receiver.clone();
        let stopping = Arc::clone(&self.stopping);
        *self.live.count.lock() += 1;
        let guard = LiveGuard(Arc::clone(&self.live));
        let handle = thread::Builder::new()
            .name(runner_thread_name(&self.instance, idx))
            .spawn(move || worker_loop(&receiver, &stopping, guard))?;
        self.workers.lock().push(handle);
        Ok(())
    }

    /// Queues `job` for a runner thread.
    ///
    /// Hands the job back when the queue is full or the pool is shut down.
    pub fn execute(&self, job: Job) -> std::result::Result<(), Job> {
        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            return Err(job);
        };
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => Err(job),
        }
    }

    /// Stops the pool.
    ///
    /// New jobs are rejected and queued jobs are cancelled. Running jobs get
    /// up to `grace` to finish; runners still busy after that are left
    /// detached and [`CheckpointError::ShutdownTimeout`] is returned.
    /// Calling this again is harmless.
    pub fn shutdown(&self, grace: Duration) -> Result<()> {
        let first = !self.stopping.swap(true, AtomicOrdering::AcqRel);
        self.sender.write().take();
        let mut cancelled = 0usize;
        while let Ok(job) = self.receiver.try_recv() {
            job.cancel(CANCELLED_BY_SHUTDOWN);
            cancelled += 1;
        }
        if first {
            debug!(
                instance = %self.instance,
                cancelled, "checkpoint.runner.shutdown_begin"
            );
        }

        let deadline = Instant::now().checked_add(grace);
        let busy = {
            let mut live = self.live.count.lock();
            while *live > 0 {
                match deadline {
                    Some(deadline) => {
                        if self.live.cv.wait_until(&mut live, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.live.cv.wait(&mut live),
                }
            }
            *live
        };
        if busy > 0 {
            warn!(
                instance = %self.instance,
                busy,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "checkpoint.runner.shutdown_timeout"
            );
            return Err(CheckpointError::ShutdownTimeout { grace });
        }
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                warn!(instance = %self.instance, "checkpoint.runner.worker_panicked");
            }
        }
        if first {
            info!(instance = %self.instance, "checkpoint.runner.stopped");
        }
        Ok(())
    }

    /// Number of jobs waiting for a runner.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.stopping.load(AtomicOrdering::Acquire)
    }

    /// Instance name used for thread naming.
    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl fmt::Debug for CheckpointThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointThreadPool")
            .field("instance", &self.instance)
            .field("threads", &self.threads)
            .field("queued", &self.queued())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn runner_thread_name(instance: &str, idx: usize) -> String {
    if instance.is_empty() {
        format!("{CHECKPOINT_RUNNER}-{idx}")
    } else {
        format!("{CHECKPOINT_RUNNER}-{instance}-{idx}")
    }
}

fn worker_loop(receiver: &Receiver<Job>, stopping: &AtomicBool, _live: LiveGuard) {
    while let Ok(job) = receiver.recv() {
        if stopping.load(AtomicOrdering::Acquire) {
            job.cancel(CANCELLED_BY_SHUTDOWN);
            continue;
        }
        job.run();
    }
    debug!("checkpoint.runner.worker_exit");
}
