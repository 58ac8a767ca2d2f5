#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Once};

use pagesync::checkpoint::{CheckpointerOptions, CounterMetrics, PageSet, WriteAction};
use pagesync::types::{CheckpointError, FullPageId, Result};
use pagesync::{CheckpointPhase, Checkpointer};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pagesync=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

type Written = Arc<Mutex<Vec<Vec<FullPageId>>>>;

fn recording_factory(written: &Written) -> impl Fn(Vec<FullPageId>) -> WriteAction + Send + Sync {
    let written = Arc::clone(written);
    move |pages: Vec<FullPageId>| -> WriteAction {
        let written = Arc::clone(&written);
        Box::new(move || {
            written.lock().push(pages);
            Ok(())
        })
    }
}

fn sorted_chunks(written: &Written) -> Vec<Vec<FullPageId>> {
    let mut chunks = written.lock().clone();
    chunks.sort_by_key(|chunk| chunk.first().copied());
    chunks
}

fn is_ascending(pages: &[FullPageId]) -> bool {
    pages.windows(2).all(|pair| pair[0] < pair[1])
}

#[test]
fn ten_reversed_pages_are_written_in_three_sorted_chunks() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let checkpointer = Checkpointer::with_metrics(
        CheckpointerOptions::default()
            .threads(2)
            .instance_name("e2e")
            .max_chunk_pages(4),
        metrics.clone(),
    )?;
    let pages: PageSet = (0..10).rev().map(|idx| FullPageId::new(1, 0, idx)).collect();
    let written: Written = Arc::new(Mutex::new(Vec::new()));

    let write = checkpointer.checkpoint_write(&pages, recording_factory(&written));
    assert_eq!(write.pages(), 10);
    write.wait()?;
    assert_eq!(write.phase(), CheckpointPhase::Succeeded);

    let chunks = sorted_chunks(&written);
    let expected: Vec<Vec<FullPageId>> = vec![
        (0..4).map(|idx| FullPageId::new(1, 0, idx)).collect(),
        (4..8).map(|idx| FullPageId::new(1, 0, idx)).collect(),
        (8..10).map(|idx| FullPageId::new(1, 0, idx)).collect(),
    ];
    assert_eq!(chunks, expected);
    assert_eq!(metrics.leaf_tasks.load(Ordering::SeqCst), 3);
    assert_eq!(metrics.pages_written.load(Ordering::SeqCst), 10);
    assert_eq!(metrics.checkpoints_succeeded.load(Ordering::SeqCst), 1);
    checkpointer.shutdown()
}

#[test]
fn failing_chunk_fails_the_whole_checkpoint() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let checkpointer = Checkpointer::with_metrics(
        CheckpointerOptions::default().threads(2).max_chunk_pages(4),
        metrics.clone(),
    )?;
    let pages: PageSet = (0..10).map(|idx| FullPageId::new(1, 0, idx)).collect();
    let attempted = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&attempted);
    let poisoned = FullPageId::new(1, 0, 4);

    let write = checkpointer.checkpoint_write(&pages, move |chunk: Vec<FullPageId>| -> WriteAction {
        let seen = Arc::clone(&seen);
        Box::new(move || {
            let fails = chunk.contains(&poisoned);
            seen.lock().push(chunk);
            if fails {
                Err(CheckpointError::Write("disk full".into()))
            } else {
                Ok(())
            }
        })
    });

    match write.wait() {
        Err(CheckpointError::Write(msg)) => assert_eq!(msg, "disk full"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(write.phase(), CheckpointPhase::Failed);
    assert_eq!(attempted.lock().len(), 3);
    assert_eq!(metrics.write_failures.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.pages_written.load(Ordering::SeqCst), 6);
    assert_eq!(metrics.checkpoints_failed.load(Ordering::SeqCst), 1);
    checkpointer.shutdown()
}

#[test]
fn pages_across_partitions_are_each_written_once() -> Result<()> {
    init_tracing();
    let checkpointer = Checkpointer::new(CheckpointerOptions::default().threads(4))?;
    let mut pages = PageSet::new();
    for group in [7, -2, 3] {
        for partition in 0..5 {
            for idx in (0..97).step_by(3) {
                pages.insert(FullPageId::new(group, partition, idx));
            }
        }
    }
    let written: Written = Arc::new(Mutex::new(Vec::new()));
    checkpointer
        .checkpoint_write(&pages, recording_factory(&written))
        .wait()?;

    let chunks = sorted_chunks(&written);
    assert!(chunks.iter().all(|chunk| is_ascending(chunk)));
    assert_eq!(chunks.len(), pages.len().div_ceil(pages.len().div_ceil(4)));
    let flat: Vec<FullPageId> = chunks.into_iter().flatten().collect();
    assert_eq!(flat, pages.to_ordered_array());
    let unique: HashSet<FullPageId> = flat.iter().copied().collect();
    assert_eq!(unique.len(), pages.len());
    checkpointer.shutdown()
}

#[test]
fn full_queue_runs_tasks_on_submitting_thread() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let checkpointer = Checkpointer::with_metrics(
        CheckpointerOptions::default()
            .threads(1)
            .queue_capacity(1)
            .max_chunk_pages(1),
        metrics.clone(),
    )?;
    let pages: PageSet = (0..16).map(|idx| FullPageId::new(2, 1, idx)).collect();
    let written: Written = Arc::new(Mutex::new(Vec::new()));
    checkpointer
        .checkpoint_write(&pages, recording_factory(&written))
        .wait()?;

    assert!(metrics.rejected_inline.load(Ordering::SeqCst) >= 1);
    assert_eq!(written.lock().len(), 16);
    assert_eq!(metrics.pages_written.load(Ordering::SeqCst), 16);
    checkpointer.shutdown()
}

#[test]
fn panicking_write_action_fails_the_checkpoint() -> Result<()> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let checkpointer = Checkpointer::with_metrics(
        CheckpointerOptions::default().threads(2).max_chunk_pages(2),
        metrics.clone(),
    )?;
    let pages: PageSet = (0..6).map(|idx| FullPageId::new(1, 1, idx)).collect();
    let write = checkpointer.checkpoint_write(&pages, |chunk: Vec<FullPageId>| -> WriteAction {
        Box::new(move || {
            if chunk.contains(&FullPageId::new(1, 1, 5)) {
                panic!("page buffer missing");
            }
            Ok(())
        })
    });
    match write.wait() {
        Err(CheckpointError::TaskPanicked(msg)) => assert_eq!(msg, "page buffer missing"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(metrics.write_failures.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.pages_written.load(Ordering::SeqCst), 4);
    assert_eq!(metrics.checkpoints_failed.load(Ordering::SeqCst), 1);
    checkpointer.shutdown()
}

#[test]
fn consecutive_writes_get_distinct_ids() -> Result<()> {
    let checkpointer = Checkpointer::new(CheckpointerOptions::default().threads(2))?;
    let pages: PageSet = (0..8).map(|idx| FullPageId::new(4, 0, idx)).collect();
    let written: Written = Arc::new(Mutex::new(Vec::new()));
    let first = checkpointer.checkpoint_write(&pages, recording_factory(&written));
    let second = checkpointer.checkpoint_write(&pages, recording_factory(&written));
    assert_ne!(first.id(), second.id());
    first.wait()?;
    second.wait()?;
    let total: usize = written.lock().iter().map(Vec::len).sum();
    assert_eq!(total, 16);
    checkpointer.shutdown()
}
