#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use pagesync::checkpoint::{CheckpointerOptions, PageSet, WriteAction};
use pagesync::types::{CheckpointError, FullPageId, Result};
use pagesync::{CheckpointPhase, Checkpointer};

fn pages(count: i64) -> PageSet {
    (0..count).map(|idx| FullPageId::new(9, 2, idx)).collect()
}

/// Every write announces itself on `started`, then takes `hold` to finish.
fn slow_factory(
    started: Sender<()>,
    hold: Duration,
    writes: &Arc<AtomicUsize>,
) -> impl Fn(Vec<FullPageId>) -> WriteAction + Send + Sync {
    let writes = Arc::clone(writes);
    move |_pages: Vec<FullPageId>| -> WriteAction {
        let started = started.clone();
        let writes = Arc::clone(&writes);
        Box::new(move || {
            let _ = started.send(());
            thread::sleep(hold);
            writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[test]
fn shutdown_cancels_queued_chunks_and_fails_the_write() -> Result<()> {
    let checkpointer = Checkpointer::new(
        CheckpointerOptions::default()
            .threads(1)
            .max_chunk_pages(1)
            .shutdown_grace(Duration::from_secs(5)),
    )?;
    let (started_tx, started_rx) = bounded(16);
    let writes = Arc::new(AtomicUsize::new(0));
    let write = checkpointer.checkpoint_write(
        &pages(4),
        slow_factory(started_tx, Duration::from_millis(150), &writes),
    );

    started_rx
        .recv_timeout(Duration::from_secs(5))
        .map_err(|_| CheckpointError::Write("first chunk never started".into()))?;
    checkpointer.shutdown()?;

    match write.future().wait_timeout(Duration::from_secs(5)) {
        Some(Err(CheckpointError::Cancelled(_))) => {}
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(write.phase(), CheckpointPhase::Failed);
    assert_eq!(writes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn shutdown_past_grace_reports_timeout() -> Result<()> {
    let checkpointer = Checkpointer::new(
        CheckpointerOptions::default()
            .threads(1)
            .shutdown_grace(Duration::from_millis(50)),
    )?;
    let (started_tx, started_rx) = bounded(4);
    let writes = Arc::new(AtomicUsize::new(0));
    let write = checkpointer.checkpoint_write(
        &pages(3),
        slow_factory(started_tx, Duration::from_millis(400), &writes),
    );
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .map_err(|_| CheckpointError::Write("chunk never started".into()))?;

    match checkpointer.shutdown() {
        Err(CheckpointError::ShutdownTimeout { grace }) => {
            assert_eq!(grace, Duration::from_millis(50));
        }
        other => panic!("unexpected shutdown result {other:?}"),
    }
    assert!(checkpointer.is_shutdown());

    // The in-flight chunk still completes after the timeout.
    write.wait()?;
    assert_eq!(writes.load(Ordering::SeqCst), 1);
    thread::sleep(Duration::from_millis(20));
    checkpointer.shutdown()
}

#[test]
fn shutdown_is_idempotent_and_refuses_new_writes() -> Result<()> {
    let checkpointer = Checkpointer::new(CheckpointerOptions::default().threads(2))?;
    checkpointer.shutdown()?;
    checkpointer.shutdown()?;

    let writes = Arc::new(AtomicUsize::new(0));
    let (started_tx, _started_rx) = bounded(4);
    let write = checkpointer.checkpoint_write(
        &pages(5),
        slow_factory(started_tx, Duration::ZERO, &writes),
    );
    assert!(matches!(write.wait(), Err(CheckpointError::Stopped)));
    assert_eq!(writes.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn dropping_the_checkpointer_finishes_in_flight_writes() -> Result<()> {
    let checkpointer = Checkpointer::new(CheckpointerOptions::default().threads(2))?;
    let (started_tx, started_rx) = bounded(8);
    let writes = Arc::new(AtomicUsize::new(0));
    let write = checkpointer.checkpoint_write(
        &pages(2),
        slow_factory(started_tx, Duration::from_millis(30), &writes),
    );
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .map_err(|_| CheckpointError::Write("chunk never started".into()))?;
    drop(checkpointer);
    assert!(write.future().is_done());
    Ok(())
}
