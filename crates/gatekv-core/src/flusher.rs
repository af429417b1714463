//! Flusher: background durability for applied batches
//!
//! `apply` writes a batch to the WAL without syncing and returns. The flusher
//! thread wakes on the configured cadence and, if any applied batch is still
//! unsynced, syncs the WAL once for all of them. A final sync runs on
//! shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{KvError, KvResult};
use crate::wal::WalWriter;

/// Longest the flusher sleeps before re-checking for shutdown
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// Counts applied batches that are not yet durable.
#[derive(Debug, Default)]
pub struct SyncTracker {
    pending: AtomicU64,
    total_synced: AtomicU64,
    total_cycles: AtomicU64,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch written without sync.
    pub fn mark_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Take the pending count, leaving zero.
    pub fn take_pending(&self) -> u64 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Put back batches whose sync failed so the next cycle retries them.
    fn restore_pending(&self, count: u64) {
        self.pending.fetch_add(count, Ordering::AcqRel);
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Batches made durable by a sync since the backend opened.
    pub fn total_synced(&self) -> u64 {
        self.total_synced.load(Ordering::Relaxed)
    }

    /// Flusher cycles completed.
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles.load(Ordering::Relaxed)
    }

    /// Count batches made durable by a sync that happened elsewhere.
    pub(crate) fn mark_synced(&self, count: u64) {
        self.total_synced.fetch_add(count, Ordering::Relaxed);
    }

    fn record_cycle(&self) {
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
    }
}

/// Sync the WAL if anything is pending. Returns how many batches became
/// durable.
pub fn sync_pending(wal: &Mutex<WalWriter>, tracker: &SyncTracker) -> KvResult<u64> {
    let pending = tracker.take_pending();
    if pending == 0 {
        return Ok(0);
    }
    let result = wal.lock().sync();
    match result {
        Ok(()) => {
            tracker.mark_synced(pending);
            Ok(pending)
        }
        Err(e) => {
            tracker.restore_pending(pending);
            Err(e)
        }
    }
}

/// Handle to the running flusher thread. Dropping it stops the thread.
pub struct FlushHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl FlushHandle {
    /// Request shutdown and wait for the final sync.
    pub fn shutdown(mut self) {
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |h| !h.is_finished())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlushHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the flusher for one backend's WAL.
pub fn start_flusher(
    name: &str,
    wal: Arc<Mutex<WalWriter>>,
    tracker: Arc<SyncTracker>,
    cadence: Duration,
) -> KvResult<FlushHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let thread = thread::Builder::new()
        .name(format!("gatekv-flush-{}", name))
        .spawn(move || flush_loop(wal, tracker, cadence, shutdown_flag))
        .map_err(|e| KvError::Io {
            path: None,
            kind: std::io::ErrorKind::Other,
            message: format!("Failed to spawn flusher thread: {}", e),
        })?;

    Ok(FlushHandle { shutdown, thread: Some(thread) })
}

fn flush_loop(
    wal: Arc<Mutex<WalWriter>>,
    tracker: Arc<SyncTracker>,
    cadence: Duration,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        let wake_time = Instant::now() + cadence;
        while Instant::now() < wake_time {
            if shutdown.load(Ordering::Acquire) {
                flush_cycle(&wal, &tracker);
                return;
            }
            thread::sleep(SHUTDOWN_POLL.min(cadence));
        }
        flush_cycle(&wal, &tracker);
    }
}

fn flush_cycle(wal: &Mutex<WalWriter>, tracker: &SyncTracker) {
    match sync_pending(wal, tracker) {
        Ok(0) => {}
        Ok(synced) => debug!(synced, "flushed applied batches"),
        Err(e) => warn!(error = %e, "background WAL sync failed, will retry"),
    }
    tracker.record_cycle();
}
