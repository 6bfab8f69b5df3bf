//! Durable feedback retry queue.
//!
//! Feedback submissions (trajectory quality/outcome) are appended here and
//! flushed by a background worker rather than delivered synchronously, so a
//! slow or unavailable downstream sink never blocks the JSON-RPC path.
//! Entries that exceed the attempt or age limit are written to a flat
//! failure log and dropped.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::GodagentResult;
use crate::types::FeedbackQueueEntry;

/// Maximum entries held in the queue at once; `submit` rejects beyond this.
pub const MAX_QUEUE_SIZE: usize = 100;
/// Entries older than this are logged as terminal failures and dropped.
const MAX_AGE_SECS: i64 = 24 * 3600;
/// Attempts beyond this are logged as terminal failures and dropped.
const MAX_ATTEMPTS: u32 = 3;
/// How often the background worker sweeps the queue.
pub const WORKER_INTERVAL: Duration = Duration::from_secs(30);
/// Entries retried per worker sweep.
const MAX_RETRIES_PER_CYCLE: usize = 10;

/// Backoff before attempt `n` (0-indexed) is retried: 0s, 1s, 2s, 4s, capped.
fn backoff_secs(attempts: u32) -> i64 {
    match attempts {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 4,
    }
}

/// A sink that feedback entries are eventually delivered to. The daemon
/// wires this to whatever downstream system consumes trajectory feedback;
/// tests use an in-memory stub.
pub trait FeedbackSink: Send + Sync {
    /// Attempt delivery. `Ok` removes the entry from the queue.
    fn deliver(&self, entry: &FeedbackQueueEntry) -> GodagentResult<()>;
}

/// In-process, file-backed feedback queue.
pub struct FeedbackQueue {
    queue_path: PathBuf,
    failures_path: PathBuf,
    entries: parking_lot::Mutex<Vec<FeedbackQueueEntry>>,
}

impl FeedbackQueue {
    /// Load (or initialize) a queue backed by the given files.
    pub fn new(queue_path: PathBuf, failures_path: PathBuf) -> GodagentResult<Self> {
        let entries = if queue_path.exists() {
            let bytes = std::fs::read(&queue_path)?;
            serde_json::from_slice(&bytes).unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Self { queue_path, failures_path, entries: parking_lot::Mutex::new(entries) })
    }

    /// Queue length.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Append a new entry, rejecting once [`MAX_QUEUE_SIZE`] is reached.
    pub fn submit(&self, mut entry: FeedbackQueueEntry, now: i64) -> GodagentResult<()> {
        entry.created_at = now;
        entry.attempts = 0;
        entry.last_attempt_at = None;
        let mut entries = self.entries.lock();
        if entries.len() >= MAX_QUEUE_SIZE {
            return Err(crate::error::GodagentError::Internal("feedback queue is full".into()));
        }
        entries.push(entry);
        drop(entries);
        self.persist()
    }

    /// Run one sweep: attempt delivery for due entries (oldest first, up to
    /// [`MAX_RETRIES_PER_CYCLE`]), logging and dropping terminal failures.
    pub fn sweep(&self, sink: &dyn FeedbackSink, now: i64) -> GodagentResult<usize> {
        let mut entries = self.entries.lock();
        let mut delivered = 0usize;
        let mut remaining = Vec::with_capacity(entries.len());
        let mut attempted = 0usize;

        for mut entry in entries.drain(..) {
            let age = now - entry.created_at;
            let due = entry.last_attempt_at.map(|t| now - t >= backoff_secs(entry.attempts)).unwrap_or(true);

            if age > MAX_AGE_SECS || entry.attempts >= MAX_ATTEMPTS {
                self.log_failure(&entry, "exceeded age or attempt limit");
                continue;
            }
            if attempted >= MAX_RETRIES_PER_CYCLE || !due {
                remaining.push(entry);
                continue;
            }

            attempted += 1;
            entry.attempts += 1;
            entry.last_attempt_at = Some(now);
            match sink.deliver(&entry) {
                Ok(()) => delivered += 1,
                Err(_) if entry.attempts >= MAX_ATTEMPTS => {
                    self.log_failure(&entry, "delivery failed at max attempts");
                }
                Err(_) => remaining.push(entry),
            }
        }

        *entries = remaining;
        drop(entries);
        self.persist()?;
        Ok(delivered)
    }

    fn log_failure(&self, entry: &FeedbackQueueEntry, reason: &str) {
        let line = format!(
            "{} trajectory={} attempts={} reason={}\n",
            entry.created_at, entry.trajectory_id, entry.attempts, reason
        );
        if let Some(parent) = self.failures_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&self.failures_path) {
            let _ = std::io::Write::write_all(&mut file, line.as_bytes());
        }
    }

    fn persist(&self) -> GodagentResult<()> {
        if let Some(parent) = self.queue_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = self.entries.lock();
        let json = serde_json::to_vec_pretty(&*entries)?;
        std::fs::write(&self.queue_path, json)?;
        Ok(())
    }
}
