// Engine metrics
//
// Lightweight counters describing how often the engine had to retry, fall back,
// or swallow notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-engine counters.
///
/// Uses atomic operations so the watcher thread and callers can record
/// concurrently without locks.
#[derive(Debug)]
pub struct Metrics {
    /// Persisted records read successfully (including "file missing")
    pub record_reads: AtomicU64,

    /// Persisted records written successfully
    pub record_writes: AtomicU64,

    /// Plugin timestamps rewritten for timestamp-ordered games
    pub timestamp_writes: AtomicU64,

    /// Individual retries caused by lock contention
    pub lock_retries: AtomicU64,

    /// Operations abandoned after the retry budget ran out
    pub lock_timeouts: AtomicU64,

    /// Reads answered from the last-known-good cache
    pub cache_fallbacks: AtomicU64,

    /// Reads answered from the game's built-in plugin list
    pub default_fallbacks: AtomicU64,

    /// Change notifications delivered to subscribers
    pub notifications_emitted: AtomicU64,

    /// Change notifications dropped because the engine itself was writing
    pub notifications_suppressed: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            record_reads: AtomicU64::new(0),
            record_writes: AtomicU64::new(0),
            timestamp_writes: AtomicU64::new(0),
            lock_retries: AtomicU64::new(0),
            lock_timeouts: AtomicU64::new(0),
            cache_fallbacks: AtomicU64::new(0),
            default_fallbacks: AtomicU64::new(0),
            notifications_emitted: AtomicU64::new(0),
            notifications_suppressed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_read(&self) {
        self.record_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.record_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timestamp_write(&self) {
        self.timestamp_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_retry(&self) {
        self.lock_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_fallback(&self) {
        self.cache_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_default_fallback(&self) {
        self.default_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the fate of one notification.
    pub fn record_notification(&self, emitted: bool) {
        if emitted {
            self.notifications_emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_suppressed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Total reads that could not be answered from disk.
    pub fn fallbacks(&self) -> u64 {
        self.cache_fallbacks.load(Ordering::Relaxed) + self.default_fallbacks.load(Ordering::Relaxed)
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Load Order Engine Metrics ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Records: {} reads, {} writes, {} timestamp writes",
            self.record_reads.load(Ordering::Relaxed),
            self.record_writes.load(Ordering::Relaxed),
            self.timestamp_writes.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Contention: {} retries, {} timeouts",
            self.lock_retries.load(Ordering::Relaxed),
            self.lock_timeouts.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Fallbacks: {} cache, {} defaults",
            self.cache_fallbacks.load(Ordering::Relaxed),
            self.default_fallbacks.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Notifications: {} emitted, {} suppressed",
            self.notifications_emitted.load(Ordering::Relaxed),
            self.notifications_suppressed.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
