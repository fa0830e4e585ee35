//! Playlist counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use playout_ipc::PlayoutStats;

/// Collects attempt/outcome counters for the playlist loop.
///
/// Purely observational: nothing in the loop acts on these values.
#[derive(Default)]
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
    offline_checks: AtomicU64,
    passes: AtomicU64,
    failed_passes_in_a_row: AtomicU64,
    pass_had_success: AtomicBool,
}

impl MetricsCollector {
    /// Create a new collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the loop start.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        debug!("Metrics collection started");
    }

    /// Record an encoder launch attempt.
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a clean encoder exit.
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.pass_had_success.store(true, Ordering::Relaxed);
    }

    /// Record a failed launch or an encoder error exit.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a source skipped by verification.
    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed connectivity probe.
    pub fn record_offline(&self) {
        self.offline_checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Close out a pass. Returns the number of consecutive passes,
    /// including this one, in which nothing streamed successfully.
    pub fn complete_pass(&self) -> u64 {
        self.passes.fetch_add(1, Ordering::Relaxed);

        if self.pass_had_success.swap(false, Ordering::Relaxed) {
            self.failed_passes_in_a_row.store(0, Ordering::Relaxed);
            0
        } else {
            self.failed_passes_in_a_row.fetch_add(1, Ordering::Relaxed) + 1
        }
    }

    /// Get a snapshot of the counters.
    pub fn snapshot(&self) -> PlayoutStats {
        let uptime_seconds = self
            .start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);

        PlayoutStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            offline_checks: self.offline_checks.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
            failed_passes_in_a_row: self.failed_passes_in_a_row.load(Ordering::Relaxed),
            uptime_seconds,
        }
    }
}
