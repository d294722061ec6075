//! Per-connection read/write throughput counters.
//!
//! Written only by the connection's own worker task; read concurrently by
//! the reaper. All fields are atomics so the reaper never needs a lock to
//! take a snapshot, and a torn read (a snapshot taken mid-update) only ever
//! under-counts by one update, never corrupts a value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const ORDER: Ordering = Ordering::Relaxed;

/// Milliseconds elapsed since `epoch`, saturating so it always fits a `u64`.
#[inline(always)]
fn millis_since(epoch: Instant) -> u64 {
    epoch.elapsed().as_millis() as u64
}

/// Tracks bytes read and written on one connection, each with its own
/// "first byte" timestamp so warm-up (`*_throughput_delay`) can be judged
/// independently for the read and write directions.
#[derive(Debug)]
pub(crate) struct Throughput {
    epoch: Instant,

    first_read_at_ms: AtomicU64,
    bytes_read: AtomicU64,

    first_write_at_ms: AtomicU64,
    bytes_written: AtomicU64,
}

/// Sentinel meaning "no byte has been read/written yet".
const UNSET: u64 = u64::MAX;

impl Throughput {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            first_read_at_ms: AtomicU64::new(UNSET),
            bytes_read: AtomicU64::new(0),
            first_write_at_ms: AtomicU64::new(UNSET),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Resets all counters; called when a connection is reused for a new
    /// worker slot (never mid-connection: each request keeps accumulating).
    pub(crate) fn reset(&self) {
        self.first_read_at_ms.store(UNSET, ORDER);
        self.bytes_read.store(0, ORDER);
        self.first_write_at_ms.store(UNSET, ORDER);
        self.bytes_written.store(0, ORDER);
    }

    pub(crate) fn record_read(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.first_read_at_ms
            .compare_exchange(UNSET, millis_since(self.epoch), ORDER, ORDER)
            .ok();
        self.bytes_read.fetch_add(n as u64, ORDER);
    }

    pub(crate) fn record_write(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.first_write_at_ms
            .compare_exchange(UNSET, millis_since(self.epoch), ORDER, ORDER)
            .ok();
        self.bytes_written.fetch_add(n as u64, ORDER);
    }

    /// `true` if the read side has been below `min` bytes/sec for longer
    /// than `delay`. Reports not-slow during warm-up, matching §4.8's
    /// "report infinite" rule.
    pub(crate) fn reading_slow(&self, min: Option<u64>, delay: Duration) -> bool {
        Self::is_slow(
            min,
            delay,
            self.first_read_at_ms.load(ORDER),
            self.bytes_read.load(ORDER),
            self.epoch,
        )
    }

    pub(crate) fn writing_slow(&self, min: Option<u64>, delay: Duration) -> bool {
        Self::is_slow(
            min,
            delay,
            self.first_write_at_ms.load(ORDER),
            self.bytes_written.load(ORDER),
            self.epoch,
        )
    }

    fn is_slow(min: Option<u64>, delay: Duration, first_at_ms: u64, bytes: u64, epoch: Instant) -> bool {
        let Some(min) = min else {
            return false;
        };
        if first_at_ms == UNSET {
            return false;
        }

        let elapsed_ms = millis_since(epoch).saturating_sub(first_at_ms);
        if elapsed_ms < delay.as_millis() as u64 {
            return false;
        }

        let rate = bytes.saturating_mul(1000) / elapsed_ms.max(1);
        rate < min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn fresh_tracker_is_never_slow() {
        let t = Throughput::new();
        assert!(!t.reading_slow(Some(1024), Duration::from_secs(5)));
        assert!(!t.writing_slow(Some(1024), Duration::from_secs(5)));
    }

    #[test]
    fn none_threshold_disables_check() {
        let t = Throughput::new();
        t.record_read(1);
        sleep(Duration::from_millis(5));
        assert!(!t.reading_slow(None, Duration::from_millis(0)));
    }

    #[test]
    fn within_warmup_is_never_slow() {
        let t = Throughput::new();
        t.record_read(1);
        assert!(!t.reading_slow(Some(u64::MAX), Duration::from_secs(600)));
    }

    #[test]
    fn slow_after_warmup_is_detected() {
        let t = Throughput::new();
        t.record_read(1);
        sleep(Duration::from_millis(20));
        assert!(t.reading_slow(Some(u64::MAX), Duration::from_millis(0)));
    }

    #[test]
    fn reset_clears_counters() {
        let t = Throughput::new();
        t.record_read(100);
        t.reset();
        assert!(!t.reading_slow(Some(1), Duration::from_millis(0)));
    }
}
