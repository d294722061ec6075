//! Background sweep that force-closes connections stuck past their
//! timeout or sustaining a read/write rate below the configured floor.

use crate::{config::ConnLimits, server::throughput::Throughput};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::{sync::Notify, time::interval};

/// The phase a worker is currently blocked in, used to pick which timeout
/// applies when the reaper judges `timedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Phase {
    InitialRead = 0,
    ReadingBody = 1,
    Processing = 2,
    Writing = 3,
    KeepAliveIdle = 4,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::InitialRead,
            1 => Phase::ReadingBody,
            2 => Phase::Processing,
            3 => Phase::Writing,
            _ => Phase::KeepAliveIdle,
        }
    }
}

/// Per-connection handle registered with the reaper. Shared between the
/// worker (which updates `phase`/`last_activity`/throughput counters) and
/// the reaper (which only reads them, plus signals `kill`).
pub(crate) struct WorkerHandle {
    epoch: Instant,
    phase: AtomicU8,
    last_activity_ms: AtomicU64,
    pub(crate) throughput: Throughput,
    pub(crate) kill: Notify,
}

impl WorkerHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            epoch: Instant::now(),
            phase: AtomicU8::new(Phase::InitialRead as u8),
            last_activity_ms: AtomicU64::new(0),
            throughput: Throughput::new(),
            kill: Notify::new(),
        })
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn touch(&self) {
        self.last_activity_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(last))
    }
}

/// Registry of live workers, guarded by a plain mutex: membership changes
/// only on accept/close, far rarer than the per-byte counter updates that
/// stay lock-free via [`Throughput`]'s atomics.
#[derive(Clone)]
pub(crate) struct Reaper {
    workers: Arc<Mutex<HashMap<u64, Arc<WorkerHandle>>>>,
    next_id: Arc<AtomicU64>,
}

impl Reaper {
    pub(crate) fn new() -> Self {
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers a new worker and returns its handle plus the id to
    /// deregister with on close.
    pub(crate) fn register(&self) -> (u64, Arc<WorkerHandle>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = WorkerHandle::new();
        self.workers.lock().unwrap().insert(id, handle.clone());
        (id, handle)
    }

    pub(crate) fn deregister(&self, id: u64) {
        self.workers.lock().unwrap().remove(&id);
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Runs the sweep loop until `shutdown.notified()` fires, then kills
    /// every remaining worker and returns.
    pub(crate) async fn run(&self, limits: ConnLimits, shutdown: Arc<Notify>) {
        let mut ticker = interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(&limits),
                _ = shutdown.notified() => {
                    self.kill_all();
                    return;
                }
            }
        }
    }

    fn sweep(&self, limits: &ConnLimits) {
        let workers = self.workers.lock().unwrap();
        for handle in workers.values() {
            let phase = Phase::from_u8(handle.phase.load(Ordering::Relaxed));

            let reading_slow = phase == Phase::ReadingBody
                && handle
                    .throughput
                    .reading_slow(limits.min_read_throughput, limits.read_throughput_delay);
            let writing_slow = phase == Phase::Writing
                && handle
                    .throughput
                    .writing_slow(limits.min_write_throughput, limits.write_throughput_delay);

            let phase_timeout = match phase {
                Phase::InitialRead => limits.initial_read_timeout,
                Phase::KeepAliveIdle => limits.keep_alive_timeout,
                Phase::ReadingBody | Phase::Processing | Phase::Writing => limits.processing_timeout,
            };
            let timed_out = handle.idle_for() > phase_timeout;

            if reading_slow || writing_slow || timed_out {
                handle.kill.notify_one();
            }
        }
    }

    fn kill_all(&self) {
        let workers = self.workers.lock().unwrap();
        for handle in workers.values() {
            handle.kill.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_deregister_track_count() {
        let reaper = Reaper::new();
        let (id, _handle) = reaper.register();
        assert_eq!(reaper.worker_count(), 1);

        reaper.deregister(id);
        assert_eq!(reaper.worker_count(), 0);
    }

    #[test]
    fn fresh_handle_is_not_timed_out_immediately() {
        let (_, handle) = Reaper::new().register();
        assert!(handle.idle_for() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn sweep_notifies_kill_on_a_timed_out_worker() {
        let reaper = Reaper::new();
        let (_, handle) = reaper.register();
        handle.phase.store(Phase::KeepAliveIdle as u8, Ordering::Relaxed);
        handle
            .last_activity_ms
            .store(handle.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);

        let limits = ConnLimits {
            keep_alive_timeout: Duration::from_millis(0),
            ..ConnLimits::default()
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        reaper.sweep(&limits);

        tokio::time::timeout(Duration::from_millis(50), handle.kill.notified())
            .await
            .expect("reaper should have notified the stuck worker's kill handle");
    }

    #[tokio::test]
    async fn sweep_leaves_a_fresh_worker_alone() {
        let reaper = Reaper::new();
        let (_, handle) = reaper.register();

        reaper.sweep(&ConnLimits::default());

        let result = tokio::time::timeout(Duration::from_millis(20), handle.kill.notified()).await;
        assert!(result.is_err());
    }
}
