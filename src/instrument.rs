//! Server instrumentation: an optional sink for operational counters.
//!
//! Matches §4.10's contract. A [`NullInstrumenter`] is the default (does
//! nothing, every method inlines away); [`AtomicInstrumenter`] is the
//! thread-safe implementation for when a caller wants the counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters a server can report. Every method has a no-op
/// default so implementors only override what they care about.
pub trait Instrumenter: Sync + Send + 'static {
    fn accepted_connection(&self) {}
    fn accepted_request(&self) {}
    fn bad_request(&self) {}
    fn chunked_request(&self) {}
    fn chunked_response(&self) {}
    fn connection_closed(&self) {}
    fn read_from_client(&self, #[allow(unused_variables)] n: usize) {}
    fn wrote_to_client(&self, #[allow(unused_variables)] n: usize) {}
    fn server_started(&self) {}
    fn worker_started(&self) {}
    fn worker_stopped(&self) {}
}

/// Does nothing. Every call is a zero-cost no-op after inlining.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullInstrumenter;

impl Instrumenter for NullInstrumenter {}

/// Thread-safe counters for every [`Instrumenter`] operation, each an
/// independent relaxed atomic (ordering between distinct counters is never
/// load-bearing; only the final values matter).
#[derive(Debug, Default)]
pub struct AtomicInstrumenter {
    pub accepted_connections: AtomicU64,
    pub accepted_requests: AtomicU64,
    pub bad_requests: AtomicU64,
    pub chunked_requests: AtomicU64,
    pub chunked_responses: AtomicU64,
    pub connections_closed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub servers_started: AtomicU64,
    pub workers_started: AtomicU64,
    pub workers_stopped: AtomicU64,
}

impl Instrumenter for AtomicInstrumenter {
    fn accepted_connection(&self) {
        self.accepted_connections.fetch_add(1, Ordering::Relaxed);
    }
    fn accepted_request(&self) {
        self.accepted_requests.fetch_add(1, Ordering::Relaxed);
    }
    fn bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }
    fn chunked_request(&self) {
        self.chunked_requests.fetch_add(1, Ordering::Relaxed);
    }
    fn chunked_response(&self) {
        self.chunked_responses.fetch_add(1, Ordering::Relaxed);
    }
    fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }
    fn read_from_client(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }
    fn wrote_to_client(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }
    fn server_started(&self) {
        self.servers_started.fetch_add(1, Ordering::Relaxed);
    }
    fn worker_started(&self) {
        self.workers_started.fetch_add(1, Ordering::Relaxed);
    }
    fn worker_stopped(&self) {
        self.workers_stopped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_instrumenter_accepts_all_calls() {
        let i = NullInstrumenter;
        i.accepted_connection();
        i.bad_request();
        i.read_from_client(128);
    }

    #[test]
    fn atomic_instrumenter_counts() {
        let i = AtomicInstrumenter::default();
        i.accepted_connection();
        i.accepted_connection();
        i.read_from_client(100);
        i.read_from_client(50);

        assert_eq!(i.accepted_connections.load(Ordering::Relaxed), 2);
        assert_eq!(i.bytes_read.load(Ordering::Relaxed), 150);
    }
}
