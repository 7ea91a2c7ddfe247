use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Per-participant accounting. Participants and their bus endpoints write
/// through relaxed atomics; the coordinator reads once the run is over.
#[derive(Debug, Default)]
pub struct PartyMetrics {
    compute_ns: AtomicU64,
    network_wait_ns: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
}

impl PartyMetrics {
    pub fn add_compute(&self, elapsed: Duration) {
        self.compute_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn add_network_wait(&self, elapsed: Duration) {
        self.network_wait_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_recv(&self, n: u64) {
        self.bytes_recv.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            compute_ns: self.compute_ns.load(Ordering::Relaxed),
            network_wait_ns: self.network_wait_ns.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_recv: self.bytes_recv.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one participant's counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub compute_ns: u64,
    pub network_wait_ns: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Collection of per-participant accumulators for one run.
pub struct MetricsSink {
    parties: Vec<Arc<PartyMetrics>>,
}

impl MetricsSink {
    pub fn new(num_parties: usize) -> Self {
        MetricsSink {
            parties: (0..num_parties).map(|_| Arc::default()).collect(),
        }
    }

    /// Handle for participant `id` to write through.
    pub fn party(&self, id: usize) -> Arc<PartyMetrics> {
        Arc::clone(&self.parties[id])
    }

    /// Sum of all participants' counters.
    pub fn totals(&self) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        for party in &self.parties {
            let snapshot = party.snapshot();
            total.compute_ns += snapshot.compute_ns;
            total.network_wait_ns += snapshot.network_wait_ns;
            total.bytes_sent += snapshot.bytes_sent;
            total.bytes_recv += snapshot.bytes_recv;
        }
        total
    }
}

/// Record emitted for every protocol run. Big integers are rendered as
/// decimal strings so the JSON survives any consumer.
#[derive(Clone, Debug, Serialize)]
pub struct RunRecord {
    pub parties: usize,
    pub profile: String,
    pub wall_clock_ns: u64,
    pub compute_ns: u64,
    pub network_wait_ns: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub interpolated_value: Option<String>,
    pub expected_value: Option<String>,
    pub ok: bool,
    pub error: Option<String>,
}

/// Run a CPU-bound closure and report how long it took.
pub fn timed_compute<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed())
}
