//! Server-wide counters and their expositions.
//!
//! Everything hot is a relaxed atomic; the only derived value is the running
//! mean of handler processing time. `/metrics` serves the JSON form,
//! `/metricsp` the Prometheus text form.

use serde::Serialize;
use std::{
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

#[derive(Debug, Default)]
pub struct Metrics {
    total_requests: AtomicU64,
    connections: AtomicU64,
    active_threads: AtomicU64,
    pending_tasks: AtomicU64,
    completed: AtomicU64,
    busy_micros: AtomicU64,
}

/// Point-in-time copy used by both expositions.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub current_connections: u64,
    pub active_threads: u64,
    pub pending_tasks: u64,
    pub avg_processing_ms: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub(crate) fn request_seen(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn task_queued(&self) {
        self.pending_tasks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn task_started(&self) {
        self.pending_tasks.fetch_sub(1, Ordering::Relaxed);
        self.active_threads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn task_finished(&self, elapsed: Duration) {
        self.active_threads.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.busy_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    // A task refused at the queue never starts; undo the queued count.
    #[inline(always)]
    pub(crate) fn task_refused(&self) {
        self.pending_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let busy = self.busy_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            current_connections: self.connections.load(Ordering::Relaxed),
            active_threads: self.active_threads.load(Ordering::Relaxed),
            pending_tasks: self.pending_tasks.load(Ordering::Relaxed),
            avg_processing_ms: match completed {
                0 => 0.0,
                n => busy as f64 / n as f64 / 1000.0,
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_default()
    }

    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::with_capacity(512);

        let _ = writeln!(out, "# HELP anvil_requests_total Requests parsed since start.");
        let _ = writeln!(out, "# TYPE anvil_requests_total counter");
        let _ = writeln!(out, "anvil_requests_total {}", s.total_requests);

        let _ = writeln!(out, "# HELP anvil_connections_current Open client connections.");
        let _ = writeln!(out, "# TYPE anvil_connections_current gauge");
        let _ = writeln!(out, "anvil_connections_current {}", s.current_connections);

        let _ = writeln!(out, "# HELP anvil_worker_threads_active Worker threads running a handler.");
        let _ = writeln!(out, "# TYPE anvil_worker_threads_active gauge");
        let _ = writeln!(out, "anvil_worker_threads_active {}", s.active_threads);

        let _ = writeln!(out, "# HELP anvil_tasks_pending Tasks queued but not yet started.");
        let _ = writeln!(out, "# TYPE anvil_tasks_pending gauge");
        let _ = writeln!(out, "anvil_tasks_pending {}", s.pending_tasks);

        let _ = writeln!(out, "# HELP anvil_processing_avg_seconds Mean handler time.");
        let _ = writeln!(out, "# TYPE anvil_processing_avg_seconds gauge");
        let _ = writeln!(out, "anvil_processing_avg_seconds {:.6}", s.avg_processing_ms / 1000.0);

        out
    }
}
