//! Operator counters for the hot tier
//!
//! Exposed in Prometheus text format:
//! - `memtank_metrics_active` - metrics currently held in memory
//! - `memtank_metrics_created_total` - metrics created since start
//! - `memtank_metrics_evicted_total` - metrics purged as stale
//! - `memtank_gc_checks_total` - staleness checks issued
//! - `memtank_gc_failures_total` - checks that panicked
//! - `memtank_sweeps_total` - completed sweep passes
//! - `memtank_chunks_persisted_total` - chunks handed to the backing store
//! - `memtank_chunks_cached_total` - chunks pushed to the cache
//! - `memtank_points_dropped_total` - points rejected on ingest

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hot-tier counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub(crate) metrics_active: AtomicU64,
    pub(crate) metrics_created: AtomicU64,
    pub(crate) metrics_evicted: AtomicU64,
    pub(crate) gc_checks: AtomicU64,
    pub(crate) gc_failures: AtomicU64,
    pub(crate) sweeps: AtomicU64,
    pub(crate) chunks_persisted: AtomicU64,
    pub(crate) chunks_cached: AtomicU64,
    pub(crate) points_dropped: AtomicU64,
}

/// Point-in-time copy of [`RegistryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub metrics_active: u64,
    pub metrics_created: u64,
    pub metrics_evicted: u64,
    pub gc_checks: u64,
    pub gc_failures: u64,
    pub sweeps: u64,
    pub chunks_persisted: u64,
    pub chunks_cached: u64,
    pub points_dropped: u64,
}

impl RegistryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caller must hold the write lock of the shard the metric went into
    pub(crate) fn metric_created(&self) {
        self.metrics_active.fetch_add(1, Ordering::Relaxed);
        self.metrics_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Caller must hold the write lock of the shard the metric left
    pub(crate) fn metric_evicted(&self) {
        self.metrics_active.fetch_sub(1, Ordering::Relaxed);
        self.metrics_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics_active(&self) -> u64 {
        self.metrics_active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            metrics_active: self.metrics_active.load(Ordering::Relaxed),
            metrics_created: self.metrics_created.load(Ordering::Relaxed),
            metrics_evicted: self.metrics_evicted.load(Ordering::Relaxed),
            gc_checks: self.gc_checks.load(Ordering::Relaxed),
            gc_failures: self.gc_failures.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            chunks_persisted: self.chunks_persisted.load(Ordering::Relaxed),
            chunks_cached: self.chunks_cached.load(Ordering::Relaxed),
            points_dropped: self.points_dropped.load(Ordering::Relaxed),
        }
    }

    /// Render all counters in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut output = String::with_capacity(2048);

        let rows: [(&str, &str, &str, u64); 9] = [
            ("metrics_active", "gauge", "Metrics currently held in memory", s.metrics_active),
            ("metrics_created_total", "counter", "Metrics created since start", s.metrics_created),
            ("metrics_evicted_total", "counter", "Metrics purged from memory as stale", s.metrics_evicted),
            ("gc_checks_total", "counter", "Staleness checks issued", s.gc_checks),
            ("gc_failures_total", "counter", "Staleness checks that panicked", s.gc_failures),
            ("sweeps_total", "counter", "Completed staleness sweeps", s.sweeps),
            ("chunks_persisted_total", "counter", "Chunks handed to the backing store", s.chunks_persisted),
            ("chunks_cached_total", "counter", "Chunks pushed to the cache", s.chunks_cached),
            ("points_dropped_total", "counter", "Points rejected on ingest", s.points_dropped),
        ];

        for (name, kind, help, value) in rows {
            let _ = writeln!(output, "# HELP memtank_{name} {help}");
            let _ = writeln!(output, "# TYPE memtank_{name} {kind}");
            let _ = writeln!(output, "memtank_{name} {value}");
        }

        output
    }
}
