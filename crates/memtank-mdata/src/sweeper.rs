//! Staleness sweeper
//!
//! One background thread per registry. It sleeps until the next boundary
//! aligned to the sweep interval (plus a margin), then checks every metric:
//! stale chunks get closed and persisted by the check itself, stale metrics
//! get evicted here.
//!
//! Keys are copied out of each shard under a short read lock and every key
//! is re-fetched before probing. Entries inserted after the copy wait for
//! the next pass. Removal is safe without holding the shard for the whole
//! pass because nothing but a sweep ever removes entries.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{error, info};

use crate::metric::Metric;
use crate::registry::RegistryInner;
use crate::shard::Shard;
use crate::stats::RegistryStats;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Metrics checked
    pub checked: usize,
    /// Metrics evicted as stale
    pub evicted: usize,
    /// Checks that panicked
    pub failed: usize,
}

/// `(chunk_min_ts, metric_min_ts)` for a sweep at `now`
///
/// Both thresholds count back from `now` truncated to the chunk span.
/// Results saturate at zero.
pub fn min_timestamps(
    now: u32,
    chunk_span: u32,
    chunk_max_stale: u32,
    metric_max_stale: u32,
) -> (u32, u32) {
    let boundary = now - now % chunk_span.max(1);
    (
        boundary.saturating_sub(chunk_max_stale),
        boundary.saturating_sub(metric_max_stale),
    )
}

/// Time to sleep from `since_epoch` until the next multiple of `interval`,
/// plus `margin`
pub fn next_sweep_delay(since_epoch: Duration, interval: Duration, margin: Duration) -> Duration {
    let interval_ns = interval.as_nanos();
    if interval_ns == 0 {
        return margin;
    }
    let diff = interval_ns - since_epoch.as_nanos() % interval_ns;
    Duration::from_nanos(u64::try_from(diff).unwrap_or(u64::MAX)).saturating_add(margin)
}

/// Run one pass over every shard
pub(crate) fn sweep(inner: &RegistryInner, now: u32) -> SweepStats {
    let (chunk_min_ts, metric_min_ts) = min_timestamps(
        now,
        inner.settings.chunk_span,
        inner.chunk_max_stale,
        inner.metric_max_stale,
    );
    let stats = &inner.ctx.stats;
    let mut result = SweepStats::default();

    for shard in &inner.shards {
        for key in shard.keys() {
            let Some(metric) = shard.get(&key) else {
                continue;
            };
            result.checked += 1;
            RegistryStats::inc(&stats.gc_checks);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                metric.gc(chunk_min_ts, metric_min_ts)
            }));
            match outcome {
                Ok(false) => {}
                Ok(true) => {
                    if evict(shard, &key, &metric, stats) {
                        result.evicted += 1;
                        info!(key = %key, "metric is stale, purging data from memory");
                    }
                }
                Err(payload) => {
                    result.failed += 1;
                    RegistryStats::inc(&stats.gc_failures);
                    error!(
                        key = %key,
                        panic = panic_message(payload.as_ref()),
                        "staleness check panicked, skipping metric"
                    );
                }
            }
        }
    }

    RegistryStats::inc(&stats.sweeps);
    result
}

/// Remove `key` if it still maps to the checked instance
fn evict(shard: &Shard, key: &str, checked: &Arc<dyn Metric>, stats: &RegistryStats) -> bool {
    let mut metrics = shard.metrics.write();
    let same = metrics
        .get(key)
        .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(checked)));
    if same {
        metrics.remove(key);
        stats.metric_evicted();
    }
    same
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Handle to the background sweeper thread
pub(crate) struct SweeperHandle {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Start the sweeper; returns `None` if the thread could not be spawned
    pub(crate) fn spawn(
        inner: Arc<RegistryInner>,
        interval: Duration,
        margin: Duration,
    ) -> Option<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let spawned = thread::Builder::new()
            .name("memtank-sweeper".to_string())
            .spawn(move || run(&inner, &stop_rx, interval, margin));

        match spawned {
            Ok(handle) => Some(Self { stop_tx, handle }),
            Err(e) => {
                error!("failed to start staleness sweeper, automatic eviction disabled: {e}");
                None
            }
        }
    }

    /// Signal the thread and wait for it to exit
    pub(crate) fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            error!("staleness sweeper thread panicked");
        }
    }
}

fn run(inner: &RegistryInner, stop_rx: &Receiver<()>, interval: Duration, margin: Duration) {
    info!(?interval, ?margin, "staleness sweeper started");

    loop {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        match stop_rx.recv_timeout(next_sweep_delay(since_epoch, interval, margin)) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        info!("checking for stale chunks that need persisting");
        let started = Instant::now();
        let stats = sweep(inner, inner.ctx.clock.now());
        info!(
            checked = stats.checked,
            evicted = stats.evicted,
            failed = stats.failed,
            elapsed = ?started.elapsed(),
            "sweep complete"
        );
    }

    info!("staleness sweeper stopped");
}
