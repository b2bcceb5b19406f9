//! The metric registry
//!
//! [`AggMetrics`] maps metric keys to per-metric state across
//! [`NUM_SHARDS`](crate::shard::NUM_SHARDS) read/write-locked shards and
//! owns the background staleness sweeper.

use std::sync::Arc;

use memtank_common::{AggSetting, Clock, RegistryConfig, SystemClock};
use parking_lot::Mutex;
use tracing::info;

use crate::cache::CachePusher;
use crate::metric::{AggMetricFactory, Metric, MetricContext, MetricFactory, MetricSettings};
use crate::shard::{NUM_SHARDS, Shard, shard_index};
use crate::stats::RegistryStats;
use crate::store::Store;
use crate::sweeper::{self, SweepStats, SweeperHandle};

/// State shared between the registry and its sweeper thread
pub(crate) struct RegistryInner {
    pub(crate) shards: Vec<Shard>,
    pub(crate) ctx: MetricContext,
    pub(crate) settings: MetricSettings,
    pub(crate) chunk_max_stale: u32,
    pub(crate) metric_max_stale: u32,
    factory: Arc<dyn MetricFactory>,
}

impl RegistryInner {
    fn shard(&self, key: &str) -> &Shard {
        &self.shards[shard_index(key)]
    }
}

/// Sharded registry of in-memory metrics
///
/// Lookups take a shard read lock; creation takes the shard write lock
/// across the check and the insert, so concurrent creators of one key
/// always end up sharing a single instance. When `gc_interval` is
/// non-zero a sweeper thread evicts stale metrics until [`shutdown`] is
/// called or the registry is dropped.
///
/// [`shutdown`]: AggMetrics::shutdown
pub struct AggMetrics {
    inner: Arc<RegistryInner>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl AggMetrics {
    /// Create a registry using the system clock
    ///
    /// `config` is expected to have passed [`RegistryConfig::validate`].
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn CachePusher>, config: &RegistryConfig) -> Self {
        Self::with_clock(store, cache, config, Arc::new(SystemClock))
    }

    /// Create a registry reading time from `clock`
    pub fn with_clock(
        store: Arc<dyn Store>,
        cache: Arc<dyn CachePusher>,
        config: &RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_factory(store, cache, config, clock, Arc::new(AggMetricFactory))
    }

    /// Create a registry whose metrics are built by `factory`
    pub fn with_factory(
        store: Arc<dyn Store>,
        cache: Arc<dyn CachePusher>,
        config: &RegistryConfig,
        clock: Arc<dyn Clock>,
        factory: Arc<dyn MetricFactory>,
    ) -> Self {
        let inner = Arc::new(RegistryInner {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            ctx: MetricContext {
                store,
                cache,
                clock,
                stats: Arc::new(RegistryStats::new()),
            },
            settings: MetricSettings::from_config(config),
            chunk_max_stale: config.chunk_max_stale_secs(),
            metric_max_stale: config.metric_max_stale_secs(),
            factory,
        });

        // a zero interval leaves sweeping to explicit sweep() calls
        let sweeper = if config.gc_interval.is_zero() {
            None
        } else {
            SweeperHandle::spawn(Arc::clone(&inner), config.gc_interval, config.gc_margin)
        };

        info!(
            chunk_span = inner.settings.chunk_span,
            num_chunks = inner.settings.num_chunks,
            chunk_max_stale = inner.chunk_max_stale,
            metric_max_stale = inner.metric_max_stale,
            rollups = inner.settings.agg_settings.len(),
            sweeper = sweeper.is_some(),
            "metric registry initialized"
        );

        Self {
            inner,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Look up a metric without creating it
    pub fn get(&self, key: &str) -> Option<Arc<dyn Metric>> {
        self.inner.shard(key).get(key)
    }

    /// Look up a metric, creating it on first sight
    pub fn get_or_create(&self, key: &str) -> Arc<dyn Metric> {
        let inner = &*self.inner;
        let mut metrics = inner.shard(key).metrics.write();
        if let Some(metric) = metrics.get(key) {
            return Arc::clone(metric);
        }

        let metric = inner.factory.create(&inner.ctx, key, &inner.settings);
        metrics.insert(key.to_string(), Arc::clone(&metric));
        inner.ctx.stats.metric_created();
        metric
    }

    /// Rollups applied to every metric
    pub fn agg_settings(&self) -> &[AggSetting] {
        &self.inner.settings.agg_settings
    }

    /// Shape shared by every metric
    pub fn settings(&self) -> &MetricSettings {
        &self.inner.settings
    }

    /// Run one sweep pass now, at the registry clock's current time
    pub fn sweep(&self) -> SweepStats {
        self.sweep_at(self.inner.ctx.clock.now())
    }

    /// Run one sweep pass as if the time were `now`
    pub fn sweep_at(&self, now: u32) -> SweepStats {
        sweeper::sweep(&self.inner, now)
    }

    /// Whether a background sweeper is running
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Stop the background sweeper and wait for it to exit
    pub fn shutdown(&self) {
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    /// Number of metrics held
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.shards.iter().all(|s| s.len() == 0)
    }

    /// Number of metrics held in one shard
    pub fn shard_len(&self, shard: usize) -> usize {
        self.inner.shards.get(shard).map_or(0, Shard::len)
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.inner.ctx.stats
    }
}

impl Drop for AggMetrics {
    fn drop(&mut self) {
        self.shutdown();
    }
}
