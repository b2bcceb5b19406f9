//! Per-metric state
//!
//! The registry only knows the [`Metric`] contract. [`AggMetric`] is the
//! in-memory implementation: a ring of fixed-duration chunks plus one
//! [`Aggregator`] per configured rollup.
//!
//! ```text
//! ring (num_chunks = 4)
//! ┌────────┬────────┬────────┬────────┐
//! │ t0=1200│ t0=1800│ t0=0   │ t0=600 │
//! └────────┴────────┴────────┴────────┘
//!              ▲ current   ▲ oldest
//! ```

use std::sync::Arc;

use memtank_common::{AggSetting, Clock, RegistryConfig};
use parking_lot::Mutex;
use tracing::debug;

use crate::aggregator::Aggregator;
use crate::cache::CachePusher;
use crate::chunk::{Chunk, Point, chunk_t0};
use crate::consolidation::Consolidator;
use crate::error::{MdataError, MdataResult};
use crate::stats::RegistryStats;
use crate::store::{ChunkWriteRequest, Store};

/// Points read from memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetResult {
    /// Points with `from <= ts < to`, oldest first
    pub points: Vec<Point>,
    /// Start of the oldest chunk held in memory. Anything before it has to
    /// come from the backing store. Equals `to` when nothing is in memory.
    pub oldest: u32,
}

/// Contract between the registry and one metric's state
///
/// Implementations manage their own concurrency; every method may be
/// called concurrently with every other.
pub trait Metric: Send + Sync {
    fn key(&self) -> &str;

    /// Ingest one point
    fn add(&self, ts: u32, val: f64) -> MdataResult<()>;

    /// Raw points in `[from, to)`
    fn get(&self, from: u32, to: u32) -> GetResult;

    /// Rollup points in `[from, to)` for the rollup with the given span
    fn get_rollup(
        &self,
        consolidator: Consolidator,
        span: u32,
        from: u32,
        to: u32,
    ) -> MdataResult<GetResult>;

    /// Staleness check
    ///
    /// Closes and persists the current chunk if it saw no write since
    /// `chunk_min_ts`. Returns true when the metric saw no write since
    /// `metric_min_ts` and should be evicted. Calling it again before new
    /// data arrives has no further effect.
    fn gc(&self, chunk_min_ts: u32, metric_min_ts: u32) -> bool;
}

/// Collaborators shared by every metric of a registry
#[derive(Clone)]
pub struct MetricContext {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn CachePusher>,
    pub clock: Arc<dyn Clock>,
    pub stats: Arc<RegistryStats>,
}

/// Shape of every metric created by a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSettings {
    pub chunk_span: u32,
    pub num_chunks: u32,
    pub ttl: u32,
    pub agg_settings: Vec<AggSetting>,
}

impl MetricSettings {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            chunk_span: config.chunk_span_secs(),
            num_chunks: config.num_chunks,
            ttl: config.ttl_secs(),
            agg_settings: config.agg_settings.clone(),
        }
    }
}

/// Builds per-metric state for previously unseen keys
///
/// Called with the shard write lock held: must be cheap and must not do I/O.
pub trait MetricFactory: Send + Sync {
    fn create(&self, ctx: &MetricContext, key: &str, settings: &MetricSettings)
    -> Arc<dyn Metric>;
}

impl<F> MetricFactory for F
where
    F: Fn(&MetricContext, &str, &MetricSettings) -> Arc<dyn Metric> + Send + Sync,
{
    fn create(
        &self,
        ctx: &MetricContext,
        key: &str,
        settings: &MetricSettings,
    ) -> Arc<dyn Metric> {
        self(ctx, key, settings)
    }
}

/// Factory producing [`AggMetric`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct AggMetricFactory;

impl MetricFactory for AggMetricFactory {
    fn create(
        &self,
        ctx: &MetricContext,
        key: &str,
        settings: &MetricSettings,
    ) -> Arc<dyn Metric> {
        Arc::new(AggMetric::new(
            ctx.clone(),
            key,
            settings.chunk_span,
            settings.num_chunks,
            settings.ttl,
            &settings.agg_settings,
        ))
    }
}

/// Chunk ring; `chunks` grows up to capacity, then slots are reused
struct Ring {
    chunks: Vec<Chunk>,
    current: usize,
    capacity: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            chunks: Vec::with_capacity(capacity),
            current: 0,
            capacity,
        }
    }

    fn current(&self) -> Option<&Chunk> {
        self.chunks.get(self.current)
    }

    fn current_mut(&mut self) -> Option<&mut Chunk> {
        self.chunks.get_mut(self.current)
    }

    fn previous_t0(&self) -> u32 {
        let len = self.chunks.len();
        if len < 2 {
            return 0;
        }
        self.chunks[(self.current + len - 1) % len].t0()
    }

    /// Make `chunk` current, overwriting the oldest slot once full
    fn advance(&mut self, chunk: Chunk) {
        if self.chunks.len() < self.capacity {
            self.chunks.push(chunk);
            self.current = self.chunks.len() - 1;
        } else {
            self.current = (self.current + 1) % self.capacity;
            self.chunks[self.current] = chunk;
        }
    }

    fn iter_oldest_first(&self) -> impl Iterator<Item = &Chunk> {
        let len = self.chunks.len();
        let start = if len == 0 { 0 } else { (self.current + 1) % len };
        (0..len).map(move |i| &self.chunks[(start + i) % len])
    }
}

/// In-memory state of one metric
pub struct AggMetric {
    key: String,
    ctx: MetricContext,
    chunk_span: u32,
    ttl: u32,
    ring: Mutex<Ring>,
    aggregators: Vec<Aggregator>,
}

impl AggMetric {
    pub fn new(
        ctx: MetricContext,
        key: &str,
        chunk_span: u32,
        num_chunks: u32,
        ttl: u32,
        agg_settings: &[AggSetting],
    ) -> Self {
        let aggregators = agg_settings
            .iter()
            .map(|setting| Aggregator::new(&ctx, key, setting))
            .collect();
        Self {
            key: key.to_string(),
            ctx,
            chunk_span: chunk_span.max(1),
            ttl,
            ring: Mutex::new(Ring::new(num_chunks.max(1) as usize)),
            aggregators,
        }
    }

    /// Number of chunks currently held
    pub fn chunk_count(&self) -> usize {
        self.ring.lock().chunks.len()
    }

    /// Close and persist the current chunk regardless of its last write
    pub(crate) fn close_open_chunk(&self) -> bool {
        self.close_current(&mut self.ring.lock())
    }

    fn add_point(&self, point: Point) -> MdataResult<()> {
        let t0 = chunk_t0(point.ts, self.chunk_span);
        let now = self.ctx.clock.now();
        let mut ring = self.ring.lock();

        match ring.current().map(|c| (c.t0(), c.last_ts())) {
            None => ring.advance(Chunk::new(t0)),
            Some((current_t0, last_ts)) if t0 < current_t0 => {
                return Err(MdataError::OutOfOrder {
                    key: self.key.clone(),
                    ts: point.ts,
                    last: last_ts.unwrap_or(current_t0),
                });
            }
            Some((current_t0, _)) if t0 > current_t0 => {
                self.close_current(&mut ring);
                ring.advance(Chunk::new(t0));
            }
            Some(_) => {}
        }

        if let Some(chunk) = ring.current_mut() {
            chunk.push(&self.key, point, now)?;
        }

        for aggregator in &self.aggregators {
            aggregator.add(point);
        }
        Ok(())
    }

    /// Finish the current chunk, persist it and push it to the cache.
    /// Returns false if it was already closed.
    fn close_current(&self, ring: &mut Ring) -> bool {
        let prev_t0 = ring.previous_t0();
        let Some(chunk) = ring.current_mut() else {
            return false;
        };
        if !chunk.finish() {
            return false;
        }
        if chunk.is_empty() {
            return true;
        }

        self.ctx.store.add(ChunkWriteRequest {
            key: self.key.clone(),
            t0: chunk.t0(),
            span: self.chunk_span,
            ttl: self.ttl,
            points: chunk.points().to_vec(),
        });
        RegistryStats::inc(&self.ctx.stats.chunks_persisted);

        self.ctx.cache.cache_if_hot(&self.key, prev_t0, chunk);
        RegistryStats::inc(&self.ctx.stats.chunks_cached);
        true
    }
}

impl Metric for AggMetric {
    fn key(&self) -> &str {
        &self.key
    }

    fn add(&self, ts: u32, val: f64) -> MdataResult<()> {
        let result = self.add_point(Point::new(ts, val));
        if let Err(e) = &result
            && e.is_dropped_point()
        {
            RegistryStats::inc(&self.ctx.stats.points_dropped);
            debug!(key = %self.key, error = %e, "dropping point");
        }
        result
    }

    fn get(&self, from: u32, to: u32) -> GetResult {
        let ring = self.ring.lock();
        let oldest = ring.iter_oldest_first().next().map_or(to, Chunk::t0);
        let points = ring
            .iter_oldest_first()
            .flat_map(Chunk::points)
            .filter(|p| p.ts >= from && p.ts < to)
            .copied()
            .collect();
        GetResult { points, oldest }
    }

    fn get_rollup(
        &self,
        consolidator: Consolidator,
        span: u32,
        from: u32,
        to: u32,
    ) -> MdataResult<GetResult> {
        let aggregator = self
            .aggregators
            .iter()
            .find(|a| a.span() == span)
            .ok_or_else(|| MdataError::UnknownRollup {
                key: self.key.clone(),
                span,
            })?;
        if !aggregator.is_ready() {
            return Err(MdataError::RollupNotReady {
                key: self.key.clone(),
                span,
            });
        }
        Ok(aggregator.get(consolidator, from, to))
    }

    fn gc(&self, chunk_min_ts: u32, metric_min_ts: u32) -> bool {
        let mut ring = self.ring.lock();

        for aggregator in &self.aggregators {
            aggregator.gc(chunk_min_ts, metric_min_ts);
        }

        let Some(last_write) = ring.current().map(Chunk::last_write) else {
            return false;
        };

        if last_write < chunk_min_ts && self.close_current(&mut ring) {
            debug!(key = %self.key, last_write, "closed stale chunk");
        }

        let stale = last_write <= metric_min_ts;
        if stale {
            // about to be evicted: nothing held here may stay unpersisted
            self.close_current(&mut ring);
            for aggregator in &self.aggregators {
                aggregator.close_all();
            }
        }
        stale
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::RecordingCachePusher;
    use crate::store::MemoryStore;
    use memtank_common::ManualClock;

    pub(crate) struct Harness {
        pub store: Arc<MemoryStore>,
        pub cache: Arc<RecordingCachePusher>,
        pub clock: Arc<ManualClock>,
        pub stats: Arc<RegistryStats>,
    }

    impl Harness {
        pub fn new(now: u32) -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                cache: Arc::new(RecordingCachePusher::new()),
                clock: Arc::new(ManualClock::new(now)),
                stats: Arc::new(RegistryStats::new()),
            }
        }

        pub fn ctx(&self) -> MetricContext {
            MetricContext {
                store: self.store.clone(),
                cache: self.cache.clone(),
                clock: self.clock.clone(),
                stats: self.stats.clone(),
            }
        }
    }

    fn metric(h: &Harness, num_chunks: u32) -> AggMetric {
        AggMetric::new(h.ctx(), "some.metric", 600, num_chunks, 3600, &[])
    }

    #[test]
    fn test_add_and_get() {
        let h = Harness::new(1000);
        let m = metric(&h, 5);
        m.add(0, 1.0).unwrap();
        m.add(60, 2.0).unwrap();
        m.add(660, 3.0).unwrap();

        let res = m.get(0, 1200);
        assert_eq!(
            res.points,
            vec![Point::new(0, 1.0), Point::new(60, 2.0), Point::new(660, 3.0)]
        );
        assert_eq!(res.oldest, 0);

        let res = m.get(60, 660);
        assert_eq!(res.points, vec![Point::new(60, 2.0)]);
    }

    #[test]
    fn test_get_empty_metric() {
        let h = Harness::new(0);
        let m = metric(&h, 5);
        let res = m.get(100, 200);
        assert!(res.points.is_empty());
        assert_eq!(res.oldest, 200);
    }

    #[test]
    fn test_new_chunk_persists_previous() {
        let h = Harness::new(0);
        let m = metric(&h, 5);
        m.add(10, 1.0).unwrap();
        m.add(20, 2.0).unwrap();
        m.add(610, 3.0).unwrap();

        let requests = h.store.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].t0, 0);
        assert_eq!(requests[0].span, 600);
        assert_eq!(requests[0].ttl, 3600);
        assert_eq!(requests[0].points.len(), 2);

        let pushes = h.cache.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].t0, 0);
        assert_eq!(h.stats.snapshot().chunks_persisted, 1);
    }

    #[test]
    fn test_ring_wraps() {
        let h = Harness::new(0);
        let m = metric(&h, 3);
        for i in 0..5u32 {
            m.add(i * 600, f64::from(i)).unwrap();
        }
        assert_eq!(m.chunk_count(), 3);

        let res = m.get(0, 10_000);
        let ts: Vec<u32> = res.points.iter().map(|p| p.ts).collect();
        assert_eq!(ts, vec![1200, 1800, 2400]);
        assert_eq!(res.oldest, 1200);

        // chunks before the current one were all handed to the store
        assert_eq!(h.store.len(), 4);
        let pushes = h.cache.pushes();
        assert_eq!(pushes.last().unwrap().t0, 1800);
        assert_eq!(pushes.last().unwrap().prev_t0, 1200);
    }

    #[test]
    fn test_out_of_order_is_dropped() {
        let h = Harness::new(0);
        let m = metric(&h, 5);
        m.add(700, 1.0).unwrap();
        assert!(matches!(
            m.add(10, 2.0),
            Err(MdataError::OutOfOrder { ts: 10, last: 700, .. })
        ));
        assert!(matches!(
            m.add(700, 2.0),
            Err(MdataError::OutOfOrder { .. })
        ));
        assert_eq!(h.stats.snapshot().points_dropped, 2);
        assert_eq!(m.get(0, 2000).points.len(), 1);
    }

    #[test]
    fn test_gc_closes_stale_chunk_once() {
        let h = Harness::new(1000);
        let m = metric(&h, 5);
        m.add(900, 1.0).unwrap();

        // recent write: nothing to do
        assert!(!m.gc(500, 0));
        assert!(h.store.is_empty());

        // chunk stale, metric not
        assert!(!m.gc(2000, 0));
        assert_eq!(h.store.len(), 1);

        // idempotent
        assert!(!m.gc(2000, 0));
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.cache.pushes().len(), 1);
    }

    #[test]
    fn test_gc_reports_stale_metric() {
        let h = Harness::new(1000);
        let m = metric(&h, 5);
        m.add(900, 1.0).unwrap();

        assert!(m.gc(2000, 1000));
        // the chunk was persisted before the metric was reported stale
        assert_eq!(h.store.len(), 1);
    }

    #[test]
    fn test_gc_stale_metric_persists_recent_chunk() {
        // equal thresholds: the last write is not before chunk_min_ts
        let h = Harness::new(1000);
        let m = metric(&h, 5);
        m.add(900, 1.0).unwrap();

        assert!(m.gc(1000, 1000));
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.store.requests()[0].points, vec![Point::new(900, 1.0)]);
    }

    #[test]
    fn test_gc_stale_metric_persists_rollups() {
        let h = Harness::new(1000);
        let m = AggMetric::new(
            h.ctx(),
            "m",
            600,
            5,
            3600,
            &[AggSetting::new(600, 600, 2, 86400)],
        );
        m.add(910, 2.0).unwrap();

        h.clock.set(8000);
        assert!(m.gc(7200, 7200));
        assert_eq!(h.store.requests_for("m").len(), 1);
        for f in ["min", "max", "sum", "cnt", "lst"] {
            assert_eq!(h.store.requests_for(&format!("m_{f}_600")).len(), 1);
        }
        assert_eq!(
            h.store.requests_for("m_sum_600")[0].points,
            vec![Point::new(1200, 2.0)]
        );

        // a repeated gc writes nothing new
        assert!(m.gc(7200, 7200));
        assert_eq!(h.store.len(), 6);
    }

    #[test]
    fn test_gc_without_data() {
        let h = Harness::new(1000);
        let m = metric(&h, 5);
        assert!(!m.gc(u32::MAX, u32::MAX));
    }

    #[test]
    fn test_write_to_closed_chunk_is_dropped() {
        let h = Harness::new(1000);
        let m = metric(&h, 5);
        m.add(900, 1.0).unwrap();
        m.gc(2000, 0);
        h.clock.set(1100);
        assert!(matches!(
            m.add(950, 2.0),
            Err(MdataError::ClosedChunk { t0: 600, .. })
        ));
        // a newer chunk is accepted
        m.add(1250, 3.0).unwrap();
        assert_eq!(h.store.len(), 1);
    }

    #[test]
    fn test_unknown_rollup() {
        let h = Harness::new(0);
        let m = metric(&h, 5);
        assert!(matches!(
            m.get_rollup(Consolidator::Sum, 600, 0, 100),
            Err(MdataError::UnknownRollup { span: 600, .. })
        ));
    }

    #[test]
    fn test_factory_closure() {
        let h = Harness::new(0);
        let settings = MetricSettings {
            chunk_span: 600,
            num_chunks: 2,
            ttl: 60,
            agg_settings: Vec::new(),
        };
        let factory = |ctx: &MetricContext, key: &str, s: &MetricSettings| -> Arc<dyn Metric> {
            Arc::new(AggMetric::new(ctx.clone(), key, s.chunk_span, s.num_chunks, s.ttl, &[]))
        };
        let m = factory.create(&h.ctx(), "a.b", &settings);
        assert_eq!(m.key(), "a.b");

        let m = AggMetricFactory.create(&h.ctx(), "c.d", &settings);
        assert_eq!(m.key(), "c.d");
    }
}
