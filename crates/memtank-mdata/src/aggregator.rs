//! Rollups
//!
//! An [`Aggregator`] folds raw points into `span`-wide buckets and writes
//! one point per finished bucket into five child series (min, max, sum,
//! cnt, lst). A point belongs to the bucket ending at the next multiple of
//! `span`; a point exactly on a multiple belongs to the bucket ending there.

use std::sync::Arc;

use memtank_common::AggSetting;
use parking_lot::Mutex;
use tracing::debug;

use crate::chunk::Point;
use crate::consolidation::{Consolidator, RollupFn};
use crate::metric::{AggMetric, GetResult, Metric, MetricContext};
use crate::stats::RegistryStats;

/// End of the `span` bucket containing `ts`, or `None` past `u32::MAX`
#[inline]
pub const fn agg_boundary(ts: u32, span: u32) -> Option<u32> {
    match ts % span {
        0 => Some(ts),
        rem => (ts - rem).checked_add(span),
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    boundary: u32,
    min: f64,
    max: f64,
    sum: f64,
    cnt: f64,
    lst: f64,
}

impl Bucket {
    const fn new(boundary: u32, val: f64) -> Self {
        Self {
            boundary,
            min: val,
            max: val,
            sum: val,
            cnt: 1.0,
            lst: val,
        }
    }

    fn add(&mut self, val: f64) {
        self.min = self.min.min(val);
        self.max = self.max.max(val);
        self.sum += val;
        self.cnt += 1.0;
        self.lst = val;
    }

    const fn value(&self, f: RollupFn) -> f64 {
        match f {
            RollupFn::Min => self.min,
            RollupFn::Max => self.max,
            RollupFn::Sum => self.sum,
            RollupFn::Cnt => self.cnt,
            RollupFn::Lst => self.lst,
        }
    }
}

/// One rollup of one metric
pub struct Aggregator {
    span: u32,
    ready: bool,
    bucket: Mutex<Option<Bucket>>,
    /// Indexed in [`RollupFn::ALL`] order
    series: [AggMetric; 5],
    stats: Arc<RegistryStats>,
}

impl Aggregator {
    pub fn new(ctx: &MetricContext, key: &str, setting: &AggSetting) -> Self {
        let span = setting.span.max(1);
        let series = RollupFn::ALL.map(|f| {
            AggMetric::new(
                ctx.clone(),
                &format!("{key}_{}_{span}", f.as_str()),
                setting.chunk_span,
                setting.num_chunks,
                setting.ttl,
                &[],
            )
        });
        Self {
            span,
            ready: setting.ready,
            bucket: Mutex::new(None),
            series,
            stats: Arc::clone(&ctx.stats),
        }
    }

    pub const fn span(&self) -> u32 {
        self.span
    }

    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    fn series(&self, f: RollupFn) -> &AggMetric {
        let idx = match f {
            RollupFn::Min => 0,
            RollupFn::Max => 1,
            RollupFn::Sum => 2,
            RollupFn::Cnt => 3,
            RollupFn::Lst => 4,
        };
        &self.series[idx]
    }

    pub fn add(&self, point: Point) {
        let Some(boundary) = agg_boundary(point.ts, self.span) else {
            RegistryStats::inc(&self.stats.points_dropped);
            debug!(
                ts = point.ts,
                span = self.span,
                "dropping point for rollup, bucket ends past the timestamp range"
            );
            return;
        };
        let mut bucket = self.bucket.lock();

        if let Some(open) = bucket.as_mut() {
            if boundary == open.boundary {
                open.add(point.val);
                return;
            }
            if boundary < open.boundary {
                debug!(
                    ts = point.ts,
                    boundary = open.boundary,
                    span = self.span,
                    "dropping out of order point for rollup"
                );
                return;
            }
        }

        if let Some(done) = bucket.replace(Bucket::new(boundary, point.val)) {
            self.flush(&done);
        }
    }

    fn flush(&self, bucket: &Bucket) {
        for f in RollupFn::ALL {
            // drops are counted and logged by the series itself
            let _ = self.series(f).add(bucket.boundary, bucket.value(f));
        }
    }

    /// Flush a bucket that ended before `chunk_min_ts`, then check the
    /// child series. Their staleness verdict is ignored; the metric that
    /// owns this rollup decides.
    pub fn gc(&self, chunk_min_ts: u32, metric_min_ts: u32) {
        {
            let mut bucket = self.bucket.lock();
            if bucket.is_some_and(|b| b.boundary <= chunk_min_ts)
                && let Some(done) = bucket.take()
            {
                self.flush(&done);
            }
        }
        for series in &self.series {
            series.gc(chunk_min_ts, metric_min_ts);
        }
    }

    /// Flush the open bucket, finished or not, and close every child
    /// series' current chunk. Used when the owning metric is evicted.
    pub fn close_all(&self) {
        if let Some(done) = self.bucket.lock().take() {
            self.flush(&done);
        }
        for series in &self.series {
            series.close_open_chunk();
        }
    }

    pub fn get(&self, consolidator: Consolidator, from: u32, to: u32) -> GetResult {
        if let Some(f) = consolidator.rollup_fn() {
            return self.series(f).get(from, to);
        }

        let sum = self.series(RollupFn::Sum).get(from, to);
        let cnt = self.series(RollupFn::Cnt).get(from, to);
        let mut points = Vec::with_capacity(sum.points.len());
        let mut counts = cnt.points.iter().peekable();
        for s in &sum.points {
            while counts.next_if(|c| c.ts < s.ts).is_some() {}
            if let Some(c) = counts.next_if(|c| c.ts == s.ts)
                && c.val > 0.0
            {
                points.push(Point::new(s.ts, s.val / c.val));
            }
        }
        GetResult {
            points,
            oldest: sum.oldest.max(cnt.oldest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MdataError;
    use crate::metric::tests::Harness;

    fn setting() -> AggSetting {
        AggSetting::new(60, 600, 3, 86400)
    }

    #[test]
    fn test_agg_boundary() {
        assert_eq!(agg_boundary(0, 60), Some(0));
        assert_eq!(agg_boundary(1, 60), Some(60));
        assert_eq!(agg_boundary(60, 60), Some(60));
        assert_eq!(agg_boundary(61, 60), Some(120));
        assert_eq!(agg_boundary(u32::MAX, 60), None);
        // 4294967280 is a multiple of 60
        assert_eq!(agg_boundary(4_294_967_280, 60), Some(4_294_967_280));
    }

    #[test]
    fn test_point_past_last_bucket_is_dropped() {
        let h = Harness::new(0);
        let agg = Aggregator::new(&h.ctx(), "m", &setting());
        agg.add(Point::new(4_294_967_200, 1.0));
        agg.add(Point::new(u32::MAX, 2.0));
        assert_eq!(h.stats.snapshot().points_dropped, 1);

        // the open bucket was left alone
        agg.close_all();
        assert_eq!(
            agg.get(Consolidator::Sum, 0, u32::MAX).points,
            vec![Point::new(4_294_967_220, 1.0)]
        );
    }

    #[test]
    fn test_close_all_persists_open_bucket() {
        let h = Harness::new(0);
        let agg = Aggregator::new(&h.ctx(), "m", &setting());
        agg.add(Point::new(10, 5.0));
        agg.add(Point::new(20, 1.0));
        assert!(h.store.is_empty());

        agg.close_all();
        for f in RollupFn::ALL {
            let key = format!("m_{}_60", f.as_str());
            let requests = h.store.requests_for(&key);
            assert_eq!(requests.len(), 1, "{key}");
            assert_eq!(requests[0].points[0].ts, 60);
        }
        assert_eq!(
            h.store.requests_for("m_sum_60")[0].points,
            vec![Point::new(60, 6.0)]
        );

        // nothing left to close
        agg.close_all();
        assert_eq!(h.store.len(), 5);
    }

    #[test]
    fn test_rollup_series() {
        let h = Harness::new(0);
        let agg = Aggregator::new(&h.ctx(), "m", &setting());
        for (ts, val) in [(1, 4.0), (30, 2.0), (60, 6.0), (61, 10.0), (121, 1.0)] {
            agg.add(Point::new(ts, val));
        }

        // buckets ending at 60 and 120 are complete, 180 is still open
        let min = agg.get(Consolidator::Min, 0, 1000);
        assert_eq!(min.points, vec![Point::new(60, 2.0), Point::new(120, 10.0)]);
        let max = agg.get(Consolidator::Max, 0, 1000);
        assert_eq!(max.points, vec![Point::new(60, 6.0), Point::new(120, 10.0)]);
        let sum = agg.get(Consolidator::Sum, 0, 1000);
        assert_eq!(sum.points, vec![Point::new(60, 12.0), Point::new(120, 10.0)]);
        let cnt = agg.get(Consolidator::Cnt, 0, 1000);
        assert_eq!(cnt.points, vec![Point::new(60, 3.0), Point::new(120, 1.0)]);
        let lst = agg.get(Consolidator::Lst, 0, 1000);
        assert_eq!(lst.points, vec![Point::new(60, 6.0), Point::new(120, 10.0)]);
        let avg = agg.get(Consolidator::Avg, 0, 1000);
        assert_eq!(avg.points, vec![Point::new(60, 4.0), Point::new(120, 10.0)]);
    }

    #[test]
    fn test_gc_flushes_old_bucket() {
        let h = Harness::new(0);
        let agg = Aggregator::new(&h.ctx(), "m", &setting());
        agg.add(Point::new(10, 5.0));
        assert!(agg.get(Consolidator::Sum, 0, 1000).points.is_empty());

        agg.gc(30, 0);
        assert!(agg.get(Consolidator::Sum, 0, 1000).points.is_empty());

        agg.gc(60, 0);
        assert_eq!(
            agg.get(Consolidator::Sum, 0, 1000).points,
            vec![Point::new(60, 5.0)]
        );
    }

    #[test]
    fn test_rollup_through_metric() {
        let h = Harness::new(0);
        let not_ready = AggSetting {
            ready: false,
            ..AggSetting::new(300, 3600, 2, 86400)
        };
        let m = AggMetric::new(h.ctx(), "m", 600, 5, 3600, &[setting(), not_ready]);
        m.add(10, 1.0).unwrap();
        m.add(70, 3.0).unwrap();

        let res = m.get_rollup(Consolidator::Max, 60, 0, 1000).unwrap();
        assert_eq!(res.points, vec![Point::new(60, 1.0)]);
        assert!(matches!(
            m.get_rollup(Consolidator::Max, 300, 0, 1000),
            Err(MdataError::RollupNotReady { span: 300, .. })
        ));
    }

    #[test]
    fn test_rollup_chunks_are_persisted_under_series_keys() {
        let h = Harness::new(0);
        let agg = Aggregator::new(&h.ctx(), "m", &setting());
        // one point per bucket across two rollup chunks (chunk span 600)
        for i in 0..12u32 {
            agg.add(Point::new(i * 60 + 1, 1.0));
        }
        assert_eq!(h.store.requests_for("m_sum_60").len(), 1);
        assert_eq!(h.store.requests_for("m_cnt_60")[0].t0, 0);
    }
}
