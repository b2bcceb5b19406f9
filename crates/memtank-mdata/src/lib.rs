//! memtank hot tier
//!
//! In-memory storage for recently ingested metric data. Each metric keeps
//! a ring of fixed-duration chunks; closed chunks are written behind to a
//! [`Store`] and announced to a [`CachePusher`]. Metrics that stop
//! receiving data are evicted by a background sweep.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          AggMetrics          │
//! │  route(key) → shard index    │
//! │ ┌──────┐┌──────┐   ┌──────┐  │     ┌──────────────┐
//! │ │shard0││shard1│ … │sh.255│◄─┼─────┤   sweeper    │
//! │ └──┬───┘└──────┘   └──────┘  │     │ (gc interval)│
//! └────┼─────────────────────────┘     └──────────────┘
//!      │ key → Arc<dyn Metric>
//! ┌────▼──────┐  closed chunks  ┌───────┐
//! │ AggMetric ├────────────────►│ Store │
//! │  + rollups├───────┐         └───────┘
//! └───────────┘       └────────►CachePusher
//! ```

pub mod aggregator;
pub mod cache;
pub mod chunk;
pub mod consolidation;
pub mod error;
pub mod metric;
pub mod registry;
pub mod shard;
pub mod stats;
pub mod store;
pub mod sweeper;

pub use aggregator::Aggregator;
pub use cache::{CachePush, CachePusher, NoopCachePusher, RecordingCachePusher};
pub use chunk::{Chunk, Point};
pub use consolidation::{Consolidator, RollupFn};
pub use error::{MdataError, MdataResult};
pub use metric::{
    AggMetric, AggMetricFactory, GetResult, Metric, MetricContext, MetricFactory, MetricSettings,
};
pub use registry::AggMetrics;
pub use shard::{NUM_SHARDS, shard_index};
pub use stats::{RegistryStats, StatsSnapshot};
pub use store::{ChunkWriteRequest, DevNullStore, MemoryStore, Store};
pub use sweeper::{SweepStats, min_timestamps, next_sweep_delay};
