//! Hot-tier error types

use thiserror::Error;

/// Hot-tier error
#[derive(Error, Debug)]
pub enum MdataError {
    /// Point older than the newest point already accepted
    #[error("out of order point for {key}: ts {ts} is not after {last}")]
    OutOfOrder { key: String, ts: u32, last: u32 },

    /// Point for a chunk that was already closed and persisted
    #[error("chunk {t0} of {key} is closed")]
    ClosedChunk { key: String, t0: u32 },

    /// No rollup with this span
    #[error("no rollup with span {span}s for {key}")]
    UnknownRollup { key: String, span: u32 },

    /// Rollup exists but is not marked ready for reads
    #[error("rollup with span {span}s for {key} is not ready")]
    RollupNotReady { key: String, span: u32 },
}

impl MdataError {
    /// Whether the point was rejected rather than something having failed
    #[must_use]
    pub const fn is_dropped_point(&self) -> bool {
        matches!(self, Self::OutOfOrder { .. } | Self::ClosedChunk { .. })
    }
}

/// Result type for hot-tier operations
pub type MdataResult<T> = Result<T, MdataError>;
