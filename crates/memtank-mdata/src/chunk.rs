//! Fixed-duration chunks of one series

use crate::error::{MdataError, MdataResult};

/// One data point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub ts: u32,
    pub val: f64,
}

impl Point {
    pub const fn new(ts: u32, val: f64) -> Self {
        Self { ts, val }
    }
}

/// Start of the chunk containing `ts`
#[inline]
pub const fn chunk_t0(ts: u32, span: u32) -> u32 {
    ts - ts % span
}

/// A chunk covering `[t0, t0 + span)`
///
/// Open chunks accept strictly increasing timestamps. Once finished a
/// chunk is immutable.
#[derive(Debug, Clone)]
pub struct Chunk {
    t0: u32,
    points: Vec<Point>,
    /// Wall-clock time of the last accepted write
    last_write: u32,
    closed: bool,
}

impl Chunk {
    pub const fn new(t0: u32) -> Self {
        Self {
            t0,
            points: Vec::new(),
            last_write: 0,
            closed: false,
        }
    }

    /// Append a point, `now` being the wall-clock time of the write
    pub fn push(&mut self, key: &str, point: Point, now: u32) -> MdataResult<()> {
        if self.closed {
            return Err(MdataError::ClosedChunk {
                key: key.to_string(),
                t0: self.t0,
            });
        }
        if let Some(last) = self.points.last()
            && point.ts <= last.ts
        {
            return Err(MdataError::OutOfOrder {
                key: key.to_string(),
                ts: point.ts,
                last: last.ts,
            });
        }
        self.points.push(point);
        self.last_write = now;
        Ok(())
    }

    /// Close the chunk; returns false if it was already closed
    pub fn finish(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    pub const fn t0(&self) -> u32 {
        self.t0
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub const fn last_write(&self) -> u32 {
        self.last_write
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_ts(&self) -> Option<u32> {
        self.points.last().map(|p| p.ts)
    }
}
