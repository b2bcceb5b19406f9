//! Cache-push contract
//!
//! The acceleration cache is told about every chunk that completes. Pushes
//! are best effort and have no effect on registry state.

use parking_lot::Mutex;

use crate::chunk::Chunk;

/// Sink notified when a chunk completes
pub trait CachePusher: Send + Sync {
    /// `prev_t0` is the start of the chunk before `chunk`, or 0 if none
    fn cache_if_hot(&self, key: &str, prev_t0: u32, chunk: &Chunk);
}

/// Cache pusher that drops every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCachePusher;

impl CachePusher for NoopCachePusher {
    fn cache_if_hot(&self, _key: &str, _prev_t0: u32, _chunk: &Chunk) {}
}

/// A recorded cache push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePush {
    pub key: String,
    pub prev_t0: u32,
    pub t0: u32,
    pub points: usize,
}

/// Cache pusher that remembers what it was told
#[derive(Debug, Default)]
pub struct RecordingCachePusher {
    pushes: Mutex<Vec<CachePush>>,
}

impl RecordingCachePusher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pushes(&self) -> Vec<CachePush> {
        self.pushes.lock().clone()
    }
}

impl CachePusher for RecordingCachePusher {
    fn cache_if_hot(&self, key: &str, prev_t0: u32, chunk: &Chunk) {
        self.pushes.lock().push(CachePush {
            key: key.to_string(),
            prev_t0,
            t0: chunk.t0(),
            points: chunk.len(),
        });
    }
}
