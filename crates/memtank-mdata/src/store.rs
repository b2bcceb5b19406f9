//! Backing store contract
//!
//! Closed chunks are handed to the store write-behind. The registry never
//! waits for durability; retries and failures are the store's business.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::chunk::Point;

/// A closed chunk ready to be written to durable storage
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkWriteRequest {
    /// Series key
    pub key: String,
    /// Chunk start
    pub t0: u32,
    /// Chunk span in seconds
    pub span: u32,
    /// Retention in seconds
    pub ttl: u32,
    pub points: Vec<Point>,
}

/// Durable tier that closed chunks are flushed to
pub trait Store: Send + Sync {
    /// Queue a chunk for writing; must not block on I/O
    fn add(&self, cwr: ChunkWriteRequest);
}

/// Store that discards everything, counting what it was given
#[derive(Debug, Default)]
pub struct DevNullStore {
    writes: AtomicU64,
}

impl DevNullStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Store for DevNullStore {
    fn add(&self, _cwr: ChunkWriteRequest) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Store that keeps every request in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    requests: Mutex<Vec<ChunkWriteRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every request received so far
    pub fn requests(&self) -> Vec<ChunkWriteRequest> {
        self.requests.lock().clone()
    }

    /// Requests received for one series key
    pub fn requests_for(&self, key: &str) -> Vec<ChunkWriteRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.key == key)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }
}

impl Store for MemoryStore {
    fn add(&self, cwr: ChunkWriteRequest) {
        self.requests.lock().push(cwr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, t0: u32) -> ChunkWriteRequest {
        ChunkWriteRequest {
            key: key.to_string(),
            t0,
            span: 600,
            ttl: 3600,
            points: vec![Point::new(t0, 1.0)],
        }
    }

    #[test]
    fn test_dev_null_store_counts() {
        let store = DevNullStore::new();
        store.add(request("a", 0));
        store.add(request("a", 600));
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn test_memory_store_records() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.add(request("a", 0));
        store.add(request("b", 0));
        store.add(request("a", 600));
        assert_eq!(store.len(), 3);
        let a = store.requests_for("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[1].t0, 600);
    }
}
