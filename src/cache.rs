//! Bounded chunk cache with read/modify/write overlays (spec.md §3 "Chunk
//! cache entry", §4.4 "Cache policy").
//!
//! The teacher's `ewf.rs::ChunkCache` always held exactly one decompressed
//! chunk and nothing else — no eviction policy was needed because there was
//! nothing to evict. This generalizes it to a caller-configurable bounded
//! set of entries with LRU eviction among unpinned (non-dirty) entries.

use crate::error::{EwfError, Result};
use std::collections::HashMap;

pub struct CacheEntry {
    pub data: Vec<u8>,
    pub dirty: bool,
    last_used: u64,
}

/// LRU cache of decompressed chunks, keyed by global chunk number.
pub struct ChunkCache {
    entries: HashMap<u64, CacheEntry>,
    capacity: usize,
    clock: u64,
}

impl ChunkCache {
    /// `capacity` of 0 is coerced to 1 — the source's minimum is a single
    /// decompressed chunk (spec.md §4.4).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn get(&mut self, chunk_number: u64) -> Option<&[u8]> {
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(&chunk_number) {
            entry.last_used = tick;
            Some(&entry.data)
        } else {
            None
        }
    }

    pub fn contains(&self, chunk_number: u64) -> bool {
        self.entries.contains_key(&chunk_number)
    }

    /// Install a freshly decoded chunk, evicting an unpinned (non-dirty)
    /// LRU entry if the cache is full. Errors only if every resident entry
    /// is dirty — a caller must flush before it can happen in practice,
    /// since this engine flushes writes immediately (see `media.rs`).
    pub fn insert(&mut self, chunk_number: u64, data: Vec<u8>) -> Result<()> {
        if !self.entries.contains_key(&chunk_number) && self.entries.len() >= self.capacity {
            self.evict_one()?;
        }
        let tick = self.tick();
        self.entries.insert(
            chunk_number,
            CacheEntry {
                data,
                dirty: false,
                last_used: tick,
            },
        );
        Ok(())
    }

    fn evict_one(&mut self) -> Result<()> {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| !e.dirty)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| *k);
        match victim {
            Some(k) => {
                self.entries.remove(&k);
                Ok(())
            }
            None => Err(EwfError::InvalidState(
                "chunk cache full of dirty entries with nothing to evict".into(),
            )),
        }
    }

    pub fn mark_dirty(&mut self, chunk_number: u64, data: Vec<u8>) {
        let tick = self.tick();
        self.entries.insert(
            chunk_number,
            CacheEntry {
                data,
                dirty: true,
                last_used: tick,
            },
        );
    }

    /// Remove and return a dirty entry's bytes, clearing its dirty flag as
    /// part of the flush protocol (spec.md §4.4).
    pub fn take_dirty(&mut self, chunk_number: u64) -> Option<Vec<u8>> {
        match self.entries.get(&chunk_number) {
            Some(entry) if entry.dirty => Some(self.entries.remove(&chunk_number).unwrap().data),
            _ => None,
        }
    }

    pub fn invalidate(&mut self, chunk_number: u64) {
        self.entries.remove(&chunk_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry_cache_evicts_previous_clean_chunk() {
        let mut cache = ChunkCache::new(1);
        cache.insert(0, vec![1, 2, 3]).unwrap();
        assert!(cache.contains(0));
        cache.insert(1, vec![4, 5, 6]).unwrap();
        assert!(!cache.contains(0));
        assert!(cache.contains(1));
    }

    #[test]
    fn dirty_entries_are_never_evicted() {
        let mut cache = ChunkCache::new(1);
        cache.mark_dirty(0, vec![9, 9]);
        assert!(cache.insert(1, vec![1]).is_err());
    }

    #[test]
    fn take_dirty_clears_flag() {
        let mut cache = ChunkCache::new(2);
        cache.mark_dirty(0, vec![1, 2, 3]);
        let data = cache.take_dirty(0).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
        assert!(cache.take_dirty(0).is_none());
    }
}
