//! Segment-file pool: the one cross-component shared mutable resource
//! (spec.md §5). Serializes file-descriptor acquisition behind a
//! caller-configurable maximum concurrent open count, closing and
//! reopening entries transparently under pressure.

use crate::error::Result;
use crate::segment::SegmentReader;
use std::collections::VecDeque;
use std::path::PathBuf;

/// Segments are addressed by their 0-based index into `paths` (segment
/// number `n` lives at index `n - 1`).
pub struct SegmentPool {
    paths: Vec<PathBuf>,
    open: Vec<Option<SegmentReader>>,
    lru: VecDeque<usize>,
    max_open: usize,
}

impl SegmentPool {
    pub fn new(paths: Vec<PathBuf>, max_open: usize) -> Self {
        let len = paths.len();
        Self {
            paths,
            open: (0..len).map(|_| None).collect(),
            lru: VecDeque::new(),
            max_open: max_open.max(1),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.paths.len()
    }

    pub fn path(&self, index: usize) -> &PathBuf {
        &self.paths[index]
    }

    /// Get (opening if necessary) the reader for segment index `index`,
    /// evicting the least-recently-used open handle if the pool is at
    /// capacity (spec.md §5 "may close and reopen descriptors under
    /// pressure").
    pub fn get(&mut self, index: usize) -> Result<&mut SegmentReader> {
        if self.open[index].is_none() {
            if self.lru.len() >= self.max_open {
                if let Some(victim) = self.lru.pop_front() {
                    self.open[victim] = None;
                }
            }
            self.open[index] = Some(SegmentReader::open(&self.paths[index])?);
        }
        self.lru.retain(|&i| i != index);
        self.lru.push_back(index);
        Ok(self.open[index].as_mut().unwrap())
    }

    /// Add a newly-created segment (e.g. a delta segment attached after
    /// open) to the addressable set.
    pub fn push_path(&mut self, path: PathBuf) -> usize {
        self.paths.push(path);
        self.open.push(None);
        self.paths.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::segment::SegmentWriter;
    use tempfile::tempdir;

    #[test]
    fn pool_evicts_lru_beyond_capacity() {
        let dir = tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 1..=3u32 {
            let path = dir.path().join(format!("seg{i}.e01"));
            let mut w = SegmentWriter::create(&path, Format::Ewf, i, [0u8; 16]).unwrap();
            w.write_terminator().unwrap();
            paths.push(path);
        }
        let mut pool = SegmentPool::new(paths, 2);
        pool.get(0).unwrap();
        pool.get(1).unwrap();
        pool.get(2).unwrap(); // evicts 0
        assert!(pool.open[0].is_none());
        assert!(pool.open[1].is_some());
        assert!(pool.open[2].is_some());
    }
}
