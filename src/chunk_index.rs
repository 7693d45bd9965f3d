//! The global, ordered mapping `chunk_number -> (segment, offset, size,
//! flags)` (spec.md §4.3), plus encode/decode of the `table`/`table2` wire
//! format those entries are built from.
//!
//! Grounded on `ewf.rs::parse_table`, which only read the v1, uncompressed-
//! aware entry format into a `HashMap<segment, Vec<Chunk>>`. This module
//! flattens that into a single chunk-indexed vector (spec.md §4.3's O(1)
//! append/lookup requirement cannot be met by per-segment maps) and adds
//! the write side and the delta overlay.

use crate::codec::checksum32;
use crate::error::{EwfError, Result};
use log::error;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct ChunkDescriptor {
    pub segment_ref: u32,
    pub file_offset: u64,
    pub stored_size: u64,
    pub compressed: bool,
    pub has_trailing_checksum: bool,
    pub is_delta: bool,
    pub is_sparse: bool,
}

/// Chunk number -> on-disk location, with delta-segment overlay (spec.md
/// §4.3 "Delta overlays": replacement by swap, not duplication).
#[derive(Default)]
pub struct ChunkIndex {
    primary: Vec<ChunkDescriptor>,
    delta: HashMap<u64, ChunkDescriptor>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a write-time chunk descriptor, returning its chunk number.
    pub fn push(&mut self, descriptor: ChunkDescriptor) -> u64 {
        self.primary.push(descriptor);
        (self.primary.len() - 1) as u64
    }

    pub fn len(&self) -> u64 {
        self.primary.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// The live descriptor for `chunk_number`: a delta overlay entry when
    /// present, otherwise the primary one.
    pub fn get(&self, chunk_number: u64) -> Option<&ChunkDescriptor> {
        self.delta
            .get(&chunk_number)
            .or_else(|| self.primary.get(chunk_number as usize))
    }

    /// The original (pre-delta) descriptor, for read-only fallback when a
    /// delta segment becomes unreadable (spec.md §4.3).
    pub fn original(&self, chunk_number: u64) -> Option<&ChunkDescriptor> {
        self.primary.get(chunk_number as usize)
    }

    /// Replace the live entry for `chunk_number` with a delta-segment
    /// descriptor. The original primary entry is retained untouched.
    pub fn set_delta(&mut self, chunk_number: u64, descriptor: ChunkDescriptor) {
        self.delta.insert(chunk_number, descriptor);
    }

    pub fn has_delta(&self, chunk_number: u64) -> bool {
        self.delta.contains_key(&chunk_number)
    }
}

/// Decoded `table`/`table2` payload: the chunks it describes plus the base
/// offset they are relative to.
pub struct DecodedTable {
    pub base_offset: u64,
    /// `(compressed, offset_within_segment)` per chunk, in table order.
    pub entries: Vec<(bool, u64)>,
}

const MSB: u32 = 0x8000_0000;

/// Decode a v1 `table`/`table2` payload:
/// `count:u32, pad[16], base_offset:u64, pad[4], entries:u32[N], checksum:u32`.
pub fn decode_table_v1(payload: &[u8]) -> Result<DecodedTable> {
    if payload.len() < 28 {
        error!("table section too short ({} bytes)", payload.len());
        return Err(EwfError::SegmentCorrupt("table section too short".into()));
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let base_offset = u64::from_le_bytes(payload[20..28].try_into().unwrap());
    let entries_start = 28;
    let entries_len = count * 4;
    if payload.len() < entries_start + entries_len + 4 {
        error!("table section entry count {count} exceeds payload size {}", payload.len());
        return Err(EwfError::SegmentCorrupt(
            "table section entry count exceeds payload size".into(),
        ));
    }
    let entries_bytes = &payload[entries_start..entries_start + entries_len];
    let stored_checksum =
        u32::from_le_bytes(payload[entries_start + entries_len..entries_start + entries_len + 4].try_into().unwrap());
    let computed = checksum32(&payload[..entries_start + entries_len], 1);
    if stored_checksum != computed {
        return Err(EwfError::ChecksumMismatch(
            "table section entries checksum mismatch".into(),
        ));
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let raw = u32::from_le_bytes(entries_bytes[i * 4..i * 4 + 4].try_into().unwrap());
        let compressed = raw & MSB != 0;
        let offset = base_offset + (raw & !MSB) as u64;
        entries.push((compressed, offset));
    }
    Ok(DecodedTable { base_offset, entries })
}

/// Encode a v1 `table` payload for `entries` (already offset-relative to
/// `base_offset`).
pub fn encode_table_v1(entries: &[(bool, u64)], base_offset: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(28 + entries.len() * 4 + 4);
    payload.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    payload.extend_from_slice(&[0u8; 16]);
    payload.extend_from_slice(&base_offset.to_le_bytes());
    payload.extend_from_slice(&[0u8; 4]);
    for &(compressed, offset) in entries {
        let rel = (offset - base_offset) as u32;
        let raw = if compressed { rel | MSB } else { rel };
        payload.extend_from_slice(&raw.to_le_bytes());
    }
    let checksum = checksum32(&payload, 1);
    payload.extend_from_slice(&checksum.to_le_bytes());
    payload
}

/// Decode a v2 `table`/`table2` entry: 14-bit flags packed with a 50-bit
/// offset (spec.md §4.3), payload layout mirrors v1 but with 8-byte
/// entries: `count:u32, pad[4], base_offset:u64, entries:u64[N],
/// checksum:u32`.
pub fn decode_table_v2(payload: &[u8]) -> Result<DecodedTable> {
    if payload.len() < 16 {
        error!("v2 table section too short ({} bytes)", payload.len());
        return Err(EwfError::SegmentCorrupt("v2 table section too short".into()));
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let base_offset = u64::from_le_bytes(payload[8..16].try_into().unwrap());
    let entries_start = 16;
    let entries_len = count * 8;
    if payload.len() < entries_start + entries_len + 4 {
        error!("v2 table section entry count {count} exceeds payload size {}", payload.len());
        return Err(EwfError::SegmentCorrupt(
            "v2 table section entry count exceeds payload size".into(),
        ));
    }
    let entries_bytes = &payload[entries_start..entries_start + entries_len];
    let stored_checksum =
        u32::from_le_bytes(payload[entries_start + entries_len..entries_start + entries_len + 4].try_into().unwrap());
    let computed = checksum32(&payload[..entries_start + entries_len], 1);
    if stored_checksum != computed {
        return Err(EwfError::ChecksumMismatch(
            "v2 table section entries checksum mismatch".into(),
        ));
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let raw = u64::from_le_bytes(entries_bytes[i * 8..i * 8 + 8].try_into().unwrap());
        let flags = raw >> 50;
        let offset = raw & ((1u64 << 50) - 1);
        let compressed = flags & 0x1 != 0;
        entries.push((compressed, base_offset + offset));
    }
    Ok(DecodedTable { base_offset, entries })
}

pub fn encode_table_v2(entries: &[(bool, u64)], base_offset: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + entries.len() * 8 + 4);
    payload.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    payload.extend_from_slice(&[0u8; 4]);
    payload.extend_from_slice(&base_offset.to_le_bytes());
    for &(compressed, offset) in entries {
        let rel = offset - base_offset;
        let flags: u64 = if compressed { 1 } else { 0 };
        let raw = (flags << 50) | (rel & ((1u64 << 50) - 1));
        payload.extend_from_slice(&raw.to_le_bytes());
    }
    let checksum = checksum32(&payload, 1);
    payload.extend_from_slice(&checksum.to_le_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_table_roundtrip() {
        let entries = vec![(true, 1000u64), (false, 1500u64), (true, 1530u64)];
        let encoded = encode_table_v1(&entries, 1000);
        let decoded = decode_table_v1(&encoded).unwrap();
        assert_eq!(decoded.base_offset, 1000);
        assert_eq!(decoded.entries, entries);
    }

    #[test]
    fn v1_table_detects_corruption() {
        let entries = vec![(true, 1000u64)];
        let mut encoded = encode_table_v1(&entries, 1000);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(decode_table_v1(&encoded).is_err());
    }

    #[test]
    fn v2_table_roundtrip() {
        let entries = vec![(true, 2000u64), (false, 2500u64)];
        let encoded = encode_table_v2(&entries, 2000);
        let decoded = decode_table_v2(&encoded).unwrap();
        assert_eq!(decoded.base_offset, 2000);
        assert_eq!(decoded.entries, entries);
    }

    #[test]
    fn index_delta_overlay_swaps_without_losing_original() {
        let mut index = ChunkIndex::new();
        let original = ChunkDescriptor {
            segment_ref: 1,
            file_offset: 100,
            stored_size: 50,
            compressed: false,
            has_trailing_checksum: true,
            is_delta: false,
            is_sparse: false,
        };
        let n = index.push(original);
        let delta = ChunkDescriptor {
            segment_ref: 9,
            file_offset: 5000,
            stored_size: 50,
            compressed: false,
            has_trailing_checksum: true,
            is_delta: true,
            is_sparse: false,
        };
        index.set_delta(n, delta);
        assert_eq!(index.get(n).unwrap().segment_ref, 9);
        assert_eq!(index.original(n).unwrap().segment_ref, 1);
    }
}
