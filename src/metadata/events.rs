//! Acquisition-error / checksum-error / session / track lists: ordered
//! `{start_sector, number_of_sectors}` records serialized as
//! `(count, records[], checksum)` blocks (spec.md §3, §4.5).

use crate::codec::checksum32;
use crate::error::{EwfError, Result};
use log::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRange {
    pub start_sector: u64,
    pub number_of_sectors: u64,
}

/// An append-only list of sector ranges. Implementations may coalesce
/// adjacent ranges (spec.md §4.5); this one does, on `append`, since
/// sources do not mandate otherwise.
#[derive(Debug, Clone, Default)]
pub struct EventList {
    records: Vec<SectorRange>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<SectorRange> {
        self.records.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectorRange> {
        self.records.iter()
    }

    /// Append a record, coalescing with the previous one when it is
    /// contiguous and would otherwise just duplicate it.
    pub fn append(&mut self, range: SectorRange) {
        if let Some(last) = self.records.last_mut() {
            if last.start_sector + last.number_of_sectors == range.start_sector {
                last.number_of_sectors += range.number_of_sectors;
                return;
            }
        }
        self.records.push(range);
    }

    /// Decode a `(count:u32, padding, records[{start:u64,count:u32}],
    /// checksum:u32)` block.
    pub fn decode(payload: &[u8], padding_len: usize) -> Result<Self> {
        if payload.len() < 4 + padding_len {
            error!("event list section too short ({} bytes)", payload.len());
            return Err(EwfError::SegmentCorrupt("event list section too short".into()));
        }
        let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
        let records_start = 4 + padding_len;
        let record_size = 12; // start_sector:u64 + number_of_sectors:u32
        let records_len = count * record_size;
        if payload.len() < records_start + records_len + 4 {
            error!("event list record count {count} exceeds payload size {}", payload.len());
            return Err(EwfError::SegmentCorrupt(
                "event list record count exceeds payload size".into(),
            ));
        }
        let body = &payload[records_start..records_start + records_len];
        let stored = u32::from_le_bytes(
            payload[records_start + records_len..records_start + records_len + 4]
                .try_into()
                .unwrap(),
        );
        let computed = checksum32(&payload[..records_start + records_len], 1);
        if stored != computed {
            return Err(EwfError::ChecksumMismatch("event list checksum mismatch".into()));
        }

        let mut out = Self::new();
        for i in 0..count {
            let rec = &body[i * record_size..(i + 1) * record_size];
            let start_sector = u64::from_le_bytes(rec[0..8].try_into().unwrap());
            let number_of_sectors = u32::from_le_bytes(rec[8..12].try_into().unwrap()) as u64;
            out.records.push(SectorRange {
                start_sector,
                number_of_sectors,
            });
        }
        Ok(out)
    }

    pub fn encode(&self, padding_len: usize) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        payload.extend(std::iter::repeat(0u8).take(padding_len));
        for record in &self.records {
            payload.extend_from_slice(&record.start_sector.to_le_bytes());
            payload.extend_from_slice(&(record.number_of_sectors as u32).to_le_bytes());
        }
        let checksum = checksum32(&payload, 1);
        payload.extend_from_slice(&checksum.to_le_bytes());
        payload
    }
}

/// `error2` sections carry a 512-byte padding block (spec.md §6); sessions
/// and tracks carry none.
pub const ERROR2_PADDING: usize = 512;
pub const SESSION_PADDING: usize = 0;
pub const TRACK_PADDING: usize = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_adjacent_ranges() {
        let mut list = EventList::new();
        list.append(SectorRange {
            start_sector: 0,
            number_of_sectors: 10,
        });
        list.append(SectorRange {
            start_sector: 10,
            number_of_sectors: 5,
        });
        assert_eq!(list.len(), 1);
        assert_eq!(
            list.get(0).unwrap(),
            SectorRange {
                start_sector: 0,
                number_of_sectors: 15
            }
        );
    }

    #[test]
    fn keeps_non_adjacent_ranges_distinct() {
        let mut list = EventList::new();
        list.append(SectorRange {
            start_sector: 0,
            number_of_sectors: 10,
        });
        list.append(SectorRange {
            start_sector: 20,
            number_of_sectors: 5,
        });
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn error2_roundtrip() {
        let mut list = EventList::new();
        list.append(SectorRange {
            start_sector: 5,
            number_of_sectors: 3,
        });
        let encoded = list.encode(ERROR2_PADDING);
        let decoded = EventList::decode(&encoded, ERROR2_PADDING).unwrap();
        assert_eq!(decoded.get(0), list.get(0));
    }
}
