//! Encode/decode of the `volume`/`disk` section payload (spec.md §6):
//! geometry plus `error_granularity`, `set_identifier`, `compression_level`
//! and `media_flags`.

use crate::codec::checksum32;
use crate::error::{EwfError, Result};
use crate::format::{media_flags, CompressionLevel, MediaGeometry, MediaType};
use log::error;

const RESERVED_A: usize = 20;
const RESERVED_B: usize = 16;
pub const VOLUME_PAYLOAD_SIZE: usize =
    1 + 3 + 4 + 4 + 4 + 4 + RESERVED_A + 4 + 4 + 16 + RESERVED_B + 1 + 1 + 2 + 4;

fn media_type_byte(t: MediaType) -> u8 {
    match t {
        MediaType::Removable => 0x00,
        MediaType::Fixed => 0x01,
        MediaType::Optical => 0x03,
        MediaType::LogicalVolume => 0x0e,
        MediaType::Memory => 0x10,
    }
}

fn media_type_from_byte(b: u8) -> MediaType {
    match b {
        0x00 => MediaType::Removable,
        0x03 => MediaType::Optical,
        0x0e => MediaType::LogicalVolume,
        0x10 => MediaType::Memory,
        _ => MediaType::Fixed,
    }
}

fn compression_level_byte(l: CompressionLevel) -> u8 {
    match l {
        CompressionLevel::None => 0,
        CompressionLevel::EmptyBlock => 1,
        CompressionLevel::Fast => 1,
        CompressionLevel::Best => 2,
    }
}

fn compression_level_from_byte(b: u8) -> CompressionLevel {
    match b {
        0 => CompressionLevel::None,
        2 => CompressionLevel::Best,
        _ => CompressionLevel::Fast,
    }
}

pub fn encode_volume(geometry: &MediaGeometry) -> Vec<u8> {
    let mut buf = vec![0u8; VOLUME_PAYLOAD_SIZE];
    let mut off = 0;
    buf[off] = media_type_byte(geometry.media_type);
    off += 1 + 3;
    buf[off..off + 4].copy_from_slice(&(geometry.number_of_chunks() as u32).to_le_bytes());
    off += 4;
    buf[off..off + 4].copy_from_slice(&geometry.sectors_per_chunk.to_le_bytes());
    off += 4;
    buf[off..off + 4].copy_from_slice(&geometry.bytes_per_sector.to_le_bytes());
    off += 4;
    buf[off..off + 4].copy_from_slice(&(geometry.number_of_sectors as u32).to_le_bytes());
    off += 4 + RESERVED_A;
    buf[off..off + 4].copy_from_slice(&geometry.error_granularity.to_le_bytes());
    off += 4 + 4;
    buf[off..off + 16].copy_from_slice(&geometry.set_identifier);
    off += 16 + RESERVED_B;
    buf[off] = compression_level_byte(geometry.compression_level);
    off += 1;
    buf[off] = geometry.media_flags;
    off += 1 + 2;

    let checksum = checksum32(&buf[..off], 1);
    buf[off..off + 4].copy_from_slice(&checksum.to_le_bytes());
    buf
}

pub fn decode_volume(payload: &[u8]) -> Result<MediaGeometry> {
    if payload.len() < VOLUME_PAYLOAD_SIZE {
        error!("volume section too short ({} bytes)", payload.len());
        return Err(EwfError::SegmentCorrupt("volume section too short".into()));
    }
    let checksum_at = VOLUME_PAYLOAD_SIZE - 4;
    let stored = u32::from_le_bytes(payload[checksum_at..checksum_at + 4].try_into().unwrap());
    let computed = checksum32(&payload[..checksum_at], 1);
    if stored != computed {
        return Err(EwfError::ChecksumMismatch("volume section checksum mismatch".into()));
    }

    let mut off = 0;
    let media_type = media_type_from_byte(payload[off]);
    off += 1 + 3;
    off += 4; // number_of_chunks, recomputed from the chunk index instead
    let sectors_per_chunk = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
    off += 4;
    let bytes_per_sector = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
    off += 4;
    let number_of_sectors = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap()) as u64;
    off += 4 + RESERVED_A;
    let error_granularity = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
    off += 4 + 4;
    let mut set_identifier = [0u8; 16];
    set_identifier.copy_from_slice(&payload[off..off + 16]);
    off += 16 + RESERVED_B;
    let compression_level = compression_level_from_byte(payload[off]);
    off += 1;
    let media_flags = payload[off] | media_flags::IMAGE;

    Ok(MediaGeometry {
        sectors_per_chunk,
        bytes_per_sector,
        media_size: number_of_sectors * bytes_per_sector as u64,
        number_of_sectors,
        error_granularity,
        media_type,
        media_flags,
        compression_level,
        compression_method: crate::format::CompressionMethod::Deflate,
        format: crate::format::Format::Ewf,
        set_identifier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_roundtrip() {
        let geometry = MediaGeometry {
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            media_size: 64 * 512 * 10,
            number_of_sectors: 64 * 10,
            error_granularity: 64,
            media_type: MediaType::Fixed,
            media_flags: media_flags::IMAGE,
            compression_level: CompressionLevel::Best,
            set_identifier: [0x42; 16],
            ..Default::default()
        };
        let encoded = encode_volume(&geometry);
        let decoded = decode_volume(&encoded).unwrap();
        assert_eq!(decoded.sectors_per_chunk, geometry.sectors_per_chunk);
        assert_eq!(decoded.bytes_per_sector, geometry.bytes_per_sector);
        assert_eq!(decoded.number_of_sectors, geometry.number_of_sectors);
        assert_eq!(decoded.set_identifier, geometry.set_identifier);
        assert_eq!(decoded.compression_level, geometry.compression_level);
    }

    #[test]
    fn volume_detects_corruption() {
        let geometry = MediaGeometry::default();
        let mut encoded = encode_volume(&geometry);
        encoded[5] ^= 0xFF;
        assert!(decode_volume(&encoded).is_err());
    }
}
