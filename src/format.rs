//! Format dialects, media geometry, and segment filename templates.
//!
//! Grounded on `ewf.rs`'s `EwfHeader`/`EwfVolumeSection` (which only ever
//! read the *first* EWF v1 dialect) generalized into the closed set of
//! dialects this engine actually supports, matched by value rather than by
//! virtual dispatch — see spec.md §9 "deep class trees with virtual
//! dispatch".

use crate::error::{EwfError, Result};

/// EWF v1 segment signature (`EVF\t\r\n\xff\0`), shared by raw and logical
/// images (the teacher's `ewf.rs` treated `MVF...` as a second signature for
/// the same reason).
pub const EWF1_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
pub const LWF1_SIGNATURE: [u8; 8] = [0x4C, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
/// EWF2 signature (`EVF2\r\n\x81\0`).
pub const EWF2_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x32, 0x0D, 0x0A, 0x81, 0x00];
pub const LWF2_SIGNATURE: [u8; 8] = [0x4C, 0x56, 0x46, 0x32, 0x0D, 0x0A, 0x81, 0x00];

/// On-disk dialect. Selects the section-descriptor layout (§4.2) and the
/// section-type alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Ewf,
    Ewf2,
    LogicalV1,
    LogicalV2,
    EnCase1,
    EnCase2,
    EnCase3,
    EnCase4,
    EnCase5,
    EnCase6,
    EnCase7,
    Ftk,
    Linen5,
    Linen6,
    Linen7,
    Smart,
    Ewfx,
}

impl Format {
    /// Whether this dialect is serialized with the v2 segment-descriptor
    /// layout (explicit `data_size`/`previous_offset`, UTF-8 metadata).
    pub fn is_v2(self) -> bool {
        matches!(self, Format::Ewf2 | Format::LogicalV2)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Format::LogicalV1 | Format::LogicalV2)
    }

    /// First-segment filename extension, per spec.md §6.
    pub fn first_extension(self) -> &'static str {
        match self {
            Format::Ewf2 => "ex01",
            Format::LogicalV1 => "l01",
            Format::LogicalV2 => "lx01",
            _ => "e01",
        }
    }

    fn family(self) -> SegmentFamily {
        if self.is_logical() {
            if self.is_v2() {
                SegmentFamily::LogicalV2
            } else {
                SegmentFamily::LogicalV1
            }
        } else if self.is_v2() {
            SegmentFamily::EwfV2
        } else {
            SegmentFamily::EwfV1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentFamily {
    EwfV1,
    EwfV2,
    LogicalV1,
    LogicalV2,
}

/// Acquisition/compression level. `EmptyBlock` is a shortcut that emits the
/// format's run-length-encoded all-zero marker instead of deflating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    EmptyBlock,
    Fast,
    Best,
}

/// Deflate-family codec selector (v2 exposes this explicitly; v1 is always
/// zlib-wrapped deflate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Deflate,
    Bzip2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Removable,
    Fixed,
    Optical,
    LogicalVolume,
    Memory,
}

/// `media_flags` bitset, bit 0 is always set per spec.md §3.
pub mod media_flags {
    pub const IMAGE: u8 = 0x01;
    pub const PHYSICAL: u8 = 0x02;
    pub const FASTBLOC: u8 = 0x04;
    pub const TABLEAU: u8 = 0x08;
}

/// 8-bit codepage used to decode the legacy `header` section (§4.5). UTF-16
/// (`header2`) and UTF-8 (`xheader`) never consult this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codepage {
    Ascii,
    Windows874,
    Windows1250,
    Windows1251,
    Windows1252,
    Windows1253,
    Windows1254,
    Windows1255,
    Windows1256,
    Windows1257,
    Windows1258,
}

impl Codepage {
    pub fn decode(self, bytes: &[u8]) -> String {
        let encoding = match self {
            Codepage::Ascii => encoding_rs::WINDOWS_1252, // ASCII is a subset
            Codepage::Windows874 => encoding_rs::WINDOWS_874,
            Codepage::Windows1250 => encoding_rs::WINDOWS_1250,
            Codepage::Windows1251 => encoding_rs::WINDOWS_1251,
            Codepage::Windows1252 => encoding_rs::WINDOWS_1252,
            Codepage::Windows1253 => encoding_rs::WINDOWS_1253,
            Codepage::Windows1254 => encoding_rs::WINDOWS_1254,
            Codepage::Windows1255 => encoding_rs::WINDOWS_1255,
            Codepage::Windows1256 => encoding_rs::WINDOWS_1256,
            Codepage::Windows1257 => encoding_rs::WINDOWS_1257,
            Codepage::Windows1258 => encoding_rs::WINDOWS_1258,
        };
        let (cow, _, _) = encoding.decode(bytes);
        cow.into_owned()
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        let encoding = match self {
            Codepage::Ascii => encoding_rs::WINDOWS_1252,
            Codepage::Windows874 => encoding_rs::WINDOWS_874,
            Codepage::Windows1250 => encoding_rs::WINDOWS_1250,
            Codepage::Windows1251 => encoding_rs::WINDOWS_1251,
            Codepage::Windows1252 => encoding_rs::WINDOWS_1252,
            Codepage::Windows1253 => encoding_rs::WINDOWS_1253,
            Codepage::Windows1254 => encoding_rs::WINDOWS_1254,
            Codepage::Windows1255 => encoding_rs::WINDOWS_1255,
            Codepage::Windows1256 => encoding_rs::WINDOWS_1256,
            Codepage::Windows1257 => encoding_rs::WINDOWS_1257,
            Codepage::Windows1258 => encoding_rs::WINDOWS_1258,
        };
        let (bytes, _, _) = encoding.encode(text);
        bytes.into_owned()
    }
}

/// Rendering chosen for date-valued header fields on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    Ctime,
    DayMonth,
    MonthDay,
    Iso8601,
}

/// Immutable media geometry, frozen once the first chunk is written
/// (spec.md §3 "Media geometry").
#[derive(Debug, Clone, Copy)]
pub struct MediaGeometry {
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub media_size: u64,
    pub number_of_sectors: u64,
    pub error_granularity: u32,
    pub media_type: MediaType,
    pub media_flags: u8,
    pub compression_level: CompressionLevel,
    pub compression_method: CompressionMethod,
    pub format: Format,
    pub set_identifier: [u8; 16],
}

impl Default for MediaGeometry {
    fn default() -> Self {
        Self {
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            media_size: 0,
            number_of_sectors: 0,
            error_granularity: 64,
            media_type: MediaType::Fixed,
            media_flags: media_flags::IMAGE,
            compression_level: CompressionLevel::Fast,
            compression_method: CompressionMethod::Deflate,
            format: Format::Ewf,
            set_identifier: [0u8; 16],
        }
    }
}

impl MediaGeometry {
    #[inline]
    pub fn chunk_size(&self) -> u64 {
        self.sectors_per_chunk as u64 * self.bytes_per_sector as u64
    }

    /// Chunk `chunk_number` falls fully inside the media unless it is the
    /// final, possibly partial, chunk (spec.md §8 "A partial last chunk").
    pub fn chunk_byte_len(&self, chunk_number: u64) -> u64 {
        let size = self.chunk_size();
        let start = chunk_number * size;
        if start >= self.media_size {
            return 0;
        }
        size.min(self.media_size - start)
    }

    pub fn number_of_chunks(&self) -> u64 {
        if self.media_size == 0 {
            return 0;
        }
        self.media_size.div_ceil(self.chunk_size())
    }
}

/// Bump a two-digit-then-two-letter segment suffix: `01..99, aa..zz` per
/// spec.md §6. `n` is 1-based; `n == 1` yields `"01"`.
fn segment_suffix(n: u32) -> Result<String> {
    if n == 0 {
        return Err(EwfError::ValueOutOfBounds("segment number is 0".into()));
    }
    if n <= 99 {
        return Ok(format!("{:02}", n));
    }
    // n=100 -> "aa", n=101 -> "ab", ... 26*26 letter pairs after the
    // two-digit range, matching libewf's rollover scheme.
    let idx = n - 100;
    if idx >= 26 * 26 {
        return Err(EwfError::ValueExceedsMaximum(
            "segment number exceeds addressable range".into(),
        ));
    }
    let hi = (b'a' + (idx / 26) as u8) as char;
    let lo = (b'a' + (idx % 26) as u8) as char;
    Ok(format!("{hi}{lo}"))
}

/// Build the segment filename `base.<ext><suffix>` for segment `n`, e.g.
/// `image.e01`, `image.ex02`, `image.d03`.
pub fn segment_filename(base: &str, format: Format, n: u32) -> Result<String> {
    let prefix = match format.family() {
        SegmentFamily::EwfV1 => "e",
        SegmentFamily::EwfV2 => "ex",
        SegmentFamily::LogicalV1 => "l",
        SegmentFamily::LogicalV2 => "lx",
    };
    Ok(format!("{base}.{prefix}{}", segment_suffix(n)?))
}

/// Build the delta-segment filename `base.<d|dx><suffix>`.
pub fn delta_segment_filename(base: &str, format: Format, n: u32) -> Result<String> {
    let prefix = if format.is_v2() { "dx" } else { "d" };
    Ok(format!("{base}.{prefix}{}", segment_suffix(n)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_two_digit_range() {
        assert_eq!(segment_suffix(1).unwrap(), "01");
        assert_eq!(segment_suffix(99).unwrap(), "99");
    }

    #[test]
    fn suffix_rolls_into_letters() {
        assert_eq!(segment_suffix(100).unwrap(), "aa");
        assert_eq!(segment_suffix(101).unwrap(), "ab");
        assert_eq!(segment_suffix(125).unwrap(), "az");
        assert_eq!(segment_suffix(126).unwrap(), "ba");
    }

    #[test]
    fn suffix_rejects_zero() {
        assert!(segment_suffix(0).is_err());
    }

    #[test]
    fn filenames_match_family() {
        assert_eq!(segment_filename("img", Format::Ewf, 1).unwrap(), "img.e01");
        assert_eq!(
            segment_filename("img", Format::Ewf2, 2).unwrap(),
            "img.ex02"
        );
        assert_eq!(
            segment_filename("img", Format::LogicalV1, 1).unwrap(),
            "img.l01"
        );
        assert_eq!(
            segment_filename("img", Format::LogicalV2, 1).unwrap(),
            "img.lx01"
        );
        assert_eq!(
            delta_segment_filename("img", Format::Ewf, 1).unwrap(),
            "img.d01"
        );
        assert_eq!(
            delta_segment_filename("img", Format::Ewf2, 1).unwrap(),
            "img.dx01"
        );
    }

    #[test]
    fn chunk_math() {
        let mut g = MediaGeometry {
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            media_size: 64 * 512 * 2 + 100,
            ..Default::default()
        };
        assert_eq!(g.chunk_size(), 32768);
        assert_eq!(g.number_of_chunks(), 3);
        assert_eq!(g.chunk_byte_len(2), 100);
        g.media_size = 64 * 512 * 2;
        assert_eq!(g.number_of_chunks(), 2);
        assert_eq!(g.chunk_byte_len(2), 0);
    }
}
