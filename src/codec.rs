//! Per-chunk compression, checksums, and digests — pure functions over byte
//! buffers (spec.md §4.1).
//!
//! Grounded on `ewf.rs`'s use of `flate2::read::ZlibDecoder` for chunk
//! inflation, generalized to also compress, and extended with the format's
//! own modular checksum (distinct from the CRC-32 used for section
//! descriptors) and streaming digests.

use crate::error::{EwfError, Result};
use crate::format::CompressionLevel;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use sha1::Sha1;
use std::io::{Read, Write};

/// Compress `src` per `level`. `EmptyBlock` only takes the shortcut when
/// `src` is entirely zero; otherwise it behaves like `Fast` (spec.md §4.1).
pub fn compress(src: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    if level == CompressionLevel::None {
        return Ok(src.to_vec());
    }
    if level == CompressionLevel::EmptyBlock && src.iter().all(|&b| b == 0) {
        return compress_with(src, Compression::fast());
    }
    let flate_level = match level {
        CompressionLevel::Best => Compression::best(),
        _ => Compression::fast(),
    };
    compress_with(src, flate_level)
}

fn compress_with(src: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level);
    encoder
        .write_all(src)
        .map_err(|e| EwfError::CompressionFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| EwfError::CompressionFailed(e.to_string()))
}

/// Inflate `src`, never allocating more than `expected_size` bytes of
/// output (spec.md §4.1 "Decompression is bounded").
pub fn decompress(src: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(src).take(expected_size as u64 + 1);
    let mut out = Vec::with_capacity(expected_size.min(1 << 20));
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EwfError::DecompressionFailed(e.to_string()))?;
    if out.len() > expected_size {
        return Err(EwfError::DecompressionFailed(format!(
            "decompressed {} bytes, expected at most {expected_size}",
            out.len()
        )));
    }
    Ok(out)
}

/// The EWF "adler-like" modular checksum used for chunk trailing checksums
/// and section payload integrity (distinct from the CRC-32 used for section
/// *descriptors*, see [`crc32`]).
pub fn checksum32(bytes: &[u8], initial: u32) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a = initial & 0xffff;
    let mut b = (initial >> 16) & 0xffff;
    if a == 0 {
        a = 1;
    }
    for &byte in bytes {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

/// CRC-32 used to protect section descriptors (spec.md §4.1, §6).
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Streaming MD5 digest accumulator.
#[derive(Default, Clone)]
pub struct RunningMd5(Md5);

impl RunningMd5 {
    pub fn new() -> Self {
        Self(Md5::new())
    }
    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
    pub fn finalize(self) -> [u8; 16] {
        self.0.finalize().into()
    }
}

/// Streaming SHA-1 digest accumulator.
#[derive(Default, Clone)]
pub struct RunningSha1(Sha1);

impl RunningSha1 {
    pub fn new() -> Self {
        Self(Sha1::new())
    }
    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
    pub fn finalize(self) -> [u8; 20] {
        self.0.finalize().into()
    }
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
