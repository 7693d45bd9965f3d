//! Hash-value table: `xhash` (UTF-8 table), `hash` (legacy 16-byte MD5
//! block), and `digest` (MD5 + SHA-1 block) — spec.md §4.5.

use crate::codec::{checksum32, hex_encode};
use crate::error::{EwfError, Result};
use log::error;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct HashValues {
    /// Well-known and custom identifier -> ASCII-hex digest.
    entries: BTreeMap<String, String>,
}

impl HashValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn md5(&self) -> Option<&str> {
        self.get("MD5")
    }

    pub fn sha1(&self) -> Option<&str> {
        self.get("SHA1")
    }

    pub fn set_md5(&mut self, digest: [u8; 16]) {
        self.set("MD5", hex_encode(&digest));
    }

    pub fn set_sha1(&mut self, digest: [u8; 20]) {
        self.set("SHA1", hex_encode(&digest));
    }

    /// `xhash` is a small UTF-8 tab table, same two-line shape as the
    /// header sections.
    pub fn parse_xhash(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let lines: Vec<&str> = text.split(['\r', '\n']).filter(|l| !l.is_empty()).collect();
        let mut out = Self::new();
        for i in 0..lines.len().saturating_sub(1) {
            if lines[i].contains('\t') && lines[i + 1].contains('\t') {
                let cols: Vec<&str> = lines[i].split('\t').collect();
                let vals: Vec<&str> = lines[i + 1].split('\t').collect();
                for (c, v) in cols.iter().zip(vals.iter()) {
                    out.set(c, v.to_string());
                }
                break;
            }
        }
        out
    }

    pub fn encode_xhash(&self) -> Vec<u8> {
        let cols: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        let vals: Vec<&str> = self.entries.values().map(|s| s.as_str()).collect();
        format!("{}\n{}\n", cols.join("\t"), vals.join("\t")).into_bytes()
    }

    /// Legacy `hash` section: 16 raw MD5 bytes followed by a checksum.
    pub fn parse_hash_section(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 20 {
            error!("hash section too short ({} bytes)", bytes.len());
            return Err(EwfError::SegmentCorrupt("hash section too short".into()));
        }
        let stored = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        let computed = checksum32(&bytes[..16], 1);
        if stored != computed {
            return Err(EwfError::ChecksumMismatch("hash section checksum mismatch".into()));
        }
        let mut out = Self::new();
        out.set_md5(bytes[0..16].try_into().unwrap());
        Ok(out)
    }

    pub fn encode_hash_section(&self) -> Result<Vec<u8>> {
        let digest = self
            .md5_bytes()
            .ok_or_else(|| EwfError::ValueMissing("MD5 hash not set".into()))?;
        let mut out = digest.to_vec();
        let checksum = checksum32(&digest, 1);
        out.extend_from_slice(&checksum.to_le_bytes());
        Ok(out)
    }

    /// `digest` section: MD5 then SHA-1 raw bytes, then a checksum.
    pub fn parse_digest_section(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 40 {
            error!("digest section too short ({} bytes)", bytes.len());
            return Err(EwfError::SegmentCorrupt("digest section too short".into()));
        }
        let stored = u32::from_le_bytes(bytes[36..40].try_into().unwrap());
        let computed = checksum32(&bytes[..36], 1);
        if stored != computed {
            return Err(EwfError::ChecksumMismatch("digest section checksum mismatch".into()));
        }
        let mut out = Self::new();
        out.set_md5(bytes[0..16].try_into().unwrap());
        out.set_sha1(bytes[16..36].try_into().unwrap());
        Ok(out)
    }

    pub fn encode_digest_section(&self) -> Result<Vec<u8>> {
        let md5 = self
            .md5_bytes()
            .ok_or_else(|| EwfError::ValueMissing("MD5 hash not set".into()))?;
        let sha1 = self
            .sha1_bytes()
            .ok_or_else(|| EwfError::ValueMissing("SHA1 hash not set".into()))?;
        let mut out = Vec::with_capacity(40);
        out.extend_from_slice(&md5);
        out.extend_from_slice(&sha1);
        let checksum = checksum32(&out, 1);
        out.extend_from_slice(&checksum.to_le_bytes());
        Ok(out)
    }

    fn md5_bytes(&self) -> Option<[u8; 16]> {
        decode_hex(self.get("MD5")?)
    }

    fn sha1_bytes(&self) -> Option<[u8; 20]> {
        decode_hex(self.get("SHA1")?)
    }
}

fn decode_hex<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 {
        return None;
    }
    let mut out = [0u8; N];
    for i in 0..N {
        out[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_section_roundtrip() {
        let mut hv = HashValues::new();
        hv.set_md5([0xAB; 16]);
        let encoded = hv.encode_hash_section().unwrap();
        let parsed = HashValues::parse_hash_section(&encoded).unwrap();
        assert_eq!(parsed.md5(), hv.md5());
    }

    #[test]
    fn digest_section_roundtrip() {
        let mut hv = HashValues::new();
        hv.set_md5([0x11; 16]);
        hv.set_sha1([0x22; 20]);
        let encoded = hv.encode_digest_section().unwrap();
        let parsed = HashValues::parse_digest_section(&encoded).unwrap();
        assert_eq!(parsed.md5(), hv.md5());
        assert_eq!(parsed.sha1(), hv.sha1());
    }

    #[test]
    fn xhash_roundtrip() {
        let mut hv = HashValues::new();
        hv.set("MD5".into(), "a".repeat(32));
        let encoded = hv.encode_xhash();
        let parsed = HashValues::parse_xhash(&encoded);
        assert_eq!(parsed.md5(), Some("a".repeat(32)).as_deref());
    }

    #[test]
    fn hash_section_detects_corruption() {
        let mut hv = HashValues::new();
        hv.set_md5([0x01; 16]);
        let mut encoded = hv.encode_hash_section().unwrap();
        encoded[0] ^= 0xFF;
        assert!(HashValues::parse_hash_section(&encoded).is_err());
    }
}
