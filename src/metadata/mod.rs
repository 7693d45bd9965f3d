//! The metadata store: header values, hash values, acquisition/checksum
//! errors, sessions, and tracks (spec.md §4.5).

pub mod events;
pub mod header;
pub mod hash;

pub use events::{EventList, SectorRange};
pub use hash::HashValues;

use crate::format::{Codepage, DateFormat};
use header::HeaderTable;

/// Recognized header identifiers (spec.md §3), kept as named constants so
/// callers don't have to remember the short tags.
pub mod header_keys {
    pub const CASE_NUMBER: &str = "case_number";
    pub const DESCRIPTION: &str = "description";
    pub const EXAMINER_NAME: &str = "examiner_name";
    pub const EVIDENCE_NUMBER: &str = "evidence_number";
    pub const NOTES: &str = "notes";
    pub const ACQUIRY_DATE: &str = "acquiry_date";
    pub const SYSTEM_DATE: &str = "system_date";
    pub const ACQUIRY_OPERATING_SYSTEM: &str = "acquiry_operating_system";
    pub const ACQUIRY_SOFTWARE_VERSION: &str = "acquiry_software_version";
    pub const PASSWORD: &str = "password";
    pub const COMPRESSION_TYPE: &str = "compression_type";
    pub const MODEL: &str = "model";
    pub const SERIAL_NUMBER: &str = "serial_number";
    pub const PROCESS_IDENTIFIER: &str = "process_identifier";
    pub const UNKNOWN_DC: &str = "unknown_dc";
    pub const EXTENTS: &str = "extents";
}

const DATE_KEYS: &[&str] = &[header_keys::ACQUIRY_DATE, header_keys::SYSTEM_DATE];

/// All of a handle's non-geometry metadata: header table, hash table, and
/// the four event lists.
#[derive(Default, Clone)]
pub struct MetadataStore {
    header: HeaderTable,
    hash: HashValues,
    pub acquisition_errors: EventList,
    pub checksum_errors: EventList,
    pub sessions: EventList,
    pub tracks: EventList,
    pub date_format: DateFormat_,
    pub header_codepage: Codepage_,
}

// Newtype wrappers so `Default` doesn't need a manual impl for the enums.
#[derive(Clone, Copy)]
pub struct DateFormat_(pub DateFormat);
impl Default for DateFormat_ {
    fn default() -> Self {
        Self(DateFormat::Iso8601)
    }
}
#[derive(Clone, Copy)]
pub struct Codepage_(pub Codepage);
impl Default for Codepage_ {
    fn default() -> Self {
        Self(Codepage::Ascii)
    }
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_value(&self, key: &str) -> Option<String> {
        if DATE_KEYS.contains(&key) {
            return self.rendered_date(key);
        }
        self.header.get(key).map(str::to_string)
    }

    pub fn set_header_value(&mut self, key: &str, value: String) {
        self.header.set(key, value);
    }

    pub fn header_keys(&self) -> Vec<String> {
        self.header.keys().map(str::to_string).collect()
    }

    pub fn number_of_header_values(&self) -> usize {
        self.header.keys().count()
    }

    fn rendered_date(&self, key: &str) -> Option<String> {
        let raw = self.header.get(key)?;
        match header::NormalizedDate::parse(raw) {
            Some(date) => Some(date.render(self.date_format.0)),
            None => Some(raw.to_string()),
        }
    }

    pub fn hash(&self) -> &HashValues {
        &self.hash
    }

    pub fn hash_mut(&mut self) -> &mut HashValues {
        &mut self.hash
    }

    /// Clear hashes — called when a random write invalidates them
    /// (spec.md §8 scenario 2).
    pub fn invalidate_hashes(&mut self) {
        self.hash = HashValues::new();
    }

    pub fn parse_xheader(&mut self, bytes: &[u8]) {
        let table = HeaderTable::parse_xheader(bytes);
        self.header.merge_from(&table);
    }

    pub fn parse_header2(&mut self, bytes: &[u8]) {
        let table = HeaderTable::parse_header2(bytes);
        self.header.merge_from(&table);
    }

    pub fn parse_header(&mut self, bytes: &[u8], codepage: Codepage) {
        let table = HeaderTable::parse_header(bytes, codepage);
        self.header.merge_from(&table);
    }

    pub fn encode_xheader(&self) -> Vec<u8> {
        self.header.encode_xheader()
    }

    pub fn encode_header2(&self) -> Vec<u8> {
        self.header.encode_header2()
    }

    pub fn encode_header(&self, codepage: Codepage) -> Vec<u8> {
        self.header.encode_header(codepage)
    }

    /// Copy every header value from `src` into `self` (spec.md §6
    /// `copy_header_values`, §8 "left-identity" law).
    pub fn copy_header_values_from(&mut self, src: &MetadataStore) {
        for key in src.header.keys() {
            self.header.set(key, src.header.get(key).unwrap().to_string());
        }
    }
}
