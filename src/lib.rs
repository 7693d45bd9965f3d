//! Read and write Expert Witness Compression Format (EWF/E01) and logical
//! (LEF) forensic disk images: a segmented, checksummed container format
//! presented as one flat, seekable medium.
//!
//! The public surface is [`Handle`], a state-machine wrapper around the
//! [`media`] engine. Open a handle for reading with [`Handle::open_read`]
//! (or [`Handle::discover_segments`] + `open_read` to find sibling
//! segments yourself), or for writing with [`Handle::create`].

pub mod cache;
pub mod chunk_index;
pub mod codec;
pub mod error;
pub mod format;
pub mod media;
pub mod metadata;
pub mod pool;
pub mod segment;
pub mod volume;

pub use error::{EwfError, Result};
pub use format::{
    media_flags, Codepage, CompressionLevel, CompressionMethod, DateFormat, Format, MediaGeometry,
    MediaType,
};
pub use media::{HandleState, Whence};
pub use metadata::{header_keys, EventList, HashValues, SectorRange};

use log::info;
use media::MediaEngine;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// An open EWF/LEF image: the handle lifecycle spec describes, from
/// `Empty` through `Reading`/`WritingStream` to `Closed`.
pub struct Handle {
    engine: MediaEngine,
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl Handle {
    pub fn new() -> Self {
        Self {
            engine: MediaEngine::new(),
        }
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Find every segment sibling to `first_segment` by globbing its
    /// directory for the same base name with any extension in the
    /// `e??`/`ex??`/`l??`/`lx??`/`d??`/`dx??` families, sorted the way
    /// libewf orders them (numeric suffixes, then the `aa..zz` rollover).
    ///
    /// `first_segment` need not be segment 1 — any segment file for the
    /// image will do, since the base name is shared.
    pub fn discover_segments(first_segment: &Path) -> Result<Vec<PathBuf>> {
        let base = first_segment
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EwfError::InvalidArgument("segment path has no stem".into()))?;
        let dir = first_segment.parent().unwrap_or_else(|| Path::new("."));
        let pattern = dir.join(format!("{base}.*"));
        let pattern_str = pattern
            .to_str()
            .ok_or_else(|| EwfError::InvalidArgument("non-UTF-8 path".into()))?;

        let mut found: Vec<PathBuf> = glob::glob(pattern_str)
            .map_err(|e| EwfError::InvalidArgument(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .filter(|path| is_primary_segment_extension(path))
            .collect();
        found.sort_by_key(|p| segment_sort_key(p));

        if found.is_empty() {
            return Err(EwfError::NotFound(format!(
                "no segment files found for {}",
                first_segment.display()
            )));
        }
        Ok(found)
    }

    /// Open every segment in `paths` (in the order discovery produced
    /// them) as a read-only image.
    pub fn open_read(paths: Vec<PathBuf>) -> Result<Self> {
        let mut handle = Self::new();
        handle.engine.open_read(paths)?;
        info!("opened {} segment(s) for reading", handle.engine.chunk_count());
        Ok(handle)
    }

    /// Begin a fresh acquisition: writes go to `base_path`'s segment
    /// family (`base_path.e01`, `.e02`, ... on rollover). `geometry` must
    /// be set before the first byte is written; it is frozen afterward.
    pub fn create(base_path: PathBuf, geometry: MediaGeometry) -> Result<Self> {
        let mut handle = Self::new();
        handle.engine.configure(geometry)?;
        handle.engine.open_write(base_path)?;
        Ok(handle)
    }

    /// Allow random writes against a read-only open, routing them to a
    /// delta segment named from `base_path` instead of mutating the
    /// original segments.
    pub fn attach_delta(&mut self, base_path: PathBuf) -> Result<()> {
        self.engine.set_delta_base_path(base_path);
        self.engine.enable_delta_writes()
    }

    pub fn state(&self) -> HandleState {
        self.engine.state()
    }

    // ------------------------------------------------------------------
    // Positioning and bulk I/O
    // ------------------------------------------------------------------

    pub fn seek_to(&mut self, pos: i64, whence: Whence) -> Result<u64> {
        self.engine.seek(pos, whence)
    }

    pub fn position(&self) -> u64 {
        self.engine.position()
    }

    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.engine.read_at(buf, offset)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.engine.write(buf)
    }

    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.engine.write_at(buf, offset)
    }

    /// Commit the trailing partial chunk and the final segment's
    /// metadata sections. Required once, at the end of a streaming
    /// acquisition, before the handle is usable for random reads.
    pub fn write_finalize(&mut self) -> Result<()> {
        self.engine.write_finalize()
    }

    /// Obtain a token that, when set, causes the next in-flight
    /// `write`/`write_finalize` call to abort and leave the image
    /// truncated to its last fully committed chunk.
    pub fn abort_token(&self) -> Arc<AtomicBool> {
        self.engine.signal_abort()
    }

    pub fn close(&mut self) -> Result<()> {
        self.engine.close()
    }

    // ------------------------------------------------------------------
    // Geometry / format
    // ------------------------------------------------------------------

    pub fn geometry(&self) -> &MediaGeometry {
        &self.engine.geometry
    }

    pub fn media_size(&self) -> u64 {
        self.engine.geometry.media_size
    }

    pub fn chunk_count(&self) -> u64 {
        self.engine.chunk_count()
    }

    pub fn format(&self) -> Format {
        self.engine.geometry.format
    }

    pub fn segment_filename(&self, n: u32) -> Result<String> {
        let base_path = self
            .engine
            .base_path()
            .ok_or_else(|| EwfError::InvalidState("no base path set".into()))?;
        let base = base_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EwfError::InvalidArgument("invalid base path".into()))?;
        format::segment_filename(base, self.engine.geometry.format, n)
    }

    pub fn set_cache_capacity(&mut self, capacity: usize) {
        self.engine.set_cache_capacity(capacity);
    }

    pub fn set_max_open_segments(&mut self, max_open: usize) {
        self.engine.set_max_open_segments(max_open);
    }

    /// When `true`, a checksum-mismatched chunk is returned zero-filled
    /// instead of surfacing [`EwfError::ChunkCorrupt`] (spec.md §7
    /// "error granularity").
    pub fn set_zero_fill_on_error(&mut self, zero_fill: bool) {
        self.engine.zero_on_error_chunk = zero_fill;
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn header_value(&self, key: &str) -> Option<String> {
        self.engine.metadata.header_value(key)
    }

    pub fn set_header_value(&mut self, key: &str, value: String) {
        self.engine.metadata.set_header_value(key, value);
    }

    pub fn header_keys(&self) -> Vec<String> {
        self.engine.metadata.header_keys()
    }

    /// Copy every header value from `src` into this handle (spec.md §6
    /// `copy_header_values`).
    pub fn copy_header_values(&mut self, src: &Handle) {
        let other = src.engine.metadata.clone();
        self.engine.metadata.copy_header_values_from(&other);
    }

    pub fn hash_values(&self) -> &HashValues {
        self.engine.metadata.hash()
    }

    pub fn acquisition_errors(&self) -> &EventList {
        &self.engine.metadata.acquisition_errors
    }

    pub fn checksum_errors(&self) -> &EventList {
        &self.engine.metadata.checksum_errors
    }

    pub fn sessions(&self) -> &EventList {
        &self.engine.metadata.sessions
    }

    pub fn tracks(&self) -> &EventList {
        &self.engine.metadata.tracks
    }
}

impl io::Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.engine.position();
        let n = self
            .engine
            .read_at(buf, pos)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.engine.seek(n as i64, Whence::Current).ok();
        Ok(n)
    }
}

impl io::Seek for Handle {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (whence, offset) = match pos {
            io::SeekFrom::Start(n) => (Whence::Set, n as i64),
            io::SeekFrom::Current(n) => (Whence::Current, n),
            io::SeekFrom::End(n) => (Whence::End, n),
        };
        self.engine
            .seek(offset, whence)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

fn is_primary_segment_extension(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let lower = ext.to_ascii_lowercase();
    let prefix: String = lower.chars().take_while(|c| c.is_alphabetic()).collect();
    matches!(prefix.as_str(), "e" | "ex" | "l" | "lx" | "d" | "dx")
}

fn segment_sort_key(path: &Path) -> (String, u32) {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let prefix: String = ext.chars().take_while(|c| c.is_alphabetic()).collect();
    let suffix = &ext[prefix.len()..];
    let ordinal = suffix
        .parse::<u32>()
        .unwrap_or_else(|_| suffix_to_ordinal(suffix));
    (prefix, ordinal)
}

/// Two-letter rollover suffixes (`aa`, `ab`, ...) sort after all two-digit
/// ones; map them to `100 + offset` so a plain numeric sort works.
fn suffix_to_ordinal(suffix: &str) -> u32 {
    let mut chars = suffix.chars();
    match (chars.next(), chars.next()) {
        (Some(hi), Some(lo)) if hi.is_ascii_lowercase() && lo.is_ascii_lowercase() => {
            100 + (hi as u32 - 'a' as u32) * 26 + (lo as u32 - 'a' as u32)
        }
        _ => u32::MAX,
    }
}
