//! The media stream engine: the control center that binds the chunk cache,
//! chunk index, segment pool, and write planner into one flat,
//! byte-addressable medium (spec.md §4.4).
//!
//! Grounded on `ewf.rs`'s `EWF::ewf_read`/`ewf_seek`/`read_chunk`, which
//! only supported read-only, single-pass-built images. This generalizes
//! that control flow to read+write, adds the write planner (segment
//! rollover, delta overlays) and the abort/state machine spec.md §4.4
//! requires.

use crate::cache::ChunkCache;
use crate::chunk_index::{decode_table_v1, decode_table_v2, encode_table_v1, encode_table_v2, ChunkDescriptor, ChunkIndex};
use crate::codec::{self, RunningMd5, RunningSha1};
use crate::error::{EwfError, Result};
use crate::format::{CompressionLevel, MediaGeometry};
use crate::metadata::events::{SectorRange, ERROR2_PADDING, SESSION_PADDING};
use crate::metadata::MetadataStore;
use crate::pool::SegmentPool;
use crate::segment::SegmentWriter;
use crate::volume::{decode_volume, encode_volume};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-handle lifecycle state (spec.md §4.4 "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Empty,
    Reading,
    ReadingWithDelta,
    WritingStream,
    WritingClosed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

struct WritePlan {
    current_segment_number: u32,
    max_segment_size: u64,
    max_chunks_per_segment: u64,
    chunks_in_segment: u64,
    sectors_buffer: Vec<u8>,
    /// `(compressed, offset-within-sectors_buffer, stored_size)` per chunk
    /// committed to the current segment but not yet flushed to disk.
    table_entries: Vec<(bool, u64, u64)>,
    number_of_chunks_written: u64,
    partial_chunk: Vec<u8>,
    running_md5: RunningMd5,
    running_sha1: RunningSha1,
    streaming_total_bytes: u64,
}

impl WritePlan {
    fn new(max_segment_size: u64, max_chunks_per_segment: u64) -> Self {
        Self {
            current_segment_number: 1,
            max_segment_size,
            max_chunks_per_segment,
            chunks_in_segment: 0,
            sectors_buffer: Vec::new(),
            table_entries: Vec::new(),
            number_of_chunks_written: 0,
            partial_chunk: Vec::new(),
            running_md5: RunningMd5::new(),
            running_sha1: RunningSha1::new(),
            streaming_total_bytes: 0,
        }
    }
}

/// Derive `max_chunks_per_segment` from a byte budget and a chunk's
/// worst-case stored size (spec.md §3 "Write plan state").
fn max_chunks_for_budget(max_segment_size: u64, chunk_size: u64) -> u64 {
    (max_segment_size / chunk_size.max(1)).max(1)
}

/// The segmented container engine: one open image, read or read+write.
pub struct MediaEngine {
    state: HandleState,
    pub geometry: MediaGeometry,
    pub metadata: MetadataStore,
    chunk_index: ChunkIndex,
    cache: ChunkCache,
    pool: Option<SegmentPool>,
    position: u64,
    write_plan: Option<WritePlan>,
    writer: Option<SegmentWriter>,
    delta_writer: Option<SegmentWriter>,
    base_path: Option<PathBuf>,
    delta_writer_index: Option<usize>,
    pub zero_on_error_chunk: bool,
    abort_flag: Arc<AtomicBool>,
    max_open_segments: usize,
}

impl Default for MediaEngine {
    fn default() -> Self {
        Self {
            state: HandleState::Empty,
            geometry: MediaGeometry::default(),
            metadata: MetadataStore::default(),
            chunk_index: ChunkIndex::new(),
            cache: ChunkCache::new(1),
            pool: None,
            position: 0,
            write_plan: None,
            writer: None,
            delta_writer: None,
            base_path: None,
            delta_writer_index: None,
            zero_on_error_chunk: false,
            abort_flag: Arc::new(AtomicBool::new(false)),
            max_open_segments: 64,
        }
    }
}

impl MediaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Allow random writes against an image opened read-only, routing
    /// them to a delta segment instead of mutating the original (spec.md
    /// §4.4 "ReadingWithDelta").
    pub fn enable_delta_writes(&mut self) -> Result<()> {
        self.require_state(&[HandleState::Reading], "enable delta writes")?;
        self.state = HandleState::ReadingWithDelta;
        Ok(())
    }

    pub fn set_cache_capacity(&mut self, capacity: usize) {
        self.cache = ChunkCache::new(capacity);
    }

    pub fn set_max_open_segments(&mut self, max_open: usize) {
        self.max_open_segments = max_open.max(1);
    }

    /// Base filename delta segments are named from (`<base>.d01`, ...).
    /// Required before the first `write_at` against a read-only open.
    pub fn set_delta_base_path(&mut self, base_path: PathBuf) {
        self.base_path = Some(base_path);
    }

    pub fn signal_abort(&self) -> Arc<AtomicBool> {
        self.abort_flag.clone()
    }

    fn require_state(&self, allowed: &[HandleState], what: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EwfError::InvalidState(format!(
                "{what} is invalid in state {:?}",
                self.state
            )))
        }
    }

    // ------------------------------------------------------------------
    // Open for read
    // ------------------------------------------------------------------

    /// Open a read-only handle over every segment belonging to `paths`
    /// (caller-discovered, in segment order; spec.md §4.3 "Build").
    pub fn open_read(&mut self, paths: Vec<PathBuf>) -> Result<()> {
        self.require_state(&[HandleState::Empty], "open")?;
        if paths.is_empty() {
            return Err(EwfError::InvalidArgument("no segment files given".into()));
        }
        let mut pool = SegmentPool::new(paths, self.max_open_segments);

        // Header-family sections are a priority, not a merge (spec.md
        // §4.5: "first available of xheader, header2, header"). Stash the
        // bytes for whichever dialects are seen and apply only the
        // highest-priority one once every segment has been walked, so a
        // lower-priority section appearing later on disk never overrides
        // one found earlier.
        let mut xheader_payload: Option<Vec<u8>> = None;
        let mut header2_payload: Option<Vec<u8>> = None;
        let mut header_payload: Option<Vec<u8>> = None;
        let mut case_data_payload: Option<Vec<u8>> = None;

        for index in 0..pool.segment_count() {
            let segment_number = index as u32 + 1;
            let (sections, detected_format): (Vec<_>, _) = {
                let reader = pool.get(index)?;
                (reader.sections.clone(), reader.format)
            };
            for section in &sections {
                let reader = pool.get(index)?;
                match section.section_type.as_str() {
                    "header" => {
                        header_payload = Some(reader.read_payload(section)?);
                    }
                    "header2" => {
                        header2_payload = Some(reader.read_payload(section)?);
                    }
                    "xheader" => {
                        xheader_payload = Some(reader.read_payload(section)?);
                    }
                    "case_data" => {
                        case_data_payload = Some(reader.read_payload(section)?);
                    }
                    "xhash" => {
                        let payload = reader.read_payload(section)?;
                        let hv = crate::metadata::HashValues::parse_xhash(&payload);
                        for key in ["MD5", "SHA1"] {
                            if let Some(v) = hv.get(key) {
                                self.metadata.hash_mut().set(key, v.to_string());
                            }
                        }
                    }
                    "hash" => {
                        let payload = reader.read_payload(section)?;
                        match crate::metadata::HashValues::parse_hash_section(&payload) {
                            Ok(hv) => {
                                if let Some(md5) = hv.md5() {
                                    self.metadata.hash_mut().set("MD5", md5.to_string());
                                }
                            }
                            Err(e) => warn!("hash section demoted to warning: {e}"),
                        }
                    }
                    "digest" => {
                        let payload = reader.read_payload(section)?;
                        match crate::metadata::HashValues::parse_digest_section(&payload) {
                            Ok(hv) => {
                                if let Some(md5) = hv.md5() {
                                    self.metadata.hash_mut().set("MD5", md5.to_string());
                                }
                                if let Some(sha1) = hv.sha1() {
                                    self.metadata.hash_mut().set("SHA1", sha1.to_string());
                                }
                            }
                            Err(e) => warn!("digest section demoted to warning: {e}"),
                        }
                    }
                    "volume" | "disk" | "disk_device" => {
                        let payload = reader.read_payload(section)?;
                        self.geometry = decode_volume(&payload)?;
                        // `decode_volume` cannot know the dialect; it was
                        // already determined from the segment's signature.
                        self.geometry.format = detected_format;
                    }
                    "table" => {
                        let payload = reader.read_payload(section)?;
                        if let Err(e) = self.ingest_table(&payload, segment_number, section.payload_offset) {
                            warn!("table section rejected ({e}), falling back to table2");
                            let table2 = sections.iter().find(|s| s.section_type == "table2").cloned();
                            match table2 {
                                Some(fallback) => {
                                    let reader = pool.get(index)?;
                                    let fallback_payload = reader.read_payload(&fallback)?;
                                    self.ingest_table(&fallback_payload, segment_number, fallback.payload_offset)?;
                                }
                                None => return Err(e),
                            }
                        }
                    }
                    "error2" => {
                        let payload = reader.read_payload(section)?;
                        match crate::metadata::EventList::decode(&payload, ERROR2_PADDING) {
                            Ok(list) => self.metadata.acquisition_errors = list,
                            Err(e) => warn!("error2 section demoted to warning: {e}"),
                        }
                    }
                    "session" => {
                        let payload = reader.read_payload(section)?;
                        match crate::metadata::EventList::decode(&payload, SESSION_PADDING) {
                            Ok(list) => self.metadata.sessions = list,
                            Err(e) => warn!("session section demoted to warning: {e}"),
                        }
                    }
                    "table2" => {
                        // Only consulted by the "table" arm above, which
                        // retries against this segment's table2 on failure.
                    }
                    _ => {}
                }
            }
            info!(
                "opened segment {segment_number} ({} sections)",
                sections.len()
            );
        }

        if let Some(payload) = xheader_payload {
            self.metadata.parse_xheader(&payload);
        } else if let Some(payload) = header2_payload {
            self.metadata.parse_header2(&payload);
        } else if let Some(payload) = header_payload {
            self.metadata.parse_header(&payload, crate::format::Codepage::Ascii);
        } else if let Some(payload) = case_data_payload {
            // `case_data` carries the same UTF-8 tab-table shape as
            // `xheader` (spec.md §4.2: v2 "volume/disk information is
            // carried as disk_device and case_data").
            self.metadata.parse_xheader(&payload);
        }

        self.pool = Some(pool);
        self.state = HandleState::Reading;
        Ok(())
    }

    /// Build chunk-index entries from a `table`/`table2` section payload.
    /// The caller retries against the sibling section on failure (spec.md
    /// §4.3 "prefer table, fall back to table2 on checksum failure").
    fn ingest_table(&mut self, payload: &[u8], segment_number: u32, _section_payload_offset: u64) -> Result<()> {
        let decoded = if self.geometry.format.is_v2() {
            decode_table_v2(payload)
        } else {
            decode_table_v1(payload)
        }?;

        let chunk_size = self.geometry.chunk_size().max(1);
        for (idx, (compressed, offset)) in decoded.entries.iter().enumerate() {
            let chunk_number = self.chunk_index.len();
            let is_last_in_table = idx + 1 == decoded.entries.len();
            let stored_size = if is_last_in_table || *compressed {
                // Exact size is only knowable by re-deriving the next
                // entry's offset or the end of the `sectors` section; this
                // engine resolves it lazily at read time by reading up to
                // the declared chunk size plus checksum headroom.
                chunk_size + 4
            } else {
                decoded.entries[idx + 1].1 - offset
            };
            self.chunk_index.push(ChunkDescriptor {
                segment_ref: segment_number,
                file_offset: *offset,
                stored_size,
                compressed: *compressed,
                has_trailing_checksum: !*compressed,
                is_delta: false,
                is_sparse: false,
            });
            debug!("indexed chunk {chunk_number} in segment {segment_number}");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.require_state(
            &[HandleState::Reading, HandleState::ReadingWithDelta, HandleState::WritingClosed],
            "read",
        )?;
        let mut total = 0usize;
        let mut pos = offset;
        let media_size = self.geometry.media_size;

        while total < buf.len() && pos < media_size {
            let chunk_size = self.geometry.chunk_size();
            let chunk_number = pos / chunk_size;
            let intra = (pos % chunk_size) as usize;
            let chunk_len = self.geometry.chunk_byte_len(chunk_number) as usize;

            if !self.cache.contains(chunk_number) {
                let data = self.load_chunk(chunk_number)?;
                self.cache.insert(chunk_number, data)?;
            }
            let data = self.cache.get(chunk_number).expect("just inserted");
            let avail = chunk_len.saturating_sub(intra);
            if avail == 0 {
                break;
            }
            let n = avail.min(buf.len() - total);
            buf[total..total + n].copy_from_slice(&data[intra..intra + n]);
            total += n;
            pos += n as u64;
        }

        self.position = offset + total as u64;
        Ok(total)
    }

    fn load_chunk(&mut self, chunk_number: u64) -> Result<Vec<u8>> {
        let descriptor = *self
            .chunk_index
            .get(chunk_number)
            .ok_or_else(|| EwfError::ValueOutOfBounds(format!("chunk {chunk_number} not indexed")))?;
        let chunk_len = self.geometry.chunk_byte_len(chunk_number) as usize;

        let result = self.load_from_descriptor(&descriptor, chunk_number, chunk_len);
        match result {
            Ok(data) => Ok(data),
            Err(e) if descriptor.is_delta => {
                // Delta became unreadable: fall back to the original entry
                // (spec.md §4.3 "retained for read-only fallback").
                warn!("delta chunk {chunk_number} unreadable ({e}), falling back to original");
                let original = *self.chunk_index.original(chunk_number).ok_or_else(|| {
                    error!("chunk {chunk_number} has no fallback after delta became unreadable");
                    EwfError::ChunkCorrupt(format!("chunk {chunk_number} has no fallback"))
                })?;
                self.load_from_descriptor(&original, chunk_number, chunk_len)
            }
            Err(e) => Err(e),
        }
    }

    fn load_from_descriptor(
        &mut self,
        descriptor: &ChunkDescriptor,
        chunk_number: u64,
        chunk_len: usize,
    ) -> Result<Vec<u8>> {
        let pool = self
            .pool
            .as_mut()
            .ok_or_else(|| EwfError::InvalidState("no segment pool attached".into()))?;
        let reader = pool.get((descriptor.segment_ref - 1) as usize)?;
        let read_len = descriptor.stored_size as usize;
        let raw = reader.read_at(descriptor.file_offset, read_len.min(isize::MAX as usize))?;

        let (payload, checksum_ok) = if descriptor.has_trailing_checksum {
            self.split_and_verify_checksum(&raw, chunk_len)?
        } else {
            (raw, true)
        };

        if !checksum_ok {
            let sectors_per_chunk = self.geometry.sectors_per_chunk as u64;
            self.metadata.checksum_errors.append(SectorRange {
                start_sector: chunk_number * sectors_per_chunk,
                number_of_sectors: sectors_per_chunk,
            });
            if self.zero_on_error_chunk {
                warn!("checksum mismatch on chunk, zero-filling ({chunk_len} bytes)");
                return Ok(vec![0u8; chunk_len]);
            }
            error!("chunk {chunk_number} trailing checksum mismatch");
            return Err(EwfError::ChunkCorrupt("trailing checksum mismatch".into()));
        }

        if descriptor.compressed {
            codec::decompress(&payload, chunk_len)
        } else {
            let mut data = payload;
            data.truncate(chunk_len);
            Ok(data)
        }
    }

    /// For uncompressed chunks whose stored size was only a conservative
    /// upper bound (see `ingest_table`), find the real boundary by
    /// trusting `chunk_len` and re-slicing; the checksum directly follows
    /// `chunk_len` bytes of payload.
    fn split_and_verify_checksum(&self, raw: &[u8], chunk_len: usize) -> Result<(Vec<u8>, bool)> {
        if raw.len() < chunk_len + 4 {
            error!("chunk shorter than declared size: got {} bytes, need {}", raw.len(), chunk_len + 4);
            return Err(EwfError::ChunkCorrupt("chunk shorter than declared size".into()));
        }
        let data = &raw[..chunk_len];
        let stored = u32::from_le_bytes(raw[chunk_len..chunk_len + 4].try_into().unwrap());
        let computed = codec::checksum32(data, 1);
        Ok((data.to_vec(), stored == computed))
    }

    // ------------------------------------------------------------------
    // Seek
    // ------------------------------------------------------------------

    pub fn seek(&mut self, pos: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Current => self.position as i64,
            Whence::End => self.geometry.media_size as i64,
        };
        let new_pos = base.checked_add(pos).ok_or_else(|| {
            EwfError::ValueOutOfBounds("seek overflow".into())
        })?;
        if new_pos < 0 {
            return Err(EwfError::ValueOutOfBounds("seek before start of image".into()));
        }
        let new_pos = new_pos as u64;
        let clamped = if matches!(self.state, HandleState::WritingStream) {
            new_pos
        } else {
            new_pos.min(self.geometry.media_size)
        };
        self.position = clamped;
        Ok(clamped)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    // ------------------------------------------------------------------
    // Write — lazy init & streaming
    // ------------------------------------------------------------------

    /// Configure geometry/format before the first write. Mutating
    /// configuration after `open`/the first write is always rejected with
    /// `InvalidState` (spec.md §9 Open Question: "normalize to always
    /// error").
    pub fn configure(&mut self, geometry: MediaGeometry) -> Result<()> {
        self.require_state(&[HandleState::Empty], "configure")?;
        self.geometry = geometry;
        Ok(())
    }

    pub fn open_write(&mut self, base_path: PathBuf) -> Result<()> {
        self.require_state(&[HandleState::Empty], "open for write")?;
        self.base_path = Some(base_path);
        self.state = HandleState::WritingStream;
        Ok(())
    }

    fn ensure_write_started(&mut self) -> Result<()> {
        if self.write_plan.is_some() {
            return Ok(());
        }
        let base_path = self
            .base_path
            .clone()
            .ok_or_else(|| EwfError::InvalidState("write not opened".into()))?;
        let max_segment_size: u64 = 1 << 30; // 1 GiB default ceiling
        let chunk_size = self.geometry.chunk_size();
        let max_chunks = max_chunks_for_budget(max_segment_size, chunk_size);
        self.write_plan = Some(WritePlan::new(max_segment_size, max_chunks));

        let base_str = base_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EwfError::InvalidArgument("invalid base path".into()))?
            .to_string();
        let dir = base_path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let name = crate::format::segment_filename(&base_str, self.geometry.format, 1)?;
        let path = dir.join(name);
        // the writer owns the live file handle while streaming; the pool's
        // entry is used for reads (random writes against WritingClosed)
        // once this segment is closed.
        self.pool = Some(SegmentPool::new(vec![path.clone()], self.max_open_segments));

        let mut writer = SegmentWriter::create(&path, self.geometry.format, 1, self.geometry.set_identifier)?;
        if self.geometry.format.is_v2() {
            // v2 carries volume/disk information as `disk_device`/
            // `case_data`, backfilled once at `write_finalize` (spec.md
            // §4.4 "case_data/disk_device backfill"), not written here.
        } else {
            if !self.geometry.format.is_logical() {
                writer.write_section("header", &self.metadata.encode_header(crate::format::Codepage::Ascii))?;
            }
            writer.write_section("volume", &encode_volume(&self.geometry))?;
        }
        self.writer = Some(writer);
        info!("opened segment 1 for writing at {}", path.display());
        Ok(())
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.require_state(&[HandleState::WritingStream], "streaming write")?;
        self.ensure_write_started()?;

        let chunk_size = self.geometry.chunk_size() as usize;
        self.write_plan.as_mut().unwrap().partial_chunk.extend_from_slice(buf);

        loop {
            if self.abort_flag.load(Ordering::SeqCst) {
                self.handle_abort()?;
                return Err(EwfError::Aborted);
            }
            let full = self.write_plan.as_ref().unwrap().partial_chunk.len() >= chunk_size;
            if !full {
                break;
            }
            let chunk: Vec<u8> = self
                .write_plan
                .as_mut()
                .unwrap()
                .partial_chunk
                .drain(..chunk_size)
                .collect();
            self.commit_chunk(chunk)?;
        }
        Ok(buf.len())
    }

    fn commit_chunk(&mut self, raw_chunk: Vec<u8>) -> Result<()> {
        {
            let plan = self.write_plan.as_mut().unwrap();
            plan.running_md5.update(&raw_chunk);
            plan.running_sha1.update(&raw_chunk);
            plan.streaming_total_bytes += raw_chunk.len() as u64;
        }

        let level = self.geometry.compression_level;
        let compressed_bytes = if level != CompressionLevel::None {
            Some(codec::compress(&raw_chunk, level)?)
        } else {
            None
        };

        let (store_compressed, payload) = match &compressed_bytes {
            Some(c) if c.len() < raw_chunk.len() => (true, c.clone()),
            _ => {
                let mut data = raw_chunk.clone();
                let checksum = codec::checksum32(&raw_chunk, 1);
                data.extend_from_slice(&checksum.to_le_bytes());
                (false, data)
            }
        };

        let plan = self.write_plan.as_mut().unwrap();
        let local_offset = plan.sectors_buffer.len() as u64;
        let stored_size = payload.len() as u64;
        plan.sectors_buffer.extend_from_slice(&payload);
        plan.table_entries.push((store_compressed, local_offset, stored_size));
        plan.chunks_in_segment += 1;
        plan.number_of_chunks_written += 1;

        let exceeded_bytes = plan.sectors_buffer.len() as u64 > plan.max_segment_size;
        let exceeded_chunks = plan.chunks_in_segment >= plan.max_chunks_per_segment;
        if exceeded_bytes || exceeded_chunks {
            self.roll_segment()?;
        }
        Ok(())
    }

    fn flush_current_segment(&mut self, is_last: bool) -> Result<()> {
        let (sectors_buffer, table_entries, segment_number) = {
            let plan = self.write_plan.as_ref().unwrap();
            (
                plan.sectors_buffer.clone(),
                plan.table_entries.clone(),
                plan.current_segment_number,
            )
        };

        let writer = self.writer.as_mut().unwrap();
        if !sectors_buffer.is_empty() {
            let (_, payload_offset) = writer.write_section("sectors", &sectors_buffer)?;
            let abs_entries: Vec<(bool, u64)> = table_entries
                .iter()
                .map(|(compressed, local_off, _)| (*compressed, payload_offset + local_off))
                .collect();
            let table_payload = if self.geometry.format.is_v2() {
                encode_table_v2(&abs_entries, payload_offset)
            } else {
                encode_table_v1(&abs_entries, payload_offset)
            };
            writer.write_section("table", &table_payload)?;
            writer.write_section("table2", &table_payload)?;

            for (i, (compressed, local_off, stored_size)) in table_entries.iter().enumerate() {
                let _ = i;
                self.chunk_index.push(ChunkDescriptor {
                    segment_ref: segment_number,
                    file_offset: payload_offset + local_off,
                    stored_size: *stored_size,
                    compressed: *compressed,
                    has_trailing_checksum: !*compressed,
                    is_delta: false,
                    is_sparse: false,
                });
            }
        }

        if is_last {
            if self.geometry.format.is_v2() {
                // case_data/disk_device backfill (spec.md §4.4): v2 never
                // writes volume/header information up front, so it lands
                // here once final geometry and header values are known.
                writer.write_section("disk_device", &encode_volume(&self.geometry))?;
                // case_data mirrors xheader's UTF-8 tab-table shape, so it
                // is both written and parsed (`open_read`) that way.
                writer.write_section("case_data", &self.metadata.encode_xheader())?;
            }
            let hash_payload = self.metadata.hash().encode_hash_section();
            if let Ok(payload) = hash_payload {
                writer.write_section("hash", &payload)?;
            }
            let digest_payload = self.metadata.hash().encode_digest_section();
            if let Ok(payload) = digest_payload {
                writer.write_section("digest", &payload)?;
            }
            writer.write_section("error2", &self.metadata.acquisition_errors.encode(ERROR2_PADDING))?;
            writer.write_section("session", &self.metadata.sessions.encode(SESSION_PADDING))?;
        }
        writer.write_terminator()?;
        writer.flush()?;
        Ok(())
    }

    fn roll_segment(&mut self) -> Result<()> {
        self.flush_current_segment(false)?;
        let plan = self.write_plan.as_mut().unwrap();
        plan.current_segment_number += 1;
        plan.sectors_buffer.clear();
        plan.table_entries.clear();
        plan.chunks_in_segment = 0;

        let base_path = self.base_path.clone().unwrap();
        let base_str = base_path.file_stem().unwrap().to_str().unwrap().to_string();
        let dir = base_path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let name = crate::format::segment_filename(&base_str, self.geometry.format, plan.current_segment_number)?;
        let path = dir.join(name);
        self.pool.as_mut().unwrap().push_path(path.clone());

        let mut writer = SegmentWriter::create(&path, self.geometry.format, plan.current_segment_number, self.geometry.set_identifier)?;
        if !self.geometry.format.is_v2() {
            writer.write_section("volume", &encode_volume(&self.geometry))?;
        }
        self.writer = Some(writer);
        info!("rolled over to segment {}", plan.current_segment_number);
        Ok(())
    }

    fn handle_abort(&mut self) -> Result<()> {
        warn!("abort requested, truncating active segment to last committed chunk");
        if let Some(writer) = self.writer.as_mut() {
            writer.truncate_to_last_section()?;
            writer.write_terminator()?;
            writer.flush()?;
        }
        self.state = HandleState::WritingClosed;
        self.finish_media_size();
        Ok(())
    }

    fn finish_media_size(&mut self) {
        let plan = self.write_plan.as_ref().unwrap();
        self.geometry.media_size = plan.streaming_total_bytes;
        self.geometry.number_of_sectors =
            self.geometry.media_size.div_ceil(self.geometry.bytes_per_sector as u64);
    }

    /// Finalize a streaming write session: commit the trailing partial
    /// chunk, flush the final segment's `table`/`hash`/`digest`/error and
    /// session sections, and the terminator (spec.md §4.4 "write_finalize").
    pub fn write_finalize(&mut self) -> Result<()> {
        self.require_state(&[HandleState::WritingStream], "write_finalize")?;
        self.ensure_write_started()?;

        let partial = std::mem::take(&mut self.write_plan.as_mut().unwrap().partial_chunk);
        if !partial.is_empty() {
            self.commit_partial_final_chunk(partial)?;
        }

        {
            let plan = self.write_plan.as_mut().unwrap();
            self.geometry.media_size = plan.streaming_total_bytes;
            self.geometry.number_of_sectors =
                self.geometry.media_size.div_ceil(self.geometry.bytes_per_sector.max(1) as u64);
            let md5 = std::mem::replace(&mut plan.running_md5, RunningMd5::new()).finalize();
            let sha1 = std::mem::replace(&mut plan.running_sha1, RunningSha1::new()).finalize();
            self.metadata.hash_mut().set_md5(md5);
            self.metadata.hash_mut().set_sha1(sha1);
        }

        self.flush_current_segment(true)?;
        self.state = HandleState::WritingClosed;
        info!(
            "write_finalize complete: media_size={} chunks={}",
            self.geometry.media_size,
            self.chunk_index.len()
        );
        Ok(())
    }

    fn commit_partial_final_chunk(&mut self, bytes: Vec<u8>) -> Result<()> {
        // Same as `commit_chunk` but the chunk may be shorter than
        // `chunk_size` (spec.md §8 "A partial last chunk").
        self.commit_chunk(bytes)
    }

    // ------------------------------------------------------------------
    // Random-access write (delta overlay)
    // ------------------------------------------------------------------

    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.require_state(&[HandleState::WritingClosed, HandleState::ReadingWithDelta], "random write")?;
        if self.geometry.media_size == 0 {
            return Err(EwfError::InvalidState("media_size is unknown (streaming mode)".into()));
        }
        let mut total = 0usize;
        let mut pos = offset;
        let chunk_size = self.geometry.chunk_size();

        while total < buf.len() {
            let chunk_number = pos / chunk_size;
            if chunk_number >= self.chunk_index.len() {
                return Err(EwfError::ValueOutOfBounds(
                    "write beyond number_of_chunks_written".into(),
                ));
            }
            let intra = (pos % chunk_size) as usize;
            let chunk_len = self.geometry.chunk_byte_len(chunk_number) as usize;

            let mut data = if self.cache.contains(chunk_number) {
                self.cache.get(chunk_number).unwrap().to_vec()
            } else {
                let data = self.load_chunk(chunk_number)?;
                self.cache.insert(chunk_number, data.clone())?;
                data
            };

            let n = (chunk_len - intra).min(buf.len() - total);
            data[intra..intra + n].copy_from_slice(&buf[total..total + n]);
            self.cache.mark_dirty(chunk_number, data.clone());
            self.flush_dirty_chunk(chunk_number, data)?;

            total += n;
            pos += n as u64;
        }

        self.metadata.invalidate_hashes();
        self.position = offset + total as u64;
        Ok(total)
    }

    fn flush_dirty_chunk(&mut self, chunk_number: u64, data: Vec<u8>) -> Result<()> {
        let Some(modified) = self.cache.take_dirty(chunk_number) else {
            return Ok(());
        };
        debug_assert_eq!(modified, data);

        if self.delta_writer_index.is_none() {
            let base_path = self
                .base_path
                .clone()
                .ok_or_else(|| EwfError::InvalidState("no base path for delta segment".into()))?;
            let base_str = base_path.file_stem().unwrap().to_str().unwrap().to_string();
            let dir = base_path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = crate::format::delta_segment_filename(&base_str, self.geometry.format, 1)?;
            let path = dir.join(name);
            if self.pool.is_none() {
                self.pool = Some(SegmentPool::new(Vec::new(), self.max_open_segments));
            }
            let index = self.pool.as_mut().unwrap().push_path(path.clone());
            let writer = SegmentWriter::create(&path, self.geometry.format, (index + 1) as u32, self.geometry.set_identifier)?;
            self.delta_writer_index = Some(index);
            self.delta_writer = Some(writer);
        }

        let checksum = codec::checksum32(&data, 1);
        let mut payload = data.clone();
        payload.extend_from_slice(&checksum.to_le_bytes());

        // Each flush must leave the delta segment independently readable,
        // so every append is bracketed by a terminator; the next append
        // first truncates it away (the same truncate/re-append protocol
        // `handle_abort` uses for crash safety, see `segment.rs`).
        let writer = self.delta_writer.as_mut().unwrap();
        writer.truncate_to_last_section()?;
        let (_, payload_offset) = writer.write_section("sectors", &payload)?;
        let table_payload = encode_table_v1(&[(false, payload_offset)], payload_offset);
        writer.write_section("table", &table_payload)?;
        writer.write_terminator()?;
        writer.flush()?;

        let segment_ref = self.delta_writer_index.unwrap() as u32 + 1;
        self.chunk_index.set_delta(
            chunk_number,
            ChunkDescriptor {
                segment_ref,
                file_offset: payload_offset,
                stored_size: payload.len() as u64,
                compressed: false,
                has_trailing_checksum: true,
                is_delta: true,
                is_sparse: false,
            },
        );
        // keep a clean copy cached so same-session re-reads stay correct
        self.cache.insert(chunk_number, data)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Close
    // ------------------------------------------------------------------

    /// Idempotent close (spec.md §9 Open Question: double-close is a
    /// no-op returning success).
    pub fn close(&mut self) -> Result<()> {
        // Every flushed segment (streaming or delta) already ends on a
        // `done` terminator — see `flush_current_segment` and
        // `flush_dirty_chunk` — so closing only needs to update state.
        self.state = HandleState::Closed;
        Ok(())
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_index.len()
    }

    pub fn base_path(&self) -> Option<&PathBuf> {
        self.base_path.as_ref()
    }
}

