//! Trailing chunk checksums are verified on read. A mismatch is recorded
//! in the checksum-error list and either surfaces as `ChunkCorrupt` or, if
//! the caller opted in, is repaired by zero-filling the bad chunk.

use ewflib::segment::SegmentReader;
use ewflib::{CompressionLevel, EwfError, Handle, MediaGeometry, MediaType};

fn geometry() -> MediaGeometry {
    MediaGeometry {
        sectors_per_chunk: 1,
        bytes_per_sector: 512,
        media_type: MediaType::Fixed,
        // uncompressed chunks keep the trailing checksum inline and at a
        // fixed size, making corruption easy to target
        compression_level: CompressionLevel::None,
        ..Default::default()
    }
}

/// Flip one byte inside the first `sectors` section payload of `path`.
fn corrupt_first_sectors_payload(path: &std::path::Path) {
    let mut reader = SegmentReader::open(path).unwrap();
    let section = reader
        .sections
        .iter()
        .find(|s| s.section_type == "sectors")
        .cloned()
        .expect("segment has a sectors section");

    let mut bytes = std::fs::read(path).unwrap();
    let offset = section.payload_offset as usize;
    bytes[offset] ^= 0xFF;
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn corrupted_chunk_surfaces_as_chunk_corrupt_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("dmg");
    let payload = vec![0x77u8; 2048];

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    writer.write(&payload).unwrap();
    writer.write_finalize().unwrap();
    writer.close().unwrap();

    let first_segment = base.with_extension("e01");
    corrupt_first_sectors_payload(&first_segment);

    let segments = Handle::discover_segments(&first_segment).unwrap();
    let mut reader = Handle::open_read(segments).unwrap();

    let mut buf = vec![0u8; 512];
    let err = reader.read_at(&mut buf, 0).unwrap_err();
    assert!(matches!(err, EwfError::ChunkCorrupt(_)));
    assert_eq!(reader.checksum_errors().len(), 1);
}

#[test]
fn zero_fill_on_error_repairs_the_read_and_still_logs_it() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("dmg2");
    let payload = vec![0x88u8; 2048];

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    writer.write(&payload).unwrap();
    writer.write_finalize().unwrap();
    writer.close().unwrap();

    let first_segment = base.with_extension("e01");
    corrupt_first_sectors_payload(&first_segment);

    let segments = Handle::discover_segments(&first_segment).unwrap();
    let mut reader = Handle::open_read(segments).unwrap();
    reader.set_zero_fill_on_error(true);

    let mut buf = vec![0xAAu8; 512];
    let n = reader.read_at(&mut buf, 0).unwrap();
    assert_eq!(n, 512);
    assert!(buf.iter().all(|&b| b == 0));
    assert_eq!(reader.checksum_errors().len(), 1);

    // the following chunk is untouched
    let mut next = vec![0u8; 512];
    reader.read_at(&mut next, 512).unwrap();
    assert!(next.iter().all(|&b| b == 0x88));
}
