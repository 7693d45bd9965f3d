//! Random writes against a read-only open are routed to a delta segment:
//! the original segment files are untouched, but reads through the handle
//! observe the patched bytes, and the hash values are invalidated.

use ewflib::{CompressionLevel, Handle, MediaGeometry, MediaType};

fn geometry() -> MediaGeometry {
    MediaGeometry {
        sectors_per_chunk: 2,
        bytes_per_sector: 512,
        media_type: MediaType::Fixed,
        compression_level: CompressionLevel::None,
        ..Default::default()
    }
}

#[test]
fn write_at_patches_through_a_delta_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("orig");
    let payload = vec![0x11u8; 8192];

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    writer.write(&payload).unwrap();
    writer.write_finalize().unwrap();
    writer.close().unwrap();

    let first_segment = base.with_extension("e01");
    let original_bytes = std::fs::read(&first_segment).unwrap();

    let segments = Handle::discover_segments(&first_segment).unwrap();
    let mut handle = Handle::open_read(segments).unwrap();

    let delta_base = dir.path().join("orig_delta");
    handle.attach_delta(delta_base).unwrap();

    let patch = vec![0x22u8; 100];
    handle.write_at(&patch, 1000).unwrap();

    // original segment on disk is untouched
    assert_eq!(std::fs::read(&first_segment).unwrap(), original_bytes);

    // but reads through the handle see the patch
    let mut out = vec![0u8; payload.len()];
    let mut cursor = 0usize;
    while cursor < out.len() {
        let n = handle.read_at(&mut out[cursor..], cursor as u64).unwrap();
        assert!(n > 0);
        cursor += n;
    }
    let mut expected = payload.clone();
    expected[1000..1100].copy_from_slice(&patch);
    assert_eq!(out, expected);

    // the stale acquisition hash no longer applies
    assert!(handle.hash_values().md5().is_none());
}

#[test]
fn write_at_beyond_chunk_count_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("orig2");
    let payload = vec![0x33u8; 4096];

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    writer.write(&payload).unwrap();
    writer.write_finalize().unwrap();

    let segments = Handle::discover_segments(&base.with_extension("e01")).unwrap();
    let mut handle = Handle::open_read(segments).unwrap();
    handle.attach_delta(dir.path().join("orig2_delta")).unwrap();

    let err = handle.write_at(&[1, 2, 3], payload.len() as u64 + 10).unwrap_err();
    assert!(matches!(err, ewflib::EwfError::ValueOutOfBounds(_)));
}

#[test]
fn delta_segment_survives_independent_reopen_mid_session() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("midsession");
    let payload = vec![0x44u8; 4096];

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    writer.write(&payload).unwrap();
    writer.write_finalize().unwrap();

    let segments = Handle::discover_segments(&base.with_extension("e01")).unwrap();
    let mut handle = Handle::open_read(segments).unwrap();
    let delta_base = dir.path().join("midsession_delta");
    handle.attach_delta(delta_base.clone()).unwrap();
    handle.write_at(&[0x55; 50], 0).unwrap();

    // the delta file is independently parseable before the handle closes
    let delta_path = delta_base.with_extension("d01");
    assert!(delta_path.exists());
    let reopened = ewflib::segment::SegmentReader::open(&delta_path).unwrap();
    let types: Vec<&str> = reopened.sections.iter().map(|s| s.section_type.as_str()).collect();
    assert_eq!(types.last(), Some(&"done"));
}
