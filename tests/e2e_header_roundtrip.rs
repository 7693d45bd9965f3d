//! Header values set before acquisition, and `copy_header_values` between
//! two handles, both survive a close/reopen cycle unchanged.

use ewflib::{header_keys, CompressionLevel, Handle, MediaGeometry, MediaType};

fn geometry() -> MediaGeometry {
    MediaGeometry {
        sectors_per_chunk: 8,
        bytes_per_sector: 512,
        media_type: MediaType::Fixed,
        compression_level: CompressionLevel::Fast,
        ..Default::default()
    }
}

#[test]
fn custom_and_well_known_header_values_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("acq");

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    writer.set_header_value(header_keys::CASE_NUMBER, "CASE-77".into());
    writer.set_header_value(header_keys::EXAMINER_NAME, "A. Examiner".into());
    writer.set_header_value(header_keys::EVIDENCE_NUMBER, "EV-1".into());
    writer.set_header_value("custom_tag", "lab-3".into());
    writer.write(&vec![0u8; 4096]).unwrap();
    writer.write_finalize().unwrap();
    writer.close().unwrap();

    let segments = Handle::discover_segments(&base.with_extension("e01")).unwrap();
    let reader = Handle::open_read(segments).unwrap();

    assert_eq!(reader.header_value(header_keys::CASE_NUMBER).as_deref(), Some("CASE-77"));
    assert_eq!(reader.header_value(header_keys::EXAMINER_NAME).as_deref(), Some("A. Examiner"));
    assert_eq!(reader.header_value(header_keys::EVIDENCE_NUMBER).as_deref(), Some("EV-1"));
    assert_eq!(reader.header_value("custom_tag").as_deref(), Some("lab-3"));
    assert!(reader.header_keys().contains(&"custom_tag".to_string()));
}

#[test]
fn copy_header_values_is_independent_of_reopen_order() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("src_image");

    let mut src = Handle::create(base.clone(), geometry()).unwrap();
    src.set_header_value(header_keys::CASE_NUMBER, "CASE-99".into());
    src.set_header_value(header_keys::NOTES, "re-acquired after power loss".into());
    src.write(&vec![0u8; 4096]).unwrap();
    src.write_finalize().unwrap();
    src.close().unwrap();

    let src_segments = Handle::discover_segments(&base.with_extension("e01")).unwrap();
    let src_reader = Handle::open_read(src_segments).unwrap();

    let dst_base = dir.path().join("dst_image");
    let mut dst = Handle::create(dst_base, geometry()).unwrap();
    dst.copy_header_values(&src_reader);

    assert_eq!(dst.header_value(header_keys::CASE_NUMBER).as_deref(), Some("CASE-99"));
    assert_eq!(
        dst.header_value(header_keys::NOTES).as_deref(),
        Some("re-acquired after power loss")
    );
}

#[test]
fn missing_header_key_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("noheader");

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    writer.write(&vec![0u8; 512]).unwrap();
    writer.write_finalize().unwrap();

    assert_eq!(writer.header_value(header_keys::PASSWORD), None);
}
