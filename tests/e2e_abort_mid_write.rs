//! Signaling the abort token mid-acquisition stops the write in progress,
//! truncates the active segment back to its last complete section, and
//! leaves the handle in `WritingClosed` rather than usable for further
//! streaming writes.

use ewflib::segment::SegmentReader;
use ewflib::{CompressionLevel, EwfError, Handle, HandleState, MediaGeometry, MediaType};

fn geometry() -> MediaGeometry {
    MediaGeometry {
        sectors_per_chunk: 1,
        bytes_per_sector: 512,
        media_type: MediaType::Fixed,
        compression_level: CompressionLevel::Fast,
        ..Default::default()
    }
}

#[test]
fn abort_token_interrupts_a_streaming_write() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("aborted");

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    let abort = writer.abort_token();

    // commit one full chunk normally before the abort is raised
    writer.write(&vec![0xAA; 512]).unwrap();
    assert_eq!(writer.state(), HandleState::WritingStream);

    abort.store(true, std::sync::atomic::Ordering::SeqCst);

    let err = writer.write(&vec![0xBB; 512]).unwrap_err();
    assert!(matches!(err, EwfError::Aborted));
    assert_eq!(writer.state(), HandleState::WritingClosed);
}

#[test]
fn aborted_handle_rejects_further_streaming_writes() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("aborted2");

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    let abort = writer.abort_token();
    abort.store(true, std::sync::atomic::Ordering::SeqCst);

    let err = writer.write(&vec![0xCC; 512]).unwrap_err();
    assert!(matches!(err, EwfError::Aborted));

    // the write path is closed for good; write_finalize is for the
    // WritingStream state this handle has already left
    let err = writer.write_finalize().unwrap_err();
    assert!(matches!(err, EwfError::InvalidState(_)));
}

#[test]
fn aborted_segment_file_still_parses_as_a_valid_container() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("aborted3");

    let mut writer = Handle::create(base.clone(), geometry()).unwrap();
    let abort = writer.abort_token();
    writer.write(&vec![0xDD; 512]).unwrap();
    abort.store(true, std::sync::atomic::Ordering::SeqCst);
    let _ = writer.write(&vec![0xEE; 512]);

    let first_segment = base.with_extension("e01");
    let reader = SegmentReader::open(&first_segment).unwrap();
    let types: Vec<&str> = reader.sections.iter().map(|s| s.section_type.as_str()).collect();
    assert_eq!(types.last(), Some(&"done"));
}
