//! Error taxonomy surfaced at the public boundary.
//!
//! Every fallible operation in this crate returns [`EwfError`]. The variants
//! mirror the kinds catalogued in the format's public API: misuse, bounds
//! checks, I/O, and on-disk integrity failures are kept distinct so a caller
//! can decide which ones are worth retrying or reporting to a user.

use thiserror::Error;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, EwfError>;

#[derive(Debug, Error)]
pub enum EwfError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state for this operation: {0}")]
    InvalidState(String),

    #[error("value out of bounds: {0}")]
    ValueOutOfBounds(String),

    #[error("value exceeds maximum: {0}")]
    ValueExceedsMaximum(String),

    #[error("value too small: {0}")]
    ValueTooSmall(String),

    #[error("value already set: {0}")]
    AlreadySet(String),

    #[error("value missing: {0}")]
    ValueMissing(String),

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("segment corrupt: {0}")]
    SegmentCorrupt(String),

    #[error("chunk corrupt: {0}")]
    ChunkCorrupt(String),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported codepage: {0}")]
    UnsupportedCodepage(String),

    #[error("unsupported compression level: {0}")]
    UnsupportedCompressionLevel(String),

    #[error("operation aborted")]
    Aborted,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}
