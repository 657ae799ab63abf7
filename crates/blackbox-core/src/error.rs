//! Error types for blackbox-core.
//!
//! Every failure surfaced by the engine maps to a stable [`ErrorKind`] so
//! callers (and tests) can branch on *what went wrong* without matching on
//! the concrete error variant.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the library's [`ArchiveError`].
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Stable classification of engine errors.
///
/// The kind is the observable error surface: variants may gain fields or
/// change wording, but the kind they map to is a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// First block of a recording did not start at the initial term id.
    OutOfOrderStart,
    /// A write was not contiguous with the recorder's position.
    NonContiguous,
    /// A write would cross a term boundary.
    CrossesTerm,
    /// Disk I/O failed, or on-disk state was unreadable.
    IoFailure,
    /// Replay target recording does not exist.
    NotFound,
    /// Replay start position precedes the recorded range.
    BeforeStart,
    /// Replay range extends past the recorded range.
    PastEnd,
    /// Replay cursor could not be opened over the recording.
    CursorOpenFailed,
    /// Outbound replay publication closed or disconnected mid-replay.
    ReplayPeerGone,
    /// An operation was attempted against a closed or conflicting resource.
    InvalidState,
    /// Stream geometry or archive configuration was rejected.
    InvalidConfig,
}

/// Recorder (write-side) errors.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Recording must begin at the publication start.
    #[error(
        "expected to record from publication start, but first term id {actual} \
         is not initial term id {expected}"
    )]
    OutOfOrderStart { expected: i32, actual: i32 },

    /// Blocks must arrive strictly contiguous with the write cursor.
    #[error("segment offset {actual} is not contiguous with recording position {expected}")]
    NonContiguous { expected: i32, actual: i32 },

    /// A single write may not straddle a term boundary.
    #[error(
        "recording across terms is not supported: offset {term_offset} + length {length} \
         > term buffer length {term_buffer_length}"
    )]
    CrossesTerm {
        term_offset: i32,
        length: i32,
        term_buffer_length: i32,
    },

    /// The recorder already failed or was closed; writes are rejected.
    #[error("recorder for recording {recording_id} is closed")]
    Closed { recording_id: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Replay (read-side) errors.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("recording metadata file {} not found", .path.display())]
    NotFound { path: PathBuf },

    #[error(
        "requested replay start position {from_position} is less than \
         recording initial position {initial_position}"
    )]
    BeforeStart {
        from_position: i64,
        initial_position: i64,
    },

    #[error(
        "requested replay end position {to_position} is more than \
         recording last position {last_position}"
    )]
    PastEnd {
        to_position: i64,
        last_position: i64,
    },

    #[error("failed to open cursor for recording {recording_id}")]
    CursorOpenFailed {
        recording_id: i64,
        #[source]
        source: Box<ArchiveError>,
    },

    /// The outbound publication went away while fragments were in flight.
    #[error("replay publication to replay requestor has shutdown mid-replay")]
    PeerGone,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Descriptor codec and mapping errors.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("unsupported descriptor version {actual}, expected {expected}")]
    Version { expected: i32, actual: i32 },

    #[error("descriptor block truncated: {len} bytes, need at least {need}")]
    Truncated { len: usize, need: usize },

    #[error("descriptor {field} field is not valid UTF-8")]
    InvalidString { field: &'static str },

    #[error("descriptor strings exceed the {block} byte descriptor block")]
    Overflow { block: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Archive catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("recording {0} is not registered in the catalog")]
    UnknownRecording(i64),

    #[error("catalog state could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream geometry and configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("term buffer length {0} must be a positive power of two")]
    TermBufferLength(i32),

    #[error(
        "segment file length {segment_file_length} must be a positive power-of-two \
         multiple of term buffer length {term_buffer_length}"
    )]
    SegmentFileLength {
        segment_file_length: i32,
        term_buffer_length: i32,
    },

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: i64 },
}

/// Top-level error type for blackbox-core.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Stable kind mapping for control responses and tests.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Recorder(err) => match err {
                RecorderError::OutOfOrderStart { .. } => ErrorKind::OutOfOrderStart,
                RecorderError::NonContiguous { .. } => ErrorKind::NonContiguous,
                RecorderError::CrossesTerm { .. } => ErrorKind::CrossesTerm,
                RecorderError::Closed { .. } => ErrorKind::InvalidState,
                RecorderError::Io(_) => ErrorKind::IoFailure,
            },
            Self::Replay(err) => match err {
                ReplayError::NotFound { .. } => ErrorKind::NotFound,
                ReplayError::BeforeStart { .. } => ErrorKind::BeforeStart,
                ReplayError::PastEnd { .. } => ErrorKind::PastEnd,
                ReplayError::CursorOpenFailed { .. } => ErrorKind::CursorOpenFailed,
                ReplayError::PeerGone => ErrorKind::ReplayPeerGone,
                ReplayError::Io(_) => ErrorKind::IoFailure,
            },
            Self::Descriptor(_) => ErrorKind::IoFailure,
            Self::Catalog(err) => match err {
                CatalogError::UnknownRecording(_) => ErrorKind::InvalidState,
                CatalogError::Encode(_) | CatalogError::Io(_) => ErrorKind::IoFailure,
            },
            Self::Config(_) => ErrorKind::InvalidConfig,
            Self::Io(_) => ErrorKind::IoFailure,
        }
    }
}
