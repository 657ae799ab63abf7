//! Archive configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default segment file length: 128 MiB.
pub const DEFAULT_SEGMENT_FILE_LENGTH: i32 = 128 * 1024 * 1024;

/// Default replay linger window in milliseconds.
pub const DEFAULT_REPLAY_LINGER_MS: i64 = 1000;

/// Configuration shared by recording and replay sessions.
///
/// Per-recording geometry (term buffer length, initial term id) comes from
/// the upstream image; this holds the archive-wide knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory holding metadata and segment files.
    pub archive_dir: PathBuf,

    /// Length of each pre-sized segment file. Must be a positive
    /// power-of-two multiple of every recorded stream's term buffer length.
    pub segment_file_length: i32,

    /// Durably flush segment data after every accepted write.
    pub force_writes: bool,

    /// Durably flush the mapped descriptor after every point update.
    pub force_metadata_updates: bool,

    /// Grace period between replay end-of-stream and session teardown,
    /// and the bound on waiting for the outbound publication to connect.
    pub replay_linger_ms: i64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from("blackbox-archive"),
            segment_file_length: DEFAULT_SEGMENT_FILE_LENGTH,
            force_writes: true,
            force_metadata_updates: true,
            replay_linger_ms: DEFAULT_REPLAY_LINGER_MS,
        }
    }
}

impl ArchiveConfig {
    /// Validate archive-wide invariants. Geometry compatibility with a
    /// particular stream is checked again when a recorder is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_file_length <= 0 {
            return Err(ConfigError::NonPositive {
                field: "segment_file_length",
                value: i64::from(self.segment_file_length),
            });
        }
        if self.replay_linger_ms <= 0 {
            return Err(ConfigError::NonPositive {
                field: "replay_linger_ms",
                value: self.replay_linger_ms,
            });
        }
        Ok(())
    }
}
