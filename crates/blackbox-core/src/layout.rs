//! On-disk layout of an archive directory.
//!
//! One recording is a metadata file plus zero or more pre-sized segment
//! files, all named deterministically from the recording id:
//!
//! ```text
//! <archive_dir>/<recording_id>.rec                  metadata, 4096-byte descriptor block
//! <archive_dir>/<recording_id>-<segment_index>.rec  segment, exactly segment_file_length bytes
//! ```

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Shared suffix for metadata and segment files.
pub const RECORDING_FILE_SUFFIX: &str = ".rec";

/// Metadata file name for a recording.
#[must_use]
pub fn metadata_file_name(recording_id: i64) -> String {
    format!("{recording_id}{RECORDING_FILE_SUFFIX}")
}

/// Segment file name for a recording segment.
#[must_use]
pub fn segment_file_name(recording_id: i64, segment_index: i64) -> String {
    format!("{recording_id}-{segment_index}{RECORDING_FILE_SUFFIX}")
}

#[must_use]
pub fn metadata_file_path(archive_dir: &Path, recording_id: i64) -> PathBuf {
    archive_dir.join(metadata_file_name(recording_id))
}

#[must_use]
pub fn segment_file_path(archive_dir: &Path, recording_id: i64, segment_index: i64) -> PathBuf {
    archive_dir.join(segment_file_name(recording_id, segment_index))
}

/// Create a file pre-sized to exactly `length` bytes.
///
/// The file is created read-write and extended sparsely; pre-sizing keeps
/// the hot write path free of mid-write growth.
pub fn create_fixed_size_file(path: &Path, length: u64) -> io::Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(length)?;
    Ok(file)
}

/// Highest recording id for which a metadata file exists in `archive_dir`,
/// or `None` when the directory holds no recordings.
///
/// Segment files carry a `-<segment_index>` infix and are skipped.
pub fn scan_max_recording_id(archive_dir: &Path) -> io::Result<Option<i64>> {
    let mut max_id = None;
    for entry in std::fs::read_dir(archive_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(stem) = name.strip_suffix(RECORDING_FILE_SUFFIX) else {
            continue;
        };
        let Ok(id) = stem.parse::<i64>() else {
            continue;
        };
        if max_id.map_or(true, |max| id > max) {
            max_id = Some(id);
        }
    }
    Ok(max_id)
}
