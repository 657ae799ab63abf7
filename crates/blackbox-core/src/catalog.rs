//! Archive catalog: the registry of recordings in one archive directory.
//!
//! The catalog allocates recording ids, remembers descriptor snapshots for
//! queries, and marks which recordings currently have a live recorder so a
//! recording admits at most one concurrent writer. State is persisted as a
//! JSON sidecar next to the recordings; on open, a missing or stale sidecar
//! is reconciled against the metadata files actually present on disk.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::descriptor::RecordingDescriptor;
use crate::error::{CatalogError, Result};
use crate::layout::scan_max_recording_id;

/// File name of the persisted catalog sidecar.
pub const CATALOG_FILE_NAME: &str = "catalog.json";

/// Registry contract the recording session drives.
pub trait Catalog {
    /// Register a new recording and return its id.
    #[allow(clippy::too_many_arguments)]
    fn add_new_recording(
        &mut self,
        source: &str,
        session_id: i32,
        channel: &str,
        stream_id: i32,
        term_buffer_length: i32,
        mtu_length: i32,
        initial_term_id: i32,
        segment_file_length: i32,
    ) -> Result<i64>;

    /// Refresh the catalog's snapshot of a recording from its descriptor.
    fn update_catalog_from_meta(
        &mut self,
        recording_id: i64,
        descriptor: &RecordingDescriptor,
    ) -> Result<()>;

    /// Drop the live-recorder mark for a recording.
    fn remove_recording_session(&mut self, recording_id: i64);

    /// Snapshot of a recording's descriptor, if registered.
    fn recording(&self, recording_id: i64) -> Option<RecordingDescriptor>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedCatalog {
    next_recording_id: i64,
    recordings: Vec<RecordingDescriptor>,
}

/// File-backed catalog over one archive directory.
#[derive(Debug)]
pub struct ArchiveCatalog {
    state_path: PathBuf,
    next_recording_id: i64,
    active: HashSet<i64>,
    recordings: HashMap<i64, RecordingDescriptor>,
}

impl ArchiveCatalog {
    /// Open the catalog for `archive_dir`, creating the directory if
    /// needed. Recording id allocation continues past both the persisted
    /// state and any metadata files found on disk.
    pub fn open(archive_dir: &Path) -> Result<Self> {
        fs::create_dir_all(archive_dir).map_err(CatalogError::Io)?;
        let state_path = archive_dir.join(CATALOG_FILE_NAME);

        let persisted = if state_path.exists() {
            let raw = fs::read_to_string(&state_path).map_err(CatalogError::Io)?;
            serde_json::from_str::<PersistedCatalog>(&raw).map_err(CatalogError::Encode)?
        } else {
            PersistedCatalog::default()
        };

        let scanned_next = scan_max_recording_id(archive_dir)
            .map_err(CatalogError::Io)?
            .map_or(0, |max| max + 1);

        let recordings: HashMap<i64, RecordingDescriptor> = persisted
            .recordings
            .into_iter()
            .map(|descriptor| (descriptor.recording_id, descriptor))
            .collect();

        Ok(Self {
            state_path,
            next_recording_id: persisted.next_recording_id.max(scanned_next),
            active: HashSet::new(),
            recordings,
        })
    }

    /// True while a live recorder owns the recording.
    #[must_use]
    pub fn is_recording_active(&self, recording_id: i64) -> bool {
        self.active.contains(&recording_id)
    }

    /// Number of registered recordings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let mut recordings: Vec<RecordingDescriptor> = self.recordings.values().cloned().collect();
        recordings.sort_by_key(|descriptor| descriptor.recording_id);
        let state = PersistedCatalog {
            next_recording_id: self.next_recording_id,
            recordings,
        };
        let encoded = serde_json::to_vec_pretty(&state).map_err(CatalogError::Encode)?;
        fs::write(&self.state_path, encoded).map_err(CatalogError::Io)?;
        Ok(())
    }
}

impl Catalog for ArchiveCatalog {
    fn add_new_recording(
        &mut self,
        source: &str,
        session_id: i32,
        channel: &str,
        stream_id: i32,
        term_buffer_length: i32,
        mtu_length: i32,
        initial_term_id: i32,
        segment_file_length: i32,
    ) -> Result<i64> {
        let recording_id = self.next_recording_id;
        self.next_recording_id += 1;

        let descriptor = RecordingDescriptor::new_unstarted(
            recording_id,
            term_buffer_length,
            segment_file_length,
            mtu_length,
            initial_term_id,
            session_id,
            stream_id,
            source.to_string(),
            channel.to_string(),
        );
        self.recordings.insert(recording_id, descriptor);
        self.active.insert(recording_id);
        self.persist()?;
        Ok(recording_id)
    }

    fn update_catalog_from_meta(
        &mut self,
        recording_id: i64,
        descriptor: &RecordingDescriptor,
    ) -> Result<()> {
        if !self.recordings.contains_key(&recording_id) {
            return Err(CatalogError::UnknownRecording(recording_id).into());
        }
        self.recordings.insert(recording_id, descriptor.clone());
        self.persist()
    }

    fn remove_recording_session(&mut self, recording_id: i64) {
        self.active.remove(&recording_id);
    }

    fn recording(&self, recording_id: i64) -> Option<RecordingDescriptor> {
        self.recordings.get(&recording_id).cloned()
    }
}
