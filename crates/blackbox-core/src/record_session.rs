//! Recording session: drives one upstream image into one recorder.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::clock::EpochClock;
use crate::config::ArchiveConfig;
use crate::error::{RecorderError, Result};
use crate::recorder::{Recorder, RecorderConfig};
use crate::session::Session;
use crate::transport::{Image, Notifications};

/// Recording id before catalog registration.
const NULL_RECORDING_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Recording,
    Inactive,
    Closed,
}

/// State machine consuming an [`Image`] and recording it to the archive.
///
/// INIT registers the recording and builds the recorder; RECORDING polls
/// the image for blocks each tick; INACTIVE stops the recorder, refreshes
/// the catalog and notifies; CLOSED is terminal.
pub struct RecordingSession<I: Image> {
    config: ArchiveConfig,
    image: I,
    catalog: Rc<RefCell<dyn Catalog>>,
    notifications: Rc<RefCell<dyn Notifications>>,
    clock: Rc<dyn EpochClock>,
    recorder: Option<Recorder>,
    recording_id: i64,
    state: State,
}

impl<I: Image> RecordingSession<I> {
    pub fn new(
        image: I,
        config: ArchiveConfig,
        catalog: Rc<RefCell<dyn Catalog>>,
        notifications: Rc<RefCell<dyn Notifications>>,
        clock: Rc<dyn EpochClock>,
    ) -> Self {
        Self {
            config,
            image,
            catalog,
            notifications,
            clock,
            recorder: None,
            recording_id: NULL_RECORDING_ID,
            state: State::Init,
        }
    }

    /// Catalog id of this session's recording, or -1 before INIT ran.
    #[must_use]
    pub fn recording_id(&self) -> i64 {
        self.recording_id
    }

    /// True while the session is actively polling the image.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.state == State::Recording
    }

    fn init(&mut self) -> Result<usize> {
        let term_buffer_length = self.image.term_buffer_length();
        let initial_term_id = self.image.initial_term_id();
        let mtu_length = self.image.mtu_length();
        let session_id = self.image.session_id();
        let stream_id = self.image.stream_id();
        let channel = self.image.channel();
        let source = self.image.source_identity();

        let recording_id = self.catalog.borrow_mut().add_new_recording(
            &source,
            session_id,
            &channel,
            stream_id,
            term_buffer_length,
            mtu_length,
            initial_term_id,
            self.config.segment_file_length,
        )?;
        self.recording_id = recording_id;

        self.notifications.borrow_mut().recording_started(
            recording_id,
            &source,
            session_id,
            &channel,
            stream_id,
        );

        let recorder = Recorder::create(
            RecorderConfig {
                recording_id,
                archive_dir: self.config.archive_dir.clone(),
                term_buffer_length,
                segment_file_length: self.config.segment_file_length,
                initial_term_id,
                mtu_length,
                session_id,
                stream_id,
                source,
                channel,
                force_writes: self.config.force_writes,
                force_metadata_updates: self.config.force_metadata_updates,
            },
            self.clock.clone(),
        )?;

        info!(recording_id, stream_id, "recording started");
        self.recorder = Some(recorder);
        self.state = State::Recording;
        Ok(1)
    }

    fn record(&mut self) -> Result<usize> {
        let recorder = self.recorder.as_mut().ok_or(RecorderError::Closed {
            recording_id: self.recording_id,
        })?;

        let byte_limit = recorder.segment_file_length();
        let bytes = self.image.raw_poll(recorder, byte_limit)?;
        if bytes != 0 {
            let initial_position = recorder.initial_position();
            let last_position = recorder.last_position();
            self.notifications.borrow_mut().recording_progress(
                self.recording_id,
                initial_position,
                last_position,
            );
        }

        if self.image.is_closed() {
            self.state = State::Inactive;
        }

        Ok(bytes.max(0) as usize)
    }

    /// Stop the recorder, push its final descriptor into the catalog,
    /// release the recording's live-writer mark and notify. Runs to CLOSED
    /// even when the stop path fails part-way.
    fn close(&mut self) -> Result<usize> {
        let mut result = Ok(());
        if let Some(mut recorder) = self.recorder.take() {
            // A recorder that failed mid-write already latched itself shut
            // with its descriptor gone; there is nothing left to flush.
            if !recorder.is_closed() {
                result = (|| {
                    recorder.stop()?;
                    let snapshot = recorder.descriptor_snapshot()?;
                    self.catalog
                        .borrow_mut()
                        .update_catalog_from_meta(self.recording_id, &snapshot)
                })();
                if let Err(err) = recorder.close() {
                    warn!(
                        recording_id = self.recording_id,
                        error = %err,
                        "recorder close failed during session teardown"
                    );
                }
            }
        }

        // Nothing to release or announce when INIT failed before the
        // catalog handed out an id.
        if self.recording_id != NULL_RECORDING_ID {
            self.catalog
                .borrow_mut()
                .remove_recording_session(self.recording_id);
            self.notifications
                .borrow_mut()
                .recording_stopped(self.recording_id);
            info!(recording_id = self.recording_id, "recording stopped");
        }
        self.state = State::Closed;
        result.map(|()| 1)
    }
}

impl<I: Image> Session for RecordingSession<I> {
    fn do_work(&mut self) -> Result<usize> {
        let mut work_count = 0;

        if self.state == State::Init {
            match self.init() {
                Ok(done) => work_count += done,
                Err(err) => {
                    error!(error = %err, "recording session failed to initialize");
                    self.state = State::Inactive;
                    let _ = self.close();
                    return Err(err);
                }
            }
        }

        if self.state == State::Recording {
            match self.record() {
                Ok(done) => work_count += done,
                Err(err) => {
                    error!(
                        recording_id = self.recording_id,
                        error = %err,
                        "recording failed; stopping session"
                    );
                    self.state = State::Inactive;
                    return Err(err);
                }
            }
        }

        if self.state == State::Inactive {
            work_count += self.close()?;
        }

        Ok(work_count)
    }

    fn abort(&mut self) {
        if self.state != State::Closed {
            self.state = State::Inactive;
        }
    }

    fn is_done(&self) -> bool {
        self.state == State::Closed
    }
}
