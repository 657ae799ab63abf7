//! Replay session: streams a recorded range back into a new publication.
//!
//! Works through the request/response flow with the requesting client and
//! then copies fragments from a [`FragmentCursor`] into the outbound
//! publication, preserving the original framing fields so the replayed
//! stream is bit-identical to the recorded one.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, error, info};

use crate::clock::EpochClock;
use crate::config::ArchiveConfig;
use crate::cursor::{ControlledFragmentHandler, FragmentCursor};
use crate::descriptor::RecordingDescriptor;
use crate::error::{ArchiveError, ReplayError, Result};
use crate::frame::FrameHeader;
use crate::layout::metadata_file_path;
use crate::session::Session;
use crate::transport::{
    BufferClaim, ControlResponder, ReplayPublication, ReplayPublicationSupplier,
    PUBLICATION_CLOSED, PUBLICATION_NOT_CONNECTED,
};

/// Fragments copied into the publication per tick.
pub const REPLAY_SEND_BATCH_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Replay,
    Linger,
    Inactive,
    Closed,
}

/// A validated client request to replay a recorded range.
#[derive(Debug, Clone)]
pub struct ReplayRequest {
    pub recording_id: i64,
    pub from_position: i64,
    pub replay_length: i64,
    pub replay_channel: String,
    pub replay_stream_id: i32,
    pub correlation_id: i64,
}

/// State machine replaying one recorded range.
///
/// INIT validates the request against the descriptor, opens the cursor and
/// waits (bounded by the linger window) for the outbound publication to
/// connect; REPLAY copies fragments; LINGER gives the peer time to drain
/// before INACTIVE tears down. Errors in any state send a control response
/// under the request's correlation id and transition to INACTIVE.
pub struct ReplaySession {
    request: ReplayRequest,
    archive_dir: PathBuf,
    linger_ms: i64,

    control: Rc<RefCell<dyn ControlResponder>>,
    supplier: Rc<RefCell<dyn ReplayPublicationSupplier>>,
    clock: Rc<dyn EpochClock>,

    cursor: Option<FragmentCursor>,
    publication: Option<Box<dyn ReplayPublication>>,
    claim: BufferClaim,

    mtu_length: i32,
    term_buffer_length: i32,
    initial_term_id: i32,
    linger_since_ms: i64,
    state: State,
}

impl ReplaySession {
    pub fn new(
        request: ReplayRequest,
        config: &ArchiveConfig,
        control: Rc<RefCell<dyn ControlResponder>>,
        supplier: Rc<RefCell<dyn ReplayPublicationSupplier>>,
        clock: Rc<dyn EpochClock>,
    ) -> Self {
        let linger_since_ms = clock.epoch_ms();
        Self {
            request,
            archive_dir: config.archive_dir.clone(),
            linger_ms: config.replay_linger_ms,
            control,
            supplier,
            clock,
            cursor: None,
            publication: None,
            claim: BufferClaim::default(),
            mtu_length: 0,
            term_buffer_length: 0,
            initial_term_id: 0,
            linger_since_ms,
            state: State::Init,
        }
    }

    fn init(&mut self) -> Result<usize> {
        if self.cursor.is_none() {
            let path = metadata_file_path(&self.archive_dir, self.request.recording_id);
            if !path.exists() {
                return self.close_on_error(ReplayError::NotFound { path }.into());
            }

            let descriptor =
                match RecordingDescriptor::load(&self.archive_dir, self.request.recording_id) {
                    Ok(descriptor) => descriptor,
                    Err(err) => return self.close_on_error(err.into()),
                };

            if self.request.from_position < descriptor.initial_position {
                return self.close_on_error(
                    ReplayError::BeforeStart {
                        from_position: self.request.from_position,
                        initial_position: descriptor.initial_position,
                    }
                    .into(),
                );
            }
            let to_position = self.request.from_position + self.request.replay_length;
            if to_position > descriptor.last_position {
                return self.close_on_error(
                    ReplayError::PastEnd {
                        to_position,
                        last_position: descriptor.last_position,
                    }
                    .into(),
                );
            }

            match FragmentCursor::open(
                &self.archive_dir,
                self.request.recording_id,
                self.request.from_position,
                self.request.replay_length,
            ) {
                Ok(cursor) => self.cursor = Some(cursor),
                Err(err) => {
                    return self.close_on_error(
                        ReplayError::CursorOpenFailed {
                            recording_id: self.request.recording_id,
                            source: Box::new(err),
                        }
                        .into(),
                    )
                }
            }

            self.mtu_length = descriptor.mtu_length;
            self.term_buffer_length = descriptor.term_buffer_length;
            self.initial_term_id = descriptor.initial_term_id;
        }

        if self.publication.is_none() {
            let publication = self.supplier.borrow_mut().new_replay_publication(
                &self.request.replay_channel,
                self.request.replay_stream_id,
                self.request.from_position,
                self.mtu_length,
                self.initial_term_id,
                self.term_buffer_length,
            );
            match publication {
                Ok(publication) => self.publication = Some(publication),
                Err(err) => return self.close_on_error(err),
            }
        }

        let connected = self
            .publication
            .as_ref()
            .is_some_and(|publication| publication.is_connected());
        if !connected {
            if self.is_linger_done() {
                debug!(
                    recording_id = self.request.recording_id,
                    "replay publication never connected; abandoning session"
                );
                self.state = State::Inactive;
            }
            return Ok(0);
        }

        self.control
            .borrow_mut()
            .send_ok(self.request.correlation_id);
        info!(
            recording_id = self.request.recording_id,
            from_position = self.request.from_position,
            replay_length = self.request.replay_length,
            "replay started"
        );
        self.state = State::Replay;
        Ok(1)
    }

    fn replay(&mut self) -> Result<usize> {
        let Some(mut cursor) = self.cursor.take() else {
            return self.close_on_error(
                ReplayError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "replay cursor missing",
                ))
                .into(),
            );
        };

        let polled = cursor.controlled_poll(self, REPLAY_SEND_BATCH_SIZE);
        let done = cursor.is_done();
        self.cursor = Some(cursor);

        match polled {
            Ok(polled) => {
                if done {
                    self.linger_since_ms = self.clock.epoch_ms();
                    self.state = State::Linger;
                }
                Ok(polled)
            }
            Err(err) => self.close_on_error(err),
        }
    }

    fn linger(&mut self) -> usize {
        if self.is_linger_done() {
            self.state = State::Inactive;
        }
        0
    }

    fn is_linger_done(&self) -> bool {
        self.clock.epoch_ms() - self.linger_ms > self.linger_since_ms
    }

    fn close(&mut self) -> usize {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        self.publication = None;
        info!(recording_id = self.request.recording_id, "replay session closed");
        self.state = State::Closed;
        1
    }

    /// Send the error back under the request's correlation id (if the
    /// control plane is still up) and begin teardown.
    fn close_on_error(&mut self, err: ArchiveError) -> Result<usize> {
        self.state = State::Inactive;
        {
            let mut control = self.control.borrow_mut();
            if control.is_connected() {
                control.send_error(self.request.correlation_id, &err.to_string());
            }
        }
        error!(
            recording_id = self.request.recording_id,
            correlation_id = self.request.correlation_id,
            error = %err,
            "replay session failed"
        );
        Err(err)
    }
}

impl ControlledFragmentHandler for ReplaySession {
    fn on_fragment(
        &mut self,
        buffer: &[u8],
        offset: usize,
        length: usize,
        header: &FrameHeader,
    ) -> Result<bool> {
        if self.state != State::Replay {
            return Ok(false);
        }
        let Some(publication) = self.publication.as_mut() else {
            return Err(ReplayError::PeerGone.into());
        };

        let result = publication.try_claim(length as i32, &mut self.claim);
        if result > 0 {
            self.claim
                .buffer_mut()
                .copy_from_slice(&buffer[offset..offset + length]);
            self.claim.set_flags(header.flags);
            self.claim.set_reserved_value(header.reserved_value);
            self.claim.set_header_type(header.frame_type);
            publication.commit(&mut self.claim);
            Ok(true)
        } else if result == PUBLICATION_CLOSED || result == PUBLICATION_NOT_CONNECTED {
            Err(ReplayError::PeerGone.into())
        } else {
            // Back-pressured: pause and let the cursor redeliver next tick.
            Ok(false)
        }
    }
}

impl Session for ReplaySession {
    fn do_work(&mut self) -> Result<usize> {
        let mut work_count = 0;

        match self.state {
            State::Replay => work_count += self.replay()?,
            State::Init => work_count += self.init()?,
            State::Linger => work_count += self.linger(),
            State::Inactive | State::Closed => {}
        }

        if self.state == State::Inactive {
            work_count += self.close();
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
