//! Transport collaborator seams.
//!
//! The engine never talks to the wire directly. It sees the upstream
//! transport through [`Image`] (the live stream being recorded), and the
//! outbound side through [`ReplayPublication`] (the stream being
//! reconstituted) plus [`ControlResponder`] (request/response plumbing back
//! to the requesting client). All traits are object-safe so a conductor can
//! hold heterogeneous boxed sessions.

use std::fs::File;

use crate::error::Result;

/// `try_claim` sentinel: no subscriber is connected.
pub const PUBLICATION_NOT_CONNECTED: i64 = -1;

/// `try_claim` sentinel: flow control has no room; retry next tick.
pub const PUBLICATION_BACK_PRESSURED: i64 = -2;

/// `try_claim` sentinel: an administrative action is in progress; retry.
pub const PUBLICATION_ADMIN_ACTION: i64 = -3;

/// `try_claim` sentinel: the publication has been closed.
pub const PUBLICATION_CLOSED: i64 = -4;

/// Receiver of raw term blocks polled from an [`Image`].
///
/// Blocks are delivered strictly in stream order and contiguous from the
/// stream's initial position. When the image's log buffer is itself a
/// mapped file, `file_region` carries `(file, byte offset)` so the handler
/// can use a file-to-file transfer instead of copying through user space;
/// `term_buffer` always holds the same bytes.
pub trait RawBlockHandler {
    #[allow(clippy::too_many_arguments)]
    fn on_block(
        &mut self,
        file_region: Option<(&File, u64)>,
        term_buffer: &[u8],
        term_offset: i32,
        block_length: i32,
        session_id: i32,
        term_id: i32,
    ) -> Result<()>;
}

/// Upstream view of one live stream delivered by the transport.
pub trait Image {
    fn term_buffer_length(&self) -> i32;
    fn initial_term_id(&self) -> i32;
    fn mtu_length(&self) -> i32;
    fn session_id(&self) -> i32;
    fn stream_id(&self) -> i32;
    fn channel(&self) -> String;
    fn source_identity(&self) -> String;
    fn is_closed(&self) -> bool;

    /// Poll up to `byte_limit` bytes of newly available blocks into
    /// `handler`, returning the number of bytes delivered. A handler error
    /// stops the poll and surfaces unchanged.
    fn raw_poll(&mut self, handler: &mut dyn RawBlockHandler, byte_limit: i32) -> Result<i32>;
}

/// A reserved writable region in an outbound publication.
///
/// One claim instance is reused across fragments: the publication prepares
/// it on a successful `try_claim`, the session fills the payload and header
/// fields, and `commit` hands it back.
#[derive(Debug, Default)]
pub struct BufferClaim {
    buffer: Vec<u8>,
    flags: u8,
    reserved_value: i64,
    header_type: u16,
}

impl BufferClaim {
    /// Reset the claim for a fresh reservation of `length` bytes.
    /// Called by the publication inside `try_claim`.
    pub fn prepare(&mut self, length: usize) {
        self.buffer.clear();
        self.buffer.resize(length, 0);
        self.flags = 0;
        self.reserved_value = 0;
        self.header_type = 0;
    }

    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    #[must_use]
    pub fn reserved_value(&self) -> i64 {
        self.reserved_value
    }

    pub fn set_reserved_value(&mut self, value: i64) {
        self.reserved_value = value;
    }

    #[must_use]
    pub fn header_type(&self) -> u16 {
        self.header_type
    }

    pub fn set_header_type(&mut self, header_type: u16) {
        self.header_type = header_type;
    }
}

/// Outbound publication the replay session copies fragments into.
pub trait ReplayPublication {
    fn is_connected(&self) -> bool;

    /// Reserve `length` bytes. On success returns the resulting stream
    /// position (> 0) and prepares `claim`; otherwise returns one of the
    /// `PUBLICATION_*` sentinels.
    fn try_claim(&mut self, length: i32, claim: &mut BufferClaim) -> i64;

    /// Commit a claim prepared by the last successful `try_claim`.
    fn commit(&mut self, claim: &mut BufferClaim);
}

/// Factory for outbound replay publications.
///
/// The replay session only learns the original stream's `mtu`, initial term
/// id and term length from the descriptor during INIT, so publication
/// creation is deferred behind this seam; the transport must produce a
/// publication whose framing and position arithmetic match those values.
pub trait ReplayPublicationSupplier {
    #[allow(clippy::too_many_arguments)]
    fn new_replay_publication(
        &mut self,
        channel: &str,
        stream_id: i32,
        from_position: i64,
        mtu_length: i32,
        initial_term_id: i32,
        term_buffer_length: i32,
    ) -> Result<Box<dyn ReplayPublication>>;
}

/// Control-plane responder for replay requests.
pub trait ControlResponder {
    fn is_connected(&self) -> bool;
    fn send_ok(&mut self, correlation_id: i64);
    fn send_error(&mut self, correlation_id: i64, message: &str);
}

/// Fire-and-forget recording lifecycle notifications.
pub trait Notifications {
    fn recording_started(
        &mut self,
        recording_id: i64,
        source: &str,
        session_id: i32,
        channel: &str,
        stream_id: i32,
    );

    fn recording_progress(&mut self, recording_id: i64, initial_position: i64, last_position: i64);

    fn recording_stopped(&mut self, recording_id: i64);
}
