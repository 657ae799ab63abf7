//! End-to-end record/replay scenarios driven through the session layer.
//!
//! Exercises the full pipeline: a scripted image feeds a recording session,
//! the archive catalog and descriptor track progress, and a replay session
//! copies the recorded fragments into a scripted outbound publication.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;

use blackbox_core::clock::ManualEpochClock;
use blackbox_core::config::ArchiveConfig;
use blackbox_core::descriptor::RecordingDescriptor;
use blackbox_core::error::{ErrorKind, Result};
use blackbox_core::frame::{
    align, FrameHeader, FRAME_ALIGNMENT, HDR_TYPE_DATA, HDR_TYPE_PAD, HEADER_LENGTH, UNFRAGMENTED,
};
use blackbox_core::{
    ArchiveCatalog, BufferClaim, ControlResponder, Image, Notifications, RawBlockHandler,
    RecordingSession, ReplayPublication, ReplayPublicationSupplier, ReplayRequest, ReplaySession,
    Session,
};
use tempfile::tempdir;

// =============================================================================
// Test doubles
// =============================================================================

struct QueuedBlock {
    term: Vec<u8>,
    term_offset: i32,
    length: i32,
    term_id: i32,
}

/// Image that delivers pre-scripted blocks, one per poll.
struct ScriptedImage {
    term_buffer_length: i32,
    initial_term_id: i32,
    blocks: VecDeque<QueuedBlock>,
    closed: Rc<Cell<bool>>,
}

impl ScriptedImage {
    fn new(term_buffer_length: i32, initial_term_id: i32) -> (Self, Rc<Cell<bool>>) {
        let closed = Rc::new(Cell::new(false));
        (
            Self {
                term_buffer_length,
                initial_term_id,
                blocks: VecDeque::new(),
                closed: closed.clone(),
            },
            closed,
        )
    }

    fn queue_block(&mut self, block: QueuedBlock) {
        self.blocks.push_back(block);
    }
}

impl Image for ScriptedImage {
    fn term_buffer_length(&self) -> i32 {
        self.term_buffer_length
    }
    fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }
    fn mtu_length(&self) -> i32 {
        1408
    }
    fn session_id(&self) -> i32 {
        77
    }
    fn stream_id(&self) -> i32 {
        1001
    }
    fn channel(&self) -> String {
        "bb:udp?endpoint=localhost:40456".to_string()
    }
    fn source_identity(&self) -> String {
        "192.168.0.1:40455".to_string()
    }
    fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn raw_poll(&mut self, handler: &mut dyn RawBlockHandler, _byte_limit: i32) -> Result<i32> {
        let Some(block) = self.blocks.pop_front() else {
            return Ok(0);
        };
        let no_file: Option<(&File, u64)> = None;
        handler.on_block(
            no_file,
            &block.term,
            block.term_offset,
            block.length,
            77,
            block.term_id,
        )?;
        Ok(block.length)
    }
}

#[derive(Default)]
struct RecordedNotifications {
    started: Vec<i64>,
    progress: Vec<(i64, i64, i64)>,
    stopped: Vec<i64>,
}

impl Notifications for RecordedNotifications {
    fn recording_started(
        &mut self,
        recording_id: i64,
        _source: &str,
        _session_id: i32,
        _channel: &str,
        _stream_id: i32,
    ) {
        self.started.push(recording_id);
    }

    fn recording_progress(&mut self, recording_id: i64, initial_position: i64, last_position: i64) {
        self.progress.push((recording_id, initial_position, last_position));
    }

    fn recording_stopped(&mut self, recording_id: i64) {
        self.stopped.push(recording_id);
    }
}

#[derive(Default)]
struct RecordedControl {
    oks: Vec<i64>,
    errors: Vec<(i64, String)>,
}

impl ControlResponder for RecordedControl {
    fn is_connected(&self) -> bool {
        true
    }
    fn send_ok(&mut self, correlation_id: i64) {
        self.oks.push(correlation_id);
    }
    fn send_error(&mut self, correlation_id: i64, message: &str) {
        self.errors.push((correlation_id, message.to_string()));
    }
}

type Committed = Rc<RefCell<Vec<(Vec<u8>, u8, i64)>>>;

struct CollectingPublication {
    connected: bool,
    position: i64,
    committed: Committed,
}

impl ReplayPublication for CollectingPublication {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn try_claim(&mut self, length: i32, claim: &mut BufferClaim) -> i64 {
        self.position += i64::from(length);
        claim.prepare(length as usize);
        self.position
    }

    fn commit(&mut self, claim: &mut BufferClaim) {
        self.committed.borrow_mut().push((
            claim.buffer().to_vec(),
            claim.flags(),
            claim.reserved_value(),
        ));
    }
}

struct CollectingSupplier {
    connected: bool,
    committed: Committed,
}

impl ReplayPublicationSupplier for CollectingSupplier {
    fn new_replay_publication(
        &mut self,
        _channel: &str,
        _stream_id: i32,
        _from_position: i64,
        _mtu_length: i32,
        _initial_term_id: i32,
        _term_buffer_length: i32,
    ) -> Result<Box<dyn ReplayPublication>> {
        Ok(Box::new(CollectingPublication {
            connected: self.connected,
            position: 0,
            committed: self.committed.clone(),
        }))
    }
}

// =============================================================================
// Fixture plumbing
// =============================================================================

/// Build one frame inside a fresh term buffer and return it as a block.
fn framed_block(
    term_buffer_length: i32,
    term_id: i32,
    term_offset: i32,
    frame_type: u16,
    payload: &[u8],
    reserved_value: i64,
) -> QueuedBlock {
    let frame_length = HEADER_LENGTH as i32 + payload.len() as i32;
    let mut term = vec![0u8; term_buffer_length as usize];
    let header = FrameHeader {
        frame_length,
        version: 1,
        flags: UNFRAGMENTED,
        frame_type,
        term_offset,
        session_id: 77,
        stream_id: 1001,
        term_id,
        reserved_value,
    };
    header.encode(&mut term, term_offset as usize);
    let start = term_offset as usize + HEADER_LENGTH;
    term[start..start + payload.len()].copy_from_slice(payload);
    QueuedBlock {
        term,
        term_offset,
        length: align(frame_length, FRAME_ALIGNMENT),
        term_id,
    }
}

/// Merge consecutive frames laid into one term into a single block.
fn multi_frame_block(
    term_buffer_length: i32,
    term_id: i32,
    first_term_offset: i32,
    frames: &[(u16, Vec<u8>, i64)],
) -> QueuedBlock {
    let mut term = vec![0u8; term_buffer_length as usize];
    let mut term_offset = first_term_offset;
    for (frame_type, payload, reserved_value) in frames {
        let frame_length = HEADER_LENGTH as i32 + payload.len() as i32;
        let header = FrameHeader {
            frame_length,
            version: 1,
            flags: UNFRAGMENTED,
            frame_type: *frame_type,
            term_offset,
            session_id: 77,
            stream_id: 1001,
            term_id,
            reserved_value: *reserved_value,
        };
        header.encode(&mut term, term_offset as usize);
        let start = term_offset as usize + HEADER_LENGTH;
        term[start..start + payload.len()].copy_from_slice(payload);
        term_offset += align(frame_length, FRAME_ALIGNMENT);
    }
    QueuedBlock {
        term,
        term_offset: first_term_offset,
        length: term_offset - first_term_offset,
        term_id,
    }
}

struct Archive {
    config: ArchiveConfig,
    catalog: Rc<RefCell<ArchiveCatalog>>,
    notifications: Rc<RefCell<RecordedNotifications>>,
    clock: Rc<ManualEpochClock>,
}

impl Archive {
    fn open(dir: &Path, segment_file_length: i32) -> Self {
        Self {
            config: ArchiveConfig {
                archive_dir: dir.to_path_buf(),
                segment_file_length,
                force_writes: false,
                force_metadata_updates: false,
                replay_linger_ms: 1000,
            },
            catalog: Rc::new(RefCell::new(ArchiveCatalog::open(dir).unwrap())),
            notifications: Rc::new(RefCell::new(RecordedNotifications::default())),
            clock: ManualEpochClock::new(10_000),
        }
    }

    fn recording_session(&self, image: ScriptedImage) -> RecordingSession<ScriptedImage> {
        RecordingSession::new(
            image,
            self.config.clone(),
            self.catalog.clone(),
            self.notifications.clone(),
            self.clock.clone(),
        )
    }

    fn replay_session(
        &self,
        request: ReplayRequest,
        connected: bool,
    ) -> (ReplaySession, Rc<RefCell<RecordedControl>>, Committed) {
        let control = Rc::new(RefCell::new(RecordedControl::default()));
        let committed: Committed = Rc::new(RefCell::new(Vec::new()));
        let supplier = Rc::new(RefCell::new(CollectingSupplier {
            connected,
            committed: committed.clone(),
        }));
        let session = ReplaySession::new(
            request,
            &self.config,
            control.clone(),
            supplier,
            self.clock.clone(),
        );
        (session, control, committed)
    }

    fn descriptor(&self, recording_id: i64) -> RecordingDescriptor {
        RecordingDescriptor::load(&self.config.archive_dir, recording_id).unwrap()
    }
}

fn replay_request(recording_id: i64, from_position: i64, replay_length: i64) -> ReplayRequest {
    ReplayRequest {
        recording_id,
        from_position,
        replay_length,
        replay_channel: "bb:udp?endpoint=localhost:40457".to_string(),
        replay_stream_id: 2002,
        correlation_id: 42,
    }
}

/// Drive a session until it reports done, with a tick bound.
fn drive_to_completion(session: &mut dyn Session) {
    for _ in 0..64 {
        let _ = session.do_work();
        if session.is_done() {
            return;
        }
    }
    panic!("session did not complete within the tick bound");
}

// =============================================================================
// Scenarios
// =============================================================================

/// Basic record/replay: two data fragments, the first padded out to 128
/// bytes, recorded from the publication start and replayed verbatim.
#[test]
fn basic_record_and_replay_round_trip() {
    let dir = tempdir().unwrap();
    let archive = Archive::open(dir.path(), 16 * 1024);
    let term_length = 4096;
    let initial_term_id = 7;

    let (mut image, closed) = ScriptedImage::new(term_length, initial_term_id);
    // 64-byte data frame padded to 128 with a padding frame, then a second
    // 64-byte data frame at offset 128.
    image.queue_block(multi_frame_block(
        term_length,
        initial_term_id,
        0,
        &[
            (HDR_TYPE_DATA, vec![0xAB; 32], 7001),
            (HDR_TYPE_PAD, vec![0; 32], 0),
        ],
    ));
    image.queue_block(framed_block(
        term_length,
        initial_term_id,
        128,
        HDR_TYPE_DATA,
        &[0xCD; 32],
        7002,
    ));

    let mut recording = archive.recording_session(image);
    recording.do_work().unwrap();
    recording.do_work().unwrap();
    closed.set(true);
    drive_to_completion(&mut recording);

    let recording_id = recording.recording_id();
    let descriptor = archive.descriptor(recording_id);
    assert_eq!(descriptor.initial_position, 0);
    assert_eq!(descriptor.last_position, 192);
    assert!(descriptor.start_time_ms >= 0);
    assert!(descriptor.end_time_ms >= descriptor.start_time_ms);

    let (mut replay, control, committed) =
        archive.replay_session(replay_request(recording_id, 0, 192), true);
    drive_past_linger(&archive, &mut replay);

    assert_eq!(control.borrow().oks, vec![42]);
    let committed = committed.borrow();
    assert_eq!(committed.len(), 2, "padding must not be replayed");
    assert_eq!(committed[0].0, vec![0xAB; 32]);
    assert_eq!(committed[0].1, UNFRAGMENTED);
    assert_eq!(committed[0].2, 7001);
    assert_eq!(committed[1].0, vec![0xCD; 32]);
    assert_eq!(committed[1].2, 7002);
}

fn drive_past_linger(archive: &Archive, session: &mut ReplaySession) {
    for _ in 0..64 {
        let _ = session.do_work();
        if session.is_done() {
            return;
        }
        archive.clock.advance(250);
    }
    panic!("replay session did not complete");
}

/// Filling a segment exactly creates the next segment file and restarts
/// the write offset at zero.
#[test]
fn segment_rollover_creates_next_file() {
    let dir = tempdir().unwrap();
    let term_length = 1024;
    let segment_length = 2048;
    let archive = Archive::open(dir.path(), segment_length);
    let initial_term_id = 0;

    let (mut image, closed) = ScriptedImage::new(term_length, initial_term_id);
    for term_id in [0, 1] {
        let mut frames = Vec::new();
        // Sixteen 64-byte frames fill one 1024-byte term.
        for i in 0..16 {
            frames.push((HDR_TYPE_DATA, vec![term_id as u8 * 16 + i as u8; 32], i));
        }
        image.queue_block(multi_frame_block(term_length, term_id, 0, &frames));
    }

    let mut recording = archive.recording_session(image);
    recording.do_work().unwrap();
    recording.do_work().unwrap();
    closed.set(true);
    drive_to_completion(&mut recording);

    let recording_id = recording.recording_id();
    let next_segment = dir.path().join(format!("{recording_id}-1.rec"));
    let metadata = std::fs::metadata(&next_segment).unwrap();
    assert_eq!(metadata.len(), segment_length as u64);

    let descriptor = archive.descriptor(recording_id);
    assert_eq!(descriptor.last_position, i64::from(segment_length));
}

/// A first block from the wrong term fails the recording deterministically
/// and leaves the descriptor unstarted.
#[test]
fn out_of_order_start_fails_the_recording() {
    let dir = tempdir().unwrap();
    let term_length = 1024;
    let archive = Archive::open(dir.path(), 2048);
    let initial_term_id = 5;

    let (mut image, _closed) = ScriptedImage::new(term_length, initial_term_id);
    image.queue_block(framed_block(
        term_length,
        initial_term_id + 1,
        0,
        HDR_TYPE_DATA,
        &[1u8; 16],
        0,
    ));

    let mut recording = archive.recording_session(image);
    let err = recording.do_work().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfOrderStart);
    drive_to_completion(&mut recording);

    let descriptor = archive.descriptor(recording.recording_id());
    assert_eq!(descriptor.start_time_ms, -1);
    assert_eq!(descriptor.initial_position, -1);
}

/// Replay requested before the recording's initial position is refused
/// with a message carrying that position, before any cursor is opened.
#[test]
fn replay_before_start_is_refused_with_context() {
    let dir = tempdir().unwrap();
    let term_length = 8192;
    let archive = Archive::open(dir.path(), 16 * 1024);
    let initial_term_id = 3;

    // The publication started mid-term: first frame at offset 4096.
    let (mut image, closed) = ScriptedImage::new(term_length, initial_term_id);
    image.queue_block(framed_block(
        term_length,
        initial_term_id,
        4096,
        HDR_TYPE_DATA,
        &[2u8; 32],
        0,
    ));

    let mut recording = archive.recording_session(image);
    recording.do_work().unwrap();
    closed.set(true);
    drive_to_completion(&mut recording);
    let recording_id = recording.recording_id();
    assert_eq!(archive.descriptor(recording_id).initial_position, 4096);

    let (mut replay, control, committed) =
        archive.replay_session(replay_request(recording_id, 0, 32), true);
    let err = replay.do_work().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BeforeStart);
    assert!(committed.borrow().is_empty());

    let errors = control.borrow().errors.clone();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, 42);
    assert!(errors[0].1.contains("4096"), "message: {}", errors[0].1);

    drive_to_completion(&mut replay);
}

/// The replay range must also end within the recording.
#[test]
fn replay_past_end_is_refused() {
    let dir = tempdir().unwrap();
    let term_length = 1024;
    let archive = Archive::open(dir.path(), 2048);

    let (mut image, closed) = ScriptedImage::new(term_length, 0);
    image.queue_block(framed_block(term_length, 0, 0, HDR_TYPE_DATA, &[3u8; 32], 0));
    let mut recording = archive.recording_session(image);
    recording.do_work().unwrap();
    closed.set(true);
    drive_to_completion(&mut recording);
    let recording_id = recording.recording_id();
    let last = archive.descriptor(recording_id).last_position;

    let (mut replay, control, _committed) =
        archive.replay_session(replay_request(recording_id, 0, last + 64), true);
    let err = replay.do_work().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PastEnd);
    assert_eq!(control.borrow().errors.len(), 1);
}

/// A recording whose segment file has gone missing fails cursor open, not
/// range validation.
#[test]
fn missing_segment_fails_cursor_open() {
    let dir = tempdir().unwrap();
    let term_length = 1024;
    let archive = Archive::open(dir.path(), 2048);

    let (mut image, closed) = ScriptedImage::new(term_length, 0);
    image.queue_block(framed_block(term_length, 0, 0, HDR_TYPE_DATA, &[1u8; 32], 0));
    let mut recording = archive.recording_session(image);
    recording.do_work().unwrap();
    closed.set(true);
    drive_to_completion(&mut recording);
    let recording_id = recording.recording_id();
    let last = archive.descriptor(recording_id).last_position;

    std::fs::remove_file(dir.path().join(format!("{recording_id}-0.rec"))).unwrap();

    let (mut replay, control, _committed) =
        archive.replay_session(replay_request(recording_id, 0, last), true);
    let err = replay.do_work().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CursorOpenFailed);
    assert_eq!(control.borrow().errors.len(), 1);
    drive_to_completion(&mut replay);
}

/// A valid replay whose outbound publication never connects gives up after
/// the linger window without delivering anything.
#[test]
fn disconnected_peer_lapses_after_linger() {
    let dir = tempdir().unwrap();
    let term_length = 1024;
    let archive = Archive::open(dir.path(), 2048);

    let (mut image, closed) = ScriptedImage::new(term_length, 0);
    image.queue_block(framed_block(term_length, 0, 0, HDR_TYPE_DATA, &[4u8; 32], 0));
    let mut recording = archive.recording_session(image);
    recording.do_work().unwrap();
    closed.set(true);
    drive_to_completion(&mut recording);
    let recording_id = recording.recording_id();
    let last = archive.descriptor(recording_id).last_position;

    let (mut replay, control, committed) =
        archive.replay_session(replay_request(recording_id, 0, last), false);

    // The publication exists but never connects; ticks make no progress.
    replay.do_work().unwrap();
    replay.do_work().unwrap();
    assert!(!replay.is_done());

    archive.clock.advance(archive.config.replay_linger_ms + 1);
    replay.do_work().unwrap();
    assert!(replay.is_done());
    assert!(committed.borrow().is_empty());
    assert!(control.borrow().oks.is_empty());
}

/// Skipping bytes violates contiguity and fails the recording.
#[test]
fn non_contiguous_block_fails_the_recording() {
    let dir = tempdir().unwrap();
    let term_length = 1024;
    let archive = Archive::open(dir.path(), 2048);

    let (mut image, _closed) = ScriptedImage::new(term_length, 0);
    image.queue_block(framed_block(term_length, 0, 0, HDR_TYPE_DATA, &[5u8; 224], 0));
    // Skips 256 bytes.
    image.queue_block(framed_block(term_length, 0, 512, HDR_TYPE_DATA, &[6u8; 224], 0));

    let mut recording = archive.recording_session(image);
    recording.do_work().unwrap();
    let err = recording.do_work().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonContiguous);
    drive_to_completion(&mut recording);
}

/// A replay that crosses a segment boundary transparently opens the next
/// segment file.
#[test]
fn replay_straddles_segment_boundary() {
    let dir = tempdir().unwrap();
    let term_length = 1024;
    let segment_length = 2048;
    let archive = Archive::open(dir.path(), segment_length);

    let (mut image, closed) = ScriptedImage::new(term_length, 0);
    // Three terms of sixteen 64-byte frames each: 3072 bytes over two
    // segment files.
    let mut reserved = 0;
    for term_id in 0..3 {
        let mut frames = Vec::new();
        for _ in 0..16 {
            frames.push((HDR_TYPE_DATA, vec![reserved as u8; 32], reserved));
            reserved += 1;
        }
        image.queue_block(multi_frame_block(term_length, term_id, 0, &frames));
    }

    let mut recording = archive.recording_session(image);
    for _ in 0..4 {
        recording.do_work().unwrap();
    }
    closed.set(true);
    drive_to_completion(&mut recording);
    let recording_id = recording.recording_id();
    let last = archive.descriptor(recording_id).last_position;
    assert_eq!(last, 3072);

    let (mut replay, _control, committed) =
        archive.replay_session(replay_request(recording_id, 0, last), true);
    drive_past_linger(&archive, &mut replay);

    let committed = committed.borrow();
    assert_eq!(committed.len(), 48);
    for (i, (payload, _, reserved_value)) in committed.iter().enumerate() {
        assert_eq!(payload, &vec![i as u8; 32]);
        assert_eq!(*reserved_value, i as i64);
    }
}

/// Zero-length replay delivers nothing and terminates after linger.
#[test]
fn zero_length_replay_delivers_nothing() {
    let dir = tempdir().unwrap();
    let term_length = 1024;
    let archive = Archive::open(dir.path(), 2048);

    let (mut image, closed) = ScriptedImage::new(term_length, 0);
    image.queue_block(framed_block(term_length, 0, 0, HDR_TYPE_DATA, &[7u8; 32], 0));
    let mut recording = archive.recording_session(image);
    recording.do_work().unwrap();
    closed.set(true);
    drive_to_completion(&mut recording);
    let recording_id = recording.recording_id();

    let (mut replay, control, committed) =
        archive.replay_session(replay_request(recording_id, 0, 0), true);
    drive_past_linger(&archive, &mut replay);

    assert!(committed.borrow().is_empty());
    assert_eq!(control.borrow().oks, vec![42]);
}

/// Recording lifecycle notifications fire in order with real positions.
#[test]
fn notifications_track_the_recording_lifecycle() {
    let dir = tempdir().unwrap();
    let term_length = 1024;
    let archive = Archive::open(dir.path(), 2048);

    let (mut image, closed) = ScriptedImage::new(term_length, 0);
    image.queue_block(framed_block(term_length, 0, 0, HDR_TYPE_DATA, &[8u8; 32], 0));
    image.queue_block(framed_block(term_length, 0, 64, HDR_TYPE_DATA, &[9u8; 32], 0));

    let mut recording = archive.recording_session(image);
    recording.do_work().unwrap();
    recording.do_work().unwrap();
    closed.set(true);
    drive_to_completion(&mut recording);

    let notifications = archive.notifications.borrow();
    assert_eq!(notifications.started, vec![0]);
    assert_eq!(notifications.stopped, vec![0]);
    assert_eq!(notifications.progress.first(), Some(&(0, 0, 64)));
    assert_eq!(notifications.progress.last(), Some(&(0, 0, 128)));
}
