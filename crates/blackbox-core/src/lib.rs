//! blackbox-core: recording and replay engine for the blackbox stream
//! archive.
//!
//! The archival plane of a low-latency publish/subscribe transport: every
//! byte of a live term-partitioned stream is written durably into pre-sized
//! segment files, and can later be reconstituted — original framing and
//! positions preserved — into a new publication for a requesting client.
//!
//! # Architecture
//!
//! ```text
//! Image (live stream) → RecordingSession → Recorder → segment files
//!                                              │           + descriptor
//!                                              ▼
//!                                         ArchiveCatalog
//!                                              ▲
//! ReplayPublication ← ReplaySession ← FragmentCursor ← segment files
//! ```
//!
//! Everything runs on one cooperative thread: a conductor (out of scope
//! here) ticks every active [`Session`] and each tick performs a bounded
//! amount of work. Blocks must arrive in order and contiguous; a recording
//! admits exactly one writer for its active life.
//!
//! # Modules
//!
//! - `position`: stream position ↔ term ↔ segment arithmetic
//! - `layout`: archive directory naming and pre-sized files
//! - `frame`: the transport's 32-byte frame header flyweight
//! - `descriptor`: per-recording metadata block, mapped and point-updated
//! - `recorder`: the in-order write state machine
//! - `cursor`: forward-only fragment reader for replay
//! - `record_session` / `replay_session`: cooperative session state machines
//! - `catalog`: recording registry for one archive directory
//! - `transport`: collaborator seams (image, publications, notifications)
//! - `config` / `logging` / `clock` / `error`: ambient plumbing

pub mod catalog;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod layout;
pub mod logging;
pub mod position;
pub mod record_session;
pub mod recorder;
pub mod replay_session;
pub mod session;
pub mod transport;

pub use catalog::{ArchiveCatalog, Catalog};
pub use clock::{EpochClock, ManualEpochClock, SystemEpochClock};
pub use config::ArchiveConfig;
pub use cursor::{ControlledFragmentHandler, FragmentCursor};
pub use descriptor::{DescriptorWriter, RecordingDescriptor};
pub use error::{ArchiveError, ErrorKind, Result};
pub use frame::FrameHeader;
pub use record_session::RecordingSession;
pub use recorder::{Recorder, RecorderConfig};
pub use replay_session::{ReplayRequest, ReplaySession, REPLAY_SEND_BATCH_SIZE};
pub use session::Session;
pub use transport::{
    BufferClaim, ControlResponder, Image, Notifications, RawBlockHandler, ReplayPublication,
    ReplayPublicationSupplier,
};
