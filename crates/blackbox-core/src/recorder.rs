//! Recorder: the write side of the engine.
//!
//! A recorder exclusively owns one recording for its active life: the
//! mapped descriptor, the currently open segment file and the write cursor.
//! Blocks must arrive strictly in-order and contiguous from the stream's
//! initial position; the first write must come from the publication start
//! (`term_id == initial_term_id`). Those preconditions let every accepted
//! write be a single contiguous transfer at a masked-shift file offset,
//! which is the hot path.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::clock::EpochClock;
use crate::descriptor::{DescriptorWriter, RecordingDescriptor};
use crate::error::{RecorderError, Result};
use crate::frame::{align, FrameHeader, FRAME_ALIGNMENT};
use crate::layout::{create_fixed_size_file, segment_file_path};
use crate::position::TermGeometry;
use crate::transport::RawBlockHandler;

/// Write offset sentinel before the first block arrives.
const NO_RECORDING_POSITION: i32 = -1;

/// Everything needed to build a [`Recorder`] for one recording.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub recording_id: i64,
    pub archive_dir: PathBuf,
    pub term_buffer_length: i32,
    pub segment_file_length: i32,
    pub initial_term_id: i32,
    pub mtu_length: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub source: String,
    pub channel: String,
    pub force_writes: bool,
    pub force_metadata_updates: bool,
}

/// Stateful writer for one recording.
pub struct Recorder {
    recording_id: i64,
    archive_dir: PathBuf,
    geometry: TermGeometry,
    clock: Rc<dyn EpochClock>,
    force_writes: bool,

    descriptor: Option<DescriptorWriter>,
    segment: Option<File>,

    /// Write offset within the current segment, [`NO_RECORDING_POSITION`]
    /// until the first block is accepted.
    recording_position: i32,
    segment_index: i64,
    initial_position: i64,
    last_position: i64,

    stopped: bool,
    closed: bool,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("recording_id", &self.recording_id)
            .field("archive_dir", &self.archive_dir)
            .field("geometry", &self.geometry)
            .field("force_writes", &self.force_writes)
            .field("descriptor", &self.descriptor)
            .field("segment", &self.segment)
            .field("recording_position", &self.recording_position)
            .field("segment_index", &self.segment_index)
            .field("initial_position", &self.initial_position)
            .field("last_position", &self.last_position)
            .field("stopped", &self.stopped)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Recorder {
    /// Create the recording's metadata file exclusively and write the
    /// initial descriptor with all positions and times unset.
    pub fn create(config: RecorderConfig, clock: Rc<dyn EpochClock>) -> Result<Self> {
        let geometry = TermGeometry::new(
            config.term_buffer_length,
            config.segment_file_length,
            config.initial_term_id,
        )?;

        let descriptor = RecordingDescriptor::new_unstarted(
            config.recording_id,
            config.term_buffer_length,
            config.segment_file_length,
            config.mtu_length,
            config.initial_term_id,
            config.session_id,
            config.stream_id,
            config.source,
            config.channel,
        );
        let writer =
            DescriptorWriter::create(&config.archive_dir, &descriptor, config.force_metadata_updates)?;

        Ok(Self {
            recording_id: config.recording_id,
            archive_dir: config.archive_dir,
            geometry,
            clock,
            force_writes: config.force_writes,
            descriptor: Some(writer),
            segment: None,
            recording_position: NO_RECORDING_POSITION,
            segment_index: 0,
            initial_position: crate::position::NULL_POSITION,
            last_position: crate::position::NULL_POSITION,
            stopped: false,
            closed: false,
        })
    }

    /// Record a single frame from an in-memory term buffer.
    ///
    /// The frame occupies its aligned extent within the term, so the write
    /// length is `frame_length` rounded up to the frame alignment; the pad
    /// bytes are part of the stream and keep later writes contiguous.
    pub fn on_fragment(&mut self, term_buffer: &[u8], header: &FrameHeader) -> Result<()> {
        let length = align(header.frame_length, FRAME_ALIGNMENT);
        self.guarded_write(None, term_buffer, header.term_offset, length, header.term_id)
    }

    /// Mark the recording stopped: stamp `end_time` and force the
    /// descriptor out. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        let end_time = self.clock.epoch_ms();
        let descriptor = self.descriptor_mut()?;
        descriptor.set_end_time(end_time)?;
        descriptor.flush()?;
        self.stopped = true;
        Ok(())
    }

    /// Close segment and metadata handles, running [`Recorder::stop`] first
    /// if it has not run. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.segment = None;
        let stop_result = if self.descriptor.is_some() {
            self.stop()
        } else {
            Ok(())
        };
        self.descriptor = None;
        self.closed = true;
        stop_result
    }

    #[must_use]
    pub fn recording_id(&self) -> i64 {
        self.recording_id
    }

    #[must_use]
    pub fn initial_position(&self) -> i64 {
        self.initial_position
    }

    #[must_use]
    pub fn last_position(&self) -> i64 {
        self.last_position
    }

    #[must_use]
    pub fn segment_file_length(&self) -> i32 {
        self.geometry.segment_file_length()
    }

    /// Current write offset within the active segment, or -1 before the
    /// first accepted block.
    #[must_use]
    pub fn recording_position(&self) -> i32 {
        self.recording_position
    }

    #[must_use]
    pub fn segment_index(&self) -> i64 {
        self.segment_index
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Decode the live descriptor, e.g. to refresh the catalog at stop.
    pub fn descriptor_snapshot(&self) -> Result<RecordingDescriptor> {
        let descriptor = self.descriptor.as_ref().ok_or(RecorderError::Closed {
            recording_id: self.recording_id,
        })?;
        Ok(descriptor.snapshot()?)
    }

    fn descriptor_mut(&mut self) -> std::result::Result<&mut DescriptorWriter, RecorderError> {
        self.descriptor.as_mut().ok_or(RecorderError::Closed {
            recording_id: self.recording_id,
        })
    }

    /// A failed write latches the recorder closed before the error
    /// propagates; every later write is rejected without touching disk.
    fn guarded_write(
        &mut self,
        file_region: Option<(&File, u64)>,
        term_buffer: &[u8],
        term_offset: i32,
        length: i32,
        term_id: i32,
    ) -> Result<()> {
        let result = self.write_block(file_region, term_buffer, term_offset, length, term_id);
        if result.is_err() {
            self.close_quietly();
        }
        result
    }

    fn write_block(
        &mut self,
        file_region: Option<(&File, u64)>,
        term_buffer: &[u8],
        term_offset: i32,
        length: i32,
        term_id: i32,
    ) -> Result<()> {
        self.prepare_write(term_id, term_offset, length)?;

        let segment = self.segment.as_mut().ok_or(RecorderError::Closed {
            recording_id: self.recording_id,
        })?;

        match file_region {
            Some((file, offset)) => transfer_file_region(file, offset, length as u64, segment)?,
            None => {
                let start = term_offset as usize;
                let end = start + length as usize;
                if length < 0 || term_buffer.len() < end {
                    return Err(RecorderError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!(
                            "block [{start}..{end}) outside term buffer of {} bytes",
                            term_buffer.len()
                        ),
                    ))
                    .into());
                }
                segment.write_all(&term_buffer[start..end])?;
            }
        }

        if self.force_writes {
            segment.sync_data()?;
        }

        self.finish_write(term_id, term_offset, length)
    }

    fn prepare_write(&mut self, term_id: i32, term_offset: i32, length: i32) -> Result<()> {
        if self.closed {
            return Err(RecorderError::Closed {
                recording_id: self.recording_id,
            }
            .into());
        }

        let first_write = self.recording_position == NO_RECORDING_POSITION;
        if first_write && term_id != self.geometry.initial_term_id() {
            return Err(RecorderError::OutOfOrderStart {
                expected: self.geometry.initial_term_id(),
                actual: term_id,
            }
            .into());
        }

        if self.geometry.crosses_term(term_offset, length) {
            return Err(RecorderError::CrossesTerm {
                term_offset,
                length,
                term_buffer_length: self.geometry.term_buffer_length(),
            }
            .into());
        }

        if first_write {
            self.new_segment_file()?;
            if let Some(segment) = self.segment.as_mut() {
                segment.seek(SeekFrom::Start(term_offset as u64))?;
            }
            self.recording_position = term_offset;
            self.initial_position = i64::from(term_offset);
            let start_time = self.clock.epoch_ms();
            let initial_position = self.initial_position;
            let descriptor = self.descriptor_mut()?;
            descriptor.set_initial_position(initial_position)?;
            descriptor.set_start_time(start_time)?;
        } else {
            let segment_offset = self.geometry.segment_offset(term_id, term_offset);
            if segment_offset != self.recording_position {
                return Err(RecorderError::NonContiguous {
                    expected: self.recording_position,
                    actual: segment_offset,
                }
                .into());
            }
        }

        Ok(())
    }

    fn finish_write(&mut self, term_id: i32, term_offset: i32, length: i32) -> Result<()> {
        self.recording_position = self.geometry.segment_offset(term_id, term_offset) + length;
        self.last_position = self.geometry.position(term_id, term_offset) + i64::from(length);
        let last_position = self.last_position;
        self.descriptor_mut()?.set_last_position(last_position)?;

        if self.recording_position == self.geometry.segment_file_length() {
            self.segment = None;
            self.recording_position = 0;
            self.segment_index += 1;
            self.new_segment_file()?;
            debug!(
                recording_id = self.recording_id,
                segment_index = self.segment_index,
                "rolled recording into new segment file"
            );
        }

        Ok(())
    }

    fn new_segment_file(&mut self) -> Result<()> {
        let path = segment_file_path(&self.archive_dir, self.recording_id, self.segment_index);
        let file = create_fixed_size_file(&path, self.geometry.segment_file_length() as u64)
            .map_err(RecorderError::Io)?;
        self.segment = Some(file);
        Ok(())
    }

    fn close_quietly(&mut self) {
        if let Err(err) = self.close() {
            warn!(
                recording_id = self.recording_id,
                error = %err,
                "recorder close after failed write also failed"
            );
        }
    }
}

impl RawBlockHandler for Recorder {
    fn on_block(
        &mut self,
        file_region: Option<(&File, u64)>,
        term_buffer: &[u8],
        term_offset: i32,
        block_length: i32,
        _session_id: i32,
        term_id: i32,
    ) -> Result<()> {
        self.guarded_write(file_region, term_buffer, term_offset, block_length, term_id)
    }
}

/// Bounded file-to-file transfer of one block.
///
/// `std::io::copy` lowers to a kernel copy when both ends are files, so a
/// file-backed image log buffer never round-trips through user space.
fn transfer_file_region(
    source: &File,
    offset: u64,
    length: u64,
    segment: &mut File,
) -> std::io::Result<()> {
    let mut handle: &File = source;
    handle.seek(SeekFrom::Start(offset))?;
    let mut region = handle.take(length);
    let copied = std::io::copy(&mut region, segment)?;
    if copied != length {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short block transfer: {copied} of {length} bytes"),
        ));
    }
    Ok(())
}
