//! Per-recording descriptor record.
//!
//! Every recording begins with a fixed 4096-byte descriptor block at the
//! head of its metadata file. The block is written once at recorder
//! construction; during live recording only five scalars are point-updated
//! in place on the writer's memory mapping (`initial_position`,
//! `last_position`, `start_time`, `end_time` and the encoded-length prefix).
//! Readers open an independent read-only handle and copy the scalars out,
//! so a live reader observes a stale but self-consistent snapshot.
//!
//! Layout (all values little-endian, scalars individually aligned):
//!
//! ```text
//! offset  0  i32  encoded_length
//! offset  4  i32  version
//! offset  8  i64  recording_id
//! offset 16  i64  start_time        (epoch ms, -1 until first write)
//! offset 24  i64  end_time          (epoch ms, -1 until stop)
//! offset 32  i64  initial_position  (-1 until first write)
//! offset 40  i64  last_position     (-1 until first write)
//! offset 48  i32  term_buffer_length
//! offset 52  i32  segment_file_length
//! offset 56  i32  mtu_length
//! offset 60  i32  initial_term_id
//! offset 64  i32  session_id
//! offset 68  i32  stream_id
//! offset 72       source  (u32 length prefix + UTF-8 bytes)
//!                 channel (u32 length prefix + UTF-8 bytes)
//! ```

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;

use memmap2::MmapMut;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DescriptorError};
use crate::frame::{read_i32, read_i64, write_i32, write_i64};
use crate::layout::metadata_file_path;
use crate::position::{TermGeometry, NULL_POSITION};

/// Size of the descriptor block mapped at the head of the metadata file.
pub const DESCRIPTOR_BLOCK_LENGTH: usize = 4096;

/// Current descriptor schema version.
pub const DESCRIPTOR_VERSION: i32 = 1;

const ENCODED_LENGTH_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const RECORDING_ID_OFFSET: usize = 8;
const START_TIME_OFFSET: usize = 16;
const END_TIME_OFFSET: usize = 24;
const INITIAL_POSITION_OFFSET: usize = 32;
const LAST_POSITION_OFFSET: usize = 40;
const TERM_BUFFER_LENGTH_OFFSET: usize = 48;
const SEGMENT_FILE_LENGTH_OFFSET: usize = 52;
const MTU_LENGTH_OFFSET: usize = 56;
const INITIAL_TERM_ID_OFFSET: usize = 60;
const SESSION_ID_OFFSET: usize = 64;
const STREAM_ID_OFFSET: usize = 68;
const STRINGS_OFFSET: usize = 72;

/// Decoded recording descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingDescriptor {
    pub recording_id: i64,
    pub term_buffer_length: i32,
    pub segment_file_length: i32,
    pub mtu_length: i32,
    pub initial_term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub source: String,
    pub channel: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub initial_position: i64,
    pub last_position: i64,
}

impl RecordingDescriptor {
    /// Descriptor for a recording that has not accepted any bytes yet.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new_unstarted(
        recording_id: i64,
        term_buffer_length: i32,
        segment_file_length: i32,
        mtu_length: i32,
        initial_term_id: i32,
        session_id: i32,
        stream_id: i32,
        source: String,
        channel: String,
    ) -> Self {
        Self {
            recording_id,
            term_buffer_length,
            segment_file_length,
            mtu_length,
            initial_term_id,
            session_id,
            stream_id,
            source,
            channel,
            start_time_ms: NULL_POSITION,
            end_time_ms: NULL_POSITION,
            initial_position: NULL_POSITION,
            last_position: NULL_POSITION,
        }
    }

    /// Term/segment geometry recorded in this descriptor.
    pub fn geometry(&self) -> Result<TermGeometry, ConfigError> {
        TermGeometry::new(
            self.term_buffer_length,
            self.segment_file_length,
            self.initial_term_id,
        )
    }

    /// Load the descriptor of `recording_id` through a fresh read-only
    /// handle. A missing file surfaces as an I/O error; callers that need
    /// a typed not-found check the path first.
    pub fn load(archive_dir: &Path, recording_id: i64) -> Result<Self, DescriptorError> {
        let path = metadata_file_path(archive_dir, recording_id);
        let mut file = File::open(path)?;
        let mut block = vec![0u8; DESCRIPTOR_BLOCK_LENGTH];
        file.read_exact(&mut block)?;
        Self::decode(&block)
    }

    /// Decode a descriptor block.
    pub fn decode(block: &[u8]) -> Result<Self, DescriptorError> {
        if block.len() < STRINGS_OFFSET + 8 {
            return Err(DescriptorError::Truncated {
                len: block.len(),
                need: STRINGS_OFFSET + 8,
            });
        }

        let version = read_i32(block, VERSION_OFFSET);
        if version != DESCRIPTOR_VERSION {
            return Err(DescriptorError::Version {
                expected: DESCRIPTOR_VERSION,
                actual: version,
            });
        }

        let (source, next) = decode_string(block, STRINGS_OFFSET, "source")?;
        let (channel, _) = decode_string(block, next, "channel")?;

        Ok(Self {
            recording_id: read_i64(block, RECORDING_ID_OFFSET),
            term_buffer_length: read_i32(block, TERM_BUFFER_LENGTH_OFFSET),
            segment_file_length: read_i32(block, SEGMENT_FILE_LENGTH_OFFSET),
            mtu_length: read_i32(block, MTU_LENGTH_OFFSET),
            initial_term_id: read_i32(block, INITIAL_TERM_ID_OFFSET),
            session_id: read_i32(block, SESSION_ID_OFFSET),
            stream_id: read_i32(block, STREAM_ID_OFFSET),
            source,
            channel,
            start_time_ms: read_i64(block, START_TIME_OFFSET),
            end_time_ms: read_i64(block, END_TIME_OFFSET),
            initial_position: read_i64(block, INITIAL_POSITION_OFFSET),
            last_position: read_i64(block, LAST_POSITION_OFFSET),
        })
    }

    /// Encode the full descriptor into `block`, returning the encoded
    /// length. The encoded-length prefix itself is left for the caller so
    /// it can be written last.
    pub fn encode(&self, block: &mut [u8]) -> Result<usize, DescriptorError> {
        let need = STRINGS_OFFSET + 8 + self.source.len() + self.channel.len();
        if need > block.len() {
            return Err(DescriptorError::Overflow { block: block.len() });
        }

        write_i32(block, VERSION_OFFSET, DESCRIPTOR_VERSION);
        write_i64(block, RECORDING_ID_OFFSET, self.recording_id);
        write_i64(block, START_TIME_OFFSET, self.start_time_ms);
        write_i64(block, END_TIME_OFFSET, self.end_time_ms);
        write_i64(block, INITIAL_POSITION_OFFSET, self.initial_position);
        write_i64(block, LAST_POSITION_OFFSET, self.last_position);
        write_i32(block, TERM_BUFFER_LENGTH_OFFSET, self.term_buffer_length);
        write_i32(block, SEGMENT_FILE_LENGTH_OFFSET, self.segment_file_length);
        write_i32(block, MTU_LENGTH_OFFSET, self.mtu_length);
        write_i32(block, INITIAL_TERM_ID_OFFSET, self.initial_term_id);
        write_i32(block, SESSION_ID_OFFSET, self.session_id);
        write_i32(block, STREAM_ID_OFFSET, self.stream_id);

        let next = encode_string(block, STRINGS_OFFSET, &self.source);
        let next = encode_string(block, next, &self.channel);
        Ok(next)
    }
}

fn encode_string(block: &mut [u8], offset: usize, value: &str) -> usize {
    write_i32(block, offset, value.len() as i32);
    let start = offset + 4;
    block[start..start + value.len()].copy_from_slice(value.as_bytes());
    start + value.len()
}

fn decode_string(
    block: &[u8],
    offset: usize,
    field: &'static str,
) -> Result<(String, usize), DescriptorError> {
    if block.len() < offset + 4 {
        return Err(DescriptorError::Truncated {
            len: block.len(),
            need: offset + 4,
        });
    }
    let len = read_i32(block, offset);
    if len < 0 {
        return Err(DescriptorError::InvalidString { field });
    }
    let start = offset + 4;
    let end = start + len as usize;
    if block.len() < end {
        return Err(DescriptorError::Truncated {
            len: block.len(),
            need: end,
        });
    }
    let value = std::str::from_utf8(&block[start..end])
        .map_err(|_| DescriptorError::InvalidString { field })?
        .to_owned();
    Ok((value, end))
}

/// Exclusive writer over a recording's mapped descriptor block.
///
/// Owned by the recorder for the recording's active life. Point updates
/// touch a single aligned scalar each and are flushed iff the recording is
/// configured with `force_metadata_updates`.
#[derive(Debug)]
pub struct DescriptorWriter {
    mmap: MmapMut,
    force_metadata_updates: bool,
}

impl DescriptorWriter {
    /// Create the metadata file exclusively, map it read-write and write
    /// the initial descriptor. Fails if the file already exists.
    pub fn create(
        archive_dir: &Path,
        descriptor: &RecordingDescriptor,
        force_metadata_updates: bool,
    ) -> Result<Self, DescriptorError> {
        let path = metadata_file_path(archive_dir, descriptor.recording_id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(DESCRIPTOR_BLOCK_LENGTH as u64)?;

        // SAFETY: the file was just created with create_new, sized to the
        // block length, and this mapping is the only writer.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let encoded = descriptor.encode(&mut mmap)?;
        write_i32(&mut mmap, ENCODED_LENGTH_OFFSET, encoded as i32);
        mmap.flush()?;

        Ok(Self {
            mmap,
            force_metadata_updates,
        })
    }

    pub fn set_initial_position(&mut self, value: i64) -> std::io::Result<()> {
        self.put_i64(INITIAL_POSITION_OFFSET, value)
    }

    pub fn set_last_position(&mut self, value: i64) -> std::io::Result<()> {
        self.put_i64(LAST_POSITION_OFFSET, value)
    }

    pub fn set_start_time(&mut self, epoch_ms: i64) -> std::io::Result<()> {
        self.put_i64(START_TIME_OFFSET, epoch_ms)
    }

    pub fn set_end_time(&mut self, epoch_ms: i64) -> std::io::Result<()> {
        self.put_i64(END_TIME_OFFSET, epoch_ms)
    }

    /// Force the mapped block to durable storage regardless of policy.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.mmap.flush()
    }

    /// Decode the current state of the mapped descriptor.
    pub fn snapshot(&self) -> Result<RecordingDescriptor, DescriptorError> {
        RecordingDescriptor::decode(&self.mmap)
    }

    fn put_i64(&mut self, offset: usize, value: i64) -> std::io::Result<()> {
        write_i64(&mut self.mmap, offset, value);
        if self.force_metadata_updates {
            self.mmap.flush()?;
        }
        Ok(())
    }
}
