//! Fragment cursor: forward-only reader over a recording's bytes.
//!
//! A cursor opens at a requested stream position, walks the
//! `frame_length`-delimited frames embedded in the segment files and yields
//! them as fragments bounded by a byte length. Padding frames advance the
//! position but are not delivered. The cursor is single-threaded and not
//! restartable once done.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::descriptor::RecordingDescriptor;
use crate::error::{ReplayError, Result};
use crate::frame::{frame_length, FrameHeader, HEADER_LENGTH};
use crate::layout::segment_file_path;
use crate::position::TermGeometry;

/// Consumer of fragments yielded by [`FragmentCursor::controlled_poll`].
pub trait ControlledFragmentHandler {
    /// Handle one fragment. `buffer[offset..offset + length]` is the frame
    /// payload; the header carries the original framing fields. Return
    /// `false` to pause polling: the cursor keeps its position and
    /// redelivers the same fragment on the next poll.
    fn on_fragment(
        &mut self,
        buffer: &[u8],
        offset: usize,
        length: usize,
        header: &FrameHeader,
    ) -> Result<bool>;
}

enum Step {
    EndOfData,
    Pause,
    Skip(i32),
    Deliver(i32),
}

/// Seekable reader over one recording.
pub struct FragmentCursor {
    archive_dir: PathBuf,
    recording_id: i64,
    geometry: TermGeometry,
    segment: Option<Mmap>,
    segment_index: i64,
    segment_offset: usize,
    remaining: i64,
    end_of_data: bool,
}

impl FragmentCursor {
    /// Open a cursor at `from_position` for `replay_length` bytes.
    ///
    /// Reads the recording's descriptor to recover its geometry and initial
    /// position, then maps the segment holding `from_position`. Range
    /// validation against the recorded bounds is the caller's concern.
    pub fn open(
        archive_dir: &Path,
        recording_id: i64,
        from_position: i64,
        replay_length: i64,
    ) -> Result<Self> {
        let descriptor = RecordingDescriptor::load(archive_dir, recording_id)?;
        let geometry = descriptor.geometry()?;
        let initial_position = descriptor.initial_position;

        let mut cursor = Self {
            archive_dir: archive_dir.to_path_buf(),
            recording_id,
            geometry,
            segment: None,
            segment_index: geometry.segment_index_for_position(from_position, initial_position),
            segment_offset: geometry.segment_offset_for_position(from_position, initial_position)
                as usize,
            remaining: replay_length,
            end_of_data: false,
        };
        if cursor.remaining > 0 {
            cursor.open_segment()?;
        }
        Ok(cursor)
    }

    /// Poll up to `fragment_limit` fragments into `handler`, returning the
    /// number delivered. Stops early when the replay length is exhausted,
    /// the end of written data is reached, or the handler refuses.
    pub fn controlled_poll(
        &mut self,
        handler: &mut dyn ControlledFragmentHandler,
        fragment_limit: usize,
    ) -> Result<usize> {
        let mut delivered = 0;

        while delivered < fragment_limit && !self.is_done() {
            if self.segment_offset >= self.geometry.segment_file_length() as usize {
                self.roll_segment()?;
            }
            if self.segment.is_none() {
                self.open_segment()?;
            }

            let step = self.next_step(handler)?;
            match step {
                Step::EndOfData => {
                    self.end_of_data = true;
                    break;
                }
                Step::Pause => break,
                Step::Skip(aligned) => self.advance(aligned),
                Step::Deliver(aligned) => {
                    delivered += 1;
                    self.advance(aligned);
                }
            }
        }

        Ok(delivered)
    }

    /// True when the replay range is exhausted or no more frames exist.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.remaining <= 0 || self.end_of_data
    }

    /// Release the current segment mapping.
    pub fn close(&mut self) {
        self.segment = None;
    }

    fn next_step(&mut self, handler: &mut dyn ControlledFragmentHandler) -> Result<Step> {
        let map = self
            .segment
            .as_ref()
            .ok_or_else(|| corrupt(self.recording_id, self.segment_index, "segment not open"))?;

        let length = frame_length(map, self.segment_offset);
        if length <= 0 {
            return Ok(Step::EndOfData);
        }
        if (length as usize) < HEADER_LENGTH {
            return Err(corrupt(
                self.recording_id,
                self.segment_index,
                "frame shorter than its header",
            ));
        }

        let header = FrameHeader::decode(map, self.segment_offset).ok_or_else(|| {
            corrupt(
                self.recording_id,
                self.segment_index,
                "frame header past end of segment",
            )
        })?;
        let aligned = header.aligned_length();
        if self.segment_offset + aligned as usize > map.len() {
            return Err(corrupt(
                self.recording_id,
                self.segment_index,
                "frame extends past end of segment",
            ));
        }

        if header.is_padding() {
            return Ok(Step::Skip(aligned));
        }

        let data_offset = self.segment_offset + HEADER_LENGTH;
        let data_length = header.frame_length as usize - HEADER_LENGTH;
        if handler.on_fragment(map, data_offset, data_length, &header)? {
            Ok(Step::Deliver(aligned))
        } else {
            Ok(Step::Pause)
        }
    }

    fn advance(&mut self, aligned: i32) {
        self.segment_offset += aligned as usize;
        self.remaining -= i64::from(aligned);
    }

    fn roll_segment(&mut self) -> Result<()> {
        self.segment = None;
        self.segment_index += 1;
        self.segment_offset = 0;
        self.open_segment()
    }

    fn open_segment(&mut self) -> Result<()> {
        let path = segment_file_path(&self.archive_dir, self.recording_id, self.segment_index);
        let file = File::open(path).map_err(ReplayError::Io)?;

        // SAFETY: segment files are pre-sized and only ever appended to by
        // their single recorder; the archive directory is exclusive to the
        // engine while mapped.
        let map = unsafe { Mmap::map(&file).map_err(ReplayError::Io)? };
        self.segment = Some(map);
        Ok(())
    }
}

fn corrupt(recording_id: i64, segment_index: i64, reason: &str) -> crate::error::ArchiveError {
    ReplayError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("recording {recording_id} segment {segment_index}: {reason}"),
    ))
    .into()
}
