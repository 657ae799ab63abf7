//! Stream position arithmetic.
//!
//! A stream position is a monotonically increasing byte offset from the
//! stream's start. For a frame at `(term_id, term_offset)` with term buffer
//! length `L` and initial term id `T0`:
//!
//! ```text
//! position = (term_id - T0) * L + term_offset
//! ```
//!
//! Segment files hold a power-of-two number of consecutive terms, so the
//! segment-internal offset of a write is a masked shift, never a division.

use crate::error::ConfigError;

/// Sentinel for positions and timestamps that have not been set yet.
pub const NULL_POSITION: i64 = -1;

/// Validated term/segment sizing for one recording.
///
/// Owns the invariants the rest of the engine relies on: the term buffer
/// length is a positive power of two and the segment file length is a
/// power-of-two multiple of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermGeometry {
    term_buffer_length: i32,
    segment_file_length: i32,
    initial_term_id: i32,
    terms_mask: i32,
}

fn is_power_of_two(value: i32) -> bool {
    value > 0 && (value & (value - 1)) == 0
}

impl TermGeometry {
    pub fn new(
        term_buffer_length: i32,
        segment_file_length: i32,
        initial_term_id: i32,
    ) -> Result<Self, ConfigError> {
        if !is_power_of_two(term_buffer_length) {
            return Err(ConfigError::TermBufferLength(term_buffer_length));
        }
        if segment_file_length <= 0
            || segment_file_length % term_buffer_length != 0
            || !is_power_of_two(segment_file_length / term_buffer_length)
        {
            return Err(ConfigError::SegmentFileLength {
                segment_file_length,
                term_buffer_length,
            });
        }

        Ok(Self {
            term_buffer_length,
            segment_file_length,
            initial_term_id,
            terms_mask: (segment_file_length / term_buffer_length) - 1,
        })
    }

    #[must_use]
    pub fn term_buffer_length(&self) -> i32 {
        self.term_buffer_length
    }

    #[must_use]
    pub fn segment_file_length(&self) -> i32 {
        self.segment_file_length
    }

    #[must_use]
    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    #[must_use]
    pub fn terms_per_segment(&self) -> i32 {
        self.terms_mask + 1
    }

    /// Absolute stream position of `(term_id, term_offset)`.
    #[must_use]
    pub fn position(&self, term_id: i32, term_offset: i32) -> i64 {
        i64::from(term_id - self.initial_term_id) * i64::from(self.term_buffer_length)
            + i64::from(term_offset)
    }

    /// Byte offset of `(term_id, term_offset)` within its segment file.
    #[must_use]
    pub fn segment_offset(&self, term_id: i32, term_offset: i32) -> i32 {
        ((term_id - self.initial_term_id) & self.terms_mask) * self.term_buffer_length
            + term_offset
    }

    /// Index of the segment file holding `term_id`.
    #[must_use]
    pub fn segment_index(&self, term_id: i32) -> i32 {
        (term_id - self.initial_term_id) / self.terms_per_segment()
    }

    /// True when a write of `length` bytes at `term_offset` would straddle
    /// the term boundary.
    #[must_use]
    pub fn crosses_term(&self, term_offset: i32, length: i32) -> bool {
        term_offset + length > self.term_buffer_length
    }

    /// Index of the segment file holding `position`, given the recording's
    /// initial position. The first byte ever recorded lands at file offset
    /// `initial_position % segment_file_length` of segment zero.
    #[must_use]
    pub fn segment_index_for_position(&self, position: i64, initial_position: i64) -> i64 {
        self.relative_offset(position, initial_position) / i64::from(self.segment_file_length)
    }

    /// Byte offset of `position` within the segment file that holds it.
    #[must_use]
    pub fn segment_offset_for_position(&self, position: i64, initial_position: i64) -> i32 {
        (self.relative_offset(position, initial_position) % i64::from(self.segment_file_length))
            as i32
    }

    fn relative_offset(&self, position: i64, initial_position: i64) -> i64 {
        let first_segment_offset = initial_position % i64::from(self.segment_file_length);
        position - initial_position + first_segment_offset
    }
}
