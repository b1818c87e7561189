//! Segment naming and write planning.
//!
//! A segmented object at store path `p` keeps its data in the segments
//! container as `p/0000000000000001`, `p/0000000000000002`, ... Every
//! segment but the last holds exactly one chunk, so sequence `n` covers
//! logical bytes `[(n - 1) * chunk, n * chunk)`.

use std::ops::Range;

/// Suffix appended to the primary container to name the segments container.
pub const SEGMENTS_SUFFIX: &str = "_segments";

/// Width of the zero-padded sequence number in segment names.
pub const SEQUENCE_WIDTH: usize = 16;

pub fn segments_container(container: &str) -> String {
    format!("{container}{SEGMENTS_SUFFIX}")
}

/// Common prefix of every segment of `store_path`.
pub fn segment_prefix(store_path: &str) -> String {
    format!("{store_path}/")
}

pub fn segment_name(store_path: &str, sequence: u64) -> String {
    format!("{store_path}/{sequence:0width$}", width = SEQUENCE_WIDTH)
}

/// Sequence number of `name` if it is a segment directly under `prefix`.
pub fn parse_sequence(prefix: &str, name: &str) -> Option<u64> {
    let digits = name.strip_prefix(prefix)?;
    if digits.len() != SEQUENCE_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// An existing short terminal segment that must be zero-extended to a full
/// chunk before later segments are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TailCompletion {
    pub sequence: u64,
    pub length: u64,
}

/// Where a write at a given offset lands, and what padding precedes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentPlan {
    /// First segment that receives caller data.
    pub sequence: u64,
    /// Logical offset at which that segment starts.
    pub cursor: u64,
    /// Leading bytes of the existing target segment kept as-is.
    pub retained: u64,
    /// Zero bytes between the retained bytes and the write offset.
    pub zero_fill: u64,
    pub complete_tail: Option<TailCompletion>,
    /// Sequences written as whole zero chunks before the target segment.
    pub zero_segments: Range<u64>,
}

impl SegmentPlan {
    /// Bytes that precede caller data inside the target segment.
    pub fn prefix_len(&self) -> u64 {
        self.retained + self.zero_fill
    }
}

/// Plan a write at `offset` over existing segments of the given lengths.
///
/// Segments are scanned in order and skipped only while `offset` lies at or
/// past their end; the terminal segment spans a whole chunk even when it is
/// shorter. An offset of exactly `k * chunk_size` therefore starts segment
/// `k + 1`. Offsets beyond the data schedule a zero extension of a short
/// terminal segment, whole zero segments for each full chunk of gap, and a
/// zero prefix for the remainder.
pub fn plan_write(offset: u64, segments: &[u64], chunk_size: u64) -> SegmentPlan {
    let mut cursor = 0;
    let mut sequence = 1;
    let last = segments.len().saturating_sub(1);

    for (index, &length) in segments.iter().enumerate() {
        let span = if index == last {
            length.max(chunk_size)
        } else {
            length
        };
        if offset < cursor + span {
            let intra = offset - cursor;
            let retained = intra.min(length);
            return SegmentPlan {
                sequence,
                cursor,
                retained,
                zero_fill: intra - retained,
                complete_tail: None,
                zero_segments: sequence..sequence,
            };
        }
        cursor += span;
        sequence += 1;
    }

    let complete_tail = match segments.last() {
        Some(&length) if length < chunk_size => Some(TailCompletion {
            sequence: segments.len() as u64,
            length,
        }),
        _ => None,
    };

    let first_zero = sequence;
    let gap_chunks = (offset - cursor) / chunk_size;
    sequence += gap_chunks;
    cursor += gap_chunks * chunk_size;

    SegmentPlan {
        sequence,
        cursor,
        retained: 0,
        zero_fill: offset - cursor,
        complete_tail,
        zero_segments: first_zero..sequence,
    }
}
