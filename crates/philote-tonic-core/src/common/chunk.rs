//! Splitting flat buffers into bounded chunks and writing them back.
//!
//! Ranges are half-open: a chunk covering `start..end` carries exactly
//! `end - start` values. Both directions of the protocol use the same
//! convention.

use crate::{Error, Result, pair_map::PairMap};
use core::ops::Range;

/// Partitions `0..total` into ascending, contiguous ranges of at most
/// `max_chunk` elements. The last range may be shorter.
///
/// `total == 0` yields nothing. A `max_chunk` of zero is treated as one.
pub fn chunk_ranges(total: usize, max_chunk: usize) -> impl Iterator<Item = Range<usize>> {
    let step = max_chunk.max(1);
    (0..total)
        .step_by(step)
        .map(move |start| start..total.min(start + step))
}

/// Writes `values` into `buf[start..end]`.
///
/// # Errors
///
/// - [`Error::EmptyChunk`] if `values` is empty.
/// - [`Error::ChunkOutOfBounds`] if the range is empty, inverted or exceeds
///   `buf`.
/// - [`Error::ChunkLengthMismatch`] if `values.len() != end - start`.
pub fn scatter(buf: &mut [f64], name: &str, start: u64, end: u64, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::EmptyChunk {
            name: name.to_string(),
        });
    }

    let out_of_bounds = || Error::ChunkOutOfBounds {
        name: name.to_string(),
        start,
        end,
        size: buf.len(),
    };
    let (Ok(b), Ok(e)) = (usize::try_from(start), usize::try_from(end)) else {
        return Err(out_of_bounds());
    };
    if b >= e || e > buf.len() {
        return Err(out_of_bounds());
    }

    if values.len() != e - b {
        return Err(Error::ChunkLengthMismatch {
            name: name.to_string(),
            expected: end - start,
            actual: values.len(),
        });
    }

    buf[b..e].copy_from_slice(values);
    Ok(())
}

/// Per-array progress of an inbound stream.
///
/// Chunks of one array must start where the previous one ended, beginning at
/// zero, so every element is written exactly once. Arrays are keyed by
/// `(name, subname)`; variables use an empty subname.
#[derive(Debug, Default)]
pub struct ChunkCursor {
    /// `(next expected start, array length)`
    progress: PairMap<(u64, usize)>,
}

impl ChunkCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a chunk starting at `start` and ending at `end` for an array
    /// of `size` elements.
    ///
    /// # Errors
    ///
    /// [`Error::ChunkOutOfOrder`] if `start` is not where the array's previous
    /// chunk ended (zero for the first one).
    pub fn advance(&mut self, name: &str, subname: &str, start: u64, end: u64, size: usize) -> Result<()> {
        let expected = self.progress.get(name, subname).map_or(0, |&(next, _)| next);
        if start != expected {
            return Err(Error::ChunkOutOfOrder {
                name: label(name, subname),
                start,
                expected,
            });
        }
        self.progress.set(name, subname, (end, size));
        Ok(())
    }

    /// Checks that every array seen so far was filled to the end. Arrays that
    /// never received a chunk are not tracked and pass.
    ///
    /// # Errors
    ///
    /// [`Error::IncompleteArray`] for the first array left short.
    pub fn finish(&self) -> Result<()> {
        match self
            .progress
            .iter()
            .find(|&(_, _, &(next, size))| next != size as u64)
        {
            Some((name, subname, &(received, size))) => Err(Error::IncompleteArray {
                name: label(name, subname),
                received,
                size,
            }),
            None => Ok(()),
        }
    }
}

fn label(name: &str, subname: &str) -> String {
    if subname.is_empty() {
        name.to_string()
    } else {
        format!("{name}/{subname}")
    }
}
