//! In-memory line buffer used to sort a single chunk.

use std::io::{self, prelude::*};

use rayon::slice::ParallelSliceMut;

use crate::compare::{LineComparator, LineFormatError};

/// Position of one line inside the buffer data, delimiter excluded.
#[derive(Debug, Clone, Copy)]
struct LineSpan {
    start: usize,
    end: usize,
}

/// Chunk line buffer.
///
/// Holds the raw bytes of one chunk and a span per line. The buffer is meant to be reused
/// across chunks: [`LineBuffer::clear`] drops the content but keeps the allocations.
pub struct LineBuffer {
    delimiter: u8,
    data: Vec<u8>,
    lines: Vec<LineSpan>,
}

impl LineBuffer {
    /// Creates a buffer pre-sized for chunks of `chunk_size` bytes holding at most `max_lines` lines.
    pub fn with_capacity(delimiter: u8, chunk_size: usize, max_lines: usize) -> Self {
        LineBuffer {
            delimiter,
            data: Vec::with_capacity(chunk_size),
            lines: Vec::with_capacity(max_lines),
        }
    }

    /// Reads the whole stream into the buffer, validating every line with the comparator.
    pub fn load<R: Read, C: LineComparator>(&mut self, mut reader: R, comparator: &C) -> Result<(), LoadError> {
        self.clear();
        reader.read_to_end(&mut self.data).map_err(LoadError::IO)?;

        let mut start = 0;
        while start < self.data.len() {
            let end = match self.data[start..].iter().position(|&b| b == self.delimiter) {
                Some(offset) => start + offset,
                None => self.data.len(),
            };
            comparator
                .validate(&self.data[start..end])
                .map_err(LoadError::MalformedLine)?;
            self.lines.push(LineSpan { start, end });
            start = end + 1;
        }

        return Ok(());
    }

    /// Sorts the loaded lines.
    pub fn sort_by<C: LineComparator>(&mut self, comparator: &C) {
        let data = &self.data;
        self.lines
            .par_sort_unstable_by(|a, b| comparator.compare(&data[a.start..a.end], &data[b.start..b.end]));
    }

    /// Writes the lines in their current order, each followed by the delimiter.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for span in &self.lines {
            writer.write_all(&self.data[span.start..span.end])?;
            writer.write_all(&[self.delimiter])?;
        }
        return Ok(());
    }

    /// Returns the number of loaded lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.lines.clear();
    }
}

/// Chunk loading error.
#[derive(Debug)]
pub enum LoadError {
    IO(io::Error),
    MalformedLine(LineFormatError),
}
