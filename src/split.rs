//! Source splitter.

use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use log;

use crate::cancel::CancellationToken;
use crate::chunk::{ChunkFile, ChunkState};
use crate::progress::{self, ProgressHandler};

/// Splitter result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    /// Unsorted chunks in source order.
    pub chunks: Vec<ChunkFile>,
    /// Maximum number of lines observed in a single chunk.
    pub max_lines: usize,
}

/// Partitions a byte stream into chunk files that each end on a line boundary.
pub struct Splitter<'a> {
    dir: &'a Path,
    chunk_size: usize,
    delimiter: u8,
    buf_size: usize,
}

impl<'a> Splitter<'a> {
    /// Creates a new splitter.
    ///
    /// # Arguments
    /// * `dir` - Directory chunk files are written to
    /// * `chunk_size` - Target chunk size in bytes. A chunk grows past it only to complete its last line.
    /// * `delimiter` - Line delimiter byte
    /// * `buf_size` - Source read buffer size
    pub fn new(dir: &'a Path, chunk_size: usize, delimiter: u8, buf_size: usize) -> Self {
        Splitter {
            dir,
            chunk_size,
            delimiter,
            buf_size,
        }
    }

    /// Splits the source into unsorted chunk files.
    /// Returns [`None`] if the run was cancelled after a chunk had been written.
    ///
    /// # Arguments
    /// * `source` - Source stream
    /// * `total_len` - Number of bytes the source is expected to yield, used for progress reporting
    ///   and to size the read buffer
    /// * `progress` - Split progress handler
    /// * `cancel` - Cancellation token checked after every chunk
    pub fn split<R: Read>(
        &self,
        source: R,
        total_len: u64,
        progress: Option<&ProgressHandler>,
        cancel: &CancellationToken,
    ) -> io::Result<Option<SplitOutput>> {
        let mut reader = io::BufReader::with_capacity(self.buf_size, source);
        let expected_chunks = Self::expected_chunks(total_len, self.chunk_size);

        // the buffer grows with the data read, small sources never need a whole chunk worth of memory
        let mut buffer = Vec::with_capacity(self.chunk_size.min(usize::try_from(total_len).unwrap_or(usize::MAX)));
        let mut overflow = Vec::new();
        let mut output = SplitOutput {
            chunks: Vec::new(),
            max_lines: 0,
        };

        loop {
            buffer.clear();
            let filled = (&mut reader)
                .take(u64::try_from(self.chunk_size).unwrap_or(u64::MAX))
                .read_to_end(&mut buffer)?;
            if filled == 0 {
                break;
            }

            overflow.clear();
            if filled == self.chunk_size && buffer[filled - 1] != self.delimiter {
                reader.read_until(self.delimiter, &mut overflow)?;
            }

            let chunk = ChunkFile::new(0, output.chunks.len(), ChunkState::Unsorted);
            let mut file = fs::File::create(chunk.path(self.dir))?;
            file.write_all(&buffer)?;
            file.write_all(&overflow)?;

            let lines = self.count_lines(&buffer, &overflow);
            output.max_lines = output.max_lines.max(lines);
            output.chunks.push(chunk);

            log::debug!(
                "chunk {} written ({} bytes, {} lines)",
                chunk.file_name(),
                filled + overflow.len(),
                lines
            );
            progress::report(progress, "split", output.chunks.len(), expected_chunks);

            if cancel.is_cancelled() {
                return Ok(None);
            }
        }

        // chunks grow past the target size to complete their last line, so there may be fewer than expected
        if output.chunks.len() < expected_chunks {
            progress::report(progress, "split", 1, 1);
        }

        return Ok(Some(output));
    }

    fn expected_chunks(total_len: u64, chunk_size: usize) -> usize {
        match total_len {
            0 => 0,
            len => ((len - 1) / chunk_size as u64 + 1) as usize,
        }
    }

    fn count_lines(&self, body: &[u8], tail: &[u8]) -> usize {
        let delimiters = body.iter().chain(tail).filter(|&&b| b == self.delimiter).count();
        let last = tail.last().or_else(|| body.last());
        match last {
            Some(&b) if b != self.delimiter => delimiters + 1,
            _ => delimiters,
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;
    use std::sync::{Arc, Mutex};

    use rstest::*;

    use super::Splitter;
    use crate::cancel::CancellationToken;
    use crate::progress::ProgressHandler;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn chunk_contents(dir: &tempfile::TempDir, data: &[u8], chunk_size: usize) -> (Vec<String>, usize) {
        let splitter = Splitter::new(dir.path(), chunk_size, b'\n', 4);
        let output = splitter
            .split(io::Cursor::new(data), data.len() as u64, None, &CancellationToken::new())
            .unwrap()
            .unwrap();

        let contents = output
            .chunks
            .iter()
            .map(|chunk| String::from_utf8(fs::read(chunk.path(dir.path())).unwrap()).unwrap())
            .collect();

        (contents, output.max_lines)
    }

    #[rstest]
    // chunk size is an exact multiple of the line length
    #[case("1. a\n2. b\n3. c\n", 5, vec!["1. a\n", "2. b\n", "3. c\n"], 1)]
    // a line straddles the chunk boundary
    #[case("1. a\n2. b\n3. c\n", 7, vec!["1. a\n2. b\n", "3. c\n"], 2)]
    // boundary falls right after the delimiter
    #[case("1. a\n22. bb\n", 5, vec!["1. a\n", "22. bb\n"], 1)]
    // last line has no trailing delimiter
    #[case("1. a\n2. b", 3, vec!["1. a\n", "2. b"], 1)]
    // source ends in the middle of the overflow scan
    #[case("1. abcdef", 3, vec!["1. abcdef"], 1)]
    #[case("1. a\n2. b\n", 100, vec!["1. a\n2. b\n"], 2)]
    fn test_splitter(
        tmp_dir: tempfile::TempDir,
        #[case] data: &str,
        #[case] chunk_size: usize,
        #[case] expected: Vec<&str>,
        #[case] expected_max_lines: usize,
    ) {
        let (contents, max_lines) = chunk_contents(&tmp_dir, data.as_bytes(), chunk_size);

        assert_eq!(contents, expected);
        assert_eq!(max_lines, expected_max_lines);
        assert_eq!(contents.concat(), data);
        for chunk in &contents[..contents.len() - 1] {
            assert!(chunk.ends_with('\n'), "chunk {:?} does not end on a line boundary", chunk);
        }
    }

    #[rstest]
    fn test_splitter_empty_source(tmp_dir: tempfile::TempDir) {
        let (contents, max_lines) = chunk_contents(&tmp_dir, b"", 8);

        assert!(contents.is_empty());
        assert_eq!(max_lines, 0);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    // expected length matches the source
    #[case(10)]
    // source is longer than expected
    #[case(0)]
    #[case(4)]
    fn test_splitter_oversized_chunk(tmp_dir: tempfile::TempDir, #[case] expected_len: u64) {
        let data = b"2. b\n1. a\n";
        let splitter = Splitter::new(tmp_dir.path(), usize::MAX, b'\n', 4);
        let output = splitter
            .split(io::Cursor::new(data), expected_len, None, &CancellationToken::new())
            .unwrap()
            .unwrap();

        assert_eq!(output.chunks.len(), 1);
        assert_eq!(output.max_lines, 2);
        assert_eq!(fs::read(output.chunks[0].path(tmp_dir.path())).unwrap(), data);
    }

    #[rstest]
    fn test_splitter_progress_and_cancellation(tmp_dir: tempfile::TempDir) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let handler: ProgressHandler = {
            let reports = reports.clone();
            let cancel = cancel.clone();
            Arc::new(move |value: f64| {
                reports.lock().unwrap().push(value);
                if value >= 0.5 {
                    cancel.cancel();
                }
            })
        };

        let data = b"1. a\n2. b\n3. c\n4. d\n";
        let splitter = Splitter::new(tmp_dir.path(), 5, b'\n', 64);
        let output = splitter
            .split(io::Cursor::new(data), data.len() as u64, Some(&handler), &cancel)
            .unwrap();

        assert_eq!(output, None);
        assert_eq!(*reports.lock().unwrap(), vec![0.25, 0.5]);
    }
}
