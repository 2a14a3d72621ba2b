//! Chunk files stored in the working directory.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

/// Chunk file lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Raw bytes copied from the source by the splitter.
    Unsorted,
    /// Lines sorted within the file.
    Sorted,
    /// Merge output that is still being written.
    MergeTemp,
}

impl ChunkState {
    fn extension(&self) -> &'static str {
        match self {
            ChunkState::Unsorted => "unsorted",
            ChunkState::Sorted => "sorted",
            ChunkState::MergeTemp => "sorted.tmp",
        }
    }
}

/// Chunk file identity. Pass `0` holds the splitter output, pass `n` the output of the `n`-th merge pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFile {
    pub pass: usize,
    pub index: usize,
    pub state: ChunkState,
}

impl ChunkFile {
    pub fn new(pass: usize, index: usize, state: ChunkState) -> Self {
        ChunkFile { pass, index, state }
    }

    /// Returns the same chunk in another lifecycle state.
    pub fn with_state(self, state: ChunkState) -> Self {
        ChunkFile { state, ..self }
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.{}", self.pass, self.index, self.state.extension())
    }

    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Moves the file backing this chunk to the file backing `target`.
    pub fn rename(&self, dir: &Path, target: ChunkFile) -> io::Result<ChunkFile> {
        fs::rename(self.path(dir), target.path(dir))?;
        return Ok(target);
    }

    pub fn remove(&self, dir: &Path) -> io::Result<()> {
        fs::remove_file(self.path(dir))
    }
}

/// Reads delimiter separated lines from a stream. Yielded lines do not include the delimiter.
pub struct ChunkReader<R> {
    reader: R,
    delimiter: u8,
}

impl ChunkReader<io::BufReader<fs::File>> {
    /// Opens a chunk file for reading.
    pub fn open(dir: &Path, chunk: &ChunkFile, delimiter: u8, buf_size: usize) -> io::Result<Self> {
        let file = fs::File::open(chunk.path(dir))?;
        return Ok(ChunkReader::new(io::BufReader::with_capacity(buf_size, file), delimiter));
    }
}

impl<R: BufRead> ChunkReader<R> {
    pub fn new(reader: R, delimiter: u8) -> Self {
        ChunkReader { reader, delimiter }
    }
}

impl<R: BufRead> Iterator for ChunkReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = Vec::new();
        match self.reader.read_until(self.delimiter, &mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&self.delimiter) {
                    line.pop();
                }
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;

    use rstest::*;

    use super::{ChunkFile, ChunkReader, ChunkState};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case(b"a\nbb\n\nccc\n", b'\n', vec!["a", "bb", "", "ccc"])]
    #[case(b"a\nbb", b'\n', vec!["a", "bb"])]
    #[case(b"", b'\n', vec![])]
    #[case(b"x;y;z;", b';', vec!["x", "y", "z"])]
    fn test_chunk_reader(#[case] data: &[u8], #[case] delimiter: u8, #[case] expected: Vec<&str>) {
        let reader = ChunkReader::new(io::Cursor::new(data), delimiter);
        let lines: Result<Vec<Vec<u8>>, io::Error> = reader.collect();
        let expected: Vec<Vec<u8>> = expected.into_iter().map(|s| s.as_bytes().to_vec()).collect();

        assert_eq!(lines.unwrap(), expected);
    }

    #[rstest]
    fn test_chunk_file_lifecycle(tmp_dir: tempfile::TempDir) {
        let dir = tmp_dir.path();
        let temp = ChunkFile::new(2, 7, ChunkState::MergeTemp);
        assert_eq!(temp.file_name(), "2-7.sorted.tmp");

        fs::write(temp.path(dir), b"1. a\n").unwrap();
        let sorted = temp.rename(dir, temp.with_state(ChunkState::Sorted)).unwrap();

        assert_eq!(sorted.file_name(), "2-7.sorted");
        assert!(!temp.path(dir).exists());
        assert_eq!(fs::read(sorted.path(dir)).unwrap(), b"1. a\n");

        let lines: Vec<Vec<u8>> = ChunkReader::open(dir, &sorted, b'\n', 16)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(lines, vec![b"1. a".to_vec()]);

        sorted.remove(dir).unwrap();
        assert_eq!(fs::read_dir(dir).unwrap().count(), 0);
    }
}
