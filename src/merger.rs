//! K-way merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use log;

use crate::cancel::CancellationToken;
use crate::chunk::{ChunkFile, ChunkReader, ChunkState};
use crate::compare::LineComparator;
use crate::progress::{self, ProgressHandler};

/// Heap entry: the pending line of one cursor.
struct HeapItem<'c, C: ?Sized> {
    line: Vec<u8>,
    source: usize,
    comparator: &'c C,
}

impl<'c, C: LineComparator + ?Sized> Ord for HeapItem<'c, C> {
    fn cmp(&self, other: &Self) -> Ordering {
        // binary heap is max-heap by default so the order is reversed to convert it to min-heap,
        // equal lines are taken from the lowest cursor first
        self.comparator
            .compare(&self.line, &other.line)
            .then(self.source.cmp(&other.source))
            .reverse()
    }
}

impl<'c, C: LineComparator + ?Sized> PartialOrd for HeapItem<'c, C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'c, C: LineComparator + ?Sized> PartialEq for HeapItem<'c, C> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<'c, C: LineComparator + ?Sized> Eq for HeapItem<'c, C> {}

/// Binary heap merger implementation.
/// Merges multiple sorted line streams into a single sorted stream using a line comparator.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of lines,
/// *n* is the number of inputs. Only one pending line per input is held in memory.
pub struct BinaryHeapMerger<'c, C, I>
where
    C: LineComparator + ?Sized,
    I: Iterator,
{
    items: BinaryHeap<HeapItem<'c, C>>,
    sources: Vec<I>,
    comparator: &'c C,
    initiated: bool,
}

impl<'c, C, I> BinaryHeapMerger<'c, C, I>
where
    C: LineComparator + ?Sized,
    I: Iterator,
{
    /// Creates an instance of a binary heap merger.
    /// Source lines should be sorted by the same comparator otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `sources` - Sorted line streams to be merged in a single sorted one
    /// * `comparator` - Line comparator
    pub fn new<S>(sources: S, comparator: &'c C) -> Self
    where
        S: IntoIterator,
        S::Item: IntoIterator<IntoIter = I>,
    {
        let sources = Vec::from_iter(sources.into_iter().map(|s| s.into_iter()));
        let items = BinaryHeap::with_capacity(sources.len());

        return BinaryHeapMerger {
            items,
            sources,
            comparator,
            initiated: false,
        };
    }

    /// Returns the number of merged inputs.
    pub fn cursors(&self) -> usize {
        self.sources.len()
    }
}

impl<'c, C, E, I> Iterator for BinaryHeapMerger<'c, C, I>
where
    C: LineComparator + ?Sized,
    I: Iterator<Item = Result<Vec<u8>, E>>,
{
    type Item = Result<Vec<u8>, E>;

    /// Returns the next line from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            self.initiated = true;
            for (idx, source) in self.sources.iter_mut().enumerate() {
                if let Some(line) = source.next() {
                    match line {
                        Ok(line) => self.items.push(HeapItem {
                            line,
                            source: idx,
                            comparator: self.comparator,
                        }),
                        Err(err) => return Some(Err(err)),
                    }
                }
            }
        }

        let item = self.items.pop()?;
        if let Some(line) = self.sources[item.source].next() {
            match line {
                Ok(line) => self.items.push(HeapItem {
                    line,
                    source: item.source,
                    comparator: self.comparator,
                }),
                Err(err) => return Some(Err(err)),
            }
        }

        return Some(Ok(item.line));
    }
}

/// Returns the number of input files of every merge pass needed to reduce `files` sorted files
/// to one with at most `fan_in` files merged at once.
pub fn merge_pass_sizes(files: usize, fan_in: usize) -> Vec<usize> {
    let mut passes = Vec::new();
    let mut remaining = files;
    while remaining > 1 {
        passes.push(remaining);
        remaining = div_ceil(remaining, fan_in);
    }
    return passes;
}

/// Returns the number of merge outputs produced across all passes.
pub fn merge_units(files: usize, fan_in: usize) -> usize {
    merge_pass_sizes(files, fan_in)
        .into_iter()
        .map(|size| div_ceil(size, fan_in))
        .sum()
}

fn div_ceil(value: usize, divisor: usize) -> usize {
    (value + divisor - 1) / divisor
}

/// Merge phase statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of merge passes, the final one included.
    pub passes: usize,
    /// Maximum number of cursors open at the same time.
    pub max_open_cursors: usize,
}

/// Multi-pass file merger.
///
/// While more than `fan_in` files remain, consecutive groups of `fan_in` files are merged into
/// intermediate files of the next pass. The last pass merges straight into the destination.
pub struct FileMerger<'a, C: LineComparator + ?Sized> {
    dir: &'a Path,
    fan_in: usize,
    delimiter: u8,
    read_buf_size: usize,
    write_buf_size: usize,
    comparator: &'a C,
    progress: Option<&'a ProgressHandler>,
}

impl<'a, C: LineComparator + ?Sized> FileMerger<'a, C> {
    /// Creates a new file merger.
    ///
    /// # Arguments
    /// * `dir` - Working directory holding the sorted files
    /// * `fan_in` - Maximum number of files merged at once
    /// * `delimiter` - Line delimiter byte
    /// * `buf_sizes` - Per-cursor read and output write buffer sizes
    /// * `comparator` - Line comparator the input files are sorted by
    /// * `progress` - Merge progress handler
    pub fn new(
        dir: &'a Path,
        fan_in: usize,
        delimiter: u8,
        buf_sizes: (usize, usize),
        comparator: &'a C,
        progress: Option<&'a ProgressHandler>,
    ) -> Self {
        FileMerger {
            dir,
            fan_in,
            delimiter,
            read_buf_size: buf_sizes.0,
            write_buf_size: buf_sizes.1,
            comparator,
            progress,
        }
    }

    /// Merges sorted files into the destination. Every input file is deleted once consumed.
    /// Returns [`None`] if the run was cancelled after a merge output had been emitted.
    pub fn merge<W: Write>(
        &self,
        files: Vec<ChunkFile>,
        destination: &mut W,
        cancel: &CancellationToken,
    ) -> io::Result<Option<MergeStats>> {
        let total_units = merge_units(files.len(), self.fan_in);
        let mut done_units = 0;
        let mut stats = MergeStats::default();
        let mut files = files;

        while files.len() > self.fan_in {
            let pass = stats.passes + 1;
            log::info!("merge pass {} ({} files)", pass, files.len());

            let mut next_files = Vec::with_capacity(div_ceil(files.len(), self.fan_in));
            for (index, group) in files.chunks(self.fan_in).enumerate() {
                let target = ChunkFile::new(pass, index, ChunkState::Sorted);
                if group.len() == 1 {
                    group[0].rename(self.dir, target)?;
                } else {
                    let temp = target.with_state(ChunkState::MergeTemp);
                    let mut writer =
                        io::BufWriter::with_capacity(self.write_buf_size, fs::File::create(temp.path(self.dir))?);
                    self.merge_group(group, &mut writer, &mut stats)?;
                    drop(writer);
                    temp.rename(self.dir, target)?;
                }
                next_files.push(target);

                done_units += 1;
                progress::report(self.progress, "merge", done_units, total_units);
                if cancel.is_cancelled() {
                    return Ok(None);
                }
            }

            stats.passes = pass;
            files = next_files;
        }

        if !files.is_empty() {
            log::info!("final merge pass ({} files)", files.len());

            let mut writer = io::BufWriter::with_capacity(self.write_buf_size, destination);
            self.merge_group(&files, &mut writer, &mut stats)?;

            stats.passes += 1;
            done_units += 1;
            progress::report(self.progress, "merge", done_units, total_units);
        }

        return Ok(Some(stats));
    }

    fn merge_group<W: Write>(&self, group: &[ChunkFile], writer: &mut W, stats: &mut MergeStats) -> io::Result<()> {
        let readers = group
            .iter()
            .map(|chunk| ChunkReader::open(self.dir, chunk, self.delimiter, self.read_buf_size))
            .collect::<io::Result<Vec<_>>>()?;

        let merger = BinaryHeapMerger::new(readers, self.comparator);
        stats.max_open_cursors = stats.max_open_cursors.max(merger.cursors());

        let mut lines = 0usize;
        for line in merger {
            writer.write_all(&line?)?;
            writer.write_all(&[self.delimiter])?;
            lines += 1;
        }
        // inputs are removed only once their lines reached the underlying writer
        writer.flush()?;

        for chunk in group {
            chunk.remove(self.dir)?;
        }

        log::debug!("merged {} files ({} lines)", group.len(), lines);

        return Ok(());
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, ErrorKind};

    use rstest::*;

    use super::{merge_pass_sizes, merge_units, BinaryHeapMerger, FileMerger, MergeStats};
    use crate::cancel::CancellationToken;
    use crate::chunk::{ChunkFile, ChunkState};
    use crate::compare::{BytewiseComparator, NumberedLineComparator};

    fn lines(items: &[&str]) -> Vec<Result<Vec<u8>, io::Error>> {
        items.iter().map(|item| Ok(item.as_bytes().to_vec())).collect()
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![vec![], vec![]], vec![])]
    #[case(
        vec![
            vec!["4. a", "5. c", "7. d"],
            vec!["1. a", "6. c"],
            vec!["3. b"],
            vec![],
        ],
        vec!["1. a", "4. a", "3. b", "5. c", "6. c", "7. d"],
    )]
    fn test_merger(#[case] sources: Vec<Vec<&str>>, #[case] expected: Vec<&str>) {
        let sources: Vec<_> = sources.iter().map(|source| lines(source)).collect();
        let merger = BinaryHeapMerger::new(sources, &NumberedLineComparator);

        let actual: Result<Vec<Vec<u8>>, io::Error> = merger.collect();
        let expected: Vec<Vec<u8>> = expected.iter().map(|line| line.as_bytes().to_vec()).collect();

        assert_eq!(actual.unwrap(), expected);
    }

    #[test]
    fn test_merger_error() {
        let sources = vec![
            vec![Ok(b"c".to_vec()), Err(io::Error::new(ErrorKind::Other, "test error"))],
            lines(&["a", "b"]),
        ];
        let merger = BinaryHeapMerger::new(sources, &BytewiseComparator);

        let actual: Vec<Result<Vec<u8>, io::Error>> = merger.collect();
        assert_eq!(actual.len(), 3);
        assert_eq!(actual[0].as_ref().unwrap(), b"a");
        assert_eq!(actual[1].as_ref().unwrap(), b"b");
        assert_eq!(actual[2].as_ref().unwrap_err().to_string(), "test error");
    }

    #[rstest]
    #[case(0, 10, vec![], 0)]
    #[case(1, 10, vec![], 0)]
    #[case(7, 10, vec![7], 1)]
    #[case(10, 10, vec![10], 1)]
    #[case(11, 10, vec![11, 2], 3)]
    #[case(1000, 10, vec![1000, 100, 10], 111)]
    #[case(5, 2, vec![5, 3, 2], 6)]
    fn test_merge_plan(
        #[case] files: usize,
        #[case] fan_in: usize,
        #[case] expected_passes: Vec<usize>,
        #[case] expected_units: usize,
    ) {
        assert_eq!(merge_pass_sizes(files, fan_in), expected_passes);
        assert_eq!(merge_units(files, fan_in), expected_units);
    }

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    #[case(10)]
    fn test_file_merger(tmp_dir: tempfile::TempDir, #[case] fan_in: usize) {
        let dir = tmp_dir.path();
        let files: Vec<ChunkFile> = (0..7)
            .map(|index| {
                let chunk = ChunkFile::new(0, index, ChunkState::Sorted);
                let content = format!("{:02}\n{}\n", index, index + 10);
                fs::write(chunk.path(dir), content).unwrap();
                chunk
            })
            .collect();

        let merger = FileMerger::new(dir, fan_in, b'\n', (8, 8), &BytewiseComparator, None);
        let mut output = Vec::new();
        let stats = merger.merge(files, &mut output, &CancellationToken::new()).unwrap().unwrap();

        let mut expected: Vec<String> = (0..7).chain(10..17).map(|n| format!("{:02}", n)).collect();
        expected.sort();
        let expected: String = expected.into_iter().map(|line| line + "\n").collect();

        assert_eq!(String::from_utf8(output).unwrap(), expected);
        assert_eq!(stats.passes, merge_pass_sizes(7, fan_in).len());
        assert!(stats.max_open_cursors <= fan_in);
        assert_eq!(fs::read_dir(dir).unwrap().count(), 0);
    }

    struct FailingWriter;

    impl io::Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::Other, "destination is broken"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(ErrorKind::Other, "destination is broken"))
        }
    }

    #[rstest]
    fn test_file_merger_keeps_inputs_on_write_error(tmp_dir: tempfile::TempDir) {
        let dir = tmp_dir.path();
        let files: Vec<ChunkFile> = (0..2)
            .map(|index| {
                let chunk = ChunkFile::new(0, index, ChunkState::Sorted);
                fs::write(chunk.path(dir), format!("{}\n", index)).unwrap();
                chunk
            })
            .collect();

        let merger = FileMerger::new(dir, 2, b'\n', (8, 1024), &BytewiseComparator, None);
        let result = merger.merge(files.clone(), &mut FailingWriter, &CancellationToken::new());

        assert!(result.is_err());
        for chunk in &files {
            assert!(chunk.path(dir).exists(), "input {} was removed", chunk.file_name());
        }
    }

    #[rstest]
    fn test_file_merger_cancellation(tmp_dir: tempfile::TempDir) {
        let dir = tmp_dir.path();
        let files: Vec<ChunkFile> = (0..4)
            .map(|index| {
                let chunk = ChunkFile::new(0, index, ChunkState::Sorted);
                fs::write(chunk.path(dir), format!("{}\n", index)).unwrap();
                chunk
            })
            .collect();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let merger = FileMerger::new(dir, 2, b'\n', (8, 8), &BytewiseComparator, None);
        let mut output = Vec::new();
        let result = merger.merge(files, &mut output, &cancel).unwrap();

        assert_eq!(result, None::<MergeStats>);
        assert!(output.is_empty());
    }
}
