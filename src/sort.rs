//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::buffer::{LineBuffer, LoadError};
use crate::cancel::CancellationToken;
use crate::chunk::{ChunkFile, ChunkState};
use crate::compare::{LineComparator, LineFormatError, NumberedLineComparator};
use crate::merger::FileMerger;
use crate::progress::{self, ProgressHandler};
use crate::split::Splitter;

/// Default working location, relative to the current directory.
pub const DEFAULT_TMP_DIR: &str = "temp";
/// Default target chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;
/// Default number of files merged at once.
pub const DEFAULT_FAN_IN: usize = 10;
/// Default number of threads sorting a chunk in memory. Stages are single-threaded unless raised.
pub const DEFAULT_THREADS_NUMBER: usize = 1;
/// Default size of every stage read/write buffer.
pub const DEFAULT_BUF_SIZE: usize = 64 * 1024;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Sorter configuration is invalid.
    InvalidConfig(String),
    /// Working directory creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// A line can not be ordered by the configured comparator.
    MalformedLine(LineFormatError),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InvalidConfig(_) => None,
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::MalformedLine(err) => Some(err),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidConfig(msg) => write!(f, "invalid sorter configuration: {}", msg),
            SortError::TempDir(err) => write!(f, "working directory not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::MalformedLine(err) => write!(f, "malformed line: {}", err),
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::IO(err)
    }
}

impl From<LineFormatError> for SortError {
    fn from(err: LineFormatError) -> Self {
        SortError::MalformedLine(err)
    }
}

impl From<LoadError> for SortError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::IO(err) => SortError::IO(err),
            LoadError::MalformedLine(err) => SortError::MalformedLine(err),
        }
    }
}

/// Statistics of a completed sort run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortSummary {
    /// Number of chunks the source was split into.
    pub chunks: usize,
    /// Maximum number of lines in a single chunk.
    pub max_chunk_lines: usize,
    /// Number of merge passes, the final one included.
    pub merge_passes: usize,
    /// Maximum number of chunk files merged at the same time.
    pub max_open_cursors: usize,
}

/// Sort run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOutcome {
    /// The destination holds every source line in sorted order.
    Completed(SortSummary),
    /// The run was cancelled. The destination content must not be used.
    Cancelled,
}

impl SortOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SortOutcome::Completed(_))
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<C = NumberedLineComparator>
where
    C: LineComparator,
{
    /// Number of threads to be used to sort chunk lines in parallel.
    threads_number: usize,
    /// Location the working directory is created in.
    tmp_dir: PathBuf,
    /// Target chunk size in bytes.
    chunk_size: usize,
    /// Line delimiter.
    delimiter: u8,
    /// Maximum number of files merged at once.
    fan_in: usize,
    /// Source read buffer size.
    split_buf_size: usize,
    /// Chunk sorting read/write buffer sizes.
    sort_buf_sizes: (usize, usize),
    /// Merging read/write buffer sizes.
    merge_buf_sizes: (usize, usize),
    /// Line comparator.
    comparator: C,

    split_progress: Option<ProgressHandler>,
    sort_progress: Option<ProgressHandler>,
    merge_progress: Option<ProgressHandler>,
}

impl ExternalSorterBuilder<NumberedLineComparator> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }
}

impl<C: LineComparator> ExternalSorterBuilder<C> {
    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<C>, SortError> {
        ExternalSorter::new(self)
    }

    /// Sets number of threads to be used to sort chunk lines in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> Self {
        self.threads_number = threads_number;
        return self;
    }

    /// Sets the location the working directory is created in.
    pub fn with_tmp_dir(mut self, path: &Path) -> Self {
        self.tmp_dir = path.into();
        return self;
    }

    /// Sets target chunk size in bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        return self;
    }

    /// Sets line delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        return self;
    }

    /// Sets maximum number of files merged at once.
    pub fn with_fan_in(mut self, fan_in: usize) -> Self {
        self.fan_in = fan_in;
        return self;
    }

    /// Sets source read buffer size.
    pub fn with_split_buf_size(mut self, buf_size: usize) -> Self {
        self.split_buf_size = buf_size;
        return self;
    }

    /// Sets chunk sorting read and write buffer sizes.
    pub fn with_sort_buf_sizes(mut self, read_buf_size: usize, write_buf_size: usize) -> Self {
        self.sort_buf_sizes = (read_buf_size, write_buf_size);
        return self;
    }

    /// Sets merging read (per file) and write buffer sizes.
    pub fn with_merge_buf_sizes(mut self, read_buf_size: usize, write_buf_size: usize) -> Self {
        self.merge_buf_sizes = (read_buf_size, write_buf_size);
        return self;
    }

    /// Sets split progress handler.
    pub fn with_split_progress(mut self, handler: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.split_progress = Some(Arc::new(handler));
        return self;
    }

    /// Sets chunk sorting progress handler.
    pub fn with_sort_progress(mut self, handler: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.sort_progress = Some(Arc::new(handler));
        return self;
    }

    /// Sets merge progress handler.
    pub fn with_merge_progress(mut self, handler: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.merge_progress = Some(Arc::new(handler));
        return self;
    }

    /// Sets line comparator.
    pub fn with_comparator<T: LineComparator>(self, comparator: T) -> ExternalSorterBuilder<T> {
        ExternalSorterBuilder {
            threads_number: self.threads_number,
            tmp_dir: self.tmp_dir,
            chunk_size: self.chunk_size,
            delimiter: self.delimiter,
            fan_in: self.fan_in,
            split_buf_size: self.split_buf_size,
            sort_buf_sizes: self.sort_buf_sizes,
            merge_buf_sizes: self.merge_buf_sizes,
            comparator,
            split_progress: self.split_progress,
            sort_progress: self.sort_progress,
            merge_progress: self.merge_progress,
        }
    }

    fn validate(&self) -> Result<(), SortError> {
        let buffers = [
            self.split_buf_size,
            self.sort_buf_sizes.0,
            self.sort_buf_sizes.1,
            self.merge_buf_sizes.0,
            self.merge_buf_sizes.1,
        ];

        if self.chunk_size == 0 {
            Err(SortError::InvalidConfig("chunk size must be positive".to_string()))
        } else if self.fan_in < 2 {
            Err(SortError::InvalidConfig(format!(
                "merge fan-in must be at least 2, got {}",
                self.fan_in
            )))
        } else if buffers.contains(&0) {
            Err(SortError::InvalidConfig("buffer sizes must be positive".to_string()))
        } else if self.threads_number == 0 {
            Err(SortError::InvalidConfig("threads number must be positive".to_string()))
        } else {
            Ok(())
        }
    }
}

impl<C> Default for ExternalSorterBuilder<C>
where
    C: LineComparator + Default,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: DEFAULT_THREADS_NUMBER,
            tmp_dir: PathBuf::from(DEFAULT_TMP_DIR),
            chunk_size: DEFAULT_CHUNK_SIZE,
            delimiter: b'\n',
            fan_in: DEFAULT_FAN_IN,
            split_buf_size: DEFAULT_BUF_SIZE,
            sort_buf_sizes: (DEFAULT_BUF_SIZE, DEFAULT_BUF_SIZE),
            merge_buf_sizes: (DEFAULT_BUF_SIZE, DEFAULT_BUF_SIZE),
            comparator: C::default(),
            split_progress: None,
            sort_progress: None,
            merge_progress: None,
        }
    }
}

/// External sorter.
///
/// Splits the source into chunk files, sorts every chunk in memory and merges the sorted chunks
/// into the destination. The stages run strictly one after another.
pub struct ExternalSorter<C = NumberedLineComparator>
where
    C: LineComparator,
{
    /// Chunk sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Location the working directory is created in.
    tmp_dir: PathBuf,
    chunk_size: usize,
    delimiter: u8,
    fan_in: usize,
    split_buf_size: usize,
    sort_buf_sizes: (usize, usize),
    merge_buf_sizes: (usize, usize),
    comparator: C,

    split_progress: Option<ProgressHandler>,
    sort_progress: Option<ProgressHandler>,
    merge_progress: Option<ProgressHandler>,
}

impl<C: LineComparator> ExternalSorter<C> {
    /// Creates a new external sorter instance. Fails if the configuration is invalid.
    pub fn new(builder: ExternalSorterBuilder<C>) -> Result<Self, SortError> {
        builder.validate()?;

        return Ok(ExternalSorter {
            thread_pool: Self::init_thread_pool(builder.threads_number)?,
            tmp_dir: builder.tmp_dir,
            chunk_size: builder.chunk_size,
            delimiter: builder.delimiter,
            fan_in: builder.fan_in,
            split_buf_size: builder.split_buf_size,
            sort_buf_sizes: builder.sort_buf_sizes,
            merge_buf_sizes: builder.merge_buf_sizes,
            comparator: builder.comparator,
            split_progress: builder.split_progress,
            sort_progress: builder.sort_progress,
            merge_progress: builder.merge_progress,
        });
    }

    fn init_thread_pool(threads_number: usize) -> Result<rayon::ThreadPool, SortError> {
        log::info!("initializing thread-pool (threads: {})", threads_number);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_work_dir(&self) -> Result<tempfile::TempDir, SortError> {
        fs::create_dir_all(&self.tmp_dir).map_err(|err| SortError::TempDir(err))?;

        let work_dir = tempfile::Builder::new()
            .prefix("line-ext-sort-")
            .tempdir_in(&self.tmp_dir)
            .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a working directory", work_dir.path().display());

        return Ok(work_dir);
    }

    /// Sorts the lines of the source into the destination.
    ///
    /// The working directory is created for this call only and removed when it returns, so
    /// concurrent calls never share chunk files. Cancellation is checked after every split chunk,
    /// every sorted chunk and every merge output.
    ///
    /// # Arguments
    /// * `source` - Source stream. Everything from the current position to the end is sorted.
    /// * `destination` - Destination stream
    /// * `cancel` - Cancellation token
    pub fn sort<R, W>(
        &self,
        mut source: R,
        destination: &mut W,
        cancel: &CancellationToken,
    ) -> Result<SortOutcome, SortError>
    where
        R: Read + Seek,
        W: Write,
    {
        if cancel.is_cancelled() {
            return Ok(SortOutcome::Cancelled);
        }

        let total_len = Self::remaining_len(&mut source)?;
        let work_dir = self.init_work_dir()?;
        let dir = work_dir.path();

        log::info!("splitting source ({} bytes) ...", total_len);
        let splitter = Splitter::new(dir, self.chunk_size, self.delimiter, self.split_buf_size);
        let split = match splitter.split(source, total_len, self.split_progress.as_ref(), cancel)? {
            Some(split) => split,
            None => return Ok(Self::cancelled("split")),
        };

        let mut summary = SortSummary {
            chunks: split.chunks.len(),
            max_chunk_lines: split.max_lines,
            ..SortSummary::default()
        };
        log::info!("source split into {} chunks (max {} lines)", summary.chunks, summary.max_chunk_lines);

        if split.chunks.is_empty() {
            log::info!("nothing to sort");
            return Ok(SortOutcome::Completed(summary));
        }

        let buf_capacity = self.chunk_size.min(usize::try_from(total_len).unwrap_or(usize::MAX));
        let mut buffer = LineBuffer::with_capacity(self.delimiter, buf_capacity, split.max_lines);

        if let [chunk] = split.chunks.as_slice() {
            log::info!("sorting single chunk into destination ...");
            let mut writer = io::BufWriter::with_capacity(self.sort_buf_sizes.1, &mut *destination);
            self.sort_chunk(dir, chunk, &mut buffer, &mut writer)?;
            writer.flush()?;
            chunk.remove(dir)?;
            progress::report(self.sort_progress.as_ref(), "sort", 1, 1);

            log::info!("external sort done");
            return Ok(SortOutcome::Completed(summary));
        }

        log::info!("sorting {} chunks ...", summary.chunks);
        let sorted = match self.sort_chunks(dir, split.chunks, &mut buffer, cancel)? {
            Some(sorted) => sorted,
            None => return Ok(Self::cancelled("sort")),
        };
        drop(buffer);

        log::info!("merging {} sorted chunks (fan-in {}) ...", sorted.len(), self.fan_in);
        let merger = FileMerger::new(
            dir,
            self.fan_in,
            self.delimiter,
            self.merge_buf_sizes,
            &self.comparator,
            self.merge_progress.as_ref(),
        );
        let stats = match merger.merge(sorted, destination, cancel)? {
            Some(stats) => stats,
            None => return Ok(Self::cancelled("merge")),
        };

        summary.merge_passes = stats.passes;
        summary.max_open_cursors = stats.max_open_cursors;
        log::info!("external sort done ({} merge passes)", summary.merge_passes);

        return Ok(SortOutcome::Completed(summary));
    }

    fn sort_chunks(
        &self,
        dir: &Path,
        chunks: Vec<ChunkFile>,
        buffer: &mut LineBuffer,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<ChunkFile>>, SortError> {
        let total = chunks.len();
        let mut sorted_chunks = Vec::with_capacity(total);

        for chunk in chunks {
            let sorted = chunk.with_state(ChunkState::Sorted);
            let file = fs::File::create(sorted.path(dir))?;
            let mut writer = io::BufWriter::with_capacity(self.sort_buf_sizes.1, file);
            self.sort_chunk(dir, &chunk, buffer, &mut writer)?;
            writer.flush()?;
            drop(writer);
            chunk.remove(dir)?;

            sorted_chunks.push(sorted);
            progress::report(self.sort_progress.as_ref(), "sort", sorted_chunks.len(), total);

            if cancel.is_cancelled() {
                return Ok(None);
            }
        }

        return Ok(Some(sorted_chunks));
    }

    fn sort_chunk<W: Write>(
        &self,
        dir: &Path,
        chunk: &ChunkFile,
        buffer: &mut LineBuffer,
        writer: &mut W,
    ) -> Result<(), SortError> {
        let file = fs::File::open(chunk.path(dir))?;
        buffer.load(io::BufReader::with_capacity(self.sort_buf_sizes.0, file), &self.comparator)?;

        log::debug!("sorting chunk {} ({} lines) ...", chunk.file_name(), buffer.len());
        let comparator = &self.comparator;
        self.thread_pool.install(|| buffer.sort_by(comparator));

        buffer.write_to(writer)?;
        buffer.clear();

        return Ok(());
    }

    fn remaining_len<R: Seek>(source: &mut R) -> io::Result<u64> {
        let position = source.stream_position()?;
        let end = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(position))?;

        return Ok(end.saturating_sub(position));
    }

    fn cancelled(stage: &str) -> SortOutcome {
        log::info!("external sort cancelled during {} stage", stage);
        SortOutcome::Cancelled
    }
}
