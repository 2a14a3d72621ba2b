//! `line-ext-sort` sorts newline-delimited text files that do not fit into memory.
//!
//! It is a classic external merge sort. The source is split into chunk files of a bounded size that
//! always end on a line boundary, every chunk is sorted in memory, then the sorted chunks are merged
//! in passes of at most *fan-in* files until a single sorted stream remains. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   memory use is limited by the chunk size during sorting and by the fan-in during merging.
//! * **Pluggable ordering:**
//!   lines are ordered by a [`LineComparator`]. The default [`NumberedLineComparator`] orders lines
//!   shaped as `<number>. <text>` by text, then by number.
//! * **Progress and cancellation:**
//!   every stage reports its progress to an optional callback, and a [`CancellationToken`] stops the run
//!   between chunk-level units of work.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path;
//!
//! use line_ext_sort::{CancellationToken, ExternalSorterBuilder};
//!
//! fn main() {
//!     let input = fs::File::open("input.txt").unwrap();
//!     let mut output = io::BufWriter::new(fs::File::create("output.txt").unwrap());
//!
//!     let sorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./temp"))
//!         .with_chunk_size(50 * 1024 * 1024)
//!         .with_merge_progress(|progress| println!("merge progress: {:.2}%", progress * 100.0))
//!         .build()
//!         .unwrap();
//!
//!     let outcome = sorter.sort(input, &mut output, &CancellationToken::new()).unwrap();
//!     assert!(outcome.is_completed());
//! }
//! ```

pub mod buffer;
pub mod cancel;
pub mod chunk;
pub mod compare;
pub mod merger;
pub mod progress;
pub mod sort;
pub mod split;

pub use buffer::LineBuffer;
pub use cancel::CancellationToken;
pub use chunk::{ChunkFile, ChunkReader, ChunkState};
pub use compare::{BytewiseComparator, LineComparator, LineFormatError, NumberedLineComparator, Reversed};
pub use merger::{BinaryHeapMerger, FileMerger, MergeStats};
pub use progress::ProgressHandler;
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortOutcome, SortSummary};
pub use split::{SplitOutput, Splitter};
