//! `ext-merge-sort` is a rust external merge sort implementation for files of line-delimited integers.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! The sorter is a pipeline of three concurrently running stages connected by rendezvous channels:
//!
//! * **Split:**
//!   the input file is cut into chunk files of a bounded number of lines.
//! * **Sort:**
//!   a pool of workers loads every chunk into memory, sorts it and rewrites it in place.
//! * **Merge:**
//!   sorted chunks are merged pairwise in rounds by a pool of workers, every round halving the number of files,
//!   until a single file is left. That file is renamed to the output path.
//!
//! Only one chunk per sort worker and two read buffers plus one write buffer per merge worker are held in
//! memory, so inputs much larger than the available RAM can be sorted.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use ext_merge_sort::MergeSorterBuilder;
//!
//! fn main() {
//!     let sorter = MergeSorterBuilder::new()
//!         .with_work_dir(Path::new("temp"))
//!         .with_chunk_lines(1_000_000)
//!         .build()
//!         .unwrap();
//!
//!     let report = sorter.sort(Path::new("nums.txt"), Path::new("sorted.txt")).unwrap();
//!     println!("{} chunks merged in {} rounds", report.chunks, report.rounds);
//! }
//! ```

pub mod generate;
pub mod line;
pub mod merge;
pub mod pipeline;
pub mod progress;
pub mod sort;
pub mod sorter;
pub mod split;
pub mod verify;

pub use line::{LineReader, LineWriter};
pub use merge::{MergeReducer, Reduction, TwoWayMerge};
pub use progress::{LogProgress, NoProgress, Progress};
pub use sort::{MergeSorter, MergeSorterBuilder, SortError, SortReport};
pub use verify::Verdict;
