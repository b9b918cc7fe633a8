//! Chunk sorter.

use std::path::{Path, PathBuf};
use std::thread::Scope;

use rayon::prelude::*;

use crate::line::{LineReader, LineWriter};
use crate::pipeline::{self, Stream};
use crate::progress::Progress;
use crate::sort::SortError;

/// Loads a chunk into memory, sorts it in ascending order and rewrites it.
///
/// The sorted data is written to a temporary file next to the chunk which then replaces the chunk,
/// so the chunk path never refers to a partially written file.
///
/// # Arguments
/// * `path` - Chunk to be sorted
/// * `buf_size` - Read/write buffer size
/// * `thread_pool` - Pool the in-memory sort runs on
pub fn sort_chunk(path: &Path, buf_size: usize, thread_pool: &rayon::ThreadPool) -> Result<(), SortError> {
    let mut numbers = LineReader::open(path, buf_size)?.read_all()?;

    log::debug!("sorting chunk {} ({} items) ...", path.display(), numbers.len());
    thread_pool.install(|| {
        numbers.par_sort_unstable();
    });

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp_file = tempfile::NamedTempFile::new_in(dir).map_err(|err| SortError::IO(dir.into(), err))?;
    let file = tmp_file
        .as_file()
        .try_clone()
        .map_err(|err| SortError::IO(tmp_file.path().into(), err))?;

    let mut writer = LineWriter::new(file, tmp_file.path(), buf_size);
    for number in numbers {
        writer.write(number)?;
    }
    writer.close()?;

    tmp_file
        .persist(path)
        .map_err(|err| SortError::IO(path.into(), err.error))?;

    return Ok(());
}

/// Sorts every chunk of the input stream on a pool of `workers` threads.
/// Paths are emitted, in completion order, once their chunk is sorted; failed items are passed through.
pub fn spawn_sorters<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    input: Stream<Result<PathBuf, SortError>>,
    workers: usize,
    buf_size: usize,
    thread_pool: &'env rayon::ThreadPool,
    progress: &'env dyn Progress,
) -> Result<Stream<Result<PathBuf, SortError>>, SortError> {
    let sort = move |item: Result<PathBuf, SortError>| -> Result<PathBuf, SortError> {
        let path = item?;
        sort_chunk(&path, buf_size, thread_pool)?;
        progress.chunk_sorted(&path);

        Ok(path)
    };
    let outputs = pipeline::fan_out(scope, "ems-sort", workers, input, sort).map_err(SortError::Spawn)?;

    pipeline::fan_in(scope, outputs).map_err(SortError::Spawn)
}
