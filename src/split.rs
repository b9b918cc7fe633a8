//! Input splitter.

use std::path::{Path, PathBuf};
use std::thread::Scope;

use crate::line::{LineReader, LineWriter};
use crate::pipeline::{self, Stream};
use crate::progress::Progress;
use crate::sort::SortError;

/// Path of the `index`-th chunk inside the working directory.
pub fn chunk_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("nums_{}.txt", index))
}

struct Chunk {
    path: PathBuf,
    writer: LineWriter,
}

impl Chunk {
    fn create(dir: &Path, index: usize, buf_size: usize) -> Result<Self, SortError> {
        let path = chunk_path(dir, index);
        let writer = LineWriter::create(&path, buf_size)?;

        return Ok(Chunk { path, writer });
    }

    fn finish(mut self, progress: &dyn Progress) -> Result<PathBuf, SortError> {
        self.writer.close()?;
        log::debug!("chunk {} written ({} lines)", self.path.display(), self.writer.lines());
        progress.chunk_split(&self.path, self.writer.lines());

        return Ok(self.path);
    }
}

/// Splits the input file into chunk files.
///
/// A chunk is closed once its line count exceeds `chunk_lines`, so every chunk holds at most `chunk_lines + 1`
/// lines. The next chunk is opened right away and the current chunk is always emitted at the end of the input,
/// even when it is empty; an empty input therefore produces exactly one empty chunk.
///
/// Lines are copied verbatim, parsing is left to the chunk sorter. Every chunk is flushed and closed before its
/// path is passed to `emit`. `emit` returns `false` when nobody is interested in further chunks, which stops the
/// split early.
///
/// Returns the number of chunks emitted.
pub fn split_file<F>(
    input: &Path,
    dir: &Path,
    chunk_lines: usize,
    buf_size: usize,
    progress: &dyn Progress,
    mut emit: F,
) -> Result<usize, SortError>
where
    F: FnMut(PathBuf) -> bool,
{
    let mut reader = LineReader::open(input, buf_size)?;
    let mut line = Vec::new();
    let mut chunk = Chunk::create(dir, 0, buf_size)?;
    let mut chunks = 1;

    while reader.next_raw(&mut line)? {
        chunk.writer.write_raw(&line)?;

        if chunk.writer.lines() > chunk_lines {
            if !emit(chunk.finish(progress)?) {
                return Ok(chunks);
            }
            chunk = Chunk::create(dir, chunks, buf_size)?;
            chunks += 1;
        }
    }
    emit(chunk.finish(progress)?);

    log::info!("input {} split into {} chunks", input.display(), chunks);
    progress.split_finished(chunks);

    return Ok(chunks);
}

/// Runs [`split_file`] on its own thread and streams the chunk paths.
/// A split failure is delivered as the last item of the stream.
pub fn spawn_splitter<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    input: &'env Path,
    dir: &'env Path,
    chunk_lines: usize,
    buf_size: usize,
    progress: &'env dyn Progress,
) -> Result<Stream<Result<PathBuf, SortError>>, SortError> {
    pipeline::produce(scope, "ems-split", move |tx| {
        let result = split_file(input, dir, chunk_lines, buf_size, progress, |path| tx.send(Ok(path)).is_ok());
        if let Err(err) = result {
            let _ = tx.send(Err(err));
        }
    })
    .map_err(SortError::Spawn)
}
