//! Merge reducer.
//!
//! Sorted chunk files are merged pairwise in rounds. Each round halves (rounding up) the number of live files:
//! files are paired in arrival order, every pair is merged into a new file on a pool of workers and the odd file
//! out, if any, passes through untouched to be paired in the next round. Rounds repeat until one file remains.

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::Scope;

use md5::{Digest, Md5};

use crate::line::{LineReader, LineWriter};
use crate::pipeline::{self, Stream};
use crate::progress::Progress;
use crate::sort::SortError;

/// Number of pairwise merge rounds needed to reduce `files` sorted files to one.
pub fn expected_rounds(files: usize) -> usize {
    if files <= 1 {
        0
    } else {
        (usize::BITS - (files - 1).leading_zeros()) as usize
    }
}

/// Two-way merger.
/// Merges two sorted inputs into a single sorted output, advancing only the input whose head was consumed.
pub struct TwoWayMerge<T, E, L, R>
where
    T: Ord,
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    left: L,
    right: R,
    left_head: Option<T>,
    right_head: Option<T>,
    initiated: bool,

    error_type: PhantomData<E>,
}

impl<T, E, L, R> TwoWayMerge<T, E, L, R>
where
    T: Ord,
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    /// Creates a merger of two inputs.
    /// Both inputs should be sorted in ascending order otherwise the result is undefined.
    pub fn new<IL, IR>(left: IL, right: IR) -> Self
    where
        IL: IntoIterator<IntoIter = L>,
        IR: IntoIterator<IntoIter = R>,
    {
        TwoWayMerge {
            left: left.into_iter(),
            right: right.into_iter(),
            left_head: None,
            right_head: None,
            initiated: false,
            error_type: PhantomData,
        }
    }

    fn advance<I>(input: &mut I, head: &mut Option<T>) -> Result<(), E>
    where
        I: Iterator<Item = Result<T, E>>,
    {
        *head = input.next().transpose()?;
        return Ok(());
    }
}

impl<T, E, L, R> Iterator for TwoWayMerge<T, E, L, R>
where
    T: Ord,
    L: Iterator<Item = Result<T, E>>,
    R: Iterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the smaller of the two heads.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            self.initiated = true;
            if let Err(err) = Self::advance(&mut self.left, &mut self.left_head) {
                return Some(Err(err));
            }
            if let Err(err) = Self::advance(&mut self.right, &mut self.right_head) {
                return Some(Err(err));
            }
        }

        let take_left = match (&self.left_head, &self.right_head) {
            (Some(left), Some(right)) => left <= right,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };

        let item = if take_left {
            let item = self.left_head.take()?;
            Self::advance(&mut self.left, &mut self.left_head).map(|_| item)
        } else {
            let item = self.right_head.take()?;
            Self::advance(&mut self.right, &mut self.right_head).map(|_| item)
        };

        return Some(item);
    }
}

/// Name of the file two sorted files are merged into.
///
/// The name is derived from an MD5 digest of both source paths, which keeps concurrently running merges of the
/// same working directory from colliding. The digest is not used for anything security related.
pub fn merged_path(dir: &Path, first: &Path, second: &Path) -> PathBuf {
    let digest = Md5::digest(format!("{}-{}", first.display(), second.display()).as_bytes());
    let hash: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();

    dir.join(format!("merged_{}.txt", hash))
}

fn remove_source(path: &Path) -> Result<(), SortError> {
    fs::remove_file(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => SortError::MissingFile(path.into()),
        _ => SortError::IO(path.into(), err),
    })
}

/// Merges two sorted files into a new sorted file inside `dir` and deletes both sources.
/// Returns the path of the merged file.
pub fn merge_pair(first: &Path, second: &Path, dir: &Path, buf_size: usize) -> Result<PathBuf, SortError> {
    let left = LineReader::open(first, buf_size)?;
    let right = LineReader::open(second, buf_size)?;

    let path = merged_path(dir, first, second);
    let mut writer = LineWriter::create(&path, buf_size)?;
    for item in TwoWayMerge::new(left, right) {
        writer.write(item?)?;
    }
    // the sources are gone once this returns, the merged file must already be on disk
    writer.sync_and_close()?;

    remove_source(first)?;
    remove_source(second)?;

    log::debug!(
        "{} and {} merged into {} ({} items)",
        first.display(),
        second.display(),
        path.display(),
        writer.lines()
    );

    return Ok(path);
}

/// Result of a merge reduction.
#[derive(Debug)]
pub struct Reduction {
    /// The only surviving file.
    pub path: PathBuf,
    /// Number of live files before the first round and after every round, e.g. `[5, 3, 2, 1]`.
    pub generations: Vec<usize>,
}

impl Reduction {
    /// Number of merge rounds performed.
    pub fn rounds(&self) -> usize {
        self.generations.len().saturating_sub(1)
    }
}

/// Merge reducer. Reduces a stream of sorted files to a single sorted file.
pub struct MergeReducer<'env> {
    dir: &'env Path,
    workers: usize,
    buf_size: usize,
    progress: &'env dyn Progress,
}

impl<'env> MergeReducer<'env> {
    /// Creates a merge reducer.
    ///
    /// # Arguments
    /// * `dir` - Directory merged files are created in
    /// * `workers` - Number of merges running in parallel
    /// * `buf_size` - Read/write buffer size
    /// * `progress` - Progress observer
    pub fn new(dir: &'env Path, workers: usize, buf_size: usize, progress: &'env dyn Progress) -> Self {
        MergeReducer {
            dir,
            workers,
            buf_size,
            progress,
        }
    }

    /// Merges the input files round by round until one is left.
    ///
    /// The first round consumes the input stream as it is produced, so merging overlaps with whatever stage
    /// feeds the stream. Every following round runs over the files the previous round left behind.
    pub fn reduce<'scope>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        input: Stream<Result<PathBuf, SortError>>,
    ) -> Result<Reduction, SortError> {
        let (mut generation, consumed) = self.run_round(scope, input)?;

        let mut generations = vec![consumed];
        if consumed > 1 {
            generations.push(generation.len());
            self.progress.round_finished(1, consumed, generation.len());
        }

        while generation.len() > 1 {
            let inputs = generation.len();
            let stream = pipeline::from_iter(scope, generation.into_iter().map(Ok)).map_err(SortError::Spawn)?;

            let (next, _) = self.run_round(scope, stream)?;
            generations.push(next.len());
            self.progress.round_finished(generations.len() - 1, inputs, next.len());

            generation = next;
        }

        let path = generation.pop().ok_or(SortError::EmptyPipeline)?;
        log::info!("merge done in {} rounds", generations.len() - 1);

        return Ok(Reduction { path, generations });
    }

    /// Runs one round. Returns the surviving files and the number of files consumed.
    fn run_round<'scope>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        input: Stream<Result<PathBuf, SortError>>,
    ) -> Result<(Vec<PathBuf>, usize), SortError> {
        let dir = self.dir;
        let buf_size = self.buf_size;
        let progress = self.progress;
        let consumed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&consumed);

        let merge = move |pair: Vec<Result<PathBuf, SortError>>| -> Result<PathBuf, SortError> {
            counter.fetch_add(pair.len(), Ordering::SeqCst);

            let paths: Vec<PathBuf> = pair.into_iter().collect::<Result<_, _>>()?;
            let mut paths = paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(first), Some(second)) => {
                    let merged = merge_pair(&first, &second, dir, buf_size)?;
                    let bytes = fs::metadata(&merged)
                        .map_err(|err| SortError::IO(merged.clone(), err))?
                        .len();
                    progress.pair_merged(&merged, bytes);

                    Ok(merged)
                }
                (Some(single), None) => {
                    log::debug!("{} passed through unmerged", single.display());
                    Ok(single)
                }
                _ => Err(SortError::EmptyPipeline),
            }
        };

        let pairs = pipeline::batch(scope, 2, input).map_err(SortError::Spawn)?;
        let outputs = pipeline::fan_out(scope, "ems-merge", self.workers, pairs, merge).map_err(SortError::Spawn)?;
        let merged = pipeline::fan_in(scope, outputs).map_err(SortError::Spawn)?;

        let mut generation = Vec::new();
        for item in merged.iter() {
            generation.push(item?);
        }

        return Ok((generation, consumed.load(Ordering::SeqCst)));
    }
}
