//! External merge sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::line::DEFAULT_RW_BUF_SIZE;
use crate::merge::{MergeReducer, Reduction};
use crate::progress::{NoProgress, Progress};
use crate::sorter::spawn_sorters;
use crate::split::spawn_splitter;

/// Default working directory.
pub const DEFAULT_WORK_DIR: &str = "temp";
/// Default chunk size in lines.
pub const DEFAULT_CHUNK_LINES: usize = 1_000_000;
/// Default number of chunks sorted in parallel.
pub const DEFAULT_SORT_WORKERS: usize = 8;
/// Default number of merges running in parallel.
pub const DEFAULT_MERGE_WORKERS: usize = 20;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Working directory preparation error.
    WorkDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Pipeline thread creation error.
    Spawn(io::Error),
    /// File I/O error.
    IO(PathBuf, io::Error),
    /// A line is not a decimal integer.
    Parse { path: PathBuf, line: usize, content: String },
    /// A file the pipeline expects to exist is gone.
    MissingFile(PathBuf),
    /// No file reached the merge stage.
    EmptyPipeline,
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::WorkDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::Spawn(err) => Some(err),
            SortError::IO(_, err) => Some(err),
            SortError::Parse { .. } => None,
            SortError::MissingFile(_) => None,
            SortError::EmptyPipeline => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::WorkDir(err) => write!(f, "working directory not prepared: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Spawn(err) => write!(f, "pipeline thread not started: {}", err),
            SortError::IO(path, err) => write!(f, "I/O operation on {} failed: {}", path.display(), err),
            SortError::Parse { path, line, content } => {
                write!(f, "{}:{}: malformed number {:?}", path.display(), line, content)
            }
            SortError::MissingFile(path) => write!(f, "file {} unexpectedly missing", path.display()),
            SortError::EmptyPipeline => write!(f, "no chunk reached the merge stage"),
        }
    }
}

/// Summary of a successful sort.
#[derive(Debug, Clone)]
pub struct SortReport {
    /// Number of chunks the input was split into.
    pub chunks: usize,
    /// Number of merge rounds.
    pub rounds: usize,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

/// External merge sorter builder. Provides methods for [`MergeSorter`] initialization.
#[derive(Clone)]
pub struct MergeSorterBuilder {
    /// Number of threads to be used to sort a chunk in memory.
    threads_number: Option<usize>,
    /// Directory to be used to store chunk files.
    work_dir: Option<Box<Path>>,
    /// Chunk size in lines.
    chunk_lines: usize,
    /// Number of chunks sorted in parallel.
    sort_workers: usize,
    /// Number of merges running in parallel.
    merge_workers: usize,
    /// File read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Progress observer.
    progress: Option<Arc<dyn Progress>>,
}

impl MergeSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        MergeSorterBuilder::default()
    }

    /// Builds a [`MergeSorter`] instance using provided configuration.
    pub fn build(self) -> Result<MergeSorter, SortError> {
        MergeSorter::new(
            self.threads_number,
            self.work_dir.as_deref(),
            self.chunk_lines,
            self.sort_workers,
            self.merge_workers,
            self.rw_buf_size,
            self.progress,
        )
    }

    /// Sets number of threads to be used to sort a chunk in memory.
    pub fn with_threads_number(mut self, threads_number: usize) -> MergeSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store chunk files. It is wiped at the start of every run.
    pub fn with_work_dir(mut self, path: &Path) -> MergeSorterBuilder {
        self.work_dir = Some(path.into());
        return self;
    }

    /// Sets chunk size in lines.
    pub fn with_chunk_lines(mut self, chunk_lines: usize) -> MergeSorterBuilder {
        self.chunk_lines = chunk_lines;
        return self;
    }

    /// Sets number of chunks sorted in parallel.
    pub fn with_sort_workers(mut self, workers: usize) -> MergeSorterBuilder {
        self.sort_workers = workers;
        return self;
    }

    /// Sets number of merges running in parallel.
    pub fn with_merge_workers(mut self, workers: usize) -> MergeSorterBuilder {
        self.merge_workers = workers;
        return self;
    }

    /// Sets file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> MergeSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets progress observer.
    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> MergeSorterBuilder {
        self.progress = Some(progress);
        return self;
    }
}

impl Default for MergeSorterBuilder {
    fn default() -> Self {
        MergeSorterBuilder {
            threads_number: None,
            work_dir: None,
            chunk_lines: DEFAULT_CHUNK_LINES,
            sort_workers: DEFAULT_SORT_WORKERS,
            merge_workers: DEFAULT_MERGE_WORKERS,
            rw_buf_size: None,
            progress: None,
        }
    }
}

/// External merge sorter.
///
/// Splits the input file into chunks, sorts the chunks in parallel and merges them pairwise into the output
/// file. The stages run concurrently and hand files over one at a time, so merging starts as soon as the first
/// two chunks are sorted.
pub struct MergeSorter {
    /// Chunk sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store chunk files.
    work_dir: PathBuf,
    /// Chunk size in lines.
    chunk_lines: usize,
    /// Number of chunks sorted in parallel.
    sort_workers: usize,
    /// Number of merges running in parallel.
    merge_workers: usize,
    /// File read/write buffer size.
    rw_buf_size: usize,
    /// Progress observer.
    progress: Arc<dyn Progress>,
}

impl MergeSorter {
    /// Creates a new external merge sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort a chunk in memory. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `work_dir` - Directory to be used to store chunk files. If the parameter is [`None`] `temp` is used.
    /// * `chunk_lines` - Chunk size in lines.
    /// * `sort_workers` - Number of chunks sorted in parallel.
    /// * `merge_workers` - Number of merges running in parallel.
    /// * `rw_buf_size` - File read/write buffer size. If the parameter is [`None`] 1 MiB is used.
    /// * `progress` - Progress observer. If the parameter is [`None`] progress is not reported.
    pub fn new(
        threads_number: Option<usize>,
        work_dir: Option<&Path>,
        chunk_lines: usize,
        sort_workers: usize,
        merge_workers: usize,
        rw_buf_size: Option<usize>,
        progress: Option<Arc<dyn Progress>>,
    ) -> Result<Self, SortError> {
        let work_dir = work_dir.unwrap_or(Path::new(DEFAULT_WORK_DIR)).to_path_buf();
        let rw_buf_size = rw_buf_size.unwrap_or(DEFAULT_RW_BUF_SIZE);

        log::info!(
            "sorter configured (work dir: {}, chunk lines: {}, sort workers: {}, merge workers: {}, buffer: {} bytes)",
            work_dir.display(),
            chunk_lines,
            sort_workers,
            merge_workers,
            rw_buf_size
        );

        return Ok(MergeSorter {
            thread_pool: Self::init_thread_pool(threads_number)?,
            work_dir,
            chunk_lines,
            sort_workers,
            merge_workers,
            rw_buf_size,
            progress: progress.unwrap_or_else(|| Arc::new(NoProgress)),
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Sorts the input file into the output file.
    ///
    /// The output file appears only once the data is completely sorted: the last merged file is renamed into
    /// place. On failure the output path is left untouched and the working directory is kept for inspection.
    ///
    /// # Arguments
    /// * `input` - File to be sorted
    /// * `output` - Result file
    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortReport, SortError> {
        let started = Instant::now();
        self.prepare_work_dir()?;

        let reduction = match thread::scope(|scope| self.run_pipeline(scope, input)) {
            Ok(reduction) => reduction,
            Err(err) => {
                log::warn!("sorting failed, {} kept for inspection", self.work_dir.display());
                return Err(err);
            }
        };

        fs::rename(&reduction.path, output).map_err(|err| SortError::IO(output.into(), err))?;
        // the output is published at this point, a leftover working directory does not fail the run
        remove_work_dir(&self.work_dir);

        let report = SortReport {
            chunks: reduction.generations[0],
            rounds: reduction.rounds(),
            elapsed: started.elapsed(),
        };
        log::info!("{} sorted into {} ({:?})", input.display(), output.display(), report);

        return Ok(report);
    }

    fn prepare_work_dir(&self) -> Result<(), SortError> {
        match fs::remove_dir_all(&self.work_dir) {
            Ok(()) => log::info!("stale {} removed", self.work_dir.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(SortError::WorkDir(err)),
        }
        fs::create_dir_all(&self.work_dir).map_err(|err| SortError::WorkDir(err))?;

        log::info!("using {} as a working directory", self.work_dir.display());

        return Ok(());
    }

    fn run_pipeline<'scope, 'env>(
        &'env self,
        scope: &'scope thread::Scope<'scope, 'env>,
        input: &'env Path,
    ) -> Result<Reduction, SortError> {
        let progress: &'env dyn Progress = &*self.progress;

        let chunks = spawn_splitter(
            scope,
            input,
            &self.work_dir,
            self.chunk_lines,
            self.rw_buf_size,
            progress,
        )?;
        let sorted = spawn_sorters(
            scope,
            chunks,
            self.sort_workers,
            self.rw_buf_size,
            &self.thread_pool,
            progress,
        )?;

        MergeReducer::new(&self.work_dir, self.merge_workers, self.rw_buf_size, progress).reduce(scope, sorted)
    }
}

/// Removes the working directory. Returns `false` and logs a warning if it could not be removed.
fn remove_work_dir(work_dir: &Path) -> bool {
    match fs::remove_dir_all(work_dir) {
        Ok(()) => true,
        Err(err) => {
            log::warn!("working directory {} not removed: {}", work_dir.display(), err);
            false
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{remove_work_dir, MergeSorter, MergeSorterBuilder, SortError};
    use crate::progress::Progress;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn sorter(work_dir: &Path, chunk_lines: usize) -> MergeSorter {
        MergeSorterBuilder::new()
            .with_work_dir(work_dir)
            .with_chunk_lines(chunk_lines)
            .with_sort_workers(2)
            .with_merge_workers(3)
            .with_threads_number(2)
            .with_rw_buf_size(64)
            .build()
            .unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        split: Mutex<Vec<usize>>,
        rounds: Mutex<Vec<(usize, usize)>>,
    }

    impl Progress for Recorder {
        fn chunk_split(&self, _path: &Path, lines: usize) {
            self.split.lock().unwrap().push(lines);
        }

        fn round_finished(&self, _round: usize, inputs: usize, outputs: usize) {
            self.rounds.lock().unwrap().push((inputs, outputs));
        }
    }

    #[rstest]
    fn test_end_to_end_scenario(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("nums.txt");
        let output = tmp_dir.path().join("sorted.txt");
        let work_dir = tmp_dir.path().join("temp");
        fs::write(&input, "5\n3\n3\n1\n9\n2\n").unwrap();

        let recorder = Arc::new(Recorder::default());
        let sorter = MergeSorterBuilder::new()
            .with_work_dir(&work_dir)
            .with_chunk_lines(2)
            .with_progress(recorder.clone())
            .build()
            .unwrap();

        let report = sorter.sort(&input, &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "1\n2\n3\n3\n5\n9\n");
        assert_eq!(report.chunks, 3);
        assert_eq!(report.rounds, 2);
        assert_eq!(*recorder.split.lock().unwrap(), vec![3, 3, 0]);
        assert_eq!(*recorder.rounds.lock().unwrap(), vec![(3, 2), (2, 1)]);
        assert!(!work_dir.exists());
        assert_eq!(fs::read_to_string(&input).unwrap(), "5\n3\n3\n1\n9\n2\n");
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(37)]
    #[case(1000)]
    #[case(5000)]
    fn test_sort_shuffled(tmp_dir: tempfile::TempDir, #[case] chunk_lines: usize) {
        let mut expected: Vec<i64> = (-500..500).chain(0..500).collect();
        let mut shuffled = expected.clone();
        shuffled.shuffle(&mut rand::thread_rng());
        expected.sort();

        let input = tmp_dir.path().join("nums.txt");
        let output = tmp_dir.path().join("sorted.txt");
        let content: String = shuffled.iter().map(|n| format!("{}\n", n)).collect();
        fs::write(&input, content).unwrap();

        let report = sorter(&tmp_dir.path().join("temp"), chunk_lines).sort(&input, &output).unwrap();

        let actual: Vec<i64> = fs::read_to_string(&output)
            .unwrap()
            .lines()
            .map(|line| line.parse().unwrap())
            .collect();
        assert_eq!(actual, expected);
        assert_eq!(report.chunks, expected.len() / (chunk_lines + 1) + 1);
        assert_eq!(report.rounds, crate::merge::expected_rounds(report.chunks));
    }

    #[rstest]
    fn test_sort_empty_input(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("nums.txt");
        let output = tmp_dir.path().join("sorted.txt");
        fs::write(&input, "").unwrap();

        let report = sorter(&tmp_dir.path().join("temp"), 10).sort(&input, &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "");
        assert_eq!(report.chunks, 1);
        assert_eq!(report.rounds, 0);
    }

    #[rstest]
    fn test_stale_work_dir_is_replaced(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("nums.txt");
        let output = tmp_dir.path().join("sorted.txt");
        let work_dir = tmp_dir.path().join("temp");
        fs::create_dir(&work_dir).unwrap();
        fs::write(work_dir.join("nums_0.txt"), "garbage\n").unwrap();
        fs::write(&input, "2\n1\n").unwrap();

        sorter(&work_dir, 10).sort(&input, &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "1\n2\n");
        assert!(!work_dir.exists());
    }

    #[rstest]
    fn test_malformed_line_is_fatal(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("nums.txt");
        let output = tmp_dir.path().join("sorted.txt");
        let content: String = (0..50).map(|n| format!("{}\n", n)).collect::<String>() + "oops\n";
        fs::write(&input, content).unwrap();

        let result = sorter(&tmp_dir.path().join("temp"), 4).sort(&input, &output);

        assert!(matches!(result, Err(SortError::Parse { .. })), "{:?}", result);
        assert!(!output.exists());
    }

    #[rstest]
    fn test_existing_output_untouched_on_failure(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("nums.txt");
        let output = tmp_dir.path().join("sorted.txt");
        fs::write(&input, "1\nx\n").unwrap();
        fs::write(&output, "previous\n").unwrap();

        assert!(sorter(&tmp_dir.path().join("temp"), 1).sort(&input, &output).is_err());
        assert_eq!(fs::read_to_string(&output).unwrap(), "previous\n");
    }

    #[rstest]
    fn test_missing_input(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("absent.txt");
        let output = tmp_dir.path().join("sorted.txt");

        let result = sorter(&tmp_dir.path().join("temp"), 10).sort(&input, &output);

        assert!(matches!(result, Err(SortError::MissingFile(_))));
        assert!(!output.exists());
    }

    #[rstest]
    fn test_work_dir_removal_failure_is_not_fatal(tmp_dir: tempfile::TempDir) {
        let work_dir = tmp_dir.path().join("temp");
        fs::create_dir(&work_dir).unwrap();
        fs::write(work_dir.join("nums_0.txt"), "1\n").unwrap();
        assert!(remove_work_dir(&work_dir));
        assert!(!work_dir.exists());

        // a regular file in place of the directory cannot be removed as one
        let not_a_dir = tmp_dir.path().join("file.txt");
        fs::write(&not_a_dir, "1\n").unwrap();
        assert!(!remove_work_dir(&not_a_dir));
        assert!(not_a_dir.exists());

        assert!(!remove_work_dir(&tmp_dir.path().join("absent")));
    }
}
