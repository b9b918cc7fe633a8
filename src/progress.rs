//! Sorting progress observers.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::merge::expected_rounds;

/// Progress observer. Every hook has a no-op default; hooks may be called concurrently from worker threads.
pub trait Progress: Send + Sync {
    /// A chunk file has been written by the splitter.
    fn chunk_split(&self, _path: &Path, _lines: usize) {}

    /// The splitter is done.
    fn split_finished(&self, _chunks: usize) {}

    /// A chunk has been sorted in place.
    fn chunk_sorted(&self, _path: &Path) {}

    /// Two files have been merged into `path` of `bytes` size.
    fn pair_merged(&self, _path: &Path, _bytes: u64) {}

    /// A merge round reduced `inputs` files to `outputs`.
    fn round_finished(&self, _round: usize, _inputs: usize, _outputs: usize) {}
}

/// Progress observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Progress observer that logs merge progress.
///
/// Every merge round rewrites the whole data set once, so the expected merge volume is the input size times the
/// number of rounds. The percentage is an estimate until the splitter reports the chunk count.
#[derive(Debug)]
pub struct LogProgress {
    input_bytes: u64,
    chunks: AtomicUsize,
    merged_bytes: AtomicU64,
}

impl LogProgress {
    /// Creates an observer for an input file of `input_bytes` size.
    pub fn new(input_bytes: u64) -> Self {
        LogProgress {
            input_bytes,
            chunks: AtomicUsize::new(0),
            merged_bytes: AtomicU64::new(0),
        }
    }

    /// Estimated completion of the merge phase in percent.
    pub fn percent(&self) -> f64 {
        let rounds = expected_rounds(self.chunks.load(Ordering::Relaxed)).max(1) as f64;
        let expected = self.input_bytes as f64 * rounds;
        if expected == 0.0 {
            return 100.0;
        }

        let merged = self.merged_bytes.load(Ordering::Relaxed) as f64;
        return (merged / expected * 100.0).min(100.0);
    }
}

impl Progress for LogProgress {
    fn split_finished(&self, chunks: usize) {
        self.chunks.store(chunks, Ordering::Relaxed);
    }

    fn chunk_sorted(&self, path: &Path) {
        log::debug!("chunk {} sorted", path.display());
    }

    fn pair_merged(&self, path: &Path, bytes: u64) {
        self.merged_bytes.fetch_add(bytes, Ordering::Relaxed);
        log::debug!("{} merged ({:.2}%)", path.display(), self.percent());
    }

    fn round_finished(&self, round: usize, inputs: usize, outputs: usize) {
        log::info!(
            "merge round {} done: {} -> {} files ({:.2}%)",
            round,
            inputs,
            outputs,
            self.percent()
        );
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::{LogProgress, Progress};

    #[test]
    fn test_log_progress_percent() {
        let progress = LogProgress::new(100);
        assert_eq!(progress.percent(), 0.0);

        // 4 chunks need 2 rounds, 200 bytes of merge output in total
        progress.split_finished(4);
        progress.pair_merged(Path::new("a"), 50);
        assert_eq!(progress.percent(), 25.0);

        progress.pair_merged(Path::new("b"), 500);
        assert_eq!(progress.percent(), 100.0);
    }

    #[test]
    fn test_empty_input_is_complete() {
        assert_eq!(LogProgress::new(0).percent(), 100.0);
    }
}
