//! Sortedness verifier.

use std::path::Path;

use crate::line::LineReader;
use crate::sort::SortError;

/// Number of lines between two progress messages.
const PROGRESS_LINES: u64 = 10_000_000;

/// Verification outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every number is less than or equal to the next one.
    Sorted { count: u64 },
    /// `previous` on line `line - 1` is greater than `next` on line `line`.
    Unsorted { line: u64, previous: i64, next: i64 },
}

/// Scans a line-delimited integer file once and checks that it is in ascending order.
pub fn verify_file(path: &Path, buf_size: usize) -> Result<Verdict, SortError> {
    let mut reader = LineReader::open(path, buf_size)?;

    let mut previous = match reader.next_int()? {
        Some(number) => number,
        None => return Ok(Verdict::Sorted { count: 0 }),
    };
    let mut count = 1;

    while let Some(next) = reader.next_int()? {
        count += 1;
        if count % PROGRESS_LINES == 0 {
            log::debug!("{} numbers ({} bytes) of {} verified", count, reader.bytes_read(), path.display());
        }
        if previous > next {
            return Ok(Verdict::Unsorted {
                line: count,
                previous,
                next,
            });
        }
        previous = next;
    }
    log::info!("{} numbers ({} bytes) of {} are sorted", count, reader.bytes_read(), path.display());

    return Ok(Verdict::Sorted { count });
}
