//! Random input generator.

use std::path::Path;

use rand::Rng;

use crate::line::LineWriter;
use crate::sort::SortError;

/// Writes `count` random non-negative integers to `path`, one per line.
///
/// # Arguments
/// * `path` - File to be created
/// * `count` - Number of integers to generate
/// * `buf_size` - Write buffer size
/// * `rng` - Random number source
pub fn generate_file<R: Rng>(path: &Path, count: u64, buf_size: usize, rng: &mut R) -> Result<(), SortError> {
    log::info!("generating {} random numbers into {}", count, path.display());

    let mut writer = LineWriter::create(path, buf_size)?;
    for idx in 0..count {
        writer.write(rng.gen_range(0..=i64::MAX))?;

        if (idx + 1) % 1_000_000 == 0 {
            log::debug!("{:.2}% generated", (idx + 1) as f64 / count as f64 * 100.0);
        }
    }
    writer.close()?;

    return Ok(());
}
