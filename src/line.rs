//! Line-oriented integer files.
//!
//! Every file handled by the sorter (input, chunks, merged runs and the final output) holds one decimal
//! integer per line. [`LineReader`] and [`LineWriter`] translate between such files and `i64` values using
//! coarse-grained buffers so that no record costs a system call of its own.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::sort::SortError;

/// Default read/write buffer size: 1 MiB.
pub const DEFAULT_RW_BUF_SIZE: usize = 1024 * 1024;

/// Buffered sequential reader of a line-delimited integer file.
///
/// The last line may or may not be terminated by a newline. Reaching the end of the file is not an error,
/// a line that is not a decimal integer is.
pub struct LineReader {
    path: PathBuf,
    reader: io::BufReader<fs::File>,
    line: Vec<u8>,
    line_number: usize,
    bytes_read: u64,
}

impl LineReader {
    /// Opens a file for reading.
    ///
    /// # Arguments
    /// * `path` - File to be read
    /// * `buf_size` - Read buffer size
    pub fn open(path: &Path, buf_size: usize) -> Result<Self, SortError> {
        let file = fs::File::open(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => SortError::MissingFile(path.into()),
            _ => SortError::IO(path.into(), err),
        })?;

        return Ok(LineReader {
            path: path.into(),
            reader: io::BufReader::with_capacity(buf_size, file),
            line: Vec::new(),
            line_number: 0,
            bytes_read: 0,
        });
    }

    /// Number of bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Reads the next raw line into `buf` without its delimiter.
    /// Returns `false` once the file is exhausted.
    pub fn next_raw(&mut self, buf: &mut Vec<u8>) -> Result<bool, SortError> {
        buf.clear();
        let read = self
            .reader
            .read_until(b'\n', buf)
            .map_err(|err| SortError::IO(self.path.clone(), err))?;
        if read == 0 {
            return Ok(false);
        }

        self.bytes_read += read as u64;
        self.line_number += 1;

        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }

        return Ok(true);
    }

    /// Reads and parses the next integer. Returns [`None`] once the file is exhausted.
    pub fn next_int(&mut self) -> Result<Option<i64>, SortError> {
        let mut line = std::mem::take(&mut self.line);
        let result = match self.next_raw(&mut line) {
            Ok(true) => self.parse(&line).map(Some),
            Ok(false) => Ok(None),
            Err(err) => Err(err),
        };
        self.line = line;

        return result;
    }

    /// Reads all the remaining integers into memory.
    pub fn read_all(mut self) -> Result<Vec<i64>, SortError> {
        let mut numbers = Vec::new();
        while let Some(number) = self.next_int()? {
            numbers.push(number);
        }

        return Ok(numbers);
    }

    fn parse(&self, line: &[u8]) -> Result<i64, SortError> {
        std::str::from_utf8(line)
            .ok()
            .and_then(|line| line.parse::<i64>().ok())
            .ok_or_else(|| SortError::Parse {
                path: self.path.clone(),
                line: self.line_number,
                content: String::from_utf8_lossy(line).into_owned(),
            })
    }
}

impl Iterator for LineReader {
    type Item = Result<i64, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_int().transpose()
    }
}

/// Buffered sequential writer of a line-delimited integer file.
///
/// The writer is closed explicitly with [`LineWriter::close`] so that flush errors are reported;
/// dropping an unclosed writer flushes it on a best-effort basis.
pub struct LineWriter {
    path: PathBuf,
    writer: Option<io::BufWriter<fs::File>>,
    lines: usize,
}

impl LineWriter {
    /// Creates (or truncates) a file for writing.
    ///
    /// # Arguments
    /// * `path` - File to be written
    /// * `buf_size` - Write buffer size
    pub fn create(path: &Path, buf_size: usize) -> Result<Self, SortError> {
        let file = fs::File::create(path).map_err(|err| SortError::IO(path.into(), err))?;
        return Ok(Self::new(file, path, buf_size));
    }

    /// Wraps an already opened file. `path` is only used for error reporting.
    pub fn new(file: fs::File, path: &Path, buf_size: usize) -> Self {
        LineWriter {
            path: path.into(),
            writer: Some(io::BufWriter::with_capacity(buf_size, file)),
            lines: 0,
        }
    }

    /// Number of lines written so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Appends one integer record.
    pub fn write(&mut self, number: i64) -> Result<(), SortError> {
        let writer = self.writer()?;
        let result = writeln!(writer, "{}", number);
        self.lines += 1;

        return result.map_err(|err| SortError::IO(self.path.clone(), err));
    }

    /// Appends one raw line; the delimiter is added by the writer.
    pub fn write_raw(&mut self, line: &[u8]) -> Result<(), SortError> {
        let writer = self.writer()?;
        let result = writer.write_all(line).and_then(|_| writer.write_all(b"\n"));
        self.lines += 1;

        return result.map_err(|err| SortError::IO(self.path.clone(), err));
    }

    /// Flushes buffered records and releases the file. Closing an already closed writer is a no-op.
    pub fn close(&mut self) -> Result<(), SortError> {
        if let Some(writer) = self.writer.take() {
            writer
                .into_inner()
                .map_err(|err| SortError::IO(self.path.clone(), err.into_error()))?;
        }

        return Ok(());
    }

    /// Like [`LineWriter::close`], but also waits until the file content reaches the disk.
    pub fn sync_and_close(&mut self) -> Result<(), SortError> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|err| SortError::IO(self.path.clone(), err.into_error()))?;
            file.sync_all().map_err(|err| SortError::IO(self.path.clone(), err))?;
        }

        return Ok(());
    }

    fn writer(&mut self) -> Result<&mut io::BufWriter<fs::File>, SortError> {
        let path = &self.path;
        self.writer.as_mut().ok_or_else(|| {
            SortError::IO(
                path.clone(),
                io::Error::new(io::ErrorKind::Other, "write to a closed file"),
            )
        })
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("{}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::{LineReader, LineWriter};
    use crate::sort::SortError;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case("1\n-2\n3\n", vec![1, -2, 3])]
    #[case("1\n-2\n3", vec![1, -2, 3])]
    #[case("7\r\n8\r\n", vec![7, 8])]
    #[case("", vec![])]
    fn test_read_ints(tmp_dir: tempfile::TempDir, #[case] content: &str, #[case] expected: Vec<i64>) {
        let path = tmp_dir.path().join("nums.txt");
        fs::write(&path, content).unwrap();

        let actual = LineReader::open(&path, 16).unwrap().read_all().unwrap();
        assert_eq!(actual, expected);
    }

    #[rstest]
    fn test_exhausted_reader_stays_exhausted(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("nums.txt");
        fs::write(&path, "42\n").unwrap();

        let mut reader = LineReader::open(&path, 16).unwrap();
        assert_eq!(reader.next_int().unwrap(), Some(42));
        assert_eq!(reader.next_int().unwrap(), None);
        assert_eq!(reader.next_int().unwrap(), None);
        assert_eq!(reader.bytes_read(), 3);
    }

    #[rstest]
    #[case("1\nabc\n3\n", 2, "abc")]
    #[case("1\n\n3\n", 2, "")]
    #[case("12x\n", 1, "12x")]
    fn test_malformed_line(
        tmp_dir: tempfile::TempDir,
        #[case] content: &str,
        #[case] expected_line: usize,
        #[case] expected_content: &str,
    ) {
        let path = tmp_dir.path().join("nums.txt");
        fs::write(&path, content).unwrap();

        let result: Result<Vec<i64>, SortError> = LineReader::open(&path, 16).unwrap().collect();
        match result {
            Err(SortError::Parse { line, content, .. }) => {
                assert_eq!(line, expected_line);
                assert_eq!(content, expected_content);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    fn test_missing_file(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("absent.txt");
        assert!(matches!(LineReader::open(&path, 16), Err(SortError::MissingFile(_))));
    }

    #[rstest]
    fn test_writer(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("out.txt");

        let mut writer = LineWriter::create(&path, 4).unwrap();
        writer.write(10).unwrap();
        writer.write(-5).unwrap();
        writer.write_raw(b"77").unwrap();
        assert_eq!(writer.lines(), 3);

        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.write(1).is_err());

        assert_eq!(fs::read_to_string(&path).unwrap(), "10\n-5\n77\n");
    }

    #[rstest]
    fn test_writer_sync_and_close(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("out.txt");

        let mut writer = LineWriter::create(&path, 1024).unwrap();
        writer.write(3).unwrap();
        writer.write(4).unwrap();

        writer.sync_and_close().unwrap();
        writer.sync_and_close().unwrap();
        writer.close().unwrap();
        assert!(writer.write(5).is_err());

        assert_eq!(fs::read_to_string(&path).unwrap(), "3\n4\n");
    }

    #[rstest]
    fn test_writer_flushes_on_drop(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("out.txt");
        {
            let mut writer = LineWriter::create(&path, 1024).unwrap();
            writer.write(1).unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n");
    }
}
