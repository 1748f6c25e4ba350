use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use csv::StringRecord;

use crate::{Error, Result};

/// An append-only destination for classified rows
pub trait Sink {
    /// Discard anything already written and start over with `headers`
    fn reset(&mut self, headers: &StringRecord) -> Result<()>;

    /// Append `rows` after everything written so far
    fn append(&mut self, rows: &[StringRecord]) -> Result<()>;
}

/// Writes classified rows to a CSV file, reopening it in append mode for every flush so
/// each flushed block is on disk before the next one starts
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    /// A sink writing to `path`; nothing is touched until `reset`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The output file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, file: File, rows: &[StringRecord]) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        for row in rows {
            writer.write_record(row).map_err(|e| self.error(e))?;
        }

        writer.flush().map_err(|e| self.error(e))
    }

    fn error(&self, e: impl std::fmt::Display) -> Error {
        Error::IoWrite(format!("{}: {}", self.path.display(), e))
    }
}

impl Sink for CsvSink {
    fn reset(&mut self, headers: &StringRecord) -> Result<()> {
        let file = File::create(&self.path).map_err(|e| self.error(e))?;

        self.write(file, std::slice::from_ref(headers))
    }

    fn append(&mut self, rows: &[StringRecord]) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.error(e))?;

        self.write(file, rows)
    }
}

/// Collects rows in memory, header first
impl Sink for Vec<StringRecord> {
    fn reset(&mut self, headers: &StringRecord) -> Result<()> {
        self.clear();
        self.push(headers.clone());

        Ok(())
    }

    fn append(&mut self, rows: &[StringRecord]) -> Result<()> {
        self.extend_from_slice(rows);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_reset_truncates_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classified.csv");
        std::fs::write(&path, "stale,rows\nfrom,before\n").unwrap();

        let mut sink = CsvSink::new(&path);
        sink.reset(&StringRecord::from(vec!["content", "orientation"]))
            .unwrap();
        sink.append(&[StringRecord::from(vec!["hello, world", "1"])])
            .unwrap();
        sink.append(&[StringRecord::from(vec!["bye", ""])]).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "content,orientation\n\"hello, world\",1\nbye,\n");
    }

    #[test]
    fn test_missing_directory_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().join("missing").join("out.csv"));

        let result = sink.reset(&StringRecord::from(vec!["content"]));

        assert!(matches!(result, Err(Error::IoWrite(_))));
    }
}
