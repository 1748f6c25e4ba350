use std::{
    collections::BTreeSet,
    fs::File,
    io,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use csv::StringRecord;

use crate::{Error, Result};

/// The default column holding post text
pub static TEXT_COLUMN: &str = "content";

/// An ordered, unlabelled corpus read from CSV. Every column is kept so it can be passed
/// through to the classified output, and every input row keeps its position: a row with the
/// wrong number of fields is padded or cut to the header width, an unreadable one becomes
/// empty fields, and both are marked malformed so they get no prediction.
#[derive(Clone, Debug)]
pub struct Corpus {
    /// The header row
    headers: StringRecord,

    /// Position of the text column within each row
    text_column: usize,

    /// Rows in their original order
    rows: Vec<StringRecord>,

    /// Indices of rows that did not match the header
    malformed: BTreeSet<usize>,
}

impl Corpus {
    /// Load a corpus from `path`, stopping early if `interrupt` is raised while parsing
    pub fn load(path: impl AsRef<Path>, text_column: &str, interrupt: &AtomicBool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::DataFormat(format!("unable to open {}: {}", path.display(), e))
        })?;

        let corpus = Self::from_reader(file, text_column, interrupt)?;
        info!("Read {} rows from {}", corpus.len(), path.display());

        Ok(corpus)
    }

    /// Parse a corpus from any CSV reader
    pub fn from_reader<R: io::Read>(
        reader: R,
        text_column: &str,
        interrupt: &AtomicBool,
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let column = headers
            .iter()
            .position(|name| name == text_column)
            .ok_or_else(|| {
                Error::DataFormat(format!("input has no {:?} column", text_column))
            })?;

        let width = headers.len();
        let mut rows = Vec::new();
        let mut malformed = BTreeSet::new();

        for (index, record) in reader.records().enumerate() {
            if interrupt.load(Ordering::SeqCst) {
                warn!("Interrupted while parsing the corpus after {} rows", rows.len());
                return Err(Error::Interrupted);
            }

            match record {
                Ok(record) if record.len() == width => rows.push(record),
                Ok(mut record) => {
                    warn!(
                        "Row at line {} has {} fields instead of {} and will get no prediction",
                        index + 2,
                        record.len(),
                        width
                    );

                    record.truncate(width);
                    while record.len() < width {
                        record.push_field("");
                    }

                    malformed.insert(rows.len());
                    rows.push(record);
                }
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!(
                        "Row at line {} is unreadable and will get no prediction: {}",
                        index + 2,
                        e
                    );

                    malformed.insert(rows.len());
                    rows.push(StringRecord::from(vec![""; width]));
                }
            }
        }

        Ok(Self {
            headers,
            text_column: column,
            rows,
            malformed,
        })
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the corpus has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows that did not match the header
    pub fn malformed(&self) -> usize {
        self.malformed.len()
    }

    /// True if the row at `index` did not match the header and is not classified
    pub fn is_malformed(&self, index: usize) -> bool {
        self.malformed.contains(&index)
    }

    /// The header row of the input
    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// The full row at `index`
    pub fn row(&self, index: usize) -> Option<&StringRecord> {
        self.rows.get(index)
    }

    /// The post text at `index`
    pub fn text(&self, index: usize) -> Option<&str> {
        self.rows.get(index).and_then(|row| row.get(self.text_column))
    }

    /// Post texts for rows in `range`
    pub fn texts(&self, range: std::ops::Range<usize>) -> Vec<String> {
        self.rows[range]
            .iter()
            .map(|row| row.get(self.text_column).unwrap_or_default().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_passes_extra_columns_through() {
        let data = "id,content,author\n1,hello there,alice\n2,\"second, post\",bob\n";
        let corpus = Corpus::from_reader(data.as_bytes(), "content", &AtomicBool::new(false))
            .unwrap();

        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.text(1), Some("second, post"));
        assert_eq!(corpus.texts(0..2), vec!["hello there", "second, post"]);
        assert_eq!(
            corpus.row(0).unwrap().iter().collect::<Vec<_>>(),
            vec!["1", "hello there", "alice"]
        );
    }

    #[test]
    fn test_missing_text_column_is_a_format_error() {
        let data = "id,body\n1,hello\n";
        let result = Corpus::from_reader(data.as_bytes(), "content", &AtomicBool::new(false));

        assert!(matches!(result, Err(Error::DataFormat(_))));
    }

    #[test]
    fn test_mismatched_rows_keep_their_position() {
        let data = "id,content\n1,hello\n2\n3,bye\n4,too,many\n";
        let corpus = Corpus::from_reader(data.as_bytes(), "content", &AtomicBool::new(false))
            .unwrap();

        assert_eq!(corpus.len(), 4);
        assert_eq!(corpus.malformed(), 2);
        assert_eq!(
            (0..4).map(|i| corpus.is_malformed(i)).collect::<Vec<_>>(),
            vec![false, true, false, true]
        );
        assert_eq!(corpus.texts(0..4), vec!["hello", "", "bye", "too"]);
        assert_eq!(
            corpus.row(1).unwrap().iter().collect::<Vec<_>>(),
            vec!["2", ""]
        );
        assert_eq!(corpus.row(3).unwrap().len(), 2);
    }

    #[test]
    fn test_unreadable_row_becomes_empty_fields() {
        let mut data = b"id,content\n1,hello\n2,".to_vec();
        data.extend_from_slice(&[0xff, 0xfe]);
        data.extend_from_slice(b"\n3,bye\n");

        let corpus = Corpus::from_reader(data.as_slice(), "content", &AtomicBool::new(false))
            .unwrap();

        assert_eq!(corpus.len(), 3);
        assert!(corpus.is_malformed(1));
        assert_eq!(corpus.texts(0..3), vec!["hello", "", "bye"]);
    }

    #[test]
    fn test_interrupt_stops_parsing() {
        let data = "content\na\nb\n";
        let result = Corpus::from_reader(data.as_bytes(), "content", &AtomicBool::new(true));

        assert!(matches!(result, Err(Error::Interrupted)));
    }
}
