//! Streaming CSV record reader.
//!
//! [`CsvRecords`] wraps a [`csv::Reader`] and a row-mapping function and
//! yields one [`ParsedRecord`] per data row. It is finite and not
//! restartable: a fresh pass over the data needs a fresh reader. Reading
//! stops after the first error, and the consumer can stop at any time by
//! dropping the iterator, in which case the rest of the input is never read.

use std::io::Read;
use std::iter::FusedIterator;

use csv::StringRecord;

/// Boxed error returned by a row-mapping function.
pub type MapError = Box<dyn std::error::Error + Send + Sync>;

/// One row produced by [`CsvRecords`].
#[derive(Debug)]
pub struct ParsedRecord<T> {
    /// 1-based data row number (the header row is not counted). `0` when
    /// the headers themselves could not be read.
    pub line: u64,
    /// The mapped row, or the reason it could not be produced.
    pub result: Result<T, CsvParseError>,
}

/// Errors produced while streaming CSV rows.
#[derive(Debug, thiserror::Error)]
pub enum CsvParseError {
    /// The header row could not be read.
    #[error("failed to read CSV headers: {0}")]
    Headers(String),

    /// A row could not be read from the underlying source.
    #[error("failed to read CSV line {line}: {source}")]
    Read {
        /// Row number.
        line: u64,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// A row was read but the mapping function rejected it.
    #[error("failed to parse CSV line {line}: {source}")]
    Parse {
        /// Row number.
        line: u64,
        /// Error returned by the mapping function.
        source: MapError,
    },
}

impl CsvParseError {
    /// Row number the error refers to (`0` for header errors).
    #[must_use]
    pub const fn line(&self) -> u64 {
        match self {
            Self::Headers(_) => 0,
            Self::Read { line, .. } | Self::Parse { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Rows,
    Done,
}

/// Lazy iterator of mapped CSV rows.
///
/// The mapping function receives the raw row and the header row (empty
/// when the source has no headers).
pub struct CsvRecords<R, F> {
    reader: csv::Reader<R>,
    map: F,
    has_headers: bool,
    headers: StringRecord,
    row: StringRecord,
    line: u64,
    state: State,
}

impl<R, T, E, F> CsvRecords<R, F>
where
    R: Read,
    F: FnMut(&StringRecord, &StringRecord) -> Result<T, E>,
    E: Into<MapError>,
{
    /// Creates a reader over `source`.
    ///
    /// Rows may differ in length; `map` decides which fields it needs.
    pub fn new(source: R, has_headers: bool, map: F) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(has_headers)
            .flexible(true)
            .from_reader(source);

        Self {
            reader,
            map,
            has_headers,
            headers: StringRecord::new(),
            row: StringRecord::new(),
            line: 0,
            state: State::Start,
        }
    }

    fn read_headers(&mut self) -> Result<(), CsvParseError> {
        if !self.has_headers {
            return Ok(());
        }

        let headers = self
            .reader
            .headers()
            .map_err(|e| CsvParseError::Headers(e.to_string()))?;

        if headers.is_empty() {
            return Err(CsvParseError::Headers("input is empty".to_string()));
        }

        self.headers = headers.clone();
        Ok(())
    }

    fn fail(&mut self, line: u64, error: CsvParseError) -> Option<ParsedRecord<T>> {
        self.state = State::Done;
        Some(ParsedRecord {
            line,
            result: Err(error),
        })
    }
}

impl<R, T, E, F> Iterator for CsvRecords<R, F>
where
    R: Read,
    F: FnMut(&StringRecord, &StringRecord) -> Result<T, E>,
    E: Into<MapError>,
{
    type Item = ParsedRecord<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            State::Done => return None,
            State::Start => {
                self.state = State::Rows;
                if let Err(e) = self.read_headers() {
                    return self.fail(0, e);
                }
            }
            State::Rows => {}
        }

        match self.reader.read_record(&mut self.row) {
            Ok(false) => {
                self.state = State::Done;
                None
            }
            Ok(true) => {
                self.line += 1;
                let line = self.line;
                match (self.map)(&self.row, &self.headers) {
                    Ok(value) => Some(ParsedRecord {
                        line,
                        result: Ok(value),
                    }),
                    Err(e) => self.fail(
                        line,
                        CsvParseError::Parse {
                            line,
                            source: e.into(),
                        },
                    ),
                }
            }
            Err(source) => {
                self.line += 1;
                let line = self.line;
                self.fail(line, CsvParseError::Read { line, source })
            }
        }
    }
}

impl<R, T, E, F> FusedIterator for CsvRecords<R, F>
where
    R: Read,
    F: FnMut(&StringRecord, &StringRecord) -> Result<T, E>,
    E: Into<MapError>,
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Row {
        a: String,
        b: String,
    }

    #[allow(clippy::unnecessary_wraps)]
    fn simple(row: &StringRecord, _headers: &StringRecord) -> Result<Row, MapError> {
        Ok(Row {
            a: row.get(0).unwrap_or_default().to_string(),
            b: row.get(1).unwrap_or_default().to_string(),
        })
    }

    fn always_fails(_row: &StringRecord, _headers: &StringRecord) -> Result<Row, MapError> {
        Err("parse error".into())
    }

    #[test]
    fn reads_rows_after_header() {
        let rows: Vec<_> = CsvRecords::new("a,b\nfoo,bar\nbaz,qux\n".as_bytes(), true, simple).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 1);
        assert_eq!(
            rows[0].result.as_ref().unwrap(),
            &Row {
                a: "foo".to_string(),
                b: "bar".to_string()
            }
        );
        assert_eq!(rows[1].line, 2);
        assert_eq!(rows[1].result.as_ref().unwrap().b, "qux");
    }

    #[test]
    fn reads_rows_without_header() {
        let rows: Vec<_> = CsvRecords::new("foo,bar\nbaz,qux\n".as_bytes(), false, simple).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 1);
        assert_eq!(rows[0].result.as_ref().unwrap().a, "foo");
        assert_eq!(rows[1].line, 2);
        assert_eq!(rows[1].result.as_ref().unwrap().a, "baz");
    }

    #[test]
    fn passes_headers_to_mapper() {
        let mut seen = Vec::new();
        let rows: Vec<_> = CsvRecords::new("x,y\n1,2\n".as_bytes(), true, |_row: &StringRecord, headers: &StringRecord| {
            seen.push(headers.iter().map(str::to_string).collect::<Vec<_>>());
            Ok::<_, MapError>(())
        })
        .collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(seen, vec![vec!["x".to_string(), "y".to_string()]]);
    }

    #[test]
    fn stops_after_mapping_error() {
        let rows: Vec<_> = CsvRecords::new("a,b\nfoo,bar\nbaz,qux\n".as_bytes(), true, always_fails).collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].line, 1);
        let err = rows[0].result.as_ref().unwrap_err();
        assert!(err.to_string().contains("failed to parse CSV line 1"));
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn stops_after_malformed_row() {
        let rows: Vec<_> = CsvRecords::new(&b"a,b\n\xff,bar\nbaz,qux\n"[..], true, simple).collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].line, 1);
        assert!(matches!(
            rows[0].result,
            Err(CsvParseError::Read { line: 1, .. })
        ));
    }

    #[test]
    fn accepts_rows_of_differing_length() {
        let rows: Vec<_> = CsvRecords::new("a,b\nfoo\nbaz,qux,extra\n".as_bytes(), true, simple).collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].result.as_ref().unwrap().a, "foo");
        assert_eq!(rows[0].result.as_ref().unwrap().b, "");
        assert_eq!(rows[1].line, 2);
        assert_eq!(rows[1].result.as_ref().unwrap().b, "qux");
    }

    #[test]
    fn empty_input_fails_header_read() {
        let rows: Vec<_> = CsvRecords::new("".as_bytes(), true, simple).collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].line, 0);
        let err = rows[0].result.as_ref().unwrap_err();
        assert!(err.to_string().contains("failed to read CSV headers"));
    }

    #[test]
    fn empty_input_without_header_yields_nothing() {
        assert_eq!(CsvRecords::new("".as_bytes(), false, simple).count(), 0);
    }

    #[test]
    fn consumer_can_stop_early() {
        let mut mapped = 0;
        let mut records = CsvRecords::new("a,b\nfoo,bar\nbaz,qux\n".as_bytes(), true, |row: &StringRecord, headers: &StringRecord| {
            mapped += 1;
            simple(row, headers)
        });

        assert!(records.next().is_some());
        drop(records);
        assert_eq!(mapped, 1);
    }
}
