//! Loading of `id`/`text` records from tab-separated files.
//!
//! Rows are returned in file order. A text field that is empty, absent from a
//! short row, or not valid UTF-8 is replaced by the empty string so a single
//! malformed row never aborts the run.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use csv::{ByteRecord, ReaderBuilder};
use thiserror::Error;
use tracing::{debug, info, warn};

const ID_COLUMN: &str = "id";
const TEXT_COLUMN: &str = "text";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A single input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Opaque identifier copied verbatim into the submission.
    pub id: String,
    /// Raw text to classify.
    pub text: String,
}

/// Errors returned while loading records.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("failed to open records file at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read tab-separated records: {0}")]
    Csv(#[from] csv::Error),
    #[error("records header is missing the \"{column}\" column")]
    MissingColumn { column: &'static str },
}

/// Reads records from the tab-separated file at `path`.
///
/// # Errors
///
/// Returns [`RecordsError::Io`] when the file cannot be opened and propagates
/// the errors of [`read_records_from`].
pub fn read_records(path: &Path) -> Result<Vec<Record>, RecordsError> {
    let file = File::open(path).map_err(|source| RecordsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records = read_records_from(file)?;
    info!(path = %path.display(), count = records.len(), "loaded test records");
    Ok(records)
}

/// Reads records from any tab-separated source.
///
/// The first row must be a header naming at least the `id` and `text`
/// columns; other columns are ignored.
///
/// # Examples
///
/// ```
/// use ensemble_predict::records::read_records_from;
///
/// let tsv = "id\ttext\n1\thello world\n2\t\n";
/// let records = read_records_from(tsv.as_bytes()).expect("valid records");
/// assert_eq!(records.len(), 2);
/// assert_eq!(records[1].text, "");
/// ```
///
/// # Errors
///
/// Returns [`RecordsError::MissingColumn`] when the header lacks a required
/// column and [`RecordsError::Csv`] for malformed framing or I/O failures.
pub fn read_records_from<R: Read>(source: R) -> Result<Vec<Record>, RecordsError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(source);

    let headers = reader.byte_headers()?.clone();
    let id_index = column_index(&headers, ID_COLUMN)?;
    let text_index = column_index(&headers, TEXT_COLUMN)?;

    let mut records = Vec::new();
    let mut recovered = 0_usize;
    for row in reader.byte_records() {
        let row = row?;
        let line = row.position().map_or(0, csv::Position::line);
        let id = row
            .get(id_index)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
            .unwrap_or_default();
        let text = match row.get(text_index).map(std::str::from_utf8) {
            Some(Ok(text)) => {
                if text.is_empty() {
                    debug!(line, id = %id, "empty text");
                }
                text.to_owned()
            }
            Some(Err(_)) => {
                warn!(line, id = %id, "text is not valid UTF-8; substituting empty string");
                recovered += 1;
                String::new()
            }
            None => {
                warn!(line, id = %id, "row has no text field; substituting empty string");
                recovered += 1;
                String::new()
            }
        };
        records.push(Record { id, text });
    }

    if recovered > 0 {
        warn!(recovered, "recovered malformed text fields");
    }
    Ok(records)
}

fn column_index(headers: &ByteRecord, column: &'static str) -> Result<usize, RecordsError> {
    headers
        .iter()
        .enumerate()
        .find_map(|(index, name)| {
            let name = if index == 0 {
                name.strip_prefix(UTF8_BOM).unwrap_or(name)
            } else {
                name
            };
            (name == column.as_bytes()).then_some(index)
        })
        .ok_or(RecordsError::MissingColumn { column })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn load(input: &[u8]) -> Vec<Record> {
        read_records_from(input).unwrap_or_else(|e| panic!("unexpected error: {e}"))
    }

    #[rstest]
    fn preserves_row_order() {
        let records = load(b"id\ttext\nb\tsecond\na\tfirst\nc\tthird\n");
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[rstest]
    fn ignores_extra_columns_in_any_order() {
        let records = load(b"text\tlabel\tid\nhello\t1\tx\n");
        assert_eq!(
            records,
            vec![Record {
                id: "x".into(),
                text: "hello".into()
            }]
        );
    }

    #[rstest]
    #[case(b"id\ttext\n1\t\n".as_slice())]
    #[case(b"id\ttext\n1\n".as_slice())]
    #[case(b"id\ttext\n1\t\xff\xfe\n".as_slice())]
    fn recovers_malformed_text(#[case] input: &[u8]) {
        let records = load(input);
        assert_eq!(records.len(), 1);
        assert!(records.iter().all(|r| r.id == "1" && r.text.is_empty()));
    }

    #[rstest]
    fn strips_byte_order_mark_from_header() {
        let records = load(b"\xEF\xBB\xBFid\ttext\n7\tok\n");
        assert_eq!(records.first().map(|r| r.id.as_str()), Some("7"));
    }

    #[rstest]
    fn keeps_duplicate_and_empty_ids() {
        let records = load(b"id\ttext\na\tx\na\ty\n\tz\n");
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "a", ""]);
    }

    #[rstest]
    #[case(b"identifier\ttext\n".as_slice(), "id")]
    #[case(b"id\tbody\n".as_slice(), "text")]
    fn rejects_missing_columns(#[case] input: &[u8], #[case] expected: &str) {
        match read_records_from(input) {
            Err(RecordsError::MissingColumn { column }) => assert_eq!(column, expected),
            other => panic!("expected missing column error, got {other:?}"),
        }
    }

    #[rstest]
    fn reports_missing_file() {
        let result = read_records(Path::new("/definitely/not/here.tsv"));
        assert!(matches!(result, Err(RecordsError::Io { .. })));
    }
}
