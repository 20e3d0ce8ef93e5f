//! Writing `id,label` submission files.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::records::Record;

/// Errors produced while writing a submission.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("failed to write submission to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialise submission row: {0}")]
    Csv(#[from] csv::Error),
    #[error("{records} records but {labels} predicted labels")]
    LengthMismatch { records: usize, labels: usize },
}

#[derive(Debug, Serialize)]
struct SubmissionRow<'a> {
    id: &'a str,
    label: usize,
}

/// Creates (or truncates) `path` and writes one row per record.
///
/// # Errors
///
/// Returns [`SubmissionError::Io`] when the file cannot be created and
/// propagates the errors of [`write_submission_to`].
pub fn write_submission(
    path: &Path,
    records: &[Record],
    labels: &[usize],
) -> Result<(), SubmissionError> {
    let file = File::create(path).map_err(|source| SubmissionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_submission_to(file, records, labels)?;
    info!(path = %path.display(), rows = records.len(), "wrote submission");
    Ok(())
}

/// Writes the `id,label` header followed by one row per record, in record
/// order, using `,` separators and `\n` terminators.
///
/// # Examples
///
/// ```
/// use ensemble_predict::records::Record;
/// use ensemble_predict::submission::write_submission_to;
///
/// let records = vec![Record { id: "a".into(), text: "fine".into() }];
/// let mut out = Vec::new();
/// write_submission_to(&mut out, &records, &[1]).expect("write submission");
/// assert_eq!(String::from_utf8(out).expect("utf8"), "id,label\na,1\n");
/// ```
///
/// # Errors
///
/// Returns [`SubmissionError::LengthMismatch`] when `records` and `labels`
/// differ in length and [`SubmissionError::Csv`] for write failures.
pub fn write_submission_to<W: Write>(
    writer: W,
    records: &[Record],
    labels: &[usize],
) -> Result<(), SubmissionError> {
    if records.len() != labels.len() {
        return Err(SubmissionError::LengthMismatch {
            records: records.len(),
            labels: labels.len(),
        });
    }

    // Ids are opaque and written verbatim, never quoted or escaped.
    let mut out = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);
    out.write_record(["id", "label"])?;
    for (record, label) in records.iter().zip(labels) {
        out.serialize(SubmissionRow {
            id: &record.id,
            label: *label,
        })?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}
