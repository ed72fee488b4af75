//! CSV decoding: turn the exported sheet into [`ClassRecord`]s, one row at a
//! time.
//!
//! Columns are matched by header label, not position, so the sheet can
//! reorder or drop columns without code changes. Unknown columns are
//! ignored.
//!
//! The first malformed row ends the sequence: the iterator yields that
//! [`DecodeError`] and then `None` forever. Rows after a bad one are never
//! looked at.

use crate::error::DecodeError;
use crate::record::{ClassRecord, Field};
use csv::{ErrorKind, ReaderBuilder, StringRecord};
use std::io::Read;
use tracing::debug;

/// Lazy, single-pass decoder over any `Read` of CSV text.
pub struct RecordDecoder<R: Read> {
    rdr: csv::Reader<R>,
    columns: Vec<Option<Field>>,
    headers: StringRecord,
    row: StringRecord,
    done: bool,
}

impl<R: Read> RecordDecoder<R> {
    /// Read the header row and prepare to decode data rows.
    ///
    /// An empty input is not an error; the decoder simply yields nothing.
    pub fn new(reader: R) -> Result<Self, DecodeError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| DecodeError::Header {
                detail: e.to_string(),
            })?
            .clone();

        let columns: Vec<Option<Field>> = headers.iter().map(Field::from_header).collect();
        debug!(
            "CSV header has {} columns, {} recognised",
            columns.len(),
            columns.iter().filter(|c| c.is_some()).count()
        );

        Ok(Self {
            rdr,
            columns,
            headers,
            row: StringRecord::new(),
            done: false,
        })
    }

    /// Fields recognised in the header, in column order.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.columns.iter().flatten().copied()
    }

    fn decode_row(&self) -> Result<ClassRecord, DecodeError> {
        let line = self.row.position().map(|p| p.line()).unwrap_or(0);
        let mut record = ClassRecord::default();

        for (idx, cell) in self.row.iter().enumerate() {
            let Some(field) = self.columns.get(idx).copied().flatten() else {
                continue;
            };
            if !field.is_numeric() {
                record.set_text(field, cell);
            } else if !cell.trim().is_empty() && !record.set_number(field, cell) {
                return Err(DecodeError::InvalidNumber {
                    line,
                    column: self.headers.get(idx).unwrap_or(field.label()).to_string(),
                    value: cell.to_string(),
                });
            }
        }

        Ok(record)
    }
}

impl<R: Read> Iterator for RecordDecoder<R> {
    type Item = Result<ClassRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = match self.rdr.read_record(&mut self.row) {
            Ok(false) => {
                self.done = true;
                return None;
            }
            Ok(true) => self.decode_row(),
            Err(e) => Err(map_csv_error(e)),
        };

        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

fn map_csv_error(err: csv::Error) -> DecodeError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    match err.kind() {
        ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => DecodeError::FieldCount {
            line,
            expected: *expected_len,
            found: *len,
        },
        _ => DecodeError::Malformed {
            line,
            detail: err.to_string(),
        },
    }
}

/// Decode a complete in-memory CSV document.
///
/// Convenience for callers that already hold the bytes; stops at the first
/// bad row.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<ClassRecord>, DecodeError> {
    RecordDecoder::new(bytes)?.collect()
}
