//! Streaming row source.
//!
//! Reads UTF-8, comma-separated CSV with a header row. The header must match
//! the schema's column list positionally and by name; any mismatch fails the
//! whole stream before a single data row is produced. Row numbers are 1-based
//! and count data rows only.

use std::{collections::HashMap, fs::File, io::BufReader, path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::{io_utils, schema::Schema};

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("header count mismatch: schema expects {expected} column(s) but the file has {found}")]
    HeaderCount { expected: usize, found: usize },
    #[error("header mismatch at position {position}: expected '{expected}', found '{found}'")]
    HeaderMismatch {
        position: usize,
        expected: String,
        found: String,
    },
    #[error("malformed CSV at row {row}: {detail}")]
    MalformedCsv { row: u64, detail: String },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct RawRow {
    pub row_number: u64,
    pub columns: HashMap<String, String>,
}

pub struct RowSource {
    schema: Arc<Schema>,
    path: PathBuf,
}

impl RowSource {
    pub fn new(schema: Arc<Schema>, path: impl Into<PathBuf>) -> Self {
        Self {
            schema,
            path: path.into(),
        }
    }

    /// Opens the file, validates the header, and returns an iterator over the
    /// data rows.
    pub fn stream(&self) -> Result<RowStream, ReadError> {
        let mut reader = io_utils::open_csv_reader_from_path(&self.path, true, false)
            .map_err(|err| io_error(&self.path, err))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| map_csv_error(err, 0, &self.path))?
            .iter()
            .map(|field| field.trim_start().to_string())
            .collect();
        validate_header(&self.schema, &headers)?;
        Ok(RowStream {
            records: reader.into_records(),
            names: self.schema.column_names(),
            path: self.path.clone(),
            row_number: 0,
        })
    }

    /// Counts data rows in a single pass without validating anything. Used
    /// for progress reporting.
    pub fn count(&self) -> Result<u64, ReadError> {
        let mut reader = io_utils::open_csv_reader_from_path(&self.path, false, true)
            .map_err(|err| io_error(&self.path, err))?;
        let mut record = csv::ByteRecord::new();
        let mut total = 0u64;
        loop {
            match reader.read_byte_record(&mut record) {
                Ok(true) => total += 1,
                Ok(false) => break,
                Err(err) => return Err(map_csv_error(err, total, &self.path)),
            }
        }
        Ok(total.saturating_sub(1))
    }

    /// Returns the first `limit` data rows; the header is validated the same
    /// way as [`RowSource::stream`].
    pub fn preview(&self, limit: usize) -> Result<Vec<RawRow>, ReadError> {
        let mut rows = Vec::with_capacity(limit.min(64));
        for row in self.stream()? {
            if rows.len() >= limit {
                break;
            }
            rows.push(row?);
        }
        Ok(rows)
    }
}

pub struct RowStream {
    records: csv::StringRecordsIntoIter<BufReader<File>>,
    names: Vec<String>,
    path: PathBuf,
    row_number: u64,
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("names", &self.names)
            .field("path", &self.path)
            .field("row_number", &self.row_number)
            .finish()
    }
}

impl Iterator for RowStream {
    type Item = Result<RawRow, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(err) => {
                return Some(Err(map_csv_error(err, self.row_number + 1, &self.path)));
            }
        };
        self.row_number += 1;
        let columns = self
            .names
            .iter()
            .zip(record.iter())
            .map(|(name, field)| (name.clone(), field.trim_start().to_string()))
            .collect();
        Some(Ok(RawRow {
            row_number: self.row_number,
            columns,
        }))
    }
}

fn validate_header(schema: &Schema, headers: &[String]) -> Result<(), ReadError> {
    if headers.len() != schema.columns.len() {
        return Err(ReadError::HeaderCount {
            expected: schema.columns.len(),
            found: headers.len(),
        });
    }
    for (position, column) in schema.columns.iter().enumerate() {
        if headers[position] != column.name {
            return Err(ReadError::HeaderMismatch {
                position,
                expected: column.name.clone(),
                found: headers[position].clone(),
            });
        }
    }
    Ok(())
}

fn io_error(path: &std::path::Path, err: anyhow::Error) -> ReadError {
    let source = err
        .downcast::<std::io::Error>()
        .unwrap_or_else(|err| std::io::Error::other(err.to_string()));
    ReadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn map_csv_error(err: csv::Error, row: u64, path: &std::path::Path) -> ReadError {
    let detail = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => ReadError::Io {
            path: path.to_path_buf(),
            source,
        },
        _ => ReadError::MalformedCsv { row, detail },
    }
}
