#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Chunked decoder for the OpenCellID dump.
//!
//! Streams a (optionally gzip-compressed) CSV file and yields [`Batch`]es
//! of at most `batch_size` records. Nothing beyond the current batch is
//! held in memory, and the gzip stream is decoded on the fly.

pub mod coerce;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use opencellid_models::{Batch, Record};

use crate::coerce::{ColumnKind, coerce};

/// Read buffer for the compressed artifact.
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// How the artifact is compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    /// Picks the compression from the file extension (`.gz` / `.gzip`).
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let is_gzip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("gz") || e.eq_ignore_ascii_case("gzip"));
        if is_gzip { Self::Gzip } else { Self::None }
    }
}

/// Lazy, finite, non-restartable sequence of record batches.
///
/// Iteration stops for good after the first error.
pub struct ChunkedDecoder {
    reader: csv::Reader<Box<dyn Read + Send>>,
    headers: Vec<String>,
    batch_size: usize,
    rows_read: u64,
    finished: bool,
}

impl std::fmt::Debug for ChunkedDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedDecoder")
            .field("headers", &self.headers)
            .field("batch_size", &self.batch_size)
            .field("rows_read", &self.rows_read)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ChunkedDecoder {
    /// Opens `path`, inferring the compression from its extension, and
    /// reads the header row.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the file cannot be opened, the batch size
    /// is zero, or the header row is missing or invalid.
    pub fn open(path: &Path, batch_size: usize) -> Result<Self, DecodeError> {
        Self::open_with(path, batch_size, Compression::from_path(path))
    }

    /// Like [`Self::open`] with an explicit compression.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_with(
        path: &Path,
        batch_size: usize,
        compression: Compression,
    ) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|e| DecodeError::Open {
            path: path.display().to_string(),
            source: e,
        })?;
        let buffered = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        log::debug!(
            "Decoding {} ({compression:?}, batch size {batch_size})",
            path.display()
        );

        let reader: Box<dyn Read + Send> = match compression {
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(buffered)),
            Compression::None => Box::new(buffered),
        };

        Self::from_reader(reader, batch_size)
    }

    /// Decodes an already-decompressed CSV stream.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the batch size is zero or the header row is
    /// missing or invalid.
    pub fn from_reader(
        reader: impl Read + Send + 'static,
        batch_size: usize,
    ) -> Result<Self, DecodeError> {
        if batch_size == 0 {
            return Err(DecodeError::InvalidBatchSize);
        }

        let boxed: Box<dyn Read + Send> = Box::new(reader);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(boxed);

        let headers: Vec<String> = reader
            .headers()
            .map_err(DecodeError::from_csv)?
            .iter()
            .map(|h| h.trim().to_owned())
            .collect();

        if headers.is_empty() || headers.iter().all(String::is_empty) {
            return Err(DecodeError::MissingHeader);
        }

        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                return Err(DecodeError::InvalidHeader(format!(
                    "column {} has no name",
                    i + 1
                )));
            }
            if headers[..i].contains(header) {
                return Err(DecodeError::InvalidHeader(format!(
                    "duplicate column '{header}'"
                )));
            }
        }

        Ok(Self {
            reader,
            headers,
            batch_size,
            rows_read: 0,
            finished: false,
        })
    }

    /// Column names from the header row.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Data rows decoded so far.
    #[must_use]
    pub const fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn read_batch(&mut self) -> Result<Option<Batch>, DecodeError> {
        let mut rows: Vec<csv::StringRecord> = Vec::with_capacity(self.batch_size.min(65_536));

        while rows.len() < self.batch_size {
            let mut row = csv::StringRecord::new();
            if !self
                .reader
                .read_record(&mut row)
                .map_err(DecodeError::from_csv)?
            {
                break;
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Ok(None);
        }

        self.rows_read += rows.len() as u64;

        let kinds: Vec<ColumnKind> = (0..self.headers.len())
            .map(|col| coerce::infer_kind(rows.iter().map(|row| row.get(col).unwrap_or(""))))
            .collect();

        let batch = rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .zip(&kinds)
                    .enumerate()
                    .map(|(col, (name, kind))| {
                        (name.as_str(), coerce(row.get(col).unwrap_or(""), *kind))
                    })
                    .collect::<Record>()
            })
            .collect::<Batch>();

        Ok(Some(batch))
    }
}

impl Iterator for ChunkedDecoder {
    type Item = Result<Batch, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_batch() {
            Ok(Some(batch)) => {
                log::trace!("Decoded batch of {} rows ({} total)", batch.len(), self.rows_read);
                Some(Ok(batch))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for ChunkedDecoder {}

/// Errors from decoding the artifact.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The artifact could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Artifact path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A batch must hold at least one record.
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    /// The file has no header row.
    #[error("CSV file contains no header row")]
    MissingHeader,

    /// The header row is unusable.
    #[error("invalid CSV header: {0}")]
    InvalidHeader(String),

    /// A data row does not have as many fields as the header.
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        /// 1-based line number of the offending row.
        line: u64,
        /// Field count of the header.
        expected: u64,
        /// Field count of the row.
        found: u64,
    },

    /// Any other CSV or decompression failure.
    #[error("CSV error: {0}")]
    Csv(csv::Error),
}

impl DecodeError {
    fn from_csv(err: csv::Error) -> Self {
        if let csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } = err.kind()
        {
            return Self::FieldCount {
                line: pos.as_ref().map_or(0, csv::Position::line),
                expected: *expected_len,
                found: *len,
            };
        }
        Self::Csv(err)
    }
}
