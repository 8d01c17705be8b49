#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Row sources for product export files.
//!
//! Two file families are supported behind the [`RowSource`] trait:
//! delimited text (see [`text`]) and legacy dBASE tables (see [`dbf`]).
//! Both stream rows lazily; [`open`] picks the right reader for a path and
//! [`preview`] reads only the first few rows.
//!
//! Column mapping from spreadsheet letters to row values lives in
//! [`extract`].

pub mod columns;
pub mod dbf;
pub mod detect;
pub mod extract;
pub mod text;

use std::path::{Path, PathBuf};

use serde::Serialize;
use stock_sync_models::{ErrorCode, ErrorReport, Row};

pub use detect::FileKind;

/// Number of rows returned by [`preview`] when no limit is given.
pub const DEFAULT_PREVIEW_ROWS: usize = 200;

/// Errors that can occur while reading a source file.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source path does not exist.
    #[error("Source file not found: {}", path.display())]
    FileNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// I/O error while reading the file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The delimited-text parser rejected the file.
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    /// The file has no header row.
    #[error("Source file has no header row: {}", path.display())]
    Empty {
        /// Path of the empty file.
        path: PathBuf,
    },

    /// The dBASE header or a record is malformed.
    #[error("Invalid dBASE file: {message}")]
    Dbf {
        /// Description of what went wrong.
        message: String,
    },

    /// The file is neither delimited text nor dBASE.
    #[error("Unsupported source file type: {}", path.display())]
    Unsupported {
        /// Path that was rejected.
        path: PathBuf,
    },

    /// The column mapping is incomplete or uses invalid letters.
    #[error("Invalid column mapping: {message}")]
    MappingInvalid {
        /// Description of what went wrong.
        message: String,
    },

    /// The column mapping points past the last header column.
    #[error("Column {letter} for {field} is out of range ({available} columns available)")]
    MissingColumn {
        /// Pipeline field the column was mapped to.
        field: &'static str,
        /// Configured column letter.
        letter: String,
        /// Number of header columns in the file.
        available: usize,
    },
}

impl SourceError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::FileNotFound { .. } => ErrorCode::CsvFileNotFound,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorCode::CsvFileNotFound,
            Self::Io(_) | Self::Csv(_) | Self::Unsupported { .. } => ErrorCode::CsvInvalidFormat,
            Self::Empty { .. } => ErrorCode::CsvEmpty,
            Self::Dbf { .. } => ErrorCode::DbfInvalidFormat,
            Self::MappingInvalid { .. } => ErrorCode::CsvMappingInvalid,
            Self::MissingColumn { .. } => ErrorCode::CsvMissingColumn,
        }
    }

    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.to_string())
    }

    /// Whether retrying later could succeed without user action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.code(), ErrorCode::CsvFileNotFound)
    }
}

/// A lazily-read stream of rows with shared headers.
///
/// Iteration is forward-only; to read again, open the file again.
pub trait RowSource: Iterator<Item = Result<Row, SourceError>> + Send {
    /// Column names, in file order.
    fn headers(&self) -> &[String];

    /// Name of the character encoding used to decode the file.
    fn encoding(&self) -> &str;

    /// Which file family this source reads.
    fn kind(&self) -> FileKind;

    /// Field delimiter, for delimited text sources.
    fn delimiter(&self) -> Option<char> {
        None
    }
}

/// Opens `path` with the reader matching its detected [`FileKind`].
///
/// # Errors
///
/// Returns [`SourceError`] if the file is missing, unsupported, or its
/// header cannot be read.
pub fn open(path: &Path) -> Result<Box<dyn RowSource>, SourceError> {
    if !path.exists() {
        return Err(SourceError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match detect::detect_file_kind(path)? {
        FileKind::DelimitedText => Ok(Box::new(text::DelimitedTextSource::open(path)?)),
        FileKind::Dbase => Ok(Box::new(dbf::DbfSource::open(path)?)),
    }
}

/// The first rows of a source, for showing a mapping preview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePreview {
    pub kind: FileKind,
    pub headers: Vec<String>,
    pub encoding: String,
    pub delimiter: Option<char>,
    pub rows: Vec<Row>,
    /// `true` when the file has more rows than were returned.
    pub truncated: bool,
}

/// Reads at most `limit` rows from `path` without reading the rest.
///
/// # Errors
///
/// Returns [`SourceError`] if the file cannot be opened or a row within
/// the limit cannot be read.
pub fn preview(path: &Path, limit: usize) -> Result<SourcePreview, SourceError> {
    let mut source = open(path)?;
    let headers = source.headers().to_vec();
    let encoding = source.encoding().to_owned();
    let delimiter = source.delimiter();
    let kind = source.kind();

    let mut rows = Vec::with_capacity(limit.min(DEFAULT_PREVIEW_ROWS));
    for row in source.by_ref().take(limit) {
        rows.push(row?);
    }
    let truncated = source.next().is_some();

    log::debug!(
        "[preview] {}: {} rows, {} columns, encoding {encoding}",
        path.display(),
        rows.len(),
        headers.len(),
    );

    Ok(SourcePreview {
        kind,
        headers,
        encoding,
        delimiter,
        rows,
        truncated,
    })
}
