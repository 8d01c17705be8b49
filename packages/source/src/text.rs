//! Delimited text (CSV) row source.
//!
//! The encoding and delimiter are sniffed from the first
//! [`SAMPLE_BYTES`](crate::detect::SAMPLE_BYTES) of the file, then the file
//! is re-read from the start and parsed one record at a time with
//! [`csv::Reader`] over raw bytes. Every cell is decoded individually, which
//! is safe because all supported encodings are ASCII-compatible and the
//! delimiter and quote characters are ASCII.

use std::fs::File;
use std::io::{BufRead as _, BufReader, Read as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stock_sync_models::Row;

use crate::columns::fill_blank_headers;
use crate::detect::{
    DEFAULT_DELIMITERS, DEFAULT_ENCODINGS, FileKind, SAMPLE_BYTES, TextEncoding, detect_delimiter,
    detect_encoding,
};
use crate::{RowSource, SourceError};

/// Row source over a `;`- or `,`-delimited text file.
///
/// The header is row 1 and data rows are numbered from 2 in file order.
/// Blank lines are skipped and do not consume a number.
pub struct DelimitedTextSource {
    reader: csv::Reader<BufReader<File>>,
    record: csv::ByteRecord,
    next_row_number: u64,
    headers: Arc<[String]>,
    encoding: TextEncoding,
    delimiter: u8,
}

impl std::fmt::Debug for DelimitedTextSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelimitedTextSource")
            .field("headers", &self.headers)
            .field("encoding", &self.encoding)
            .field("delimiter", &char::from(self.delimiter))
            .finish_non_exhaustive()
    }
}

impl DelimitedTextSource {
    /// Opens `path`, detecting its encoding and delimiter.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the file cannot be read or has no header.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let mut sample = Vec::new();
        File::open(path)?.take(SAMPLE_BYTES).read_to_end(&mut sample)?;

        let encoding = detect_encoding(&sample, DEFAULT_ENCODINGS);
        let decoded = encoding
            .encoding
            .decode(sample.get(encoding.encoding.bom_len()..).unwrap_or_default());
        let delimiter = detect_delimiter(&decoded, DEFAULT_DELIMITERS);

        log::debug!(
            "[csv] {}: encoding {} ({:.2}), delimiter '{}' ({:.2})",
            path.display(),
            encoding.encoding.label(),
            encoding.confidence,
            char::from(delimiter.delimiter),
            delimiter.confidence,
        );

        Self::open_with(path, encoding.encoding, delimiter.delimiter)
    }

    /// Opens `path` with an explicit encoding and delimiter.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Empty`] if the file has no non-blank record,
    /// or another [`SourceError`] if it cannot be read.
    pub fn open_with(
        path: &Path,
        encoding: TextEncoding,
        delimiter: u8,
    ) -> Result<Self, SourceError> {
        let mut file = BufReader::new(File::open(path)?);
        let bom = encoding.bom_len();
        if bom > 0 && file.fill_buf()?.len() >= bom {
            file.consume(bom);
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(file);
        let mut record = csv::ByteRecord::new();

        let headers = loop {
            if !reader.read_byte_record(&mut record)? {
                return Err(SourceError::Empty {
                    path: PathBuf::from(path),
                });
            }
            let cells = decode_record(&record, encoding);
            if cells.iter().any(|c| !c.is_empty()) {
                break fill_blank_headers(cells, "Column");
            }
        };

        Ok(Self {
            reader,
            record,
            next_row_number: 2,
            headers: headers.into(),
            encoding,
            delimiter,
        })
    }
}

fn decode_record(record: &csv::ByteRecord, encoding: TextEncoding) -> Vec<String> {
    record
        .iter()
        .map(|field| encoding.decode(field).trim().to_owned())
        .collect()
}

impl Iterator for DelimitedTextSource {
    type Item = Result<Row, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(false) => return None,
                Err(e) => return Some(Err(e.into())),
                Ok(true) => {
                    let mut values = decode_record(&self.record, self.encoding);
                    if values.iter().all(String::is_empty) {
                        continue;
                    }
                    values.resize(self.headers.len(), String::new());

                    let row_number = self.next_row_number;
                    self.next_row_number += 1;
                    return Some(Ok(Row {
                        row_number,
                        headers: Arc::clone(&self.headers),
                        values,
                    }));
                }
            }
        }
    }
}

impl RowSource for DelimitedTextSource {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn encoding(&self) -> &str {
        self.encoding.label()
    }

    fn kind(&self) -> FileKind {
        FileKind::DelimitedText
    }

    fn delimiter(&self) -> Option<char> {
        Some(char::from(self.delimiter))
    }
}
