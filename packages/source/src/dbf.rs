//! dBASE (`.dbf`) row source.
//!
//! Layout: a 32-byte file header, one 32-byte descriptor per field ending
//! at a `0x0D` terminator, then fixed-width records. Each record starts
//! with a deletion flag (`*` marks a soft-deleted record). A `0x1A` byte in
//! place of a record marks end of file.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read, Seek as _, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use encoding_rs::Encoding;
use oem_cp::code_table::DECODING_TABLE_CP_MAP;
use stock_sync_models::Row;

use crate::columns::fill_blank_headers;
use crate::detect::{DBASE_VERSIONS, FileKind};
use crate::{RowSource, SourceError};

const FILE_HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const DESCRIPTOR_TERMINATOR: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const DELETED: u8 = b'*';

/// Character fields sampled when probing for an encoding.
const SAMPLE_FIELDS: usize = 5;

/// A candidate encoding is accepted when fewer than this share of the
/// decoded sample characters are control characters.
const MAX_CONTROL_RATIO: f64 = 0.1;

/// Encodings tried, in order, when the header carries no usable codepage.
pub const CANDIDATE_ENCODINGS: &[&Encoding] = &[
    encoding_rs::WINDOWS_1252,
    encoding_rs::WINDOWS_1250,
    encoding_rs::IBM866,
    encoding_rs::WINDOWS_1251,
    encoding_rs::ISO_8859_2,
    encoding_rs::ISO_8859_15,
    encoding_rs::UTF_8,
];

/// Used when neither the codepage byte nor the guess settles the encoding.
pub const FALLBACK_ENCODING: &Encoding = encoding_rs::WINDOWS_1252;

// ── Field types ─────────────────────────────────────────────────────

/// Field type tag from a field descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Character,
    Numeric,
    Date,
    Logical,
    Memo,
    Unknown(u8),
}

impl FieldType {
    #[must_use]
    pub const fn from_tag(tag: u8) -> Self {
        match tag {
            b'C' => Self::Character,
            b'N' | b'F' => Self::Numeric,
            b'D' => Self::Date,
            b'L' => Self::Logical,
            b'M' => Self::Memo,
            other => Self::Unknown(other),
        }
    }

    /// Converts a decoded cell to its text form.
    #[must_use]
    pub fn convert(self, text: &str) -> String {
        match self {
            Self::Character | Self::Unknown(_) => convert_character(text),
            Self::Numeric => convert_numeric(text),
            Self::Date => convert_date(text),
            Self::Logical => convert_logical(text),
            Self::Memo => convert_memo(text),
        }
    }
}

fn convert_character(text: &str) -> String {
    text.trim().to_owned()
}

fn convert_numeric(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "0".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// `YYYYMMDD` becomes `DD.MM.YYYY`; anything else passes through trimmed.
fn convert_date(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() == 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}.{}.{}", &trimmed[6..8], &trimmed[4..6], &trimmed[0..4])
    } else {
        trimmed.to_owned()
    }
}

fn convert_logical(text: &str) -> String {
    match text.trim().chars().next() {
        Some('T' | 't' | 'Y' | 'y') => "TRUE".to_owned(),
        _ => "FALSE".to_owned(),
    }
}

/// Memo contents live in a separate file that is not read.
const fn convert_memo(_text: &str) -> String {
    String::new()
}

// ── Header ──────────────────────────────────────────────────────────

/// One column of a dBASE table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfField {
    pub name: String,
    /// Name bytes as stored, decoded into `name` once the encoding is known.
    raw_name: Vec<u8>,
    pub field_type: FieldType,
    pub length: u8,
    pub decimals: u8,
    /// Byte offset within a record, after the deletion flag.
    offset: usize,
}

impl DbfField {
    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + usize::from(self.length)
    }
}

/// Parsed file header and field descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfHeader {
    pub version: u8,
    pub last_update: Option<NaiveDate>,
    pub record_count: u32,
    pub header_length: u16,
    pub record_length: u16,
    /// Language driver byte; `0` when absent.
    pub codepage: u8,
    pub fields: Vec<DbfField>,
}

fn invalid(message: impl Into<String>) -> SourceError {
    SourceError::Dbf {
        message: message.into(),
    }
}

impl DbfHeader {
    /// Reads the header and descriptors, leaving `reader` at the first
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Dbf`] if the header is truncated or
    /// inconsistent.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, SourceError> {
        let mut head = [0u8; FILE_HEADER_LEN];
        reader
            .read_exact(&mut head)
            .map_err(|_| invalid("file is shorter than the 32-byte header"))?;

        let version = head[0];
        if !DBASE_VERSIONS.contains(&version) {
            return Err(invalid(format!("unknown version byte 0x{version:02X}")));
        }

        let last_update = NaiveDate::from_ymd_opt(
            1900 + i32::from(head[1]),
            u32::from(head[2]),
            u32::from(head[3]),
        );
        let record_count = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        let header_length = u16::from_le_bytes([head[8], head[9]]);
        let record_length = u16::from_le_bytes([head[10], head[11]]);
        let codepage = head[29];

        let header_len = usize::from(header_length);
        if header_len < FILE_HEADER_LEN + 1 || record_length == 0 {
            return Err(invalid(format!(
                "implausible header length {header_length} / record length {record_length}"
            )));
        }

        let mut descriptors = vec![0u8; header_len - FILE_HEADER_LEN];
        reader
            .read_exact(&mut descriptors)
            .map_err(|_| invalid("field descriptors are truncated"))?;

        let fields = parse_descriptors(&descriptors, usize::from(record_length))?;

        let mut header = Self {
            version,
            last_update,
            record_count,
            header_length,
            record_length,
            codepage,
            fields,
        };
        header.decode_names(
            codepage_encoding(codepage).unwrap_or(DbfEncoding::Whatwg(FALLBACK_ENCODING)),
        );
        Ok(header)
    }

    fn decode_names(&mut self, encoding: DbfEncoding) {
        for field in &mut self.fields {
            field.name = encoding.decode(&field.raw_name).trim().to_owned();
        }
    }
}

fn parse_descriptors(bytes: &[u8], record_length: usize) -> Result<Vec<DbfField>, SourceError> {
    let mut fields = Vec::new();
    // Offset 0 of every record is the deletion flag.
    let mut offset = 1;

    for chunk in bytes.chunks(DESCRIPTOR_LEN) {
        if chunk.first() == Some(&DESCRIPTOR_TERMINATOR) || chunk.len() < DESCRIPTOR_LEN {
            break;
        }

        let name_bytes = &chunk[..11];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(11);

        let field = DbfField {
            name: String::new(),
            raw_name: name_bytes[..name_len].to_vec(),
            field_type: FieldType::from_tag(chunk[11]),
            length: chunk[16],
            decimals: chunk[17],
            offset,
        };
        offset += usize::from(field.length);
        fields.push(field);
    }

    if fields.is_empty() {
        return Err(invalid("no field descriptors"));
    }
    if offset > record_length {
        return Err(invalid(format!(
            "fields span {offset} bytes but records are {record_length} bytes"
        )));
    }

    Ok(fields)
}

// ── Encoding ────────────────────────────────────────────────────────

/// A table's character encoding: one of the web encodings, or a DOS OEM
/// code page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbfEncoding {
    Whatwg(&'static Encoding),
    /// OEM code page number, e.g. `850`.
    Oem(u16),
}

impl DbfEncoding {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Whatwg(encoding) => encoding.name(),
            Self::Oem(437) => "cp437",
            Self::Oem(737) => "cp737",
            Self::Oem(850) => "cp850",
            Self::Oem(852) => "cp852",
            Self::Oem(857) => "cp857",
            Self::Oem(861) => "cp861",
            Self::Oem(865) => "cp865",
            Self::Oem(_) => "oem",
        }
    }

    /// Decodes `bytes`, replacing unmappable bytes with U+FFFD.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Cow<'_, str> {
        match self {
            Self::Whatwg(encoding) => encoding.decode_without_bom_handling(bytes).0,
            Self::Oem(code_page) => match DECODING_TABLE_CP_MAP.get(&code_page) {
                Some(table) => Cow::Owned(table.decode_string_lossy(bytes)),
                None => FALLBACK_ENCODING.decode_without_bom_handling(bytes).0,
            },
        }
    }
}

/// Maps a language driver byte to an encoding.
#[must_use]
pub fn codepage_encoding(codepage: u8) -> Option<DbfEncoding> {
    let encoding = match codepage {
        0x01 => return Some(DbfEncoding::Oem(437)),
        0x02 => return Some(DbfEncoding::Oem(850)),
        0x64 => return Some(DbfEncoding::Oem(852)),
        0x66 => return Some(DbfEncoding::Oem(865)),
        0x67 => return Some(DbfEncoding::Oem(861)),
        0x6A => return Some(DbfEncoding::Oem(737)),
        0x6B => return Some(DbfEncoding::Oem(857)),
        0x03 | 0x57 | 0x58 => encoding_rs::WINDOWS_1252,
        0x04 => encoding_rs::MACINTOSH,
        0x65 => encoding_rs::IBM866,
        0x78 => encoding_rs::BIG5,
        0x79 => encoding_rs::EUC_KR,
        0x7A => encoding_rs::GBK,
        0x7B => encoding_rs::SHIFT_JIS,
        0x7C => encoding_rs::WINDOWS_874,
        0x7D => encoding_rs::WINDOWS_1255,
        0x7E => encoding_rs::WINDOWS_1256,
        0x7F => encoding_rs::WINDOWS_1250,
        0x8C => encoding_rs::WINDOWS_1251,
        0x8D => encoding_rs::WINDOWS_1253,
        0x8E => encoding_rs::WINDOWS_1254,
        0x96 => encoding_rs::WINDOWS_1257,
        _ => return None,
    };
    Some(DbfEncoding::Whatwg(encoding))
}

fn control_ratio(encoding: &'static Encoding, samples: &[&[u8]]) -> f64 {
    let mut total = 0usize;
    let mut control = 0usize;
    for sample in samples {
        let (text, _) = encoding.decode_without_bom_handling(sample);
        for c in text.chars() {
            total += 1;
            if c == char::REPLACEMENT_CHARACTER
                || (c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
            {
                control += 1;
            }
        }
    }

    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = control as f64 / total as f64;
    ratio
}

/// Picks the first candidate that decodes the record's leading character
/// fields with few control characters.
#[must_use]
pub fn guess_encoding(
    record: &[u8],
    fields: &[DbfField],
    candidates: &[&'static Encoding],
) -> Option<&'static Encoding> {
    let samples: Vec<&[u8]> = fields
        .iter()
        .filter(|f| f.field_type == FieldType::Character)
        .take(SAMPLE_FIELDS)
        .filter_map(|f| record.get(f.range()))
        .collect();

    candidates
        .iter()
        .copied()
        .find(|&enc| control_ratio(enc, &samples) < MAX_CONTROL_RATIO)
}

// ── Source ──────────────────────────────────────────────────────────

/// Row source over a dBASE table.
///
/// [`Row::row_number`] counts live records from 1; soft-deleted records
/// are skipped without consuming a number.
pub struct DbfSource {
    reader: BufReader<File>,
    header: DbfHeader,
    headers: Arc<[String]>,
    encoding: DbfEncoding,
    record: Vec<u8>,
    records_read: u32,
    rows_emitted: u64,
}

impl std::fmt::Debug for DbfSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbfSource")
            .field("header", &self.header)
            .field("encoding", &self.encoding.name())
            .field("records_read", &self.records_read)
            .finish_non_exhaustive()
    }
}

impl DbfSource {
    /// Opens `path` and resolves its character encoding.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the file cannot be read or its header is
    /// invalid.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = DbfHeader::read(&mut reader)?;
        let mut record = vec![0u8; usize::from(header.record_length)];

        let encoding = match codepage_encoding(header.codepage) {
            Some(encoding) => encoding,
            None => {
                let guessed = if header.record_count > 0 && reader.read_exact(&mut record).is_ok() {
                    guess_encoding(&record, &header.fields, CANDIDATE_ENCODINGS)
                } else {
                    None
                };
                reader.seek(SeekFrom::Start(u64::from(header.header_length)))?;
                let encoding = DbfEncoding::Whatwg(guessed.unwrap_or(FALLBACK_ENCODING));
                header.decode_names(encoding);
                encoding
            }
        };

        log::debug!(
            "[dbf] {}: version 0x{:02X}, {} records, {} fields, codepage 0x{:02X} -> {}",
            path.display(),
            header.version,
            header.record_count,
            header.fields.len(),
            header.codepage,
            encoding.name(),
        );

        let headers = fill_blank_headers(
            header.fields.iter().map(|f| f.name.clone()).collect(),
            "Field",
        );

        Ok(Self {
            reader,
            header,
            headers: headers.into(),
            encoding,
            record,
            records_read: 0,
            rows_emitted: 0,
        })
    }

    #[must_use]
    pub const fn header(&self) -> &DbfHeader {
        &self.header
    }

    fn decode_record(&self) -> Vec<String> {
        self.header
            .fields
            .iter()
            .map(|field| {
                let bytes = self.record.get(field.range()).unwrap_or_default();
                field.field_type.convert(&self.encoding.decode(bytes))
            })
            .collect()
    }
}

impl Iterator for DbfSource {
    type Item = Result<Row, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.records_read < self.header.record_count {
            if let Err(e) = self.reader.read_exact(&mut self.record) {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    log::warn!(
                        "[dbf] file ends after {} of {} records",
                        self.records_read,
                        self.header.record_count
                    );
                    self.records_read = self.header.record_count;
                    return None;
                }
                return Some(Err(e.into()));
            }
            self.records_read += 1;

            match self.record.first() {
                Some(&END_OF_FILE) => {
                    self.records_read = self.header.record_count;
                    return None;
                }
                Some(&DELETED) => continue,
                _ => {}
            }

            self.rows_emitted += 1;
            return Some(Ok(Row {
                row_number: self.rows_emitted,
                headers: Arc::clone(&self.headers),
                values: self.decode_record(),
            }));
        }
        None
    }
}

impl RowSource for DbfSource {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn encoding(&self) -> &str {
        self.encoding.name()
    }

    fn kind(&self) -> FileKind {
        FileKind::Dbase
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    /// Builds a dBASE III file in memory.
    fn build_dbf(fields: &[(&str, u8, u8)], records: &[(bool, &[&[u8]])], codepage: u8) -> Vec<u8> {
        let header_len = 32 + 32 * fields.len() + 1;
        let record_len = 1 + fields.iter().map(|f| usize::from(f.2)).sum::<usize>();

        let mut out = vec![0u8; 32];
        out[0] = 0x03;
        out[1] = 124;
        out[2] = 5;
        out[3] = 17;
        out[4..8].copy_from_slice(&u32::try_from(records.len()).unwrap().to_le_bytes());
        out[8..10].copy_from_slice(&u16::try_from(header_len).unwrap().to_le_bytes());
        out[10..12].copy_from_slice(&u16::try_from(record_len).unwrap().to_le_bytes());
        out[29] = codepage;

        for (name, tag, len) in fields {
            let mut desc = [0u8; 32];
            desc[..name.len()].copy_from_slice(name.as_bytes());
            desc[11] = *tag;
            desc[16] = *len;
            out.extend_from_slice(&desc);
        }
        out.push(DESCRIPTOR_TERMINATOR);

        for (deleted, values) in records {
            out.push(if *deleted { DELETED } else { b' ' });
            for ((_, _, len), value) in fields.iter().zip(values.iter()) {
                let mut cell = value.to_vec();
                cell.resize(usize::from(*len), b' ');
                out.extend_from_slice(&cell);
            }
        }
        out.push(END_OF_FILE);
        out
    }

    fn write_dbf(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".dbf").tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    const FIELDS: &[(&str, u8, u8)] = &[
        ("ARTNR", b'C', 8),
        ("NAME", b'C', 10),
        ("PREIS", b'N', 8),
        ("DATUM", b'D', 8),
        ("AKTIV", b'L', 1),
        ("NOTIZ", b'M', 10),
    ];

    #[test]
    fn converts_each_field_type() {
        let bytes = build_dbf(
            FIELDS,
            &[(
                false,
                &[b"A-1", b"B\xFCrste", b"   12.50", b"20240517", b"t", b"0000000001"],
            )],
            0x03,
        );
        let file = write_dbf(&bytes);
        let mut source = DbfSource::open(file.path()).unwrap();
        assert_eq!(source.encoding(), "windows-1252");
        assert_eq!(source.header().last_update, NaiveDate::from_ymd_opt(2024, 5, 17));
        assert_eq!(source.headers(), ["ARTNR", "NAME", "PREIS", "DATUM", "AKTIV", "NOTIZ"]);

        let row = source.next().unwrap().unwrap();
        assert_eq!(row.row_number, 1);
        assert_eq!(
            row.values,
            vec!["A-1", "Bürste", "12.50", "17.05.2024", "TRUE", ""]
        );
        assert!(source.next().is_none());
    }

    #[test]
    fn deleted_records_are_skipped() {
        let bytes = build_dbf(
            &FIELDS[..3],
            &[
                (false, &[b"A", b"One", b"1"]),
                (true, &[b"B", b"Two", b"2"]),
                (false, &[b"C", b"Three", b""]),
            ],
            0x03,
        );
        let file = write_dbf(&bytes);
        let rows: Vec<Row> = DbfSource::open(file.path())
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_number, 1);
        assert_eq!(rows[1].row_number, 2);
        assert_eq!(rows[1].values, vec!["C", "Three", "0"]);
    }

    #[test]
    fn dos_codepage_is_decoded() {
        let bytes = build_dbf(&FIELDS[..2], &[(false, &[b"A-1", b"B\x81rste"])], 0x02);
        let file = write_dbf(&bytes);
        let source = DbfSource::open(file.path()).unwrap();
        assert_eq!(source.encoding(), "cp850");
        let rows: Vec<Row> = source.map(Result::unwrap).collect();
        assert_eq!(rows[0].values, vec!["A-1", "Bürste"]);
    }

    #[test]
    fn field_names_use_table_encoding() {
        let mut bytes = build_dbf(&[("GRXN", b'C', 4)], &[(false, &[b"x"])], 0x02);
        // Name starts at byte 32; replace the 'X'.
        bytes[34] = 0x81;
        let file = write_dbf(&bytes);
        let source = DbfSource::open(file.path()).unwrap();
        assert_eq!(source.headers(), ["GRüN"]);
    }

    #[test]
    fn dos_codepages_map_to_oem_tables() {
        assert_eq!(codepage_encoding(0x01), Some(DbfEncoding::Oem(437)));
        assert_eq!(codepage_encoding(0x6B), Some(DbfEncoding::Oem(857)));
        assert_eq!(DbfEncoding::Oem(437).decode(b"\x9A"), "Ü");
        assert_eq!(codepage_encoding(0x00), None);
    }

    #[test]
    fn missing_codepage_is_guessed() {
        // Box-drawing range bytes are control characters under 1252/1250
        // but Cyrillic letters under CP866.
        let bytes = build_dbf(
            &FIELDS[..2],
            &[(false, &[b"X", b"\x81\x8D\x8F\x90\x9D"])],
            0x00,
        );
        let file = write_dbf(&bytes);
        let source = DbfSource::open(file.path()).unwrap();
        assert_eq!(source.encoding(), "IBM866");
        let rows: Vec<Row> = source.map(Result::unwrap).collect();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn ascii_without_codepage_uses_first_candidate() {
        let bytes = build_dbf(&FIELDS[..2], &[(false, &[b"X", b"Plain"])], 0x00);
        let file = write_dbf(&bytes);
        assert_eq!(DbfSource::open(file.path()).unwrap().encoding(), "windows-1252");
    }

    #[test]
    fn blank_field_names_are_numbered() {
        let bytes = build_dbf(&[("SKU", b'C', 4), ("", b'C', 4)], &[], 0x03);
        let file = write_dbf(&bytes);
        let source = DbfSource::open(file.path()).unwrap();
        assert_eq!(source.headers(), ["SKU", "Field_2"]);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = build_dbf(&FIELDS[..1], &[], 0x03);
        bytes[0] = 0x07;
        let file = write_dbf(&bytes);
        let err = DbfSource::open(file.path()).unwrap_err();
        assert_eq!(err.code(), stock_sync_models::ErrorCode::DbfInvalidFormat);
    }

    #[test]
    fn truncated_file_stops_cleanly() {
        let mut bytes = build_dbf(
            &FIELDS[..2],
            &[(false, &[b"A", b"One"]), (false, &[b"B", b"Two"])],
            0x03,
        );
        // Drop the second record and the EOF marker.
        bytes.truncate(bytes.len() - 16);
        let file = write_dbf(&bytes);
        let rows: Vec<Row> = DbfSource::open(file.path())
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn field_type_tags() {
        assert_eq!(FieldType::from_tag(b'F'), FieldType::Numeric);
        assert_eq!(FieldType::from_tag(b'I'), FieldType::Unknown(b'I'));
        assert_eq!(FieldType::Logical.convert("?"), "FALSE");
        assert_eq!(FieldType::Logical.convert("Y"), "TRUE");
        assert_eq!(FieldType::Date.convert("2024"), "2024");
        assert_eq!(FieldType::Unknown(b'I').convert(" x "), "x");
    }
}
