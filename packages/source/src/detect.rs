//! Format sniffing: file kind, text encoding, and field delimiter.
//!
//! The heuristics are pure functions over a byte or text sample so they
//! can be tested without touching the filesystem. Each returns its pick
//! together with a confidence in `0.0..=1.0`.

use std::borrow::Cow;
use std::fs::File;
use std::io::Read as _;
use std::path::Path;

use serde::Serialize;
use strum_macros::{AsRefStr, Display};

use crate::SourceError;

/// Bytes read from the start of a text file for encoding and delimiter
/// detection.
pub const SAMPLE_BYTES: u64 = 64 * 1024;

/// Non-blank lines inspected by [`detect_delimiter`].
pub const DELIMITER_SAMPLE_LINES: usize = 10;

/// Delimiters considered for text files; the first is the default.
pub const DEFAULT_DELIMITERS: &[u8] = b";,";

/// Version bytes that identify a dBASE-family table.
pub const DBASE_VERSIONS: [u8; 7] = [0x03, 0x83, 0x8B, 0x30, 0x31, 0x32, 0xF5];

/// Extensions accepted as delimited text.
pub const TEXT_EXTENSIONS: &[&str] = &["csv", "txt", "tsv"];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

// ── File kind ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FileKind {
    DelimitedText,
    Dbase,
}

/// Returns `true` if `header` starts with a plausible dBASE file header.
#[must_use]
pub fn looks_like_dbase(header: &[u8]) -> bool {
    if header.len() < 32 || !DBASE_VERSIONS.contains(&header[0]) {
        return false;
    }
    let month = header[2];
    let day = header[3];
    let header_len = u16::from_le_bytes([header[8], header[9]]);
    let record_len = u16::from_le_bytes([header[10], header[11]]);
    month <= 12 && day <= 31 && header_len >= 33 && record_len > 0
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Detects the kind of `path`: magic bytes first, then the extension.
///
/// Files that are not recognizably dBASE are treated as delimited text.
///
/// # Errors
///
/// Returns [`SourceError`] if the file cannot be read.
pub fn detect_file_kind(path: &Path) -> Result<FileKind, SourceError> {
    let mut header = Vec::with_capacity(32);
    File::open(path)?.take(32).read_to_end(&mut header)?;

    if looks_like_dbase(&header) {
        return Ok(FileKind::Dbase);
    }
    match extension(path).as_deref() {
        Some("dbf") => Ok(FileKind::Dbase),
        _ => Ok(FileKind::DelimitedText),
    }
}

/// Checks that `path` exists and is a supported source file.
///
/// # Errors
///
/// Returns [`SourceError::FileNotFound`] or [`SourceError::Unsupported`].
pub fn ensure_supported(path: &Path) -> Result<FileKind, SourceError> {
    if !path.is_file() {
        return Err(SourceError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let kind = detect_file_kind(path)?;
    let known_extension = extension(path)
        .is_some_and(|ext| ext == "dbf" || TEXT_EXTENSIONS.contains(&ext.as_str()));

    if kind == FileKind::Dbase || known_extension {
        Ok(kind)
    } else {
        Err(SourceError::Unsupported {
            path: path.to_path_buf(),
        })
    }
}

// ── Encoding ────────────────────────────────────────────────────────

/// Text encodings tried for delimited files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    /// UTF-8 with a leading byte-order mark.
    Utf8Bom,
    Utf8,
    Windows1252,
    Latin1,
    /// UTF-8 with invalid sequences replaced by U+FFFD.
    Utf8Lossy,
}

/// Candidates in the order they are tried.
pub const DEFAULT_ENCODINGS: &[TextEncoding] = &[
    TextEncoding::Utf8Bom,
    TextEncoding::Utf8,
    TextEncoding::Windows1252,
    TextEncoding::Latin1,
];

impl TextEncoding {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Utf8Bom => "utf-8-sig",
            Self::Utf8 => "utf-8",
            Self::Windows1252 => "windows-1252",
            Self::Latin1 => "iso-8859-1",
            Self::Utf8Lossy => "utf-8 (lossy)",
        }
    }

    /// Number of leading bytes to skip before decoding.
    #[must_use]
    pub const fn bom_len(self) -> usize {
        match self {
            Self::Utf8Bom => UTF8_BOM.len(),
            _ => 0,
        }
    }

    /// Whether `sample` decodes cleanly under this encoding.
    #[must_use]
    pub fn accepts(self, sample: &[u8]) -> bool {
        match self {
            Self::Utf8Bom => sample
                .strip_prefix(UTF8_BOM)
                .is_some_and(is_utf8_prefix),
            Self::Utf8 => is_utf8_prefix(sample),
            // Bytes left undefined by the Windows-1252 code page.
            Self::Windows1252 => !sample
                .iter()
                .any(|b| matches!(b, 0x81 | 0x8D | 0x8F | 0x90 | 0x9D)),
            Self::Latin1 => !sample
                .iter()
                .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')),
            Self::Utf8Lossy => true,
        }
    }

    /// Decodes one field. The BOM, if any, must already be skipped.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Cow<'_, str> {
        match self {
            Self::Utf8Bom | Self::Utf8 | Self::Utf8Lossy => String::from_utf8_lossy(bytes),
            Self::Windows1252 => encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes).0,
            Self::Latin1 => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }

    const fn confidence(self, ascii_only: bool) -> f32 {
        match self {
            Self::Utf8Bom => 1.0,
            Self::Utf8 if ascii_only => 0.6,
            Self::Utf8 => 0.95,
            Self::Windows1252 => 0.5,
            Self::Latin1 => 0.3,
            Self::Utf8Lossy => 0.1,
        }
    }
}

/// A sample may end in the middle of a multi-byte sequence.
fn is_utf8_prefix(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && bytes.len() - e.valid_up_to() < 4,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodingGuess {
    pub encoding: TextEncoding,
    pub confidence: f32,
}

/// Picks the first candidate that decodes `sample` cleanly, falling back
/// to lossy UTF-8.
#[must_use]
pub fn detect_encoding(sample: &[u8], candidates: &[TextEncoding]) -> EncodingGuess {
    let ascii_only = sample.is_ascii();
    let encoding = candidates
        .iter()
        .copied()
        .find(|enc| enc.accepts(sample))
        .unwrap_or(TextEncoding::Utf8Lossy);

    EncodingGuess {
        encoding,
        confidence: encoding.confidence(ascii_only),
    }
}

// ── Delimiter ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelimiterGuess {
    pub delimiter: u8,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy)]
struct DelimiterStats {
    delimiter: u8,
    /// Lines containing at least one unquoted occurrence.
    consistency: usize,
    total: usize,
    /// Variance of the per-line field count.
    variance: f64,
}

impl DelimiterStats {
    fn collect(delimiter: u8, lines: &[&str]) -> Self {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| count_unquoted(line, char::from(delimiter)))
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let variance = {
            let n = counts.len().max(1) as f64;
            let fields: Vec<f64> = counts.iter().map(|&c| (c + 1) as f64).collect();
            let mean = fields.iter().sum::<f64>() / n;
            fields.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / n
        };

        Self {
            delimiter,
            consistency: counts.iter().filter(|&&c| c > 0).count(),
            total: counts.iter().sum(),
            variance,
        }
    }

    /// Higher consistency, then higher total, then lower variance.
    fn beats(&self, other: &Self) -> bool {
        self.consistency
            .cmp(&other.consistency)
            .then(self.total.cmp(&other.total))
            .then_with(|| {
                other
                    .variance
                    .partial_cmp(&self.variance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .is_gt()
    }
}

/// Counts `delimiter` outside `"`-quoted sections. `""` inside quotes is an
/// escaped quote.
fn count_unquoted(line: &str, delimiter: char) -> usize {
    let mut count = 0;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                chars.next();
            } else {
                in_quotes = !in_quotes;
            }
        } else if c == delimiter && !in_quotes {
            count += 1;
        }
    }

    count
}

/// Picks the field delimiter from the first non-blank lines of `sample`.
///
/// Ties, and samples where no candidate occurs, resolve to the first
/// candidate.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn detect_delimiter(sample: &str, candidates: &[u8]) -> DelimiterGuess {
    let default = candidates.first().copied().unwrap_or(b';');
    let lines: Vec<&str> = sample
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DELIMITER_SAMPLE_LINES)
        .collect();

    let best = candidates
        .iter()
        .map(|&c| DelimiterStats::collect(c, &lines))
        .filter(|s| s.total > 0)
        .fold(None::<DelimiterStats>, |best, s| match best {
            Some(b) if !s.beats(&b) => Some(b),
            _ => Some(s),
        });

    match best {
        Some(stats) => DelimiterGuess {
            delimiter: stats.delimiter,
            confidence: stats.consistency as f32 / lines.len() as f32,
        },
        None => DelimiterGuess {
            delimiter: default,
            confidence: 0.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_is_detected_first() {
        let guess = detect_encoding(b"\xEF\xBB\xBFsku;name\n", DEFAULT_ENCODINGS);
        assert_eq!(guess.encoding, TextEncoding::Utf8Bom);
        assert_eq!(guess.encoding.bom_len(), 3);
    }

    #[test]
    fn plain_utf8_with_umlauts() {
        let guess = detect_encoding("name;preis\nBürste;3,50\n".as_bytes(), DEFAULT_ENCODINGS);
        assert_eq!(guess.encoding, TextEncoding::Utf8);
        assert!(guess.confidence > 0.9);
    }

    #[test]
    fn windows_1252_bytes_fall_back() {
        // "Bürste €" in Windows-1252
        let sample = b"name\nB\xFCrste \x80\n";
        let guess = detect_encoding(sample, DEFAULT_ENCODINGS);
        assert_eq!(guess.encoding, TextEncoding::Windows1252);
        assert_eq!(guess.encoding.decode(b"B\xFCrste \x80"), "Bürste €");
    }

    #[test]
    fn undefined_1252_bytes_use_latin1() {
        let guess = detect_encoding(b"a\x81b\n", DEFAULT_ENCODINGS);
        assert_eq!(guess.encoding, TextEncoding::Latin1);
    }

    #[test]
    fn binary_garbage_decodes_lossily() {
        let guess = detect_encoding(b"\x00\x81\x01", DEFAULT_ENCODINGS);
        assert_eq!(guess.encoding, TextEncoding::Utf8Lossy);
    }

    #[test]
    fn truncated_utf8_sample_is_still_utf8() {
        let mut sample = "ü".repeat(10).into_bytes();
        sample.pop();
        assert!(TextEncoding::Utf8.accepts(&sample));
    }

    #[test]
    fn semicolon_wins_on_consistency() {
        let sample = "sku;name;price\nA;Shirt, blue;1,50\nB;Hat;2,00\n";
        let guess = detect_delimiter(sample, DEFAULT_DELIMITERS);
        assert_eq!(guess.delimiter, b';');
        assert!((guess.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn comma_detected_when_quoted_semicolons() {
        let sample = "sku,name,price\nA,\"a;b;c\",1.50\nB,\"x \"\"y;z\"\"\",2.00\n";
        assert_eq!(detect_delimiter(sample, DEFAULT_DELIMITERS).delimiter, b',');
    }

    #[test]
    fn default_when_no_delimiter_present() {
        let guess = detect_delimiter("single\ncolumn\n", DEFAULT_DELIMITERS);
        assert_eq!(guess.delimiter, b';');
        assert!(guess.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn blank_lines_are_ignored() {
        let sample = "\n\n  \na,b\nc,d\n";
        assert_eq!(detect_delimiter(sample, DEFAULT_DELIMITERS).delimiter, b',');
    }

    #[test]
    fn count_unquoted_respects_escaped_quotes() {
        assert_eq!(count_unquoted("a,\"b,\"\"c\",d", ','), 2);
        assert_eq!(count_unquoted("\"x;y\";z", ';'), 1);
    }

    #[test]
    fn dbase_magic_requires_plausible_header() {
        let mut header = [0u8; 32];
        header[0] = 0x03;
        header[1] = 124;
        header[2] = 5;
        header[3] = 17;
        header[8..10].copy_from_slice(&97u16.to_le_bytes());
        header[10..12].copy_from_slice(&20u16.to_le_bytes());
        assert!(looks_like_dbase(&header));

        // A CSV that happens to start with "0" must not look like dBASE.
        let text = b"0123;name;price;stock;more;columns\n";
        assert!(!looks_like_dbase(text));
    }

    #[test]
    fn ensure_supported_rejects_unknown_extensions() {
        let file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        let err = ensure_supported(file.path()).unwrap_err();
        assert!(matches!(err, SourceError::Unsupported { .. }));

        let csv = tempfile::Builder::new().suffix(".CSV").tempfile().unwrap();
        assert_eq!(ensure_supported(csv.path()).unwrap(), FileKind::DelimitedText);
    }
}
