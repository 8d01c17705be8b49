//! Spreadsheet-style column letters.

use stock_sync_models::ColumnMapping;

use crate::SourceError;

/// Converts a column letter (`A`, `Z`, `AA`, ...) to a zero-based index.
///
/// Letters are case-insensitive and surrounding whitespace is ignored.
/// Returns `None` for empty or non-alphabetic input.
#[must_use]
pub fn letter_to_index(letter: &str) -> Option<usize> {
    let letter = letter.trim();
    if letter.is_empty() {
        return None;
    }

    let mut index: usize = 0;
    for b in letter.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        let digit = usize::from(b.to_ascii_uppercase() - b'A') + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}

/// Converts a zero-based index back to its column letter.
#[must_use]
pub fn index_to_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        #[allow(clippy::cast_possible_truncation)]
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Replaces blank header names with `{prefix}_{n}` (1-based).
#[must_use]
pub fn fill_blank_headers(headers: Vec<String>, prefix: &str) -> Vec<String> {
    headers
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            if h.is_empty() {
                format!("{prefix}_{}", i + 1)
            } else {
                h
            }
        })
        .collect()
}

/// A [`ColumnMapping`] resolved to zero-based indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndexes {
    pub sku: usize,
    pub name: usize,
    pub price: usize,
    pub stock: usize,
}

impl ColumnIndexes {
    /// Resolves every letter of `mapping`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MappingInvalid`] naming the first field whose
    /// letter is missing or invalid.
    pub fn resolve(mapping: &ColumnMapping) -> Result<Self, SourceError> {
        let mut resolved = [0usize; 4];
        for (slot, (field, letter)) in resolved.iter_mut().zip(mapping.entries()) {
            if letter.trim().is_empty() {
                return Err(SourceError::MappingInvalid {
                    message: format!("no column mapped for {field}"),
                });
            }
            *slot = letter_to_index(letter).ok_or_else(|| SourceError::MappingInvalid {
                message: format!("'{letter}' is not a column letter (field {field})"),
            })?;
        }

        let [sku, name, price, stock] = resolved;
        Ok(Self {
            sku,
            name,
            price,
            stock,
        })
    }

    /// `(field, index)` pairs in mapping order.
    #[must_use]
    pub const fn entries(&self) -> [(&'static str, usize); 4] {
        [
            ("sku", self.sku),
            ("name", self.name),
            ("price", self.price),
            ("stock", self.stock),
        ]
    }

    /// Checks every index against the number of header columns.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingColumn`] for the first field that
    /// points past the last column.
    pub fn check_headers(&self, header_count: usize) -> Result<(), SourceError> {
        match self.entries().into_iter().find(|(_, i)| *i >= header_count) {
            Some((field, index)) => Err(SourceError::MissingColumn {
                field,
                letter: index_to_letter(index),
                available: header_count,
            }),
            None => Ok(()),
        }
    }
}
