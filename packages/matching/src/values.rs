//! Price and stock value parsing.
//!
//! Export files carry prices in whatever locale the exporting system used
//! (`1.234,56`, `1,234.56`, `€ 6,5`). [`normalize_price`] turns all of these
//! into the platform's two-decimal money format.

use std::str::FromStr as _;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::prelude::ToPrimitive as _;
use rust_decimal::{Decimal, RoundingStrategy};
use stock_sync_models::{ErrorCode, ErrorReport};

/// Currency markers stripped before parsing.
static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)€|eur").expect("valid regex"));

/// Errors from parsing a single cell value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// The price cell is blank after cleanup.
    #[error("Price is empty")]
    EmptyPrice,

    /// The price could not be read as a decimal number.
    #[error("Invalid price: '{input}'")]
    InvalidPrice {
        /// Original cell text.
        input: String,
    },

    /// The price is below zero.
    #[error("Negative price: '{input}'")]
    NegativePrice {
        /// Original cell text.
        input: String,
    },

    /// The stock cell is blank.
    #[error("Stock is empty")]
    EmptyStock,

    /// The stock could not be read as a number.
    #[error("Invalid stock quantity: '{input}'")]
    InvalidStock {
        /// Original cell text.
        input: String,
    },
}

impl ValueError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ValueUnparseable
    }

    #[must_use]
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.code(), self.to_string())
    }
}

/// Normalizes a price to a string with exactly two fraction digits.
///
/// Currency markers (`€`, `EUR`), whitespace, and apostrophes are removed.
/// When both `,` and `.` appear, whichever comes last is the decimal
/// separator and the other is dropped as a thousands separator. A lone
/// `,` is a decimal separator.
///
/// # Errors
///
/// Returns [`ValueError`] if nothing numeric remains, the number cannot be
/// parsed, or it is negative.
pub fn normalize_price(input: &str) -> Result<String, ValueError> {
    let stripped = CURRENCY_RE.replace_all(input, "");
    let cleaned: String = stripped
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '\'' | '\u{2019}'))
        .collect();

    if cleaned.is_empty() {
        return Err(ValueError::EmptyPrice);
    }

    let canonical = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    let value = Decimal::from_str(&canonical).map_err(|_| ValueError::InvalidPrice {
        input: input.to_owned(),
    })?;
    if value < Decimal::ZERO {
        return Err(ValueError::NegativePrice {
            input: input.to_owned(),
        });
    }

    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    Ok(rounded.to_string())
}

/// Compares two money strings numerically, falling back to text equality
/// when either side is not a number.
#[must_use]
pub fn prices_equal(a: &str, b: &str) -> bool {
    match (Decimal::from_str(a.trim()), Decimal::from_str(b.trim())) {
        (Ok(x), Ok(y)) => x == y,
        _ => a.trim() == b.trim(),
    }
}

/// Parses a stock quantity.
///
/// Whole numbers are taken as-is. Decimal text (`"10.00"`, `"5,0"`) is
/// truncated toward zero, which covers numeric dBASE fields with a
/// fraction part.
///
/// # Errors
///
/// Returns [`ValueError::EmptyStock`] or [`ValueError::InvalidStock`].
pub fn parse_stock(input: &str) -> Result<i64, ValueError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValueError::EmptyStock);
    }
    if let Ok(quantity) = trimmed.parse::<i64>() {
        return Ok(quantity);
    }

    Decimal::from_str(&trimmed.replace(',', "."))
        .ok()
        .and_then(|d| d.trunc().to_i64())
        .ok_or_else(|| ValueError::InvalidStock {
            input: input.to_owned(),
        })
}
