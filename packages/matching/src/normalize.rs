//! Text normalization for title and name comparisons.

use unicode_normalization::UnicodeNormalization as _;

/// NFKC-normalizes, trims, lowercases, and collapses internal whitespace.
#[must_use]
pub fn normalize_text(input: &str) -> String {
    let composed: String = input.nfkc().collect();
    composed
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cuts a product name at its first `-` or `(`.
///
/// `"Shirt - Blue (XL)"` becomes `"Shirt"`.
#[must_use]
pub fn truncate_name(name: &str) -> &str {
    name.find(|c| c == '-' || c == '(')
        .map_or(name, |i| &name[..i])
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_text("  Blue   SHIRT\t XL "), "blue shirt xl");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn applies_compatibility_normalization() {
        // Full-width letters and the "ﬁ" ligature fold to ASCII.
        assert_eq!(normalize_text("ＳＨＩＲＴ"), "shirt");
        assert_eq!(normalize_text("ﬁlter"), "filter");
        // Non-breaking space collapses like a regular space.
        assert_eq!(normalize_text("a\u{00A0}b"), "a b");
    }

    #[test]
    fn truncates_at_first_separator() {
        assert_eq!(truncate_name("Shirt - Blue (XL)"), "Shirt");
        assert_eq!(truncate_name("Hat (red)"), "Hat");
        assert_eq!(truncate_name("Plain"), "Plain");
        assert_eq!(truncate_name("-leading"), "");
    }
}
