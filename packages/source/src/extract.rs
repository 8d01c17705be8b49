//! Applies a column mapping to source rows.

use stock_sync_models::{ColumnMapping, ExtractedRow, Row};

use crate::SourceError;
use crate::columns::ColumnIndexes;

/// A row the mapping could not be applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub row_number: u64,
    /// Field whose column is missing from the row.
    pub field: &'static str,
    pub index: usize,
    pub field_count: usize,
    /// Whatever sku and name could still be read, for reporting.
    pub sku: String,
    pub name: String,
}

/// Extracts `sku`, `name`, `price`, and `stock` from rows.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    indexes: ColumnIndexes,
}

impl FieldExtractor {
    /// # Errors
    ///
    /// Returns [`SourceError::MappingInvalid`] if any mapped letter is
    /// missing or invalid.
    pub fn new(mapping: &ColumnMapping) -> Result<Self, SourceError> {
        Ok(Self {
            indexes: ColumnIndexes::resolve(mapping)?,
        })
    }

    #[must_use]
    pub const fn indexes(&self) -> &ColumnIndexes {
        &self.indexes
    }

    /// Reads the mapped fields from `row`.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] if any mapped column is past the end of the
    /// row.
    pub fn extract(&self, row: &Row) -> Result<ExtractedRow, Rejection> {
        let field_count = row.field_count();
        if let Some((field, index)) = self
            .indexes
            .entries()
            .into_iter()
            .find(|(_, i)| *i >= field_count)
        {
            return Err(Rejection {
                row_number: row.row_number,
                field,
                index,
                field_count,
                sku: row.value_at(self.indexes.sku).unwrap_or_default().to_owned(),
                name: row.value_at(self.indexes.name).unwrap_or_default().to_owned(),
            });
        }

        let value = |index: usize| row.value_at(index).unwrap_or_default().to_owned();
        Ok(ExtractedRow {
            row_number: row.row_number,
            sku: value(self.indexes.sku),
            name: value(self.indexes.name),
            price: value(self.indexes.price),
            stock: value(self.indexes.stock),
            raw: row.fields(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn row(values: &[&str]) -> Row {
        let headers: Arc<[String]> = (0..values.len())
            .map(|i| format!("c{i}"))
            .collect::<Vec<_>>()
            .into();
        Row {
            row_number: 7,
            headers,
            values: values.iter().map(|v| (*v).to_string()).collect(),
        }
    }

    #[test]
    fn extracts_mapped_columns() {
        let extractor = FieldExtractor::new(&ColumnMapping::new("B", "C", "A", "D")).unwrap();
        let extracted = extractor
            .extract(&row(&["12,50", "SKU-001", "Shirt", "10"]))
            .unwrap();
        assert_eq!(extracted.row_number, 7);
        assert_eq!(extracted.sku, "SKU-001");
        assert_eq!(extracted.name, "Shirt");
        assert_eq!(extracted.price, "12,50");
        assert_eq!(extracted.stock, "10");
        assert_eq!(extracted.raw.get("c0").map(String::as_str), Some("12,50"));
    }

    #[test]
    fn out_of_range_column_rejects_row() {
        let extractor = FieldExtractor::new(&ColumnMapping::new("A", "B", "F", "C")).unwrap();
        let rejection = extractor.extract(&row(&["SKU-9", "Hat", "3"])).unwrap_err();
        assert_eq!(rejection.field, "price");
        assert_eq!(rejection.index, 5);
        assert_eq!(rejection.field_count, 3);
        assert_eq!(rejection.sku, "SKU-9");
        assert_eq!(rejection.name, "Hat");
    }
}
