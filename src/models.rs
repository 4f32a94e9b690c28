//! Core data types that flow through the indexing pipeline.
//!
//! A [`Row`] is what the query builder returns for one entity: column alias
//! to raw scalar, with joined columns still packed. The transformation
//! pipeline rewrites it in place into a [`Document`], which is submitted to
//! the search engine and then dropped.

use serde_json::{Map, Value};

/// Raw entity row: column alias → scalar (string, number or null).
pub type Row = Map<String, Value>;

/// Transformed nested document ready for indexing.
pub type Document = Map<String, Value>;

/// Alias under which every query selects the primary key.
pub const ID_FIELD: &str = "id";

/// Read the primary key of a row or document.
///
/// Accepts both integer and numeric string ids since aggregated columns
/// may come back as text depending on the database driver.
pub fn row_id(row: &Row) -> Option<i64> {
    match row.get(ID_FIELD)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Result of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutcome {
    /// Number of documents submitted.
    pub processed: u64,
    /// Documents the run set out to index: `min(limit, matching count)`.
    pub total: u64,
    /// Cursor the next run should resume from.
    pub last_cursor: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_id_variants() {
        let mut row = Row::new();
        assert_eq!(row_id(&row), None);
        row.insert(ID_FIELD.to_string(), json!(42));
        assert_eq!(row_id(&row), Some(42));
        row.insert(ID_FIELD.to_string(), json!(" 43 "));
        assert_eq!(row_id(&row), Some(43));
        row.insert(ID_FIELD.to_string(), json!(null));
        assert_eq!(row_id(&row), None);
    }
}
