//! Materialized query results.

use serde::{Deserialize, Serialize};

/// Column metadata, as carried by a RowDescription message.
///
/// Values are kept exactly as the upstream server sent them so they can be
/// replayed to clients without loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name.
    pub name: String,
    /// OID of the source table, or 0.
    pub table_oid: u32,
    /// Attribute number of the column within its table, or 0.
    pub column_id: i16,
    /// OID of the column's data type.
    pub type_oid: u32,
    /// Type size (negative for variable width types).
    pub type_size: i16,
    /// Type modifier.
    pub type_modifier: i32,
    /// Format code (0 text, 1 binary).
    pub format: i16,
}

/// One result row. `None` is SQL NULL.
pub type DataRow = Vec<Option<Vec<u8>>>;

/// A fully materialized statement result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column descriptions, in order.
    pub fields: Vec<FieldDescriptor>,
    /// Rows, in the order the server produced them.
    pub rows: Vec<DataRow>,
    /// CommandComplete tag, e.g. `SELECT 3` or `INSERT 0 1`.
    pub command_tag: String,
}

impl QueryResult {
    /// A result with no columns and no rows.
    pub fn command(tag: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            rows: Vec::new(),
            command_tag: tag.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
