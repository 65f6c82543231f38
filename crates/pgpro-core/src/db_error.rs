//! Structured database errors.
//!
//! Mirrors the field set of a PostgreSQL ErrorResponse. Errors raised by
//! upstream servers are carried through unchanged; errors raised by the proxy
//! itself (syntax errors, permission denials, auth failures) are built with
//! the same shape so clients cannot tell them apart from native ones.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQLSTATE for `invalid_authorization_specification`.
pub const SQLSTATE_INVALID_AUTHORIZATION: &str = "28000";
/// SQLSTATE for `insufficient_privilege`.
pub const SQLSTATE_INSUFFICIENT_PRIVILEGE: &str = "42501";
/// SQLSTATE for `syntax_error`.
pub const SQLSTATE_SYNTAX_ERROR: &str = "42601";
/// SQLSTATE for `protocol_violation`.
pub const SQLSTATE_PROTOCOL_VIOLATION: &str = "08P01";

/// Every field a PostgreSQL ErrorResponse may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbError {
    /// `S`: localized severity.
    pub severity: String,
    /// `V`: non-localized severity.
    pub severity_non_localized: Option<String>,
    /// `C`: SQLSTATE code.
    pub code: String,
    /// `M`: primary message.
    pub message: String,
    /// `D`: detail.
    pub detail: Option<String>,
    /// `H`: hint.
    pub hint: Option<String>,
    /// `P`: one-based cursor position into the query string.
    pub position: Option<String>,
    /// `p`: position into an internally generated query.
    pub internal_position: Option<String>,
    /// `q`: internally generated query text.
    pub internal_query: Option<String>,
    /// `W`: context ("where").
    pub where_: Option<String>,
    /// `s`: schema name.
    pub schema_name: Option<String>,
    /// `t`: table name.
    pub table_name: Option<String>,
    /// `c`: column name.
    pub column_name: Option<String>,
    /// `d`: data type name.
    pub datatype_name: Option<String>,
    /// `n`: constraint name.
    pub constraint_name: Option<String>,
    /// `F`: source file.
    pub file: Option<String>,
    /// `L`: source line.
    pub line: Option<String>,
    /// `R`: source routine.
    pub routine: Option<String>,
}

impl DbError {
    /// An `ERROR` severity error with the given code and message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_severity("ERROR", code, message)
    }

    /// A `FATAL` severity error with the given code and message.
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_severity("FATAL", code, message)
    }

    fn with_severity(severity: &str, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: severity.to_string(),
            severity_non_localized: Some(severity.to_string()),
            code: code.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position.to_string());
        self
    }

    pub fn with_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.schema_name = Some(schema.into());
        self.table_name = Some(table.into());
        self
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (SQLSTATE {})", self.severity, self.message, self.code)
    }
}

impl std::error::Error for DbError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_table_fields() {
        let err = DbError::error(SQLSTATE_INSUFFICIENT_PRIVILEGE, "permission denied for table orders")
            .with_table("public", "orders");
        assert_eq!(err.severity, "ERROR");
        assert_eq!(err.code, "42501");
        assert_eq!(err.schema_name.as_deref(), Some("public"));
        assert_eq!(err.table_name.as_deref(), Some("orders"));
    }

    #[test]
    fn test_display() {
        let err = DbError::fatal(SQLSTATE_INVALID_AUTHORIZATION, "password authentication failed");
        assert_eq!(
            err.to_string(),
            "FATAL: password authentication failed (SQLSTATE 28000)"
        );
    }
}
