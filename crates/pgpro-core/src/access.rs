//! Table access descriptors.
//!
//! The classifier emits one [`TableAccessInfo`] per table a statement touches.
//! The access gate consumes them to decide whether a user may run the batch,
//! and the router uses their modes to decide between primary and replica.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schema assumed when a statement references a table without qualifying it.
pub const DEFAULT_SCHEMA: &str = "public";

/// The kind of access a statement performs on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessMode {
    /// Read access (`SELECT`).
    Select,
    /// Row insertion (`INSERT`).
    Insert,
    /// Row modification (`UPDATE`).
    Update,
    /// Row removal (`DELETE`).
    Delete,
    /// Any other recognized statement (DDL, utility commands, `SET`, ...).
    ///
    /// Checked as a single table-less action.
    System,
    /// The statement could not be parsed.
    Invalid,
}

impl AccessMode {
    /// Whether this mode only reads data.
    pub fn is_read(&self) -> bool {
        matches!(self, AccessMode::Select)
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Select => "SELECT",
            AccessMode::Insert => "INSERT",
            AccessMode::Update => "UPDATE",
            AccessMode::Delete => "DELETE",
            AccessMode::System => "SYSTEM",
            AccessMode::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an access mode name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown access mode: {0}")]
pub struct UnknownAccessMode(pub String);

impl FromStr for AccessMode {
    type Err = UnknownAccessMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Ok(AccessMode::Select),
            "INSERT" => Ok(AccessMode::Insert),
            "UPDATE" => Ok(AccessMode::Update),
            "DELETE" => Ok(AccessMode::Delete),
            "SYSTEM" => Ok(AccessMode::System),
            "INVALID" => Ok(AccessMode::Invalid),
            _ => Err(UnknownAccessMode(s.to_string())),
        }
    }
}

// Mode names in auth files are matched case-insensitively.
impl<'de> Deserialize<'de> for AccessMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A single table access performed by a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableAccessInfo {
    /// Table name. Empty for table-less accesses (`SELECT 1`, DDL, ...).
    pub name: String,
    /// Schema name. `public` unless the statement qualifies the table.
    pub schema: String,
    /// How the table is accessed.
    pub access_mode: AccessMode,
}

impl TableAccessInfo {
    /// Access to a table in the given schema.
    pub fn new(schema: impl Into<String>, name: impl Into<String>, access_mode: AccessMode) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            access_mode,
        }
    }

    /// Access to an unqualified table, resolved against [`DEFAULT_SCHEMA`].
    pub fn unqualified(name: impl Into<String>, access_mode: AccessMode) -> Self {
        Self::new(DEFAULT_SCHEMA, name, access_mode)
    }

    /// An access with no table identity.
    pub fn tableless(access_mode: AccessMode) -> Self {
        Self {
            name: String::new(),
            schema: String::new(),
            access_mode,
        }
    }

    /// Whether this access names no table.
    pub fn is_tableless(&self) -> bool {
        self.name.is_empty()
    }

    /// `schema.name`, or just the mode for table-less accesses.
    pub fn qualified_name(&self) -> String {
        if self.is_tableless() {
            self.access_mode.to_string()
        } else {
            format!("{}.{}", self.schema, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_parse_is_case_insensitive() {
        assert_eq!("select".parse::<AccessMode>().unwrap(), AccessMode::Select);
        assert_eq!(" Delete ".parse::<AccessMode>().unwrap(), AccessMode::Delete);
        assert_eq!("SYSTEM".parse::<AccessMode>().unwrap(), AccessMode::System);
        assert!("TRUNCATE".parse::<AccessMode>().is_err());
    }

    #[test]
    fn test_access_mode_deserialize() {
        let modes: Vec<AccessMode> = serde_yaml::from_str("[select, INSERT, Update]").unwrap();
        assert_eq!(
            modes,
            vec![AccessMode::Select, AccessMode::Insert, AccessMode::Update]
        );
    }

    #[test]
    fn test_only_select_is_read() {
        assert!(AccessMode::Select.is_read());
        for mode in [
            AccessMode::Insert,
            AccessMode::Update,
            AccessMode::Delete,
            AccessMode::System,
            AccessMode::Invalid,
        ] {
            assert!(!mode.is_read(), "{mode} should not be a read");
        }
    }

    #[test]
    fn test_unqualified_defaults_to_public() {
        let access = TableAccessInfo::unqualified("orders", AccessMode::Select);
        assert_eq!(access.schema, "public");
        assert_eq!(access.qualified_name(), "public.orders");
    }

    #[test]
    fn test_tableless() {
        let access = TableAccessInfo::tableless(AccessMode::System);
        assert!(access.is_tableless());
        assert_eq!(access.schema, "");
        assert_eq!(access.qualified_name(), "SYSTEM");
    }
}
