//! Table identity and captured schema
//!
//! Splits carry the schema of their table as observed at chunk-planning time;
//! the binlog reader keeps its own copy updated from schema-change events.

use crate::error::CdcError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Identity of a monitored table: `(database, table)`.
///
/// Serializes as the qualified name `"database.table"` so it can key JSON
/// maps in events and checkpoint state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId {
    pub database: String,
    pub table: String,
}

impl TableId {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

impl FromStr for TableId {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (database, table) = s
            .split_once('.')
            .ok_or_else(|| CdcError::serialization(format!("invalid table id: {s:?}")))?;
        Ok(Self::new(database, table))
    }
}

impl Serialize for TableId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TableId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Schema of a table as captured when its chunks were planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Column names in ordinal order.
    pub columns: Vec<String>,
    /// Primary key column names.
    pub primary_key: Vec<String>,
    /// Originating DDL, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddl: Option<String>,
}

impl TableSchema {
    pub fn new(columns: Vec<String>, primary_key: Vec<String>) -> Self {
        Self {
            columns,
            primary_key,
            ddl: None,
        }
    }

    pub fn with_ddl(mut self, ddl: impl Into<String>) -> Self {
        self.ddl = Some(ddl.into());
        self
    }
}
