//! Source records
//!
//! The unit of data flowing out of the readers. A [`SourceRecord`] is either
//! a row change, a schema change, or one of the synthetic watermark signals
//! that frame a chunk's output.

use crate::key::SplitKey;
use crate::offset::BinlogOffset;
use crate::schema::{TableId, TableSchema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row-level operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// Row inserted.
    Create,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
    /// Row observed by a snapshot read.
    Read,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Create => write!(f, "CREATE"),
            ChangeOp::Update => write!(f, "UPDATE"),
            ChangeOp::Delete => write!(f, "DELETE"),
            ChangeOp::Read => write!(f, "READ"),
        }
    }
}

/// A single row-level change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table_id: TableId,
    pub op: ChangeOp,
    /// Primary-key values of the affected row, in split-key order.
    pub key: SplitKey,
    /// Previous row image (UPDATE/DELETE).
    pub before: Option<serde_json::Value>,
    /// Current row image (CREATE/UPDATE/READ).
    pub after: Option<serde_json::Value>,
    /// Position of the event in the binlog; the initial offset for snapshot
    /// reads, which have no log position.
    pub position: BinlogOffset,
    /// Source timestamp, Unix epoch millis.
    pub timestamp_ms: i64,
}

impl ChangeRecord {
    pub fn create(
        table_id: TableId,
        key: SplitKey,
        after: serde_json::Value,
        position: BinlogOffset,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            table_id,
            op: ChangeOp::Create,
            key,
            before: None,
            after: Some(after),
            position,
            timestamp_ms,
        }
    }

    pub fn update(
        table_id: TableId,
        key: SplitKey,
        before: Option<serde_json::Value>,
        after: serde_json::Value,
        position: BinlogOffset,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            table_id,
            op: ChangeOp::Update,
            key,
            before,
            after: Some(after),
            position,
            timestamp_ms,
        }
    }

    pub fn delete(
        table_id: TableId,
        key: SplitKey,
        before: serde_json::Value,
        position: BinlogOffset,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            table_id,
            op: ChangeOp::Delete,
            key,
            before: Some(before),
            after: None,
            position,
            timestamp_ms,
        }
    }

    pub fn read(
        table_id: TableId,
        key: SplitKey,
        after: serde_json::Value,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            table_id,
            op: ChangeOp::Read,
            key,
            before: None,
            after: Some(after),
            position: BinlogOffset::initial(),
            timestamp_ms,
        }
    }

    /// Rewrite this record as a snapshot READ of its after image, keeping the
    /// source position and timestamp. Used by the normalizer to report an
    /// updated row as if it had been observed at the high watermark.
    pub fn into_read(self) -> Self {
        Self {
            op: ChangeOp::Read,
            before: None,
            ..self
        }
    }
}

/// Kind of a synthetic watermark signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkKind {
    /// Log position captured just before the chunk SELECT.
    Low,
    /// Log position captured just after the chunk SELECT.
    High,
    /// The bounded log replay crossed the high watermark; no further events
    /// for this chunk can arrive.
    End,
}

/// A record emitted by a split reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRecord {
    /// Synthetic signal framing a chunk's output.
    Watermark {
        kind: WatermarkKind,
        split_id: String,
        offset: BinlogOffset,
    },
    /// A row-level change.
    Change(ChangeRecord),
    /// A DDL event observed on the log.
    SchemaChange {
        table_id: TableId,
        schema: TableSchema,
        position: BinlogOffset,
    },
}

impl SourceRecord {
    pub fn low_watermark(split_id: impl Into<String>, offset: BinlogOffset) -> Self {
        Self::Watermark {
            kind: WatermarkKind::Low,
            split_id: split_id.into(),
            offset,
        }
    }

    pub fn high_watermark(split_id: impl Into<String>, offset: BinlogOffset) -> Self {
        Self::Watermark {
            kind: WatermarkKind::High,
            split_id: split_id.into(),
            offset,
        }
    }

    pub fn end_watermark(split_id: impl Into<String>, offset: BinlogOffset) -> Self {
        Self::Watermark {
            kind: WatermarkKind::End,
            split_id: split_id.into(),
            offset,
        }
    }

    pub fn is_watermark(&self) -> bool {
        matches!(self, Self::Watermark { .. })
    }

    pub fn watermark_kind(&self) -> Option<WatermarkKind> {
        match self {
            Self::Watermark { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_low_watermark(&self) -> bool {
        self.watermark_kind() == Some(WatermarkKind::Low)
    }

    pub fn is_high_watermark(&self) -> bool {
        self.watermark_kind() == Some(WatermarkKind::High)
    }

    pub fn is_end_watermark(&self) -> bool {
        self.watermark_kind() == Some(WatermarkKind::End)
    }

    pub fn as_change(&self) -> Option<&ChangeRecord> {
        match self {
            Self::Change(record) => Some(record),
            _ => None,
        }
    }
}
