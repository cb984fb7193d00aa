//! Split model
//!
//! A split is the unit of work handed from the enumerator to a worker:
//! either a key-range chunk of a table snapshot, or the singleton binlog
//! split that tails the log once every chunk is finished.

use crate::key::{range_contains, SplitKey, SplitKeySchema};
use crate::offset::{BinlogOffset, StopOffset};
use crate::schema::{TableId, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Split id of the singleton binlog split.
pub const BINLOG_SPLIT_ID: &str = "binlog-split";

/// A key-range chunk of a table scheduled for independent snapshot reading.
///
/// The chunk covers `[split_start, split_end)`; `None` bounds mark the
/// lower-unbounded first chunk and the upper-unbounded last chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSplit {
    /// Unique within the job: `"<database>.<table>:<index>"`.
    pub split_id: String,
    pub table_id: TableId,
    pub split_key: SplitKeySchema,
    pub split_start: Option<SplitKey>,
    pub split_end: Option<SplitKey>,
    /// Set once the snapshot read of this chunk finished.
    pub high_watermark: Option<BinlogOffset>,
    /// Table schemas captured when the chunk was planned.
    pub table_schemas: HashMap<TableId, TableSchema>,
}

impl SnapshotSplit {
    pub fn new(
        table_id: TableId,
        split_id: impl Into<String>,
        split_key: SplitKeySchema,
        split_start: Option<SplitKey>,
        split_end: Option<SplitKey>,
        table_schemas: HashMap<TableId, TableSchema>,
    ) -> Self {
        Self {
            split_id: split_id.into(),
            table_id,
            split_key,
            split_start,
            split_end,
            high_watermark: None,
            table_schemas,
        }
    }

    /// Whether `key` falls inside this chunk's range.
    pub fn contains_key(&self, key: &SplitKey) -> bool {
        range_contains(key, self.split_start.as_ref(), self.split_end.as_ref())
    }

    /// A chunk is finished once its snapshot read completed and recorded the
    /// high watermark.
    pub fn is_snapshot_read_finished(&self) -> bool {
        self.high_watermark.is_some()
    }

    pub fn with_high_watermark(mut self, high_watermark: BinlogOffset) -> Self {
        self.high_watermark = Some(high_watermark);
        self
    }
}

impl fmt::Display for SnapshotSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_bound = |b: &Option<SplitKey>| match b {
            Some(k) => k.to_string(),
            None => "unbounded".to_string(),
        };
        write!(
            f,
            "SnapshotSplit{{id={}, table={}, range=[{}, {})}}",
            self.split_id,
            self.table_id,
            fmt_bound(&self.split_start),
            fmt_bound(&self.split_end),
        )
    }
}

/// Per-chunk information the binlog reader needs to suppress events that a
/// finished chunk already materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedChunkInfo {
    pub table_id: TableId,
    pub split_id: String,
    pub split_start: Option<SplitKey>,
    pub split_end: Option<SplitKey>,
    pub high_watermark: BinlogOffset,
}

impl FinishedChunkInfo {
    /// Build from a finished snapshot split.
    ///
    /// Panics in debug builds if the split has no high watermark; callers
    /// only pass finished splits.
    pub fn from_split(split: &SnapshotSplit) -> Self {
        debug_assert!(split.is_snapshot_read_finished());
        Self {
            table_id: split.table_id.clone(),
            split_id: split.split_id.clone(),
            split_start: split.split_start.clone(),
            split_end: split.split_end.clone(),
            high_watermark: split
                .high_watermark
                .clone()
                .unwrap_or_else(BinlogOffset::initial),
        }
    }

    /// Whether this chunk's range covers `key` of `table_id`.
    pub fn covers(&self, table_id: &TableId, key: &SplitKey) -> bool {
        &self.table_id == table_id
            && range_contains(key, self.split_start.as_ref(), self.split_end.as_ref())
    }
}

/// The singleton split that tails the binlog after all chunks finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinlogSplit {
    pub split_id: String,
    pub split_key: SplitKeySchema,
    /// Earliest safe resume point: `min(high watermark)` over all finished
    /// chunks.
    pub start_offset: BinlogOffset,
    #[serde(default)]
    pub stop_offset: StopOffset,
    /// One entry per snapshotted chunk, consulted for duplicate suppression.
    pub finished_chunks: Vec<FinishedChunkInfo>,
    pub table_schemas: HashMap<TableId, TableSchema>,
}

impl fmt::Display for BinlogSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BinlogSplit{{id={}, start={}, stop={}, chunks={}}}",
            self.split_id,
            self.start_offset,
            self.stop_offset,
            self.finished_chunks.len(),
        )
    }
}

/// The unit of work assigned to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Snapshot(SnapshotSplit),
    Binlog(BinlogSplit),
}

impl Split {
    pub fn split_id(&self) -> &str {
        match self {
            Split::Snapshot(s) => &s.split_id,
            Split::Binlog(s) => &s.split_id,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self, Split::Snapshot(_))
    }

    pub fn as_snapshot(&self) -> Option<&SnapshotSplit> {
        match self {
            Split::Snapshot(s) => Some(s),
            Split::Binlog(_) => None,
        }
    }

    pub fn as_binlog(&self) -> Option<&BinlogSplit> {
        match self {
            Split::Binlog(s) => Some(s),
            Split::Snapshot(_) => None,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Snapshot(s) => s.fmt(f),
            Split::Binlog(s) => s.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyDataType, KeyValue};

    fn table() -> TableId {
        TableId::new("shop", "orders")
    }

    fn key_schema() -> SplitKeySchema {
        SplitKeySchema::new("id", KeyDataType::Integer)
    }

    fn k(v: i64) -> SplitKey {
        SplitKey::single(KeyValue::Int(v))
    }

    fn chunk(id: u32, start: Option<i64>, end: Option<i64>) -> SnapshotSplit {
        SnapshotSplit::new(
            table(),
            format!("shop.orders:{id}"),
            key_schema(),
            start.map(k),
            end.map(k),
            HashMap::new(),
        )
    }

    #[test]
    fn test_contains_key() {
        let first = chunk(0, None, Some(3));
        assert!(first.contains_key(&k(1)));
        assert!(first.contains_key(&k(2)));
        assert!(!first.contains_key(&k(3)));

        let last = chunk(1, Some(3), None);
        assert!(last.contains_key(&k(3)));
        assert!(last.contains_key(&k(1000)));
        assert!(!last.contains_key(&k(2)));
    }

    #[test]
    fn test_finished_state() {
        let split = chunk(0, None, Some(3));
        assert!(!split.is_snapshot_read_finished());
        let split = split.with_high_watermark(BinlogOffset::new("mysql-bin.000001", 500));
        assert!(split.is_snapshot_read_finished());
    }

    #[test]
    fn test_finished_chunk_covers() {
        let split = chunk(0, Some(3), Some(7))
            .with_high_watermark(BinlogOffset::new("mysql-bin.000001", 500));
        let info = FinishedChunkInfo::from_split(&split);
        assert!(info.covers(&table(), &k(3)));
        assert!(info.covers(&table(), &k(6)));
        assert!(!info.covers(&table(), &k(7)));
        assert!(!info.covers(&TableId::new("shop", "users"), &k(5)));
    }

    #[test]
    fn test_split_serialization_round_trip() {
        let mut schemas = HashMap::new();
        schemas.insert(
            table(),
            TableSchema::new(vec!["id".into(), "v".into()], vec!["id".into()]),
        );
        let split = Split::Snapshot(SnapshotSplit::new(
            table(),
            "shop.orders:0",
            key_schema(),
            None,
            Some(k(3)),
            schemas,
        ));

        let json = serde_json::to_string(&split).unwrap();
        let parsed: Split = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, split);
        assert_eq!(parsed.split_id(), "shop.orders:0");
        assert!(parsed.is_snapshot());
    }

    #[test]
    fn test_binlog_split_default_stop() {
        let split = BinlogSplit {
            split_id: BINLOG_SPLIT_ID.to_string(),
            split_key: key_schema(),
            start_offset: BinlogOffset::new("mysql-bin.000001", 400),
            stop_offset: StopOffset::Never,
            finished_chunks: vec![],
            table_schemas: HashMap::new(),
        };
        let json = serde_json::to_string(&split).unwrap();
        let parsed: BinlogSplit = serde_json::from_str(&json).unwrap();
        assert!(parsed.stop_offset.is_never());
    }
}
