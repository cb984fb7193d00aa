//! Chunk planning
//!
//! Cuts the monitored table into key-range chunks of roughly `chunk_size`
//! rows. Two strategies:
//!
//! - **Numeric fast path**: when the split key is integer-like and the key
//!   space is densely populated, boundaries are computed arithmetically from
//!   `min/max/count` without touching the rows.
//! - **Generic skip-query walk**: repeatedly fetch the next boundary with a
//!   bounded key-skip query. This is the reference path; correctness never
//!   depends on the fast path.
//!
//! The boundary-producing step sits behind [`KeyCursor`] so tests can inject
//! deterministic key sequences without SQL.

use crate::error::{CdcError, Result};
use crate::key::{KeyValue, SplitKey, SplitKeySchema};
use crate::schema::{TableId, TableSchema};
use crate::split::SnapshotSplit;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info};

/// Key-space statistics of the split-key column.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyStatistics {
    /// Smallest key, `None` for an empty table.
    pub min: Option<KeyValue>,
    /// Largest key, `None` for an empty table.
    pub max: Option<KeyValue>,
    /// Row count (an estimate is acceptable).
    pub row_count: u64,
}

/// Produces chunk boundaries from the live key space.
#[async_trait]
pub trait KeyCursor: Send {
    /// `min(pk), max(pk), count(*)` of the monitored table.
    async fn statistics(&mut self) -> Result<KeyStatistics>;

    /// Key of the row at position `offset` (0-based, key order) among rows
    /// with key strictly greater than `after` — all rows when `after` is
    /// `None`. Returns `None` when fewer rows remain.
    async fn next_boundary(
        &mut self,
        after: Option<&SplitKey>,
        offset: usize,
    ) -> Result<Option<SplitKey>>;
}

/// A key space counts as dense when `max - min + 1` is within this factor of
/// the row count; sparser tables fall back to the generic walk.
const DENSE_DISTRIBUTION_BOUND: f64 = 1.05;

/// Plans the snapshot chunks of one table.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    table_id: TableId,
    split_key: SplitKeySchema,
    chunk_size: usize,
    table_schemas: HashMap<TableId, TableSchema>,
}

impl ChunkPlanner {
    pub fn new(
        table_id: TableId,
        split_key: SplitKeySchema,
        chunk_size: usize,
        table_schemas: HashMap<TableId, TableSchema>,
    ) -> Self {
        Self {
            table_id,
            split_key,
            chunk_size: chunk_size.max(1),
            table_schemas,
        }
    }

    /// Plan the chunks covering the whole table key space.
    ///
    /// The first chunk is lower-unbounded and the last upper-unbounded, so
    /// rows inserted outside the observed `[min, max]` during the snapshot
    /// still belong to exactly one chunk.
    pub async fn plan<C: KeyCursor + ?Sized>(&self, cursor: &mut C) -> Result<Vec<SnapshotSplit>> {
        let stats = cursor.statistics().await?;
        debug!(
            table = %self.table_id,
            row_count = stats.row_count,
            "planning snapshot chunks"
        );

        let boundaries = match self.numeric_boundaries(&stats)? {
            Some(boundaries) => boundaries,
            None => self.walk_boundaries(cursor).await?,
        };

        let splits = self.build_splits(boundaries);
        info!(
            table = %self.table_id,
            chunks = splits.len(),
            chunk_size = self.chunk_size,
            "planned snapshot chunks"
        );
        Ok(splits)
    }

    /// Arithmetic boundaries for a densely populated integer key space.
    /// Returns `None` when the fast path does not apply.
    fn numeric_boundaries(&self, stats: &KeyStatistics) -> Result<Option<Vec<SplitKey>>> {
        if !self.split_key.data_type.is_integer_like() {
            return Ok(None);
        }
        let (min, max) = match (&stats.min, &stats.max) {
            (Some(min), Some(max)) => (min, max),
            // Empty table: a single unbounded chunk, no boundaries.
            _ => return Ok(Some(Vec::new())),
        };
        let (min, max) = match (as_i128(min), as_i128(max)) {
            (Some(min), Some(max)) => (min, max),
            _ => return Ok(None),
        };
        if stats.row_count == 0 {
            return Ok(Some(Vec::new()));
        }

        let span = max - min + 1;
        let dense = span as f64 <= stats.row_count as f64 * DENSE_DISTRIBUTION_BOUND;
        if !dense {
            debug!(
                table = %self.table_id,
                span,
                row_count = stats.row_count,
                "key space is sparse, using generic chunking"
            );
            return Ok(None);
        }

        let step = self.chunk_size as i128;
        let mut boundaries = Vec::new();
        let mut boundary = min + step;
        while boundary <= max {
            boundaries.push(SplitKey::single(self.key_from_i128(boundary)?));
            boundary += step;
        }
        Ok(Some(boundaries))
    }

    /// Generic walk: each boundary is the key `chunk_size` rows past the
    /// previous one.
    async fn walk_boundaries<C: KeyCursor + ?Sized>(
        &self,
        cursor: &mut C,
    ) -> Result<Vec<SplitKey>> {
        let mut boundaries = Vec::new();
        let mut last: Option<SplitKey> = None;
        loop {
            let boundary = cursor
                .next_boundary(last.as_ref(), self.chunk_size - 1)
                .await?;
            match boundary {
                Some(boundary) => {
                    if last.as_ref() == Some(&boundary) {
                        return Err(CdcError::invalid_state(format!(
                            "key cursor returned non-advancing boundary {boundary} for {}",
                            self.table_id
                        )));
                    }
                    last = Some(boundary.clone());
                    boundaries.push(boundary);
                }
                // The remaining range is the last chunk.
                None => return Ok(boundaries),
            }
        }
    }

    fn build_splits(&self, boundaries: Vec<SplitKey>) -> Vec<SnapshotSplit> {
        let mut splits = Vec::with_capacity(boundaries.len() + 1);
        let mut start: Option<SplitKey> = None;
        for boundary in boundaries {
            splits.push(self.split(splits.len(), start, Some(boundary.clone())));
            start = Some(boundary);
        }
        splits.push(self.split(splits.len(), start, None));
        splits
    }

    fn split(
        &self,
        index: usize,
        start: Option<SplitKey>,
        end: Option<SplitKey>,
    ) -> SnapshotSplit {
        SnapshotSplit::new(
            self.table_id.clone(),
            format!("{}:{}", self.table_id, index),
            self.split_key.clone(),
            start,
            end,
            self.table_schemas.clone(),
        )
    }

    fn key_from_i128(&self, value: i128) -> Result<KeyValue> {
        use crate::key::KeyDataType;
        match self.split_key.data_type {
            KeyDataType::Integer => i64::try_from(value)
                .map(KeyValue::Int)
                .map_err(|_| CdcError::invalid_state("chunk boundary out of i64 range")),
            KeyDataType::UnsignedInteger => u64::try_from(value)
                .map(KeyValue::UInt)
                .map_err(|_| CdcError::invalid_state("chunk boundary out of u64 range")),
            _ => Err(CdcError::invalid_state(
                "numeric boundary requested for non-integer key",
            )),
        }
    }
}

fn as_i128(value: &KeyValue) -> Option<i128> {
    match value {
        KeyValue::Int(v) => Some(*v as i128),
        KeyValue::UInt(v) => Some(*v as i128),
        _ => None,
    }
}
