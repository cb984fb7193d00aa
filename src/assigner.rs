//! Snapshot split assigner
//!
//! Owns the lifecycle of every chunk: `remaining` (not yet assigned),
//! `assigned` (out with a worker), `finished` (high watermark reported).
//! The binlog split is emitted only after every finished chunk has been made
//! durable by at least one completed checkpoint, so a restore can never lose
//! the watermarks the tail reader depends on.

use crate::chunk::{ChunkPlanner, KeyCursor};
use crate::error::{CdcError, Result};
use crate::key::SplitKeySchema;
use crate::offset::{BinlogOffset, StopOffset};
use crate::schema::{TableId, TableSchema};
use crate::split::{BinlogSplit, FinishedChunkInfo, SnapshotSplit, Split, BINLOG_SPLIT_ID};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Checkpointed assigner state.
///
/// Serialized with a leading version tag; restores refuse unknown versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSplitsState {
    pub version: u32,
    pub remaining: Vec<SnapshotSplit>,
    pub assigned: Vec<SnapshotSplit>,
    pub finished: Vec<SnapshotSplit>,
    pub binlog_split_emitted: bool,
    pub table_schemas: HashMap<TableId, TableSchema>,
}

impl PendingSplitsState {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CdcError::serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let state: Self = serde_json::from_slice(bytes)
            .map_err(|e| CdcError::serialization(e.to_string()))?;
        if state.version != Self::CURRENT_VERSION {
            return Err(CdcError::serialization(format!(
                "unsupported checkpoint state version {}",
                state.version
            )));
        }
        Ok(state)
    }
}

/// Plans snapshot chunks and arbitrates the snapshot → tail phase transition.
pub struct SnapshotSplitAssigner {
    table_id: TableId,
    split_key: SplitKeySchema,
    chunk_size: usize,
    table_schemas: HashMap<TableId, TableSchema>,

    remaining: VecDeque<SnapshotSplit>,
    assigned: HashMap<String, SnapshotSplit>,
    /// Finished chunks with their high watermark set, keyed by split id.
    finished: BTreeMap<String, SnapshotSplit>,

    /// Finished split ids recorded by a not-yet-completed checkpoint,
    /// keyed by checkpoint id.
    checkpoint_pending: BTreeMap<u64, Vec<String>>,
    /// Finished split ids committed by at least one completed checkpoint.
    durable_finished: BTreeSet<String>,

    binlog_split_emitted: bool,
    planned: bool,
}

impl SnapshotSplitAssigner {
    /// Assigner for a fresh job; chunks are planned lazily on [`open`].
    ///
    /// [`open`]: Self::open
    pub fn new(
        table_id: TableId,
        split_key: SplitKeySchema,
        chunk_size: usize,
        table_schemas: HashMap<TableId, TableSchema>,
    ) -> Self {
        Self {
            table_id,
            split_key,
            chunk_size,
            table_schemas,
            remaining: VecDeque::new(),
            assigned: HashMap::new(),
            finished: BTreeMap::new(),
            checkpoint_pending: BTreeMap::new(),
            durable_finished: BTreeSet::new(),
            binlog_split_emitted: false,
            planned: false,
        }
    }

    /// Assigner restored from a completed checkpoint.
    ///
    /// Splits that were assigned at checkpoint time return to `remaining`:
    /// workers re-request their splits after a restore, and a re-read chunk
    /// replaces rather than duplicates its output. Finished chunks restored
    /// from a completed checkpoint are durable by definition.
    pub fn from_state(
        table_id: TableId,
        split_key: SplitKeySchema,
        chunk_size: usize,
        state: PendingSplitsState,
    ) -> Self {
        let mut remaining: VecDeque<SnapshotSplit> = state.remaining.into();
        remaining.extend(state.assigned);

        let finished: BTreeMap<String, SnapshotSplit> = state
            .finished
            .into_iter()
            .map(|s| (s.split_id.clone(), s))
            .collect();
        let durable_finished = finished.keys().cloned().collect();

        Self {
            table_id,
            split_key,
            chunk_size,
            table_schemas: state.table_schemas,
            remaining,
            assigned: HashMap::new(),
            finished,
            checkpoint_pending: BTreeMap::new(),
            durable_finished,
            binlog_split_emitted: state.binlog_split_emitted,
            planned: true,
        }
    }

    /// Idempotent; plans chunks on first call unless state was restored.
    pub async fn open<C: KeyCursor + ?Sized>(&mut self, cursor: &mut C) -> Result<()> {
        if self.planned {
            return Ok(());
        }
        let planner = ChunkPlanner::new(
            self.table_id.clone(),
            self.split_key.clone(),
            self.chunk_size,
            self.table_schemas.clone(),
        );
        self.remaining = planner.plan(cursor).await?.into();
        self.planned = true;
        Ok(())
    }

    /// Next split to hand out, if any.
    ///
    /// Snapshot chunks drain first. Once none remain outstanding and every
    /// finished chunk is durable, the binlog split is produced exactly once;
    /// afterwards this returns `None`.
    pub fn next(&mut self) -> Option<Split> {
        if let Some(split) = self.remaining.pop_front() {
            debug!(split_id = %split.split_id, "assigning snapshot split");
            self.assigned.insert(split.split_id.clone(), split.clone());
            return Some(Split::Snapshot(split));
        }

        if self.binlog_split_emitted
            || !self.planned
            || self.finished.is_empty()
            || !self.assigned.is_empty()
            || !self.all_finished_durable()
        {
            return None;
        }

        let split = self.create_binlog_split();
        self.binlog_split_emitted = true;
        info!(
            start_offset = %split.start_offset,
            chunks = split.finished_chunks.len(),
            "all snapshot splits finished, emitting binlog split"
        );
        Some(Split::Binlog(split))
    }

    /// Record reported high watermarks, moving chunks from `assigned` to
    /// `finished`. Returns the split ids to acknowledge.
    ///
    /// Re-reports of already-finished chunks are acknowledged without any
    /// state change, making the report/ack cycle idempotent.
    pub fn on_finished_splits(
        &mut self,
        finished_offsets: BTreeMap<String, BinlogOffset>,
    ) -> Vec<String> {
        let mut acked = Vec::with_capacity(finished_offsets.len());
        for (split_id, high_watermark) in finished_offsets {
            if let Some(split) = self.assigned.remove(&split_id) {
                debug!(split_id = %split_id, high_watermark = %high_watermark, "snapshot split finished");
                self.finished
                    .insert(split_id.clone(), split.with_high_watermark(high_watermark));
            } else if !self.finished.contains_key(&split_id) {
                warn!(split_id = %split_id, "finish report for unknown split, acking anyway");
            }
            acked.push(split_id);
        }
        acked
    }

    /// Return splits a lost worker was holding.
    pub fn add_splits(&mut self, splits: Vec<Split>) {
        for split in splits {
            match split {
                Split::Snapshot(split) => {
                    if self.finished.contains_key(&split.split_id) {
                        warn!(split_id = %split.split_id, "ignoring add-back of finished split");
                        continue;
                    }
                    debug!(split_id = %split.split_id, "snapshot split returned to remaining");
                    self.assigned.remove(&split.split_id);
                    self.remaining.push_back(split);
                }
                Split::Binlog(split) => {
                    debug!(split_id = %split.split_id, "binlog split returned");
                    self.binlog_split_emitted = false;
                }
            }
        }
    }

    /// Snapshot the assigner state for checkpoint `checkpoint_id`.
    pub fn snapshot_state(&mut self, checkpoint_id: u64) -> PendingSplitsState {
        let newly_finished: Vec<String> = self
            .finished
            .keys()
            .filter(|id| !self.durable_finished.contains(*id))
            .cloned()
            .collect();
        if !newly_finished.is_empty() {
            self.checkpoint_pending.insert(checkpoint_id, newly_finished);
        }

        PendingSplitsState {
            version: PendingSplitsState::CURRENT_VERSION,
            remaining: self.remaining.iter().cloned().collect(),
            assigned: self.assigned.values().cloned().collect(),
            finished: self.finished.values().cloned().collect(),
            binlog_split_emitted: self.binlog_split_emitted,
            table_schemas: self.table_schemas.clone(),
        }
    }

    /// Mark every finished chunk recorded by checkpoint `checkpoint_id` (or
    /// an earlier one) as durable.
    pub fn notify_checkpoint_complete(&mut self, checkpoint_id: u64) {
        let completed: Vec<u64> = self
            .checkpoint_pending
            .range(..=checkpoint_id)
            .map(|(id, _)| *id)
            .collect();
        for id in completed {
            if let Some(split_ids) = self.checkpoint_pending.remove(&id) {
                self.durable_finished.extend(split_ids);
            }
        }
    }

    /// True while finish reports may still be outstanding; drives the
    /// enumerator's periodic re-solicitation.
    pub fn waiting_for_finished_splits(&self) -> bool {
        !self.assigned.is_empty() || !self.remaining.is_empty()
    }

    /// Whether the binlog split has been handed out.
    pub fn is_binlog_split_emitted(&self) -> bool {
        self.binlog_split_emitted
    }

    fn all_finished_durable(&self) -> bool {
        self.finished
            .keys()
            .all(|id| self.durable_finished.contains(id))
    }

    fn create_binlog_split(&self) -> BinlogSplit {
        let finished_chunks: Vec<FinishedChunkInfo> =
            self.finished.values().map(FinishedChunkInfo::from_split).collect();
        // Earliest safe resume point over all finished chunks.
        let start_offset = finished_chunks
            .iter()
            .map(|info| &info.high_watermark)
            .min()
            .cloned()
            .unwrap_or_else(BinlogOffset::initial);

        BinlogSplit {
            split_id: BINLOG_SPLIT_ID.to_string(),
            split_key: self.split_key.clone(),
            start_offset,
            stop_offset: StopOffset::Never,
            finished_chunks,
            table_schemas: self.table_schemas.clone(),
        }
    }
}
