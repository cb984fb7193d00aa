//! Snapshot split reader
//!
//! Reads one key-range chunk with the low/high-watermark protocol:
//!
//! 1. capture the current log position `L`, emit `LowWatermark(L)`,
//! 2. `SELECT` the chunk rows in key order,
//! 3. capture the current log position `H`, emit `HighWatermark(H)`,
//! 4. replay the bounded log slice `(L, H]` until the end watermark,
//! 5. normalize the buffer and hand the result downstream.
//!
//! The interval `(L, H]` captures exactly the modifications concurrent with
//! the chunk SELECT; applying them to the snapshot yields the chunk state at
//! `H`. A failure in any phase is fatal to the chunk.

use crate::error::{CdcError, Result};
use crate::event::{ChangeRecord, SourceRecord};
use crate::offset::BinlogOffset;
use crate::reader::normalize::normalize_split_records;
use crate::split::SnapshotSplit;
use async_trait::async_trait;
use tracing::debug;

/// Database services a snapshot split reader consumes: a dedicated
/// connection able to probe the log position, select chunk rows, and replay
/// a bounded log slice.
#[async_trait]
pub trait SnapshotConnection: Send {
    /// Current tip of the binary log.
    async fn current_offset(&mut self) -> Result<BinlogOffset>;

    /// Rows of `[split_start, split_end)` in key order as READ records,
    /// fetched `fetch_size` rows per poll.
    async fn fetch_chunk_rows(
        &mut self,
        split: &SnapshotSplit,
        fetch_size: usize,
    ) -> Result<Vec<ChangeRecord>>;

    /// Data events with positions in `(after, until]`, in log order.
    async fn read_binlog_slice(
        &mut self,
        after: &BinlogOffset,
        until: &BinlogOffset,
    ) -> Result<Vec<ChangeRecord>>;
}

/// Per-chunk reader lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    Created,
    Snapshotting,
    WaitingForHighWatermark,
    Normalizing,
    Finished,
}

/// The normalized output of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSplitOutput {
    /// `[Low, normalized records, High]`.
    pub records: Vec<SourceRecord>,
    pub low_watermark: BinlogOffset,
    /// Reported to the enumerator as the chunk's finish offset.
    pub high_watermark: BinlogOffset,
}

/// Executes the watermark protocol for one snapshot split at a time.
pub struct SnapshotSplitReader<C: SnapshotConnection> {
    connection: C,
    fetch_size: usize,
    phase: SnapshotPhase,
}

impl<C: SnapshotConnection> SnapshotSplitReader<C> {
    pub fn new(connection: C, fetch_size: usize) -> Self {
        Self {
            connection,
            fetch_size,
            phase: SnapshotPhase::Created,
        }
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.phase
    }

    /// Read one chunk to completion.
    pub async fn read_split(&mut self, split: &SnapshotSplit) -> Result<SnapshotSplitOutput> {
        self.phase = SnapshotPhase::Snapshotting;
        let low_watermark = self.connection.current_offset().await?;
        debug!(split_id = %split.split_id, low_watermark = %low_watermark, "chunk snapshot started");

        let mut buffer: Vec<SourceRecord> =
            vec![SourceRecord::low_watermark(&split.split_id, low_watermark.clone())];
        let rows = self
            .connection
            .fetch_chunk_rows(split, self.fetch_size)
            .await?;
        let row_count = rows.len();
        buffer.extend(rows.into_iter().map(SourceRecord::Change));

        self.phase = SnapshotPhase::WaitingForHighWatermark;
        let high_watermark = self.connection.current_offset().await?;
        if high_watermark < low_watermark {
            self.phase = SnapshotPhase::Created;
            return Err(CdcError::consistency(format!(
                "high watermark {high_watermark} of split {} precedes low watermark {low_watermark}",
                split.split_id
            )));
        }
        buffer.push(SourceRecord::high_watermark(
            &split.split_id,
            high_watermark.clone(),
        ));

        // Only a strictly advanced log can hold concurrent modifications.
        if high_watermark > low_watermark {
            let slice = self
                .connection
                .read_binlog_slice(&low_watermark, &high_watermark)
                .await?;
            buffer.extend(slice.into_iter().map(SourceRecord::Change));
        }
        buffer.push(SourceRecord::end_watermark(
            &split.split_id,
            high_watermark.clone(),
        ));

        self.phase = SnapshotPhase::Normalizing;
        let records = normalize_split_records(split, buffer)?;
        self.phase = SnapshotPhase::Finished;
        debug!(
            split_id = %split.split_id,
            rows = row_count,
            normalized = records.len().saturating_sub(2),
            high_watermark = %high_watermark,
            "chunk snapshot finished"
        );

        Ok(SnapshotSplitOutput {
            records,
            low_watermark,
            high_watermark,
        })
    }
}
