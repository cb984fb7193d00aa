//! Worker-side readers
//!
//! A [`SourceWorker`] owns one reader slot: it requests splits from the
//! planner, runs the snapshot split reader for each assigned chunk, and
//! switches to the binlog split reader for the tail. Finished chunks stay in
//! a retry map until the planner acknowledges them, so a dropped report is
//! recovered by the planner's periodic `FinishSolicit`.

mod binlog;
mod normalize;
mod snapshot;

pub use binlog::{collect_binlog_slice, BinlogConnection, BinlogSplitReader};
pub use normalize::normalize_split_records;
pub use snapshot::{SnapshotConnection, SnapshotPhase, SnapshotSplitOutput, SnapshotSplitReader};

use crate::config::SourceConfig;
use crate::error::{CdcError, Result};
use crate::event::SourceRecord;
use crate::events::{PlannerEvent, ReaderId, WorkerEvent};
use crate::offset::BinlogOffset;
use crate::retry::ExponentialBackoff;
use crate::split::{BinlogSplit, SnapshotSplit, Split};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Opens the database connections a worker needs. Each worker owns one SQL
/// connection and one log-tailing session at a time.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Snapshot: SnapshotConnection;
    type Binlog: BinlogConnection;

    async fn snapshot_connection(&self) -> Result<Self::Snapshot>;
    async fn binlog_connection(&self) -> Result<Self::Binlog>;
}

const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(500);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// One parallel reader: processes planner events, reads assigned splits,
/// emits records downstream.
pub struct SourceWorker<F: ConnectionFactory> {
    reader_id: ReaderId,
    factory: F,
    fetch_size: usize,
    connect_max_retries: u32,
    /// Chunks finished but not yet acknowledged by the planner, re-reported
    /// on `FinishSolicit`.
    finished_unacked: BTreeMap<String, BinlogOffset>,
    to_planner: mpsc::Sender<WorkerEvent>,
    output: mpsc::Sender<SourceRecord>,
}

impl<F: ConnectionFactory> SourceWorker<F> {
    pub fn new(
        reader_id: ReaderId,
        factory: F,
        config: &SourceConfig,
        to_planner: mpsc::Sender<WorkerEvent>,
        output: mpsc::Sender<SourceRecord>,
    ) -> Self {
        Self {
            reader_id,
            factory,
            fetch_size: config.fetch_size,
            connect_max_retries: config.connect_max_retries,
            finished_unacked: BTreeMap::new(),
            to_planner,
            output,
        }
    }

    /// Process planner events until the inbox closes.
    ///
    /// A chunk failure propagates out of this method; the host runtime is
    /// expected to return the worker's splits via the enumerator.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<PlannerEvent>) -> Result<()> {
        self.request_split().await?;
        while let Some(event) = inbox.recv().await {
            match event {
                PlannerEvent::SplitAssignment(Split::Snapshot(split)) => {
                    self.read_snapshot_split(&split).await?;
                    self.request_split().await?;
                }
                PlannerEvent::SplitAssignment(Split::Binlog(split)) => {
                    self.read_binlog_split(split, &mut inbox).await?;
                }
                PlannerEvent::SplitAddback(splits) => {
                    // Splits come back through a fresh assignment.
                    debug!(reader = self.reader_id, count = splits.len(), "splits added back");
                }
                PlannerEvent::FinishAck { split_ids } => self.handle_finish_ack(split_ids),
                PlannerEvent::FinishSolicit => self.report_finished().await?,
            }
        }
        Ok(())
    }

    async fn request_split(&mut self) -> Result<()> {
        self.send_to_planner(WorkerEvent::SplitRequest {
            reader: self.reader_id,
        })
        .await
    }

    async fn read_snapshot_split(&mut self, split: &SnapshotSplit) -> Result<()> {
        let mut backoff = ExponentialBackoff::new(RETRY_BACKOFF_BASE, RETRY_BACKOFF_MAX);
        let output = loop {
            match self.try_read_snapshot_split(split).await {
                Ok(output) => break output,
                Err(e) if e.is_retriable() && backoff.attempt() < self.connect_max_retries => {
                    let delay = backoff.next_backoff();
                    warn!(
                        split_id = %split.split_id,
                        attempt = backoff.attempt(),
                        ?delay,
                        error = %e,
                        "snapshot split read failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(split_id = %split.split_id, error = %e, "snapshot split failed");
                    return Err(e);
                }
            }
        };

        for record in output.records {
            if self.output.send(record).await.is_err() {
                return Err(CdcError::invalid_state("downstream output closed"));
            }
        }
        info!(
            reader = self.reader_id,
            split_id = %split.split_id,
            high_watermark = %output.high_watermark,
            "snapshot split complete"
        );
        self.finished_unacked
            .insert(split.split_id.clone(), output.high_watermark);
        self.report_finished().await
    }

    async fn try_read_snapshot_split(
        &mut self,
        split: &SnapshotSplit,
    ) -> Result<SnapshotSplitOutput> {
        let connection = self.factory.snapshot_connection().await?;
        let mut reader = SnapshotSplitReader::new(connection, self.fetch_size);
        reader.read_split(split).await
    }

    async fn read_binlog_split(
        &mut self,
        split: BinlogSplit,
        inbox: &mut mpsc::Receiver<PlannerEvent>,
    ) -> Result<()> {
        let connection = self.factory.binlog_connection().await?;
        let mut reader = BinlogSplitReader::new(connection, split);
        reader.open().await?;
        loop {
            tokio::select! {
                record = reader.poll_next() => {
                    match record? {
                        Some(record) => {
                            if self.output.send(record).await.is_err() {
                                return Err(CdcError::invalid_state("downstream output closed"));
                            }
                        }
                        None => return Ok(()),
                    }
                }
                event = inbox.recv() => {
                    match event {
                        None => return Ok(()),
                        Some(PlannerEvent::FinishAck { split_ids }) => {
                            self.handle_finish_ack(split_ids)
                        }
                        Some(PlannerEvent::FinishSolicit) => self.report_finished().await?,
                        Some(other) => {
                            warn!(reader = self.reader_id, ?other, "unexpected planner event during binlog phase")
                        }
                    }
                }
            }
        }
    }

    /// Report everything finished but unacked. No-op when the map is empty.
    async fn report_finished(&mut self) -> Result<()> {
        if self.finished_unacked.is_empty() {
            return Ok(());
        }
        let event = WorkerEvent::FinishReport {
            reader: self.reader_id,
            finished_offsets: self.finished_unacked.clone(),
        };
        self.send_to_planner(event).await
    }

    fn handle_finish_ack(&mut self, split_ids: Vec<String>) {
        for split_id in split_ids {
            self.finished_unacked.remove(&split_id);
        }
    }

    async fn send_to_planner(&self, event: WorkerEvent) -> Result<()> {
        self.to_planner
            .send(event)
            .await
            .map_err(|_| CdcError::invalid_state("planner event channel closed"))
    }
}
