//! Source enumerator
//!
//! The planner-side event loop. Single-threaded: every mutation of the
//! assigner happens on the planner thread, either in response to a worker
//! event or on the periodic housekeeping tick.
//!
//! Readers awaiting splits are kept in an ordered set (least reader id
//! first) for deterministic tie-breaks; in particular the binlog split goes
//! to the lowest-numbered awaiting reader.

use crate::assigner::{PendingSplitsState, SnapshotSplitAssigner};
use crate::chunk::KeyCursor;
use crate::config::SourceConfig;
use crate::error::Result;
use crate::events::{PlannerEvent, ReaderId, WorkerEvent};
use crate::split::Split;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// How often the planner re-solicits finish reports while chunks are
/// outstanding.
pub const SYNC_WITH_READERS_INTERVAL: Duration = Duration::from_secs(30);

/// Host-runtime services the enumerator consumes: reader registration and
/// the planner→worker event transport.
pub trait EnumeratorContext {
    /// Readers currently registered with the runtime.
    fn registered_readers(&self) -> Vec<ReaderId>;

    /// Whether `reader` is still registered.
    fn is_reader_registered(&self, reader: ReaderId) -> bool {
        self.registered_readers().contains(&reader)
    }

    /// Hand a split to a reader.
    fn assign_split(&mut self, reader: ReaderId, split: Split);

    /// Send an event to a reader.
    fn send_event(&mut self, reader: ReaderId, event: PlannerEvent);
}

/// Arbitrates worker↔planner events and drives the split assigner.
pub struct SourceEnumerator<C: EnumeratorContext> {
    context: C,
    assigner: SnapshotSplitAssigner,
    readers_awaiting_split: BTreeSet<ReaderId>,
}

impl<C: EnumeratorContext> SourceEnumerator<C> {
    pub fn new(context: C, assigner: SnapshotSplitAssigner) -> Self {
        Self {
            context,
            assigner,
            readers_awaiting_split: BTreeSet::new(),
        }
    }

    /// Validate the configuration and open the assigner (planning chunks on
    /// a fresh start).
    pub async fn start<K: KeyCursor + ?Sized>(
        &mut self,
        config: &SourceConfig,
        cursor: &mut K,
    ) -> Result<()> {
        config.validate()?;
        self.assigner.open(cursor).await
    }

    /// Dispatch one worker event.
    pub fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::SplitRequest { reader } => self.handle_split_request(reader),
            WorkerEvent::FinishReport {
                reader,
                finished_offsets,
            } => {
                info!(
                    reader,
                    splits = finished_offsets.len(),
                    "received finished split offsets"
                );
                let split_ids = self.assigner.on_finished_splits(finished_offsets);
                self.context
                    .send_event(reader, PlannerEvent::FinishAck { split_ids });
                // The binlog split may have become available.
                self.assign_splits();
            }
        }
    }

    fn handle_split_request(&mut self, reader: ReaderId) {
        if !self.context.is_reader_registered(reader) {
            // Reader failed between sending the request and now.
            return;
        }
        self.readers_awaiting_split.insert(reader);
        self.assign_splits();
    }

    /// Splits returned by the runtime after a reader failure.
    pub fn add_splits_back(&mut self, splits: Vec<Split>) {
        debug!(count = splits.len(), "splits added back");
        self.assigner.add_splits(splits);
        self.assign_splits();
    }

    /// Snapshot the assigner state for a checkpoint.
    pub fn snapshot_state(&mut self, checkpoint_id: u64) -> PendingSplitsState {
        self.assigner.snapshot_state(checkpoint_id)
    }

    /// A checkpoint committed; the binlog split may be available now.
    pub fn notify_checkpoint_complete(&mut self, checkpoint_id: u64) {
        self.assigner.notify_checkpoint_complete(checkpoint_id);
        self.assign_splits();
    }

    /// Periodic housekeeping: while chunks are outstanding, tell every
    /// reader to re-report finished but unacked splits. Recovers finish
    /// reports lost across worker restarts.
    pub fn sync_with_readers(&mut self) {
        if !self.assigner.waiting_for_finished_splits() {
            return;
        }
        for reader in self.context.registered_readers() {
            self.context.send_event(reader, PlannerEvent::FinishSolicit);
        }
    }

    fn assign_splits(&mut self) {
        let awaiting: Vec<ReaderId> = self.readers_awaiting_split.iter().copied().collect();
        for reader in awaiting {
            // Drop readers that failed since requesting.
            if !self.context.is_reader_registered(reader) {
                self.readers_awaiting_split.remove(&reader);
                continue;
            }
            match self.assigner.next() {
                Some(split) => {
                    info!(reader, split = %split, "assigning split");
                    self.context.assign_split(reader, split);
                    self.readers_awaiting_split.remove(&reader);
                }
                // No split available right now; keep the rest waiting.
                None => break,
            }
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }
}

/// Messages accepted by the enumerator event loop.
#[derive(Debug)]
pub enum EnumeratorMessage {
    Worker(WorkerEvent),
    SplitsAddback(Vec<Split>),
    SnapshotState {
        checkpoint_id: u64,
        reply: oneshot::Sender<PendingSplitsState>,
    },
    CheckpointComplete(u64),
}

/// Drive an enumerator from an inbox until the channel closes.
///
/// All assigner mutations stay on this task; the 30 s housekeeping timer
/// fires [`SourceEnumerator::sync_with_readers`].
pub async fn run_enumerator<C: EnumeratorContext>(
    mut enumerator: SourceEnumerator<C>,
    mut inbox: mpsc::Receiver<EnumeratorMessage>,
) {
    let start = tokio::time::Instant::now() + SYNC_WITH_READERS_INTERVAL;
    let mut housekeeping = tokio::time::interval_at(start, SYNC_WITH_READERS_INTERVAL);

    loop {
        tokio::select! {
            message = inbox.recv() => {
                let Some(message) = message else {
                    debug!("enumerator inbox closed, stopping");
                    break;
                };
                match message {
                    EnumeratorMessage::Worker(event) => enumerator.handle_worker_event(event),
                    EnumeratorMessage::SplitsAddback(splits) => {
                        enumerator.add_splits_back(splits)
                    }
                    EnumeratorMessage::SnapshotState { checkpoint_id, reply } => {
                        let state = enumerator.snapshot_state(checkpoint_id);
                        if reply.send(state).is_err() {
                            error!(checkpoint_id, "checkpoint requester went away");
                        }
                    }
                    EnumeratorMessage::CheckpointComplete(checkpoint_id) => {
                        enumerator.notify_checkpoint_complete(checkpoint_id)
                    }
                }
            }
            _ = housekeeping.tick() => enumerator.sync_with_readers(),
        }
    }
}
