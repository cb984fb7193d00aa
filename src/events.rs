//! Planner ↔ worker events
//!
//! Everything crossing the planner/worker boundary is serializable; the host
//! runtime owns the transport.

use crate::offset::BinlogOffset;
use crate::split::Split;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a registered reader (worker subtask).
pub type ReaderId = u32;

/// Events sent by a worker to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerEvent {
    /// The worker is idle and wants a split.
    SplitRequest { reader: ReaderId },
    /// High watermarks of chunks the worker finished since its last ack.
    FinishReport {
        reader: ReaderId,
        finished_offsets: BTreeMap<String, BinlogOffset>,
    },
}

impl WorkerEvent {
    pub fn reader(&self) -> ReaderId {
        match self {
            WorkerEvent::SplitRequest { reader } => *reader,
            WorkerEvent::FinishReport { reader, .. } => *reader,
        }
    }
}

/// Events sent by the planner to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerEvent {
    /// A split for the worker to read.
    SplitAssignment(Split),
    /// Splits returned to the worker after a restore.
    SplitAddback(Vec<Split>),
    /// Terminal acknowledgement of finish reports; the worker drops the
    /// acked ids from its retry list.
    FinishAck { split_ids: Vec<String> },
    /// Broadcast when the planner may have missed finish reports; workers
    /// re-report anything finished but unacked.
    FinishSolicit,
}
