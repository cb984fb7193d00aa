//! Record normalizer
//!
//! The consistency core. A snapshot split reader produces the buffer
//!
//! ```text
//! [Low] [snapshot READ records] [High] [binlog slice] [End]
//! ```
//!
//! where the binlog slice holds the concurrent modifications committed in
//! `(Low, High]`. Applying the slice to the snapshot rows yields the chunk
//! state as of the high watermark:
//!
//! ```text
//! [Low] [normalized records] [High]
//! ```
//!
//! The binlog split reader later resumes from an offset at or before each
//! chunk's high watermark and suppresses events at-or-before it, so
//! downstream sees every row of the chunk exactly once.

use crate::error::{CdcError, Result};
use crate::event::{ChangeOp, ChangeRecord, SourceRecord};
use crate::key::SplitKey;
use crate::split::SnapshotSplit;
use std::collections::BTreeMap;

/// Normalize a snapshot split buffer into the chunk state at the high
/// watermark.
///
/// Fails fast on a malformed frame (missing or misplaced watermarks), a
/// DELETE for a key the snapshot never saw, or a READ operation inside the
/// log slice — each indicates the consistency protocol was violated.
pub fn normalize_split_records(
    split: &SnapshotSplit,
    records: Vec<SourceRecord>,
) -> Result<Vec<SourceRecord>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let mut records = records.into_iter();
    let low = records.next().expect("nonempty");
    if !low.is_low_watermark() {
        return Err(CdcError::protocol(format!(
            "first record of split {} should be the low watermark signal, but is {low:?}",
            split.split_id
        )));
    }

    // Index the snapshot reads by key. Rows arrive in key order, so key
    // order and insertion order coincide.
    let mut snapshot_reads: BTreeMap<SplitKey, ChangeRecord> = BTreeMap::new();
    let mut high: Option<SourceRecord> = None;
    for record in records.by_ref() {
        if record.is_high_watermark() {
            high = Some(record);
            break;
        }
        match record {
            SourceRecord::Change(change) if change.op == ChangeOp::Read => {
                snapshot_reads.insert(change.key.clone(), change);
            }
            other => {
                return Err(CdcError::protocol(format!(
                    "unexpected record between low and high watermark of split {}: {other:?}",
                    split.split_id
                )));
            }
        }
    }
    let high = high.ok_or_else(|| {
        CdcError::consistency(format!(
            "split {} buffer has no high watermark signal",
            split.split_id
        ))
    })?;

    // Replay the slice in arrival order, upserting into the snapshot.
    let mut replayed: Vec<SourceRecord> = Vec::new();
    let mut reached_end = false;
    for record in records {
        if record.is_end_watermark() {
            reached_end = true;
            break;
        }
        let change = match record {
            SourceRecord::Change(change) => change,
            other => {
                return Err(CdcError::protocol(format!(
                    "unexpected record in binlog slice of split {}: {other:?}",
                    split.split_id
                )));
            }
        };
        // Events outside the chunk range belong to other chunks.
        if !split.contains_key(&change.key) {
            continue;
        }
        match change.op {
            ChangeOp::Create => replayed.push(SourceRecord::Change(change)),
            ChangeOp::Update => {
                // Report the row as observed at the high watermark: drop the
                // stale snapshot read, emit the after image as a READ with
                // the source timestamp.
                snapshot_reads.remove(&change.key);
                replayed.push(SourceRecord::Change(change.into_read()));
            }
            ChangeOp::Delete => {
                if snapshot_reads.remove(&change.key).is_none() {
                    return Err(CdcError::consistency(format!(
                        "delete for key {} does not exist in split {}",
                        change.key, split.split_id
                    )));
                }
            }
            ChangeOp::Read => {
                return Err(CdcError::protocol(format!(
                    "binlog record of split {} must not use the READ operation",
                    split.split_id
                )));
            }
        }
    }
    if !reached_end {
        return Err(CdcError::consistency(format!(
            "split {} buffer has no end watermark signal",
            split.split_id
        )));
    }

    let mut normalized = Vec::with_capacity(2 + replayed.len() + snapshot_reads.len());
    normalized.push(low);
    normalized.extend(replayed);
    normalized.extend(snapshot_reads.into_values().map(SourceRecord::Change));
    normalized.push(high);
    Ok(normalized)
}
