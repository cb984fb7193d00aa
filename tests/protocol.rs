//! End-to-end protocol tests over the in-memory fake database
//!
//! Each test drives the real assigner, snapshot readers, normalizer, and
//! binlog reader; only the database seams are faked.

mod support;

use mysql_split_cdc::{
    BinlogSplitReader, ChangeOp, KeyValue, PlannerEvent, SnapshotSplit, SnapshotSplitAssigner,
    SnapshotSplitReader, SourceConfig, SourceRecord, SourceWorker, Split, WorkerEvent,
};
use std::collections::BTreeMap;
use std::time::Duration;
use support::*;
use tokio::sync::mpsc;

const FETCH_SIZE: usize = 1024;

/// Plan chunks, read each snapshot split (optionally in a caller-chosen
/// order), finish them, checkpoint, then drain the binlog tail.
async fn run_pipeline(
    db: SharedDb,
    hooks: SnapshotHooks,
    chunk_size: usize,
    read_order: Option<Vec<&str>>,
) -> PipelineRun {
    init_test_logging();
    let mut assigner =
        SnapshotSplitAssigner::new(table(), key_schema(), chunk_size, table_schemas());
    assigner
        .open(&mut FakeKeyCursor { db: db.clone() })
        .await
        .unwrap();

    let mut splits: Vec<SnapshotSplit> = Vec::new();
    while let Some(split) = assigner.next() {
        match split {
            Split::Snapshot(split) => splits.push(split),
            Split::Binlog(_) => unreachable!("binlog split before snapshot phase finished"),
        }
    }
    if let Some(order) = read_order {
        splits.sort_by_key(|s| order.iter().position(|id| *id == s.split_id).unwrap());
    }

    let mut chunk_outputs = Vec::new();
    for split in &splits {
        let connection = FakeSnapshotConnection {
            db: db.clone(),
            hooks: hooks.clone(),
        };
        let mut reader = SnapshotSplitReader::new(connection, FETCH_SIZE);
        let output = reader.read_split(split).await.unwrap();

        let mut finished = BTreeMap::new();
        finished.insert(split.split_id.clone(), output.high_watermark.clone());
        let acked = assigner.on_finished_splits(finished);
        assert_eq!(acked, vec![split.split_id.clone()]);

        chunk_outputs.push((split.split_id.clone(), output.records));
    }

    // One completed checkpoint makes the finished set durable.
    assigner.snapshot_state(1);
    assigner.notify_checkpoint_complete(1);
    let binlog_split = match assigner.next() {
        Some(Split::Binlog(split)) => split,
        other => panic!("expected binlog split, got {other:?}"),
    };
    assert!(assigner.next().is_none());

    let mut tail_reader =
        BinlogSplitReader::new(FakeBinlogConnection::new(db.clone()), binlog_split.clone());
    tail_reader.open().await.unwrap();
    let mut tail = Vec::new();
    while let Some(record) = tail_reader.poll_next().await.unwrap() {
        tail.push(record);
    }

    PipelineRun {
        chunk_outputs,
        tail,
        binlog_split,
    }
}

fn reads(records: &[SourceRecord]) -> Vec<(i64, String)> {
    records
        .iter()
        .filter_map(|r| r.as_change())
        .map(|c| {
            let KeyValue::Int(id) = c.key.values()[0] else {
                panic!("integer key expected")
            };
            (
                id,
                c.after.as_ref().unwrap()["v"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn s1_trivial_snapshot_no_concurrent_writes() {
    let db = FakeDb::new(&[(1, "a"), (2, "b"), (3, "c")]);
    let run = run_pipeline(db, no_hooks(), 2, None).await;

    // chunkSize=2 over keys {1,2,3} → chunks (-inf, 3) and [3, +inf).
    assert_eq!(run.chunk_outputs.len(), 2);
    let (first_id, first) = &run.chunk_outputs[0];
    assert_eq!(first_id, "shop.orders:0");
    assert!(first[0].is_low_watermark());
    assert_eq!(reads(first), vec![(1, "a".into()), (2, "b".into())]);
    assert!(first.last().unwrap().is_high_watermark());

    let (_, second) = &run.chunk_outputs[1];
    assert_eq!(reads(second), vec![(3, "c".into())]);

    // Quiet log: the tail suppresses nothing because there is nothing.
    assert!(run.tail.is_empty());
    assert_eq!(
        run.final_state().keys().copied().collect::<Vec<i64>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn s2_concurrent_update_inside_chunk_window() {
    let db = FakeDb::new(&[(1, "a"), (2, "b"), (3, "c")]);
    let hooks = hooks_with(vec![(
        "shop.orders:0",
        Box::new(|db: &mut FakeDb| db.update(1, "a'")),
    )]);
    let run = run_pipeline(db, hooks, 2, None).await;

    // The chunk output reports the post-update image, not the stale read.
    let (_, first) = &run.chunk_outputs[0];
    let values = reads(first);
    assert!(values.contains(&(1, "a'".into())));
    assert!(!values.contains(&(1, "a".into())));

    // The tail must drop the update event: it is at-or-before the chunk's
    // high watermark and already represented in the normalized output.
    assert!(run.tail.is_empty());

    // No duplicates: key 1 appears exactly once downstream.
    let downstream = run.downstream();
    assert_eq!(
        downstream
            .iter()
            .filter(|c| c.key.values()[0] == KeyValue::Int(1))
            .count(),
        1
    );
    assert_eq!(run.final_state().get(&1).unwrap()["v"], "a'");
}

#[tokio::test]
async fn s3_concurrent_delete_of_unread_row() {
    let db = FakeDb::new(&[(1, "a"), (2, "b"), (3, "c")]);
    let hooks = hooks_with(vec![(
        "shop.orders:0",
        Box::new(|db: &mut FakeDb| db.delete(2)),
    )]);
    let run = run_pipeline(db, hooks, 2, None).await;

    // id=2 is gone from the chunk output and the tail drops the delete.
    let (_, first) = &run.chunk_outputs[0];
    assert_eq!(reads(first), vec![(1, "a".into())]);
    assert!(run.tail.is_empty());

    let state = run.final_state();
    assert!(!state.contains_key(&2));
    assert_eq!(state.keys().copied().collect::<Vec<i64>>(), vec![1, 3]);
}

#[tokio::test]
async fn s4_insert_beyond_chunk_range_flows_through_tail() {
    let db = FakeDb::new(&[(1, "a"), (2, "b"), (3, "c")]);
    // Chunk [3, +inf) is read first; the insert of id=4 happens later,
    // during the snapshot of chunk (-inf, 3).
    let hooks = hooks_with(vec![(
        "shop.orders:0",
        Box::new(|db: &mut FakeDb| db.insert(4, "d")),
    )]);
    let run = run_pipeline(db, hooks, 2, Some(vec!["shop.orders:1", "shop.orders:0"])).await;

    // The range filter keeps id=4 out of chunk (-inf, 3)...
    for (_, records) in &run.chunk_outputs {
        assert!(!reads(records).iter().any(|(id, _)| *id == 4));
    }
    // ...and the tail emits it unchanged: it postdates the high watermark
    // of the finished chunk [3, +inf) that covers its key.
    assert_eq!(run.tail.len(), 1);
    let change = run.tail[0].as_change().unwrap();
    assert_eq!(change.op, ChangeOp::Create);
    assert_eq!(change.key, key(4));

    let state = run.final_state();
    assert_eq!(state.keys().copied().collect::<Vec<i64>>(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn s5_worker_loss_mid_chunk_produces_no_duplicates() {
    let db = FakeDb::new(&[(1, "a"), (2, "b"), (3, "c")]);
    let mut assigner = SnapshotSplitAssigner::new(table(), key_schema(), 2, table_schemas());
    assigner
        .open(&mut FakeKeyCursor { db: db.clone() })
        .await
        .unwrap();

    // The first worker receives chunk 0 and dies before reading it.
    let lost = assigner.next().unwrap();
    assert_eq!(lost.split_id(), "shop.orders:0");
    assigner.add_splits(vec![lost.clone()]);

    // Another worker picks it up; the chunk is read exactly once.
    let retried = assigner.next().unwrap();
    assert_eq!(retried.split_id(), "shop.orders:0");
    let split = retried.as_snapshot().unwrap();
    let connection = FakeSnapshotConnection {
        db: db.clone(),
        hooks: no_hooks(),
    };
    let mut reader = SnapshotSplitReader::new(connection, FETCH_SIZE);
    let output = reader.read_split(split).await.unwrap();
    assert_eq!(reads(&output.records), vec![(1, "a".into()), (2, "b".into())]);
}

#[tokio::test]
async fn s6_lost_finish_report_recovers_via_resolicitation() {
    let db = FakeDb::new(&[(1, "a"), (2, "b")]);
    let mut assigner = SnapshotSplitAssigner::new(table(), key_schema(), 2, table_schemas());
    assigner
        .open(&mut FakeKeyCursor { db: db.clone() })
        .await
        .unwrap();

    let split = assigner.next().unwrap();
    let split_id = split.split_id().to_string();
    let connection = FakeSnapshotConnection {
        db: db.clone(),
        hooks: no_hooks(),
    };
    let mut reader = SnapshotSplitReader::new(connection, FETCH_SIZE);
    let output = reader
        .read_split(split.as_snapshot().unwrap())
        .await
        .unwrap();

    // First report is dropped in transit; the planner's re-solicitation
    // makes the worker report again. The assigner must dedupe on split id.
    let mut report = BTreeMap::new();
    report.insert(split_id.clone(), output.high_watermark.clone());
    assert!(assigner.waiting_for_finished_splits());
    assigner.on_finished_splits(report.clone());
    assigner.on_finished_splits(report);

    assigner.snapshot_state(1);
    assigner.notify_checkpoint_complete(1);
    let binlog = assigner.next().unwrap();
    let binlog = binlog.as_binlog().unwrap();
    // Exactly one finished chunk despite the duplicate report.
    assert_eq!(binlog.finished_chunks.len(), 1);
    assert_eq!(binlog.start_offset, output.high_watermark);
}

#[tokio::test]
async fn invariant_monotone_watermarks_and_safe_resume() {
    let db = FakeDb::new(&[(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")]);
    let hooks = hooks_with(vec![
        ("shop.orders:0", Box::new(|db: &mut FakeDb| db.update(1, "x"))),
        ("shop.orders:1", Box::new(|db: &mut FakeDb| db.update(3, "y"))),
    ]);
    let run = run_pipeline(db, hooks, 2, None).await;

    // Monotone watermarks: every chunk frame satisfies low <= high.
    for (_, records) in &run.chunk_outputs {
        let SourceRecord::Watermark { offset: low, .. } = &records[0] else {
            panic!("missing low watermark")
        };
        let SourceRecord::Watermark { offset: high, .. } = records.last().unwrap() else {
            panic!("missing high watermark")
        };
        assert!(low <= high);
    }

    // Safe resume: the tail starts at the minimum high watermark.
    let min_high = run
        .binlog_split
        .finished_chunks
        .iter()
        .map(|c| c.high_watermark.clone())
        .min()
        .unwrap();
    assert_eq!(run.binlog_split.start_offset, min_high);
}

#[tokio::test]
async fn invariant_no_duplicates_and_completeness_under_churn() {
    let db = FakeDb::new(&[(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e"), (6, "f")]);
    // Concurrent churn across several chunk windows.
    let hooks = hooks_with(vec![
        (
            "shop.orders:0",
            Box::new(|db: &mut FakeDb| {
                db.update(1, "a2");
                db.delete(2);
            }),
        ),
        (
            "shop.orders:1",
            Box::new(|db: &mut FakeDb| {
                db.insert(7, "g");
                db.update(6, "f2");
            }),
        ),
    ]);
    let run = run_pipeline(db.clone(), hooks, 2, None).await;

    // No duplicates: for every emitted tail event whose key lies in some
    // finished chunk's range, the position is strictly after that chunk's
    // high watermark.
    for record in &run.tail {
        let Some(change) = record.as_change() else {
            continue;
        };
        for chunk in &run.binlog_split.finished_chunks {
            if chunk.covers(&change.table_id, &change.key) {
                assert!(change.position.is_after(&chunk.high_watermark));
            }
        }
    }

    // Completeness: replaying the downstream stream reproduces the table
    // state at the end of the log.
    let expected = db.lock().unwrap().rows.clone();
    assert_eq!(run.final_state(), expected);

    // Each surviving key has exactly one terminal record per position; no
    // key is observed twice at the same position.
    let mut seen = std::collections::HashSet::new();
    for change in run.downstream() {
        assert!(seen.insert((change.key.clone(), change.position.clone(), change.op)));
    }
}

#[tokio::test]
async fn worker_and_planner_complete_the_protocol_over_channels() {
    init_test_logging();
    let db = FakeDb::new(&[(1, "a"), (2, "b"), (3, "c")]);
    let mut assigner = SnapshotSplitAssigner::new(table(), key_schema(), 2, table_schemas());
    assigner
        .open(&mut FakeKeyCursor { db: db.clone() })
        .await
        .unwrap();

    let (to_planner, mut planner_rx) = mpsc::channel(16);
    let (output_tx, mut output_rx) = mpsc::channel(256);
    let (inbox_tx, inbox_rx) = mpsc::channel(16);
    let config = SourceConfig::new("localhost", "repl", "shop", "orders").with_chunk_size(2);
    let worker = SourceWorker::new(
        0,
        FakeConnectionFactory {
            db: db.clone(),
            hooks: no_hooks(),
        },
        &config,
        to_planner,
        output_tx,
    );
    let worker_task = tokio::spawn(worker.run(inbox_rx));

    // Scripted planner side: assign on request, ack on report, release the
    // binlog split once a checkpoint commits the finished set.
    let mut checkpoint_id = 0u64;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), planner_rx.recv())
            .await
            .expect("planner event")
            .expect("worker alive");
        match event {
            WorkerEvent::SplitRequest { .. } => match assigner.next() {
                Some(split) => {
                    let is_binlog = !split.is_snapshot();
                    inbox_tx
                        .send(PlannerEvent::SplitAssignment(split))
                        .await
                        .unwrap();
                    if is_binlog {
                        break;
                    }
                }
                None => {}
            },
            WorkerEvent::FinishReport {
                finished_offsets, ..
            } => {
                let split_ids = assigner.on_finished_splits(finished_offsets);
                inbox_tx
                    .send(PlannerEvent::FinishAck { split_ids })
                    .await
                    .unwrap();
                checkpoint_id += 1;
                assigner.snapshot_state(checkpoint_id);
                assigner.notify_checkpoint_complete(checkpoint_id);
                // The binlog split may have become available; the worker's
                // next request will pick it up.
                if let Some(split) = assigner.next() {
                    let is_binlog = !split.is_snapshot();
                    inbox_tx
                        .send(PlannerEvent::SplitAssignment(split))
                        .await
                        .unwrap();
                    if is_binlog {
                        break;
                    }
                }
            }
        }
    }

    // Closing the inbox ends the worker after the (empty) tail drains.
    drop(inbox_tx);
    worker_task.await.unwrap().unwrap();

    let mut rows = BTreeMap::new();
    while let Some(record) = output_rx.recv().await {
        if let Some(change) = record.as_change() {
            let KeyValue::Int(id) = change.key.values()[0] else {
                panic!()
            };
            rows.insert(id, change.after.clone().unwrap());
        }
    }
    assert_eq!(rows.keys().copied().collect::<Vec<i64>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn timestamp_startup_resolves_through_the_log_client() {
    use mysql_split_cdc::BinlogConnection;

    let db = FakeDb::new(&[]);
    {
        let mut db = db.lock().unwrap();
        db.insert(1, "a"); // position 5, commit ts 1005
        db.insert(2, "b"); // position 6, commit ts 1006
        db.insert(3, "c"); // position 7, commit ts 1007
    }

    // Resolving a mid-log timestamp yields an offset whose tail starts at
    // the first event committed at or after it.
    let mut binlog = FakeBinlogConnection::new(db.clone());
    let offset = binlog.offset_for_timestamp(1_006).await.unwrap();
    binlog.open(&offset).await.unwrap();
    let mut keys = Vec::new();
    while let Some(record) = binlog.next_record().await.unwrap() {
        let change = record.as_change().unwrap();
        let KeyValue::Int(id) = change.key.values()[0] else {
            panic!()
        };
        assert!(change.timestamp_ms >= 1_006);
        keys.push(id);
    }
    assert_eq!(keys, vec![2, 3]);

    // A timestamp past the end of the log resolves to the tip: an empty tail.
    let mut binlog = FakeBinlogConnection::new(db.clone());
    let offset = binlog.offset_for_timestamp(10_000).await.unwrap();
    assert_eq!(offset, db.lock().unwrap().tip());
    binlog.open(&offset).await.unwrap();
    assert!(binlog.next_record().await.unwrap().is_none());
}

#[tokio::test]
async fn invariant_chunk_coverage_is_exact() {
    let db = FakeDb::new(&[(10, "a"), (20, "b"), (30, "c"), (40, "d"), (50, "e")]);
    let mut assigner = SnapshotSplitAssigner::new(table(), key_schema(), 2, table_schemas());
    assigner
        .open(&mut FakeKeyCursor { db: db.clone() })
        .await
        .unwrap();

    let mut splits = Vec::new();
    while let Some(split) = assigner.next() {
        splits.push(split.as_snapshot().unwrap().clone());
    }

    // Pairwise-disjoint, contiguous, unbounded at both ends.
    assert!(splits[0].split_start.is_none());
    assert!(splits.last().unwrap().split_end.is_none());
    for pair in splits.windows(2) {
        assert_eq!(pair[0].split_end, pair[1].split_start);
    }
    // Every key is covered by exactly one chunk.
    for id in [i64::MIN, 10, 15, 20, 35, 50, i64::MAX] {
        let covering = splits.iter().filter(|s| s.contains_key(&key(id))).count();
        assert_eq!(covering, 1, "key {id} covered by {covering} chunks");
    }
}
