//! In-memory fake database shared by the protocol tests
//!
//! Models a single table with an integer primary key plus its binlog. Rows
//! and log advance together under one lock, so a scripted "concurrent"
//! commit lands inside a chunk's watermark window exactly like a real one.

#![allow(dead_code)]

use async_trait::async_trait;
use mysql_split_cdc::{
    BinlogConnection, BinlogOffset, ChangeRecord, KeyCursor, KeyDataType, KeyStatistics,
    KeyValue, Result, SnapshotConnection, SnapshotSplit, SourceRecord, SplitKey, SplitKeySchema,
    TableId, TableSchema,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const BINLOG_FILE: &str = "mysql-bin.000001";

/// Install the test tracing subscriber once.
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn table() -> TableId {
    TableId::new("shop", "orders")
}

pub fn key_schema() -> SplitKeySchema {
    SplitKeySchema::new("id", KeyDataType::Integer)
}

pub fn table_schemas() -> HashMap<TableId, TableSchema> {
    let mut schemas = HashMap::new();
    schemas.insert(
        table(),
        TableSchema::new(vec!["id".into(), "v".into()], vec!["id".into()]),
    );
    schemas
}

pub fn key(id: i64) -> SplitKey {
    SplitKey::single(KeyValue::Int(id))
}

pub fn row(id: i64, v: &str) -> serde_json::Value {
    serde_json::json!({"id": id, "v": v})
}

/// One table plus its binlog. Positions increase by one per committed event;
/// the tip offset equals the position of the last committed event.
pub struct FakeDb {
    pub rows: BTreeMap<i64, serde_json::Value>,
    pub log: Vec<ChangeRecord>,
    position: u64,
}

impl FakeDb {
    pub fn new(rows: &[(i64, &str)]) -> SharedDb {
        Arc::new(Mutex::new(Self {
            rows: rows.iter().map(|(id, v)| (*id, row(*id, v))).collect(),
            log: Vec::new(),
            position: 4,
        }))
    }

    pub fn tip(&self) -> BinlogOffset {
        BinlogOffset::new(BINLOG_FILE, self.position)
    }

    fn commit_position(&mut self) -> BinlogOffset {
        self.position += 1;
        self.tip()
    }

    /// Commit timestamps advance with the log position so timestamp-based
    /// startup resolution has something to search.
    fn commit_timestamp(position: &BinlogOffset) -> i64 {
        1_000 + position.position as i64
    }

    pub fn insert(&mut self, id: i64, v: &str) {
        let image = row(id, v);
        self.rows.insert(id, image.clone());
        let position = self.commit_position();
        let timestamp_ms = Self::commit_timestamp(&position);
        self.log
            .push(ChangeRecord::create(table(), key(id), image, position, timestamp_ms));
    }

    pub fn update(&mut self, id: i64, v: &str) {
        let before = self.rows.get(&id).cloned();
        let image = row(id, v);
        self.rows.insert(id, image.clone());
        let position = self.commit_position();
        let timestamp_ms = Self::commit_timestamp(&position);
        self.log.push(ChangeRecord::update(
            table(),
            key(id),
            before,
            image,
            position,
            timestamp_ms,
        ));
    }

    pub fn delete(&mut self, id: i64) {
        let before = self.rows.remove(&id).expect("delete of existing row");
        let position = self.commit_position();
        let timestamp_ms = Self::commit_timestamp(&position);
        self.log
            .push(ChangeRecord::delete(table(), key(id), before, position, timestamp_ms));
    }
}

pub type SharedDb = Arc<Mutex<FakeDb>>;

/// Mutations to apply while a given split's chunk SELECT is "running":
/// fired after the rows are read but before the high-watermark probe, so
/// the resulting log events land inside `(low, high]`.
pub type SnapshotHooks = Arc<Mutex<HashMap<String, Box<dyn FnOnce(&mut FakeDb) + Send>>>>;

pub fn no_hooks() -> SnapshotHooks {
    Arc::new(Mutex::new(HashMap::new()))
}

pub fn hooks_with(
    entries: Vec<(&str, Box<dyn FnOnce(&mut FakeDb) + Send>)>,
) -> SnapshotHooks {
    Arc::new(Mutex::new(
        entries
            .into_iter()
            .map(|(id, hook)| (id.to_string(), hook))
            .collect(),
    ))
}

/// Key cursor over the fake table.
pub struct FakeKeyCursor {
    pub db: SharedDb,
}

#[async_trait]
impl KeyCursor for FakeKeyCursor {
    async fn statistics(&mut self) -> Result<KeyStatistics> {
        let db = self.db.lock().unwrap();
        Ok(KeyStatistics {
            min: db.rows.keys().next().map(|id| KeyValue::Int(*id)),
            max: db.rows.keys().next_back().map(|id| KeyValue::Int(*id)),
            row_count: db.rows.len() as u64,
        })
    }

    async fn next_boundary(
        &mut self,
        after: Option<&SplitKey>,
        offset: usize,
    ) -> Result<Option<SplitKey>> {
        let from = match after {
            Some(k) => match k.values()[0] {
                KeyValue::Int(v) => v,
                _ => unreachable!("fake table keys are integers"),
            },
            None => i64::MIN,
        };
        let db = self.db.lock().unwrap();
        Ok(db
            .rows
            .keys()
            .filter(|id| **id > from)
            .nth(offset)
            .map(|id| key(*id)))
    }
}

/// Snapshot connection over the fake database.
pub struct FakeSnapshotConnection {
    pub db: SharedDb,
    pub hooks: SnapshotHooks,
}

#[async_trait]
impl SnapshotConnection for FakeSnapshotConnection {
    async fn current_offset(&mut self) -> Result<BinlogOffset> {
        Ok(self.db.lock().unwrap().tip())
    }

    async fn fetch_chunk_rows(
        &mut self,
        split: &SnapshotSplit,
        _fetch_size: usize,
    ) -> Result<Vec<ChangeRecord>> {
        let rows: Vec<ChangeRecord> = {
            let db = self.db.lock().unwrap();
            db.rows
                .iter()
                .filter(|(id, _)| split.contains_key(&key(**id)))
                .map(|(id, image)| ChangeRecord::read(table(), key(*id), image.clone(), 1_000))
                .collect()
        };
        // A concurrent commit landing inside this chunk's watermark window.
        let hook = self.hooks.lock().unwrap().remove(&split.split_id);
        if let Some(hook) = hook {
            hook(&mut self.db.lock().unwrap());
        }
        Ok(rows)
    }

    async fn read_binlog_slice(
        &mut self,
        after: &BinlogOffset,
        until: &BinlogOffset,
    ) -> Result<Vec<ChangeRecord>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .log
            .iter()
            .filter(|c| c.position.is_after(after) && !c.position.is_after(until))
            .cloned()
            .collect())
    }
}

/// Binlog tail over the fake log. Resuming from offset `x` delivers events
/// strictly after `x`; the stream ends when the scripted log is exhausted.
pub struct FakeBinlogConnection {
    pub db: SharedDb,
    cursor: usize,
    opened: bool,
}

impl FakeBinlogConnection {
    pub fn new(db: SharedDb) -> Self {
        Self {
            db,
            cursor: 0,
            opened: false,
        }
    }
}

#[async_trait]
impl BinlogConnection for FakeBinlogConnection {
    async fn open(&mut self, from: &BinlogOffset) -> Result<()> {
        let db = self.db.lock().unwrap();
        self.cursor = db
            .log
            .iter()
            .position(|c| c.position.is_after(from))
            .unwrap_or(db.log.len());
        self.opened = true;
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<SourceRecord>> {
        assert!(self.opened, "next_record before open");
        let db = self.db.lock().unwrap();
        let record = db.log.get(self.cursor).cloned();
        drop(db);
        if record.is_some() {
            self.cursor += 1;
        }
        Ok(record.map(SourceRecord::Change))
    }

    async fn offset_for_timestamp(&mut self, timestamp_ms: i64) -> Result<BinlogOffset> {
        let db = self.db.lock().unwrap();
        match db.log.iter().find(|c| c.timestamp_ms >= timestamp_ms) {
            Some(first) => Ok(BinlogOffset::new(
                BINLOG_FILE,
                first.position.position.saturating_sub(1),
            )),
            None => Ok(db.tip()),
        }
    }
}

/// Connection factory over the fakes, for worker-level tests.
pub struct FakeConnectionFactory {
    pub db: SharedDb,
    pub hooks: SnapshotHooks,
}

#[async_trait]
impl mysql_split_cdc::ConnectionFactory for FakeConnectionFactory {
    type Snapshot = FakeSnapshotConnection;
    type Binlog = FakeBinlogConnection;

    async fn snapshot_connection(&self) -> Result<FakeSnapshotConnection> {
        Ok(FakeSnapshotConnection {
            db: self.db.clone(),
            hooks: self.hooks.clone(),
        })
    }

    async fn binlog_connection(&self) -> Result<FakeBinlogConnection> {
        Ok(FakeBinlogConnection::new(self.db.clone()))
    }
}

/// Everything a pipeline run produces.
pub struct PipelineRun {
    /// Normalized output of each chunk, in read order.
    pub chunk_outputs: Vec<(String, Vec<SourceRecord>)>,
    /// Events emitted by the binlog tail.
    pub tail: Vec<SourceRecord>,
    pub binlog_split: mysql_split_cdc::BinlogSplit,
}

impl PipelineRun {
    /// All data records downstream observes: normalized chunk records
    /// (watermarks stripped) followed by the tail.
    pub fn downstream(&self) -> Vec<&ChangeRecord> {
        self.chunk_outputs
            .iter()
            .flat_map(|(_, records)| records.iter())
            .chain(self.tail.iter())
            .filter_map(|record| record.as_change())
            .collect()
    }

    /// Replay the downstream stream into a table state.
    pub fn final_state(&self) -> BTreeMap<i64, serde_json::Value> {
        let mut state = BTreeMap::new();
        for change in self.downstream() {
            let id = match change.key.values()[0] {
                KeyValue::Int(v) => v,
                _ => unreachable!(),
            };
            match change.op {
                mysql_split_cdc::ChangeOp::Read
                | mysql_split_cdc::ChangeOp::Create
                | mysql_split_cdc::ChangeOp::Update => {
                    state.insert(id, change.after.clone().expect("after image"));
                }
                mysql_split_cdc::ChangeOp::Delete => {
                    state.remove(&id);
                }
            }
        }
        state
    }
}
