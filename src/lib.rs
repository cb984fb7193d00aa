//! # mysql-split-cdc — parallel-snapshot CDC for MySQL
//!
//! A change-data-capture source that delivers the complete state of a table
//! followed by every subsequent row change as a totally ordered stream of
//! per-row events. Its distinguishing capability is lock-free parallel
//! snapshotting merged with a single binlog tail: the table is cut into
//! key-range chunks, each chunk is snapshotted concurrently on a worker, and
//! the chunk's concurrent binlog activity is stitched in so that downstream
//! observes a stream equivalent to "full snapshot at T₀, then tail from T₀".
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────── planner ───────────────────────────┐
//! │  SourceEnumerator ──► SnapshotSplitAssigner ──► ChunkPlanner │
//! └───────┬──────────────────────────────────────────────▲───────┘
//!   SplitAssignment / FinishAck / FinishSolicit   SplitRequest / FinishReport
//! ┌───────▼──────────────────────────────────────────────┴───────┐
//! │  SourceWorker                                                │
//! │    SnapshotSplitReader   [Low] rows [High] slice [End]       │
//! │         └─► normalize_split_records ─► downstream            │
//! │    BinlogSplitReader     tail + per-chunk suppression        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each snapshot chunk is framed by a low/high watermark pair; the log slice
//! between them is replayed onto the snapshot rows so the chunk output is
//! the state at its high watermark. The binlog split then starts from the
//! minimum high watermark and suppresses events a finished chunk already
//! materialized, giving exactly-once delivery without table locks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> anyhow::Result<()> {
//! use mysql_split_cdc::config::SourceConfig;
//! use mysql_split_cdc::mysql::{self, MySqlKeyCursor};
//!
//! let config = SourceConfig::new("localhost", "repl", "shop", "orders")
//!     .with_password("secret")
//!     .with_server_id("5400-5408".parse()?)
//!     .with_chunk_size(8096);
//! config.validate()?;
//!
//! let pool = mysql::build_pool(&config);
//! let split_key =
//!     mysql::discover_split_key(&pool, config.connect_timeout, &config.table_id()).await?;
//! let mut cursor = MySqlKeyCursor::new(
//!     pool,
//!     config.connect_timeout,
//!     config.table_id(),
//!     split_key,
//! );
//! # Ok(())
//! # }
//! ```

pub mod assigner;
pub mod chunk;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod event;
pub mod events;
pub mod key;
pub mod mysql;
pub mod offset;
pub mod reader;
pub mod retry;
pub mod schema;
pub mod split;

pub use assigner::{PendingSplitsState, SnapshotSplitAssigner};
pub use chunk::{ChunkPlanner, KeyCursor, KeyStatistics};
pub use config::{ServerId, SourceConfig, StartupMode};
pub use enumerator::{
    run_enumerator, EnumeratorContext, EnumeratorMessage, SourceEnumerator,
    SYNC_WITH_READERS_INTERVAL,
};
pub use error::{CdcError, Result};
pub use event::{ChangeOp, ChangeRecord, SourceRecord, WatermarkKind};
pub use events::{PlannerEvent, ReaderId, WorkerEvent};
pub use key::{range_contains, KeyDataType, KeyValue, SplitKey, SplitKeySchema};
pub use offset::{BinlogOffset, StopOffset};
pub use reader::{
    collect_binlog_slice, normalize_split_records, BinlogConnection, BinlogSplitReader,
    ConnectionFactory, SnapshotConnection, SnapshotPhase, SnapshotSplitOutput,
    SnapshotSplitReader, SourceWorker,
};
pub use schema::{TableId, TableSchema};
pub use split::{BinlogSplit, FinishedChunkInfo, SnapshotSplit, Split, BINLOG_SPLIT_ID};
