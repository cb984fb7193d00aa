//! MySQL-backed implementations of the database seams
//!
//! Everything the core consumes as an abstract service — key cursors, chunk
//! row reads, offset probes, schema capture — implemented against a live
//! MySQL-compatible server. Binary-log streaming itself stays pluggable via
//! [`BinlogConnection`](crate::reader::BinlogConnection): the host provides
//! the decoded record stream.

mod connection;
mod cursor;

pub use connection::MySqlSnapshotConnection;
pub use cursor::MySqlKeyCursor;

use crate::config::SourceConfig;
use crate::error::{CdcError, Result};
use crate::key::{KeyDataType, KeyValue, SplitKeySchema};
use crate::offset::BinlogOffset;
use crate::reader::BinlogConnection;
use crate::schema::{TableId, TableSchema};
use mysql_async::prelude::*;
use mysql_async::{Conn, Pool, Row, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Build a connection pool for the configured server.
///
/// Credentials are URL-encoded and the URL never escapes this scope, so it
/// cannot leak through logs.
pub fn build_pool(config: &SourceConfig) -> Pool {
    let user =
        url::form_urlencoded::byte_serialize(config.username.as_bytes()).collect::<String>();
    let password = url::form_urlencoded::byte_serialize(
        config.password.as_deref().unwrap_or("").as_bytes(),
    )
    .collect::<String>();
    let url = format!(
        "mysql://{}:{}@{}:{}/{}",
        user, password, config.hostname, config.port, config.database_name
    );
    Pool::new(url.as_str())
}

/// Acquire a connection, bounding the handshake with `connect_timeout`.
pub(crate) async fn get_conn(pool: &Pool, connect_timeout: Duration) -> Result<Conn> {
    tokio::time::timeout(connect_timeout, pool.get_conn())
        .await
        .map_err(|_| CdcError::timeout(format!("connect timed out after {connect_timeout:?}")))?
        .map_err(|e| CdcError::connection(format!("failed to get connection: {e}")))
}

/// Read the current tip of the binary log.
///
/// Tries `SHOW BINARY LOG STATUS` first (MySQL 8.2+ renamed the statement),
/// falling back to `SHOW MASTER STATUS`.
pub async fn current_binlog_offset(conn: &mut Conn) -> Result<BinlogOffset> {
    let rows: Vec<Row> = match conn.query("SHOW BINARY LOG STATUS").await {
        Ok(rows) => rows,
        Err(_) => conn
            .query("SHOW MASTER STATUS")
            .await
            .map_err(|e| CdcError::connection(format!("failed to read binlog position: {e}")))?,
    };

    let row = rows.into_iter().next().ok_or_else(|| {
        CdcError::connection(
            "SHOW MASTER STATUS returned no rows; binary logging may be disabled",
        )
    })?;
    let filename: String = row.get(0).unwrap_or_default();
    let position: u64 = row.get(1).unwrap_or(4);
    if filename.is_empty() {
        return Err(CdcError::connection(
            "SHOW MASTER STATUS returned an empty filename; binary logging may be disabled",
        ));
    }
    debug!(offset = %BinlogOffset::new(filename.clone(), position), "probed binlog tip");
    Ok(BinlogOffset::new(filename, position))
}

/// Resolve a startup mode to the binlog offset the tail starts from.
///
/// `initial` and `latest-offset` start at the current tip (under the
/// parallel protocol the snapshot watermarks take over from there);
/// `earliest-offset` starts at the oldest retained binlog file; `timestamp`
/// delegates to the log session's
/// [`offset_for_timestamp`](crate::reader::BinlogConnection::offset_for_timestamp),
/// which owns the binary-log file index.
pub async fn resolve_startup_offset<B: BinlogConnection>(
    conn: &mut Conn,
    binlog: &mut B,
    startup_mode: &crate::config::StartupMode,
) -> Result<BinlogOffset> {
    use crate::config::StartupMode;
    match startup_mode {
        StartupMode::Initial | StartupMode::LatestOffset => current_binlog_offset(conn).await,
        StartupMode::EarliestOffset => {
            let row: Option<Row> = conn
                .query_first("SHOW BINARY LOGS")
                .await
                .map_err(|e| CdcError::connection(format!("failed to list binary logs: {e}")))?;
            let row = row.ok_or_else(|| {
                CdcError::connection("SHOW BINARY LOGS returned no rows")
            })?;
            let filename: String = row.get(0).unwrap_or_default();
            // Position 4 is the first event after the file header.
            Ok(BinlogOffset::new(filename, 4))
        }
        StartupMode::SpecificOffset { file, pos } => Ok(BinlogOffset::new(file.clone(), *pos)),
        StartupMode::Timestamp { millis } => binlog.offset_for_timestamp(*millis).await,
    }
}

/// Discover the split-key column of `table_id` from its primary key.
///
/// Parallel snapshot reads require a primary key whose first column is a
/// supported key type; anything else is a configuration error.
pub async fn discover_split_key(
    pool: &Pool,
    connect_timeout: Duration,
    table_id: &TableId,
) -> Result<SplitKeySchema> {
    let mut conn = get_conn(pool, connect_timeout).await?;
    let query = r"
        SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND COLUMN_KEY = 'PRI'
        ORDER BY ORDINAL_POSITION
        LIMIT 1
    ";
    let row: Option<(String, String, String)> = conn
        .exec_first(query, (&table_id.database, &table_id.table))
        .await
        .map_err(|e| CdcError::schema(format!("failed to discover primary key: {e}")))?;

    let (column, data_type, column_type) = row.ok_or_else(|| {
        CdcError::config(format!(
            "table {table_id} has no primary key; parallel snapshot reads require one"
        ))
    })?;
    let unsigned = column_type.to_ascii_lowercase().contains("unsigned");
    let data_type = KeyDataType::from_mysql_type(&data_type, unsigned)?;
    info!(table = %table_id, column, ?data_type, "discovered split key");
    Ok(SplitKeySchema::new(column, data_type))
}

/// Capture the schema of `table_id` as of now.
pub async fn capture_table_schema(
    pool: &Pool,
    connect_timeout: Duration,
    table_id: &TableId,
) -> Result<TableSchema> {
    let mut conn = get_conn(pool, connect_timeout).await?;
    let query = r"
        SELECT COLUMN_NAME, COLUMN_KEY
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    ";
    let rows: Vec<(String, String)> = conn
        .exec(query, (&table_id.database, &table_id.table))
        .await
        .map_err(|e| CdcError::schema(format!("failed to capture schema: {e}")))?;
    if rows.is_empty() {
        return Err(CdcError::schema(format!("table {table_id} does not exist")));
    }

    let columns: Vec<String> = rows.iter().map(|(name, _)| name.clone()).collect();
    let primary_key: Vec<String> = rows
        .iter()
        .filter(|(_, key)| key == "PRI")
        .map(|(name, _)| name.clone())
        .collect();
    Ok(TableSchema::new(columns, primary_key))
}

/// Convert a column value of the split-key column to a [`KeyValue`].
pub(crate) fn value_to_key(value: Value, data_type: KeyDataType) -> Result<KeyValue> {
    match (data_type, value) {
        (KeyDataType::Integer, Value::Int(v)) => Ok(KeyValue::Int(v)),
        (KeyDataType::Integer, Value::UInt(v)) => i64::try_from(v)
            .map(KeyValue::Int)
            .map_err(|_| CdcError::schema("signed key column holds out-of-range value")),
        (KeyDataType::UnsignedInteger, Value::UInt(v)) => Ok(KeyValue::UInt(v)),
        (KeyDataType::UnsignedInteger, Value::Int(v)) => u64::try_from(v)
            .map(KeyValue::UInt)
            .map_err(|_| CdcError::schema("unsigned key column holds negative value")),
        (KeyDataType::Decimal, Value::Bytes(bytes)) => String::from_utf8(bytes)
            .map(KeyValue::Decimal)
            .map_err(|_| CdcError::schema("decimal key column holds non-UTF-8 value")),
        (KeyDataType::Decimal, Value::Int(v)) => Ok(KeyValue::Decimal(v.to_string())),
        (KeyDataType::Decimal, Value::UInt(v)) => Ok(KeyValue::Decimal(v.to_string())),
        (KeyDataType::Text, Value::Bytes(bytes)) => String::from_utf8(bytes)
            .map(KeyValue::Text)
            .map_err(|_| CdcError::schema("text key column holds non-UTF-8 value")),
        (data_type, value) => Err(CdcError::schema(format!(
            "key value {value:?} does not match declared type {data_type:?}"
        ))),
    }
}

/// Convert a [`KeyValue`] to a query parameter.
pub(crate) fn key_to_value(key: &KeyValue) -> Value {
    match key {
        KeyValue::Int(v) => Value::Int(*v),
        KeyValue::UInt(v) => Value::UInt(*v),
        KeyValue::Decimal(v) => Value::Bytes(v.clone().into_bytes()),
        KeyValue::Text(v) => Value::Bytes(v.clone().into_bytes()),
    }
}

/// Convert a row value to JSON for the change-record images.
pub(crate) fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,
        Value::Int(v) => serde_json::json!(v),
        Value::UInt(v) => serde_json::json!(v),
        Value::Float(v) => serde_json::Number::from_f64(v as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Double(v) => serde_json::Number::from_f64(v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => serde_json::Value::String(s),
            Err(e) => {
                // Binary payload: hex-encode rather than lose it.
                let bytes = e.into_bytes();
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                serde_json::Value::String(hex)
            }
        },
        Value::Date(year, month, day, hour, minute, second, micros) => {
            serde_json::Value::String(format!(
                "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micros:06}"
            ))
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if negative { "-" } else { "" };
            let total_hours = days * 24 + hours as u32;
            serde_json::Value::String(format!(
                "{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}
