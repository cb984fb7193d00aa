//! MySQL snapshot connection
//!
//! The SQL half of a worker's split reading: offset probes via
//! `SHOW MASTER STATUS`, chunk SELECTs with keyset pagination, and the
//! bounded log replay delegated to a pluggable [`BinlogConnection`].

use super::{current_binlog_offset, get_conn, key_to_value, value_to_json, value_to_key};
use crate::error::{CdcError, Result};
use crate::event::ChangeRecord;
use crate::key::SplitKey;
use crate::offset::BinlogOffset;
use crate::reader::{collect_binlog_slice, BinlogConnection, SnapshotConnection};
use crate::split::SnapshotSplit;
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Row, Value};
use std::time::Duration;
use tracing::debug;

/// [`SnapshotConnection`] backed by a connection pool plus a host-provided
/// binary-log session for the watermark slice.
pub struct MySqlSnapshotConnection<B: BinlogConnection> {
    pool: Pool,
    connect_timeout: Duration,
    server_time_zone: String,
    binlog: B,
}

impl<B: BinlogConnection> MySqlSnapshotConnection<B> {
    pub fn new(pool: Pool, config: &crate::config::SourceConfig, binlog: B) -> Self {
        Self {
            pool,
            connect_timeout: config.connect_timeout,
            server_time_zone: config.server_time_zone.clone(),
            binlog,
        }
    }

    /// Session connection with the configured time zone applied, so
    /// temporal columns decode consistently across workers.
    async fn session(&self) -> Result<mysql_async::Conn> {
        let mut conn = get_conn(&self.pool, self.connect_timeout).await?;
        conn.exec_drop("SET time_zone = ?", (&self.server_time_zone,))
            .await
            .map_err(|e| CdcError::connection(format!("failed to set session time zone: {e}")))?;
        Ok(conn)
    }

    async fn table_columns(&self, split: &SnapshotSplit) -> Result<Vec<String>> {
        // Prefer the schema captured at planning time; fall back to the
        // information schema for restores that predate capture.
        if let Some(schema) = split.table_schemas.get(&split.table_id) {
            if !schema.columns.is_empty() {
                return Ok(schema.columns.clone());
            }
        }
        let mut conn = get_conn(&self.pool, self.connect_timeout).await?;
        let columns: Vec<String> = conn
            .exec(
                r"
                SELECT COLUMN_NAME
                FROM INFORMATION_SCHEMA.COLUMNS
                WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
                ORDER BY ORDINAL_POSITION
                ",
                (&split.table_id.database, &split.table_id.table),
            )
            .await
            .map_err(|e| CdcError::schema(format!("failed to read columns: {e}")))?;
        Ok(columns)
    }

    fn row_to_record(
        split: &SnapshotSplit,
        columns: &[String],
        key_index: usize,
        row: Row,
        timestamp_ms: i64,
    ) -> Result<(SplitKey, ChangeRecord)> {
        let mut image = serde_json::Map::new();
        let mut key = None;
        for (index, column) in columns.iter().enumerate() {
            let value = row
                .get_opt::<Value, usize>(index)
                .transpose()
                .map_err(|e| CdcError::schema(format!("bad value in column {column}: {e}")))?
                .unwrap_or(Value::NULL);
            if index == key_index {
                key = Some(value_to_key(value.clone(), split.split_key.data_type)?);
            }
            image.insert(column.clone(), value_to_json(value));
        }
        let key = SplitKey::single(key.ok_or_else(|| {
            CdcError::schema(format!(
                "split key column {} missing from row",
                split.split_key.column
            ))
        })?);
        let record = ChangeRecord::read(
            split.table_id.clone(),
            key.clone(),
            serde_json::Value::Object(image),
            timestamp_ms,
        );
        Ok((key, record))
    }
}

#[async_trait]
impl<B: BinlogConnection + Sync> SnapshotConnection for MySqlSnapshotConnection<B> {
    async fn current_offset(&mut self) -> Result<BinlogOffset> {
        let mut conn = get_conn(&self.pool, self.connect_timeout).await?;
        current_binlog_offset(&mut conn).await
    }

    async fn fetch_chunk_rows(
        &mut self,
        split: &SnapshotSplit,
        fetch_size: usize,
    ) -> Result<Vec<ChangeRecord>> {
        let columns = self.table_columns(split).await?;
        let key_column = &split.split_key.column;
        let key_index = columns
            .iter()
            .position(|c| c == key_column)
            .ok_or_else(|| {
                CdcError::schema(format!("split key column {key_column} not in table"))
            })?;

        let table = format!("`{}`.`{}`", split.table_id.database, split.table_id.table);
        let select_list = columns
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let timestamp_ms = chrono::Utc::now().timestamp_millis();

        let mut conn = self.session().await?;
        let mut records = Vec::new();
        // Keyset pagination: inclusive lower bound for the first batch, then
        // strictly-greater-than the last seen key.
        let mut cursor: Option<SplitKey> = None;
        loop {
            let mut conditions: Vec<String> = Vec::new();
            let mut params: Vec<Value> = Vec::new();
            match (&cursor, &split.split_start) {
                (Some(last), _) => {
                    conditions.push(format!("`{key_column}` > ?"));
                    params.push(key_to_value(&last.values()[0]));
                }
                (None, Some(start)) => {
                    conditions.push(format!("`{key_column}` >= ?"));
                    params.push(key_to_value(&start.values()[0]));
                }
                (None, None) => {}
            }
            if let Some(end) = &split.split_end {
                conditions.push(format!("`{key_column}` < ?"));
                params.push(key_to_value(&end.values()[0]));
            }
            let where_clause = if conditions.is_empty() {
                String::new()
            } else {
                format!("WHERE {} ", conditions.join(" AND "))
            };
            let query = format!(
                "SELECT {select_list} FROM {table} {where_clause}\
                 ORDER BY `{key_column}` LIMIT {fetch_size}"
            );

            let rows: Vec<Row> = conn
                .exec(&query, params)
                .await
                .map_err(|e| CdcError::connection(format!("chunk select failed: {e}")))?;
            let batch_len = rows.len();

            for row in rows {
                let (key, record) =
                    Self::row_to_record(split, &columns, key_index, row, timestamp_ms)?;
                cursor = Some(key);
                records.push(record);
            }
            if batch_len < fetch_size {
                break;
            }
        }

        debug!(
            split_id = %split.split_id,
            rows = records.len(),
            "fetched chunk rows"
        );
        Ok(records)
    }

    async fn read_binlog_slice(
        &mut self,
        after: &BinlogOffset,
        until: &BinlogOffset,
    ) -> Result<Vec<ChangeRecord>> {
        collect_binlog_slice(&mut self.binlog, after, until).await
    }
}
