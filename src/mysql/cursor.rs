//! MySQL key cursor
//!
//! Boundary queries for chunk planning: `MIN/MAX/COUNT` statistics and the
//! bounded key-skip query
//! `SELECT pk FROM t WHERE pk > ? ORDER BY pk LIMIT 1 OFFSET n`.

use super::{get_conn, key_to_value, value_to_key};
use crate::chunk::{KeyCursor, KeyStatistics};
use crate::error::{CdcError, Result};
use crate::key::{SplitKey, SplitKeySchema};
use crate::schema::TableId;
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Row, Value};
use std::time::Duration;

/// [`KeyCursor`] over a live table.
pub struct MySqlKeyCursor {
    pool: Pool,
    connect_timeout: Duration,
    table_id: TableId,
    split_key: SplitKeySchema,
}

impl MySqlKeyCursor {
    pub fn new(
        pool: Pool,
        connect_timeout: Duration,
        table_id: TableId,
        split_key: SplitKeySchema,
    ) -> Self {
        Self {
            pool,
            connect_timeout,
            table_id,
            split_key,
        }
    }

    fn qualified_table(&self) -> String {
        format!("`{}`.`{}`", self.table_id.database, self.table_id.table)
    }
}

#[async_trait]
impl KeyCursor for MySqlKeyCursor {
    async fn statistics(&mut self) -> Result<KeyStatistics> {
        let mut conn = get_conn(&self.pool, self.connect_timeout).await?;
        let query = format!(
            "SELECT MIN(`{key}`), MAX(`{key}`), COUNT(*) FROM {table}",
            key = self.split_key.column,
            table = self.qualified_table(),
        );
        let row: Row = conn
            .query_first(&query)
            .await
            .map_err(|e| CdcError::connection(format!("key statistics query failed: {e}")))?
            .ok_or_else(|| CdcError::connection("key statistics query returned no row"))?;

        let min = row
            .get_opt::<Value, usize>(0)
            .transpose()
            .map_err(|e| CdcError::schema(format!("bad MIN value: {e}")))?;
        let max = row
            .get_opt::<Value, usize>(1)
            .transpose()
            .map_err(|e| CdcError::schema(format!("bad MAX value: {e}")))?;
        let row_count: u64 = row.get(2).unwrap_or(0);

        let convert = |value: Option<Value>| -> Result<Option<crate::key::KeyValue>> {
            match value {
                None | Some(Value::NULL) => Ok(None),
                Some(value) => value_to_key(value, self.split_key.data_type).map(Some),
            }
        };
        Ok(KeyStatistics {
            min: convert(min)?,
            max: convert(max)?,
            row_count,
        })
    }

    async fn next_boundary(
        &mut self,
        after: Option<&SplitKey>,
        offset: usize,
    ) -> Result<Option<SplitKey>> {
        let mut conn = get_conn(&self.pool, self.connect_timeout).await?;
        let key = &self.split_key.column;
        let table = self.qualified_table();

        let value: Option<Value> = match after {
            Some(after) => {
                let query = format!(
                    "SELECT `{key}` FROM {table} WHERE `{key}` > ? \
                     ORDER BY `{key}` LIMIT 1 OFFSET {offset}"
                );
                let param = key_to_value(&after.values()[0]);
                conn.exec_first(&query, (param,)).await
            }
            None => {
                let query = format!(
                    "SELECT `{key}` FROM {table} ORDER BY `{key}` LIMIT 1 OFFSET {offset}"
                );
                conn.query_first(&query).await
            }
        }
        .map_err(|e| CdcError::connection(format!("chunk boundary query failed: {e}")))?;

        match value {
            None | Some(Value::NULL) => Ok(None),
            Some(value) => Ok(Some(SplitKey::single(value_to_key(
                value,
                self.split_key.data_type,
            )?))),
        }
    }
}
