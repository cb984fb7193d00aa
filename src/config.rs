//! Source configuration
//!
//! # Security Note
//!
//! `SourceConfig` implements a custom `Debug` that redacts the password
//! field to prevent accidental leakage to logs.

use crate::error::{CdcError, Result};
use crate::offset::BinlogOffset;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default rows per snapshot chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 8096;
/// Default SQL fetch size per poll during snapshot reads.
pub const DEFAULT_FETCH_SIZE: usize = 1024;
/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection retry budget inside a worker.
pub const DEFAULT_CONNECT_MAX_RETRIES: u32 = 3;

/// Where consumption starts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum StartupMode {
    /// Full snapshot first, then tail from the snapshot watermarks.
    #[default]
    Initial,
    /// Tail from the earliest available binlog offset, no snapshot.
    EarliestOffset,
    /// Tail from the current tip, no snapshot.
    LatestOffset,
    /// Tail from an explicit offset, no snapshot.
    SpecificOffset { file: String, pos: u64 },
    /// Tail from the offset closest to a commit timestamp, no snapshot.
    Timestamp { millis: i64 },
}

impl StartupMode {
    /// Whether this mode is allowed together with parallel snapshot reads.
    pub fn supports_parallel_read(&self) -> bool {
        matches!(self, StartupMode::Initial | StartupMode::LatestOffset)
    }

    /// The explicit starting offset, when the mode carries one.
    pub fn specific_offset(&self) -> Option<BinlogOffset> {
        match self {
            StartupMode::SpecificOffset { file, pos } => Some(BinlogOffset::new(file.clone(), *pos)),
            _ => None,
        }
    }
}

/// Binlog client id: a single id, or a range from which each worker picks
/// `start + worker_id`. The range form is required for parallel reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerId {
    Single(u32),
    Range { start: u32, end: u32 },
}

impl ServerId {
    pub fn is_range(&self) -> bool {
        matches!(self, ServerId::Range { .. })
    }

    /// The id worker `worker_id` registers with.
    pub fn for_worker(&self, worker_id: u32) -> Result<u32> {
        match self {
            ServerId::Single(id) => {
                if worker_id == 0 {
                    Ok(*id)
                } else {
                    Err(CdcError::config(format!(
                        "server-id {id} is a single id but worker {worker_id} needs one; \
                         use the range syntax 'start-end'"
                    )))
                }
            }
            ServerId::Range { start, end } => {
                let id = start
                    .checked_add(worker_id)
                    .ok_or_else(|| CdcError::config("server-id range overflow"))?;
                if id > *end {
                    return Err(CdcError::config(format!(
                        "server-id range {start}-{end} is too small for worker {worker_id}"
                    )));
                }
                Ok(id)
            }
        }
    }
}

impl FromStr for ServerId {
    type Err = CdcError;

    /// Parse `"5400"` or `"5400-5408"`.
    fn from_str(s: &str) -> Result<Self> {
        let parse_id = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| CdcError::config(format!("invalid server-id: {s:?}")))
        };
        match s.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_id(start)?, parse_id(end)?);
                if start > end {
                    return Err(CdcError::config(format!(
                        "server-id range start {start} exceeds end {end}"
                    )));
                }
                Ok(ServerId::Range { start, end })
            }
            None => Ok(ServerId::Single(parse_id(s)?)),
        }
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerId::Single(id) => write!(f, "{id}"),
            ServerId::Range { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

/// Configuration of the CDC source.
#[derive(Clone)]
pub struct SourceConfig {
    /// Database host.
    pub hostname: String,
    /// Database port (default: 3306).
    pub port: u16,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication.
    pub password: Option<String>,
    /// Database to monitor.
    pub database_name: String,
    /// Table to monitor.
    pub table_name: String,
    /// Session time zone used for temporal decoding.
    pub server_time_zone: String,
    /// Binlog client id(s).
    pub server_id: ServerId,
    /// Enable the split-based parallel snapshot protocol.
    pub parallel_read: bool,
    /// Target rows per chunk.
    pub chunk_size: usize,
    /// SQL fetch size per poll.
    pub fetch_size: usize,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Connection retry budget inside a worker.
    pub connect_max_retries: u32,
    /// Startup mode.
    pub startup_mode: StartupMode,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database_name", &self.database_name)
            .field("table_name", &self.table_name)
            .field("server_time_zone", &self.server_time_zone)
            .field("server_id", &self.server_id)
            .field("parallel_read", &self.parallel_read)
            .field("chunk_size", &self.chunk_size)
            .field("fetch_size", &self.fetch_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("connect_max_retries", &self.connect_max_retries)
            .field("startup_mode", &self.startup_mode)
            .finish()
    }
}

impl SourceConfig {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        database_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port: 3306,
            username: username.into(),
            password: None,
            database_name: database_name.into(),
            table_name: table_name.into(),
            server_time_zone: "UTC".to_string(),
            server_id: ServerId::Range {
                start: 5400,
                end: 5408,
            },
            parallel_read: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_size: DEFAULT_FETCH_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_max_retries: DEFAULT_CONNECT_MAX_RETRIES,
            startup_mode: StartupMode::Initial,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_server_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.server_time_zone = tz.into();
        self
    }

    pub fn with_server_id(mut self, server_id: ServerId) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_parallel_read(mut self, enabled: bool) -> Self {
        self.parallel_read = enabled;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_connect_max_retries(mut self, retries: u32) -> Self {
        self.connect_max_retries = retries;
        self
    }

    pub fn with_startup_mode(mut self, mode: StartupMode) -> Self {
        self.startup_mode = mode;
        self
    }

    /// Validate the configuration. Violations are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(CdcError::config("hostname must not be empty"));
        }
        if self.username.is_empty() {
            return Err(CdcError::config("username must not be empty"));
        }
        if self.database_name.is_empty() || self.table_name.is_empty() {
            return Err(CdcError::config(
                "database-name and table-name must not be empty",
            ));
        }
        if let StartupMode::SpecificOffset { file, .. } = &self.startup_mode {
            if file.is_empty() {
                return Err(CdcError::config(
                    "scan.startup.specific-offset.file must not be empty",
                ));
            }
        }
        if self.parallel_read {
            if !self.server_id.is_range() {
                return Err(CdcError::config(
                    "parallel snapshot read requires a server-id range like '5400-5408'",
                ));
            }
            if !self.startup_mode.supports_parallel_read() {
                return Err(CdcError::config(
                    "parallel snapshot read supports startup modes 'initial' and \
                     'latest-offset' only",
                ));
            }
        }
        Ok(())
    }

    /// Identity of the monitored table.
    pub fn table_id(&self) -> crate::schema::TableId {
        crate::schema::TableId::new(&self.database_name, &self.table_name)
    }
}
