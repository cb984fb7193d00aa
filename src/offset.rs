//! Binlog offsets
//!
//! A [`BinlogOffset`] is a totally ordered position `(file, pos)` in the
//! upstream binary log. Binlog filenames carry a monotonically increasing
//! numeric suffix, so lexicographic order on the filename followed by numeric
//! order on the position is a total order over the whole log.
//!
//! The wire form is `"<filename>:<position>"`, e.g. `mysql-bin.000003:12345`.
//!
//! "Never stop" is not encoded as a sentinel position; it is a distinguished
//! variant of [`StopOffset`] so it cannot collide with the natural order.

use crate::error::CdcError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A position in the binary log of a MySQL-compatible server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinlogOffset {
    /// Binlog filename, e.g. `mysql-bin.000003`. Empty for the initial offset.
    pub filename: String,
    /// Byte position within the file.
    pub position: u64,
}

impl BinlogOffset {
    /// Create a new offset.
    pub fn new(filename: impl Into<String>, position: u64) -> Self {
        Self {
            filename: filename.into(),
            position,
        }
    }

    /// The offset that precedes every real log position: `("", 0)`.
    pub fn initial() -> Self {
        Self {
            filename: String::new(),
            position: 0,
        }
    }

    /// Check whether this is the initial offset.
    pub fn is_initial(&self) -> bool {
        self.filename.is_empty() && self.position == 0
    }

    /// True when this offset is at or after `other` in log order.
    pub fn is_at_or_after(&self, other: &Self) -> bool {
        self >= other
    }

    /// True when this offset is strictly after `other` in log order.
    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }
}

impl Ord for BinlogOffset {
    fn cmp(&self, other: &Self) -> Ordering {
        // Binlog filenames are ordered by their numeric suffix, which
        // lexicographic comparison preserves for equal-width names.
        self.filename
            .cmp(&other.filename)
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl PartialOrd for BinlogOffset {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BinlogOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

impl FromStr for BinlogOffset {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (filename, position) = s
            .rsplit_once(':')
            .ok_or_else(|| CdcError::serialization(format!("invalid binlog offset: {s:?}")))?;
        let position = position
            .parse::<u64>()
            .map_err(|e| CdcError::serialization(format!("invalid binlog position: {e}")))?;
        Ok(Self::new(filename, position))
    }
}

/// Where a binlog split stops tailing.
///
/// The tail of the log is unbounded by design; bounded replays (the
/// per-chunk low→high slice) use [`StopOffset::At`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOffset {
    /// Tail forever.
    #[default]
    Never,
    /// Stop once the stream reaches this offset.
    At(BinlogOffset),
}

impl StopOffset {
    /// Check whether `offset` has reached the stopping point.
    ///
    /// Always false for [`StopOffset::Never`]; comparison never consults a
    /// sentinel position.
    pub fn is_reached(&self, offset: &BinlogOffset) -> bool {
        match self {
            StopOffset::Never => false,
            StopOffset::At(stop) => offset >= stop,
        }
    }

    /// True when tailing is unbounded.
    pub fn is_never(&self) -> bool {
        matches!(self, StopOffset::Never)
    }
}

impl fmt::Display for StopOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOffset::Never => write!(f, "never"),
            StopOffset::At(offset) => write!(f, "{offset}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        let a = BinlogOffset::new("mysql-bin.000001", 100);
        let b = BinlogOffset::new("mysql-bin.000001", 200);
        let c = BinlogOffset::new("mysql-bin.000002", 4);

        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
        assert!(c.is_at_or_after(&a));
        assert!(c.is_after(&b));
        assert!(a.is_at_or_after(&a));
        assert!(!a.is_after(&a));
    }

    #[test]
    fn test_initial_precedes_everything() {
        let initial = BinlogOffset::initial();
        assert!(initial.is_initial());
        assert!(initial < BinlogOffset::new("mysql-bin.000001", 4));
    }

    #[test]
    fn test_wire_form_round_trip() {
        let offset = BinlogOffset::new("mysql-bin.000003", 12345);
        assert_eq!(offset.to_string(), "mysql-bin.000003:12345");
        assert_eq!("mysql-bin.000003:12345".parse::<BinlogOffset>().unwrap(), offset);

        assert!("no-colon".parse::<BinlogOffset>().is_err());
        assert!("file:notanumber".parse::<BinlogOffset>().is_err());
    }

    #[test]
    fn test_min_over_watermarks() {
        let offsets = [
            BinlogOffset::new("mysql-bin.000002", 50),
            BinlogOffset::new("mysql-bin.000001", 900),
            BinlogOffset::new("mysql-bin.000002", 10),
        ];
        let min = offsets.iter().min().unwrap();
        assert_eq!(min, &BinlogOffset::new("mysql-bin.000001", 900));
    }

    #[test]
    fn test_stop_offset_never() {
        let stop = StopOffset::Never;
        assert!(stop.is_never());
        assert!(!stop.is_reached(&BinlogOffset::new("mysql-bin.999999", u64::MAX)));
    }

    #[test]
    fn test_stop_offset_at() {
        let stop = StopOffset::At(BinlogOffset::new("mysql-bin.000002", 100));
        assert!(!stop.is_reached(&BinlogOffset::new("mysql-bin.000002", 99)));
        assert!(stop.is_reached(&BinlogOffset::new("mysql-bin.000002", 100)));
        assert!(stop.is_reached(&BinlogOffset::new("mysql-bin.000003", 4)));
    }
}
