//! Split keys
//!
//! A [`SplitKey`] is an ordered tuple of primitive values drawn from the
//! table's primary key. Chunk boundaries, range containment checks in the
//! normalizer, and duplicate suppression in the binlog reader all compare
//! split keys, so the ordering must be total and identical everywhere.
//!
//! The key-type policy is explicit: only the variants of [`KeyDataType`] are
//! accepted as split-key columns. Planning rejects anything else up front
//! instead of falling back to ad-hoc string comparison.

use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Data types accepted for the split-key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDataType {
    /// Signed integer family (TINYINT..BIGINT).
    Integer,
    /// Unsigned integer family.
    UnsignedInteger,
    /// Fixed-point DECIMAL/NUMERIC.
    Decimal,
    /// Character types (CHAR/VARCHAR).
    Text,
}

impl KeyDataType {
    /// Whether the numeric chunk-planning fast path applies to this type.
    pub fn is_integer_like(&self) -> bool {
        matches!(self, KeyDataType::Integer | KeyDataType::UnsignedInteger)
    }

    /// Map an `INFORMATION_SCHEMA` data type to the key policy.
    ///
    /// Unsupported types are a configuration error: the table cannot be
    /// chunked on such a column.
    pub fn from_mysql_type(data_type: &str, unsigned: bool) -> Result<Self> {
        match data_type.to_ascii_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
                if unsigned {
                    Ok(KeyDataType::UnsignedInteger)
                } else {
                    Ok(KeyDataType::Integer)
                }
            }
            "decimal" | "numeric" => Ok(KeyDataType::Decimal),
            "char" | "varchar" => Ok(KeyDataType::Text),
            other => Err(CdcError::config(format!(
                "unsupported split key type '{other}': the split key column must be \
                 an integer, decimal, or character type"
            ))),
        }
    }
}

/// Schema of the fields forming the split key. Currently a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitKeySchema {
    /// Column name.
    pub column: String,
    /// Column type under the key policy.
    pub data_type: KeyDataType,
}

impl SplitKeySchema {
    pub fn new(column: impl Into<String>, data_type: KeyDataType) -> Self {
        Self {
            column: column.into(),
            data_type,
        }
    }
}

/// A single primitive key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyValue {
    Int(i64),
    UInt(u64),
    /// Decimal kept in its textual form; compared numerically.
    Decimal(String),
    Text(String),
}

impl KeyValue {
    fn variant_rank(&self) -> u8 {
        match self {
            KeyValue::Int(_) => 0,
            KeyValue::UInt(_) => 1,
            KeyValue::Decimal(_) => 2,
            KeyValue::Text(_) => 3,
        }
    }
}

impl Ord for KeyValue {
    /// Total order over key values.
    ///
    /// Numeric variants compare numerically among themselves, text compares
    /// lexicographically, and numeric sorts before text. Numerically equal
    /// values of different variants (or textually distinct but numerically
    /// equal decimals) are tie-broken deterministically so the order stays
    /// consistent with `Eq`.
    fn cmp(&self, other: &Self) -> Ordering {
        use KeyValue::*;
        let primary = match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (UInt(a), UInt(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Int(a), UInt(b)) => cmp_i128(*a as i128, *b as i128),
            (UInt(a), Int(b)) => cmp_i128(*a as i128, *b as i128),
            (Decimal(a), Decimal(b)) => cmp_decimal(a, b),
            (Int(a), Decimal(b)) => cmp_decimal(&a.to_string(), b),
            (UInt(a), Decimal(b)) => cmp_decimal(&a.to_string(), b),
            (Decimal(a), Int(b)) => cmp_decimal(a, &b.to_string()),
            (Decimal(a), UInt(b)) => cmp_decimal(a, &b.to_string()),
            (Text(_), _) => Ordering::Greater,
            (_, Text(_)) => Ordering::Less,
        };
        if primary != Ordering::Equal {
            return primary;
        }
        if self == other {
            return Ordering::Equal;
        }
        // Deterministic tie-break for numerically equal, structurally
        // distinct values ("1.0" vs "1.00", Int(1) vs UInt(1)).
        self.variant_rank()
            .cmp(&other.variant_rank())
            .then_with(|| format!("{self}").cmp(&format!("{other}")))
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::UInt(v) => write!(f, "{v}"),
            KeyValue::Decimal(v) => write!(f, "{v}"),
            KeyValue::Text(v) => write!(f, "{v}"),
        }
    }
}

fn cmp_i128(a: i128, b: i128) -> Ordering {
    a.cmp(&b)
}

/// Numeric comparison of two decimal literals without parsing to float.
fn cmp_decimal(a: &str, b: &str) -> Ordering {
    let (a_neg, a_int, a_frac) = decompose_decimal(a);
    let (b_neg, b_int, b_frac) = decompose_decimal(b);

    match (a_neg, b_neg) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    let magnitude = cmp_magnitude(a_int, a_frac, b_int, b_frac);
    if a_neg {
        magnitude.reverse()
    } else {
        magnitude
    }
}

/// Split a decimal literal into (negative, integer digits, fraction digits),
/// stripping leading zeros from the integer part and trailing zeros from the
/// fraction. `-0` normalizes to non-negative zero.
fn decompose_decimal(s: &str) -> (bool, &str, &str) {
    let s = s.trim();
    let (neg, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, f),
        None => (rest, ""),
    };
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let neg = neg && !(int_part.is_empty() && frac_part.is_empty());
    (neg, int_part, frac_part)
}

fn cmp_magnitude(a_int: &str, a_frac: &str, b_int: &str, b_frac: &str) -> Ordering {
    a_int
        .len()
        .cmp(&b_int.len())
        .then_with(|| a_int.cmp(b_int))
        .then_with(|| a_frac.cmp(b_frac))
}

/// An ordered tuple of key values. Comparison is componentwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SplitKey(pub Vec<KeyValue>);

impl SplitKey {
    /// A single-column key, the common case.
    pub fn single(value: KeyValue) -> Self {
        Self(vec![value])
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }
}

impl fmt::Display for SplitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "]")
    }
}

/// Check whether `key` falls inside the chunk range `[start, end)`.
///
/// `start = None` means the lower-unbounded first chunk; `end = None` means
/// the upper-unbounded last chunk.
pub fn range_contains(key: &SplitKey, start: Option<&SplitKey>, end: Option<&SplitKey>) -> bool {
    let after_start = start.map_or(true, |s| key >= s);
    let before_end = end.map_or(true, |e| key < e);
    after_start && before_end
}
