//! Common type definitions

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

// ============================================================================
// Script Locations
// ============================================================================

/// Position of a statement inside an OAL script
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptLocation {
    /// Script name, usually the file name
    pub script: String,
    /// Zero-based index of the statement in the script
    pub statement: usize,
    /// One-based line of the statement start
    pub line: usize,
    /// One-based column of the statement start
    pub column: usize,
}

impl ScriptLocation {
    pub fn new(script: impl Into<String>, statement: usize, line: usize, column: usize) -> Self {
        Self {
            script: script.into(),
            statement,
            line,
            column,
        }
    }
}

impl fmt::Display for ScriptLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} (statement #{})",
            self.script, self.line, self.column, self.statement
        )
    }
}

// ============================================================================
// Time Buckets
// ============================================================================

/// Time granularity of a metric unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownSampling {
    Minute,
    Hour,
    Day,
}

impl DownSampling {
    /// Number of minutes covered by one bucket of this granularity
    pub fn minutes(self) -> i64 {
        match self {
            Self::Minute => 1,
            Self::Hour => 60,
            Self::Day => 1440,
        }
    }

    /// Number of decimal digits of a bucket value
    fn digits(self) -> u32 {
        match self {
            Self::Minute => 12,
            Self::Hour => 10,
            Self::Day => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl fmt::Display for DownSampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time bucket such as `202401011230` (minute), `2024010112` (hour)
/// or `20240101` (day), always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeBucket {
    value: i64,
    downsampling: DownSampling,
}

impl TimeBucket {
    /// Create a bucket, checking that the value is a valid date at the
    /// given granularity
    pub fn new(value: i64, downsampling: DownSampling) -> Result<Self> {
        if value <= 0 || digit_count(value) != downsampling.digits() {
            return Err(Error::Internal(format!(
                "{value} is not a {downsampling} time bucket"
            )));
        }

        let (date, rest) = match downsampling {
            DownSampling::Minute => (value / 10_000, Some((value / 100 % 100, value % 100))),
            DownSampling::Hour => (value / 100, Some((value % 100, 0))),
            DownSampling::Day => (value, None),
        };
        let month = date / 100 % 100;
        let day = date % 100;
        let valid_date = (1..=12).contains(&month) && (1..=31).contains(&day);
        let valid_time = rest.map_or(true, |(hour, minute)| hour < 24 && minute < 60);
        if !valid_date || !valid_time {
            return Err(Error::Internal(format!(
                "{value} is not a {downsampling} time bucket"
            )));
        }

        Ok(Self {
            value,
            downsampling,
        })
    }

    /// Minute bucket of a wall clock timestamp
    pub fn minute(value: i64) -> Result<Self> {
        Self::new(value, DownSampling::Minute)
    }

    /// Bucket for a timestamp at the given granularity
    pub fn from_millis(millis: Timestamp, downsampling: DownSampling) -> Result<Self> {
        let time = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| Error::Internal(format!("timestamp {millis} is out of range")))?;

        let minute = i64::from(time.year()) * 100_000_000
            + i64::from(time.month()) * 1_000_000
            + i64::from(time.day()) * 10_000
            + i64::from(time.hour()) * 100
            + i64::from(time.minute());

        let bucket = Self {
            value: minute,
            downsampling: DownSampling::Minute,
        };
        Ok(bucket.to(downsampling))
    }

    /// Read back a bucket from storage, inferring granularity from its width
    pub fn infer(value: i64) -> Result<Self> {
        let downsampling = match digit_count(value) {
            12 => DownSampling::Minute,
            10 => DownSampling::Hour,
            8 => DownSampling::Day,
            _ => {
                return Err(Error::Internal(format!(
                    "cannot infer granularity of time bucket {value}"
                )))
            }
        };
        Self::new(value, downsampling)
    }

    pub fn value(self) -> i64 {
        self.value
    }

    pub fn downsampling(self) -> DownSampling {
        self.downsampling
    }

    /// Truncate to the hour. Coarser buckets are returned unchanged.
    pub fn to_hour(self) -> Self {
        match self.downsampling {
            DownSampling::Minute => Self {
                value: self.value / 100,
                downsampling: DownSampling::Hour,
            },
            DownSampling::Hour | DownSampling::Day => self,
        }
    }

    /// Truncate to the day.
    pub fn to_day(self) -> Self {
        match self.downsampling {
            DownSampling::Minute => Self {
                value: self.value / 10_000,
                downsampling: DownSampling::Day,
            },
            DownSampling::Hour => Self {
                value: self.value / 100,
                downsampling: DownSampling::Day,
            },
            DownSampling::Day => self,
        }
    }

    /// Truncate to the requested granularity
    pub fn to(self, downsampling: DownSampling) -> Self {
        match downsampling {
            DownSampling::Minute => self,
            DownSampling::Hour => self.to_hour(),
            DownSampling::Day => self.to_day(),
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

fn digit_count(value: i64) -> u32 {
    value.unsigned_abs().checked_ilog10().map_or(1, |d| d + 1)
}

// ============================================================================
// Values
// ============================================================================

/// A dynamically typed value carried by source events and storage rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    /// Human readable name of the variant
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Struct(_) => "struct",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Long(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a nested field of a struct or map value
    pub fn get(&self, field: &str) -> Option<Value> {
        match self {
            Self::Struct(fields) => fields.get(field).cloned(),
            Self::Map(entries) => entries.get(field).cloned().map(Self::String),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(",")),
            Self::Map(_) | Self::Struct(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Long(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}
