use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Result, TrackError};

/// Column value as seen by the tracking layer and the statement generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Uuid(Uuid),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Date(_) => "DATE",
            Self::Uuid(_) => "UUID",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Renders the value as a SQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Text(v) => format!("'{}'", sql_escape_string(v)),
            Self::Boolean(v) => {
                if *v {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            Self::Timestamp(v) => format!("'{}'", v.to_rfc3339()),
            Self::Date(v) => format!("'{}'", v.format("%Y-%m-%d")),
            Self::Uuid(v) => format!("'{}'", v),
        }
    }
}

pub fn sql_escape_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Exact equality: no numeric coercion across variants and no tolerance
/// between floats. NaN equals NaN so an unchanged NaN field stays clean.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                2u8.hash(state);
                // 0.0 == -0.0 and every NaN is equal, so hash them alike.
                let bits = if *f == 0.0 {
                    0u64
                } else if f.is_nan() {
                    f64::NAN.to_bits()
                } else {
                    f.to_bits()
                };
                bits.hash(state);
            }
            Self::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Self::Boolean(b) => {
                4u8.hash(state);
                b.hash(state);
            }
            Self::Timestamp(t) => {
                5u8.hash(state);
                t.hash(state);
            }
            Self::Date(d) => {
                6u8.hash(state);
                d.hash(state);
            }
            Self::Uuid(u) => {
                7u8.hash(state);
                u.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => {
                if fl.is_nan() {
                    write!(f, "NaN")
                } else {
                    write!(f, "{}", fl)
                }
            }
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

/// Simple (non-aggregate) field types a record may expose to the tracker.
pub trait FieldValue: Sized + Clone + Send + Sync + 'static {
    const SQL_TYPE: &'static str;

    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: &str, got: &Value) -> TrackError {
    TrackError::TypeMismatch(format!("expected {}, got {}", expected, got.type_name()))
}

impl FieldValue for i64 {
    const SQL_TYPE: &'static str = "INTEGER";

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(v) => Ok(v),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl FieldValue for i32 {
    const SQL_TYPE: &'static str = "INTEGER";

    fn to_value(&self) -> Value {
        Value::Integer(*self as i64)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(v) => i32::try_from(v)
                .map_err(|_| TrackError::TypeMismatch(format!("{} does not fit in i32", v))),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl FieldValue for u32 {
    const SQL_TYPE: &'static str = "INTEGER";

    fn to_value(&self) -> Value {
        Value::Integer(*self as i64)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(v) => u32::try_from(v)
                .map_err(|_| TrackError::TypeMismatch(format!("{} does not fit in u32", v))),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl FieldValue for f64 {
    const SQL_TYPE: &'static str = "FLOAT";

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Integer(v) => Ok(v as f64),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl FieldValue for f32 {
    const SQL_TYPE: &'static str = "FLOAT";

    fn to_value(&self) -> Value {
        Value::Float(*self as f64)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v as f32),
            Value::Integer(v) => Ok(v as f32),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl FieldValue for bool {
    const SQL_TYPE: &'static str = "BOOLEAN";

    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(v) => Ok(v),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl FieldValue for String {
    const SQL_TYPE: &'static str = "TEXT";

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(v) => Ok(v),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl FieldValue for Uuid {
    const SQL_TYPE: &'static str = "UUID";

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(v) => Ok(v),
            Value::Text(text) => Uuid::parse_str(&text)
                .map_err(|err| TrackError::TypeMismatch(format!("invalid UUID '{}': {}", text, err))),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl FieldValue for DateTime<Utc> {
    const SQL_TYPE: &'static str = "TIMESTAMP";

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|err| {
                    TrackError::TypeMismatch(format!("invalid timestamp '{}': {}", text, err))
                }),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl FieldValue for NaiveDate {
    const SQL_TYPE: &'static str = "DATE";

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Date(v) => Ok(v),
            Value::Text(text) => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map_err(|err| TrackError::TypeMismatch(format!("invalid date '{}': {}", text, err))),
            other => Err(mismatch(Self::SQL_TYPE, &other)),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const SQL_TYPE: &'static str = T::SQL_TYPE;

    fn to_value(&self) -> Value {
        match self {
            Some(value) => value.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
