use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

/// Represents a SQL parameter or column value in a driver-agnostic way.
/// Drivers are responsible for converting these to their native types.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// The type tag of this value. `Null` reports `SqlType::Any`.
    pub fn sql_type(&self) -> SqlType {
        match self {
            SqlValue::Null => SqlType::Any,
            SqlValue::Text(_) => SqlType::Text,
            SqlValue::Int(_) => SqlType::Integer,
            SqlValue::Float(_) => SqlType::Float,
            SqlValue::Decimal(_) => SqlType::Decimal,
            SqlValue::Bool(_) => SqlType::Boolean,
            SqlValue::Date(_) => SqlType::Date,
            SqlValue::DateTime(_) => SqlType::DateTime,
            SqlValue::Blob(_) => SqlType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            SqlValue::Float(f) => Some(*f),
            SqlValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::Decimal(d) => Some(*d),
            SqlValue::Int(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            SqlValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) => Some(b),
            _ => None,
        }
    }
}

/// Declared type of a statement parameter slot or a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// Accepts any value; the backend decides how to interpret it.
    Any,
    Text,
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Blob,
}

impl SqlType {
    /// Whether a value may be bound to a slot of this type without coercion.
    ///
    /// Widening is limited to lossless numeric cases. Text is never
    /// reinterpreted as a number or a date.
    pub fn accepts(self, value: &SqlValue) -> bool {
        match (self, value) {
            (_, SqlValue::Null) | (SqlType::Any, _) => true,
            (SqlType::Text, SqlValue::Text(_)) => true,
            (SqlType::Integer, SqlValue::Int(_)) => true,
            (SqlType::Decimal, SqlValue::Int(_) | SqlValue::Decimal(_)) => true,
            (SqlType::Float, SqlValue::Int(_) | SqlValue::Float(_) | SqlValue::Decimal(_)) => true,
            (SqlType::Boolean, SqlValue::Bool(_)) => true,
            (SqlType::Date, SqlValue::Date(_)) => true,
            (SqlType::DateTime, SqlValue::DateTime(_)) => true,
            (SqlType::Blob, SqlValue::Blob(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Any => "any",
            SqlType::Text => "text",
            SqlType::Integer => "integer",
            SqlType::Float => "float",
            SqlType::Decimal => "decimal",
            SqlType::Boolean => "boolean",
            SqlType::Date => "date",
            SqlType::DateTime => "datetime",
            SqlType::Blob => "blob",
        };
        f.write_str(name)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<Decimal> for SqlValue {
    fn from(value: Decimal) -> Self {
        SqlValue::Decimal(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        SqlValue::DateTime(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}
