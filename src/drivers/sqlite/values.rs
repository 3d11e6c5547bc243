use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;
use rust_decimal::Decimal;

use crate::error::SqlCursorError;
use crate::types::SqlValue;

pub(super) fn backend_error(err: rusqlite::Error) -> SqlCursorError {
    match &err {
        rusqlite::Error::SqliteFailure(code, message) => SqlCursorError::Backend {
            code: Some(code.extended_code.to_string()),
            message: message.clone().unwrap_or_else(|| err.to_string()),
        },
        _ => SqlCursorError::backend(None::<String>, err.to_string()),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Decimal(d) => ToSqlOutput::Owned(Value::Text(d.to_string())),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlValue::Date(d) => d.to_sql()?,
            SqlValue::DateTime(dt) => dt.to_sql()?,
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Column affinity guessed from the declared type, for values SQLite stores loosely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Declared {
    Date,
    DateTime,
    Decimal,
    Boolean,
    Other,
}

fn declared(decl: Option<&str>) -> Declared {
    let Some(decl) = decl else {
        return Declared::Other;
    };
    let decl = decl.to_ascii_uppercase();
    if decl.contains("DATETIME") || decl.contains("TIMESTAMP") {
        Declared::DateTime
    } else if decl.starts_with("DATE") {
        Declared::Date
    } else if decl.contains("DECIMAL") || decl.contains("NUMERIC") {
        Declared::Decimal
    } else if decl.contains("BOOL") {
        Declared::Boolean
    } else {
        Declared::Other
    }
}

pub(super) fn from_sqlite(value: ValueRef<'_>, decl: Option<&str>) -> SqlValue {
    let declared = declared(decl);
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => match declared {
            Declared::Boolean => SqlValue::Bool(i != 0),
            Declared::Decimal => SqlValue::Decimal(Decimal::from(i)),
            _ => SqlValue::Int(i),
        },
        ValueRef::Real(f) => match declared {
            Declared::Decimal => Decimal::from_str(&f.to_string())
                .map(SqlValue::Decimal)
                .unwrap_or(SqlValue::Float(f)),
            _ => SqlValue::Float(f),
        },
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            let parsed = match declared {
                Declared::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .ok()
                    .map(SqlValue::Date),
                Declared::DateTime => parse_datetime(&text).map(SqlValue::DateTime),
                Declared::Decimal => Decimal::from_str(&text).ok().map(SqlValue::Decimal),
                _ => None,
            };
            parsed.unwrap_or(SqlValue::Text(text))
        }
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_types_guide_loose_values() {
        assert_eq!(
            from_sqlite(ValueRef::Real(8.5), Some("DECIMAL(2,1)")),
            SqlValue::Decimal(Decimal::new(85, 1))
        );
        assert_eq!(from_sqlite(ValueRef::Real(8.5), Some("REAL")), SqlValue::Float(8.5));
        assert_eq!(
            from_sqlite(ValueRef::Text(b"2010-07-16"), Some("DATE")),
            SqlValue::Date(NaiveDate::from_ymd_opt(2010, 7, 16).unwrap())
        );
        assert_eq!(
            from_sqlite(ValueRef::Text(b"not a date"), Some("DATE")),
            SqlValue::from("not a date")
        );
        assert_eq!(from_sqlite(ValueRef::Integer(1), Some("BOOLEAN")), SqlValue::Bool(true));
        assert_eq!(from_sqlite(ValueRef::Integer(2010), Some("YEAR(4)")), SqlValue::Int(2010));
    }

    #[test]
    fn datetime_accepts_space_or_t_separator() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(parse_datetime("2024-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_datetime("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_datetime("yesterday"), None);
    }
}
