use std::ops::Index;

use crate::types::SqlValue;

/// Name and declared type of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// The type as the backend declared it, if it reported one.
    pub declared_type: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, declared_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.map(str::to_string),
        }
    }
}

/// Driver-agnostic outcome of executing a single statement.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    /// The statement produced a row stream with this schema.
    /// Rows are pulled afterwards with `DatabaseDriver::fetch`.
    Rows {
        columns: Vec<ColumnInfo>,
        /// The statement also modified data, as `INSERT ... RETURNING` does.
        writes: bool,
    },
    /// The statement modified data (or schema) and produced no rows.
    Affected(u64),
}

impl RawOutcome {
    /// Whether executing the statement changed data or schema.
    pub fn modifies_data(&self) -> bool {
        match self {
            RawOutcome::Rows { writes, .. } => *writes,
            RawOutcome::Affected(_) => true,
        }
    }
}

/// A chunk of rows pulled from the driver's open row stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRows {
    pub rows: Vec<Vec<SqlValue>>,
    /// No rows remain after this chunk.
    pub exhausted: bool,
}

impl RawRows {
    pub fn new(rows: Vec<Vec<SqlValue>>, exhausted: bool) -> Self {
        Self { rows, exhausted }
    }

    pub fn exhausted() -> Self {
        Self {
            rows: Vec::new(),
            exhausted: true,
        }
    }
}

/// A single result row.
/// Values are positionally aligned with the cursor's column schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    pub(crate) fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Gets a value by column position.
    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Returns the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Index<usize> for Row {
    type Output = SqlValue;

    fn index(&self, index: usize) -> &SqlValue {
        &self.values[index]
    }
}

impl From<Vec<SqlValue>> for Row {
    fn from(values: Vec<SqlValue>) -> Self {
        Row::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_get() {
        let row = Row::new(vec![SqlValue::Int(1), SqlValue::from("John")]);

        assert_eq!(row.get(0), Some(&SqlValue::Int(1)));
        assert_eq!(row[1].as_text(), Some("John"));
        assert!(row.get(2).is_none());
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_returning_rows_count_as_modification() {
        let select = RawOutcome::Rows {
            columns: vec![ColumnInfo::new("id", None)],
            writes: false,
        };
        let returning = RawOutcome::Rows {
            columns: vec![ColumnInfo::new("id", None)],
            writes: true,
        };

        assert!(!select.modifies_data());
        assert!(returning.modifies_data());
        assert!(RawOutcome::Affected(0).modifies_data());
    }

    #[test]
    fn test_exhausted_chunk_is_empty() {
        let chunk = RawRows::exhausted();
        assert!(chunk.rows.is_empty());
        assert!(chunk.exhausted);
    }
}
