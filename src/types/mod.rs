mod row;
mod sql_value;

pub use row::{ColumnInfo, RawOutcome, RawRows, Row};
pub use sql_value::{SqlType, SqlValue};
