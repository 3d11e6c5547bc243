use async_trait::async_trait;

use crate::config::ConnectOptions;
use crate::error::Result;
use crate::statement::PlaceholderStyle;
use crate::types::{RawOutcome, RawRows, SqlValue};

/// Trait for database driver implementations.
///
/// A driver is one open connection to a backend. It is owned by exactly one
/// session, which never has two calls in flight on it. Drivers are responsible for:
/// - Converting SqlValue parameters to native types, strictly as data
/// - Holding at most one open row stream at a time
/// - Opening a transaction before the first statement after a commit or rollback
#[async_trait]
pub trait DatabaseDriver: Send {
    /// How positional placeholders must be written in statements sent to this driver.
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }

    /// Execute one statement with its bound parameters.
    /// A `RawOutcome::Rows` result leaves a row stream open for `fetch`.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<RawOutcome>;

    /// Pull up to `max_rows` rows from the open row stream.
    async fn fetch(&mut self, max_rows: usize) -> Result<RawRows>;

    /// Drop the open row stream, if any, without materializing it.
    async fn discard(&mut self) -> Result<()>;

    /// Switch the connection's current database.
    async fn select_database(&mut self, name: &str) -> Result<()>;

    /// Make the open transaction durable. Accepted when none is open.
    async fn commit(&mut self) -> Result<()>;

    /// Discard the open transaction. Accepted when none is open.
    async fn rollback(&mut self) -> Result<()>;

    /// Release the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Opens driver connections for sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn DatabaseDriver>>;
}
