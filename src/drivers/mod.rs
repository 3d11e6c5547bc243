mod sqlite;
mod tokio_postgres;

pub use self::in_memory_test::{
    InMemoryResponse, InMemoryTestDriver, InMemoryTestResponseBuilder, RecordedEvent,
    RecordedQuery,
};
pub use self::sqlite::{SqliteConnector, SqliteDriver};
pub use self::tokio_postgres::{PostgresConnector, TokioPostgresDriver};
