//! Embedded SQLite backend.
//!
//! The connection address is a directory and each database is the file
//! `<address>/<name>.db` inside it. The connection lives on a dedicated
//! worker thread; the async side only sends it commands, so a busy or
//! locked database never blocks the runtime.

mod values;
mod worker;

use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::thread;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use self::worker::{Command, Reply, Worker};
use crate::config::ConnectOptions;
use crate::error::{Result, SqlCursorError};
use crate::traits::{Connector, DatabaseDriver};
use crate::types::{RawOutcome, RawRows, SqlValue};

/// Opens `SqliteDriver` connections.
#[derive(Debug, Clone, Default)]
pub struct SqliteConnector {
    create_missing: bool,
}

impl SqliteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create database files that do not exist yet instead of failing
    /// with `UnknownDatabase`.
    #[must_use]
    pub fn create_missing(mut self, create: bool) -> Self {
        self.create_missing = create;
        self
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn DatabaseDriver>> {
        let root = PathBuf::from(&options.address);
        if !root.is_dir() {
            return Err(SqlCursorError::ConnectionFailed(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        if !options.credentials.user.is_empty() {
            debug!(user = %options.credentials.user, "sqlite ignores credentials");
        }

        let driver = SqliteDriver::spawn(Worker::new(
            root,
            self.create_missing,
            options.autocommit,
        ))?;
        if let Some(name) = &options.database {
            driver.select(name).await?;
        }
        Ok(Box::new(driver))
    }
}

/// Handle to one SQLite connection running on its worker thread.
///
/// Dropping the handle stops the worker, which rolls back any open
/// transaction and closes the connection.
pub struct SqliteDriver {
    sender: Sender<Command>,
}

impl SqliteDriver {
    fn spawn(worker: Worker) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Command>();
        thread::Builder::new()
            .name("sqlcursor-sqlite".to_string())
            .spawn(move || worker.run(&receiver))
            .map_err(|err| {
                SqlCursorError::ConnectionFailed(format!(
                    "failed to spawn SQLite worker thread: {err}"
                ))
            })?;
        Ok(Self { sender })
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(build(tx)).map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    async fn select(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|respond_to| Command::SelectDatabase { name, respond_to })
            .await
    }
}

fn worker_gone() -> SqlCursorError {
    SqlCursorError::ConnectionFailed("SQLite worker stopped".to_string())
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<RawOutcome> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.request(|respond_to| Command::Execute {
            sql,
            params,
            respond_to,
        })
        .await
    }

    async fn fetch(&mut self, max_rows: usize) -> Result<RawRows> {
        self.request(|respond_to| Command::Fetch {
            max_rows,
            respond_to,
        })
        .await
    }

    async fn discard(&mut self) -> Result<()> {
        self.request(|respond_to| Command::Discard { respond_to })
            .await
    }

    async fn select_database(&mut self, name: &str) -> Result<()> {
        self.select(name).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.request(|respond_to| Command::Commit { respond_to })
            .await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.request(|respond_to| Command::Rollback { respond_to })
            .await
    }

    async fn close(&mut self) -> Result<()> {
        self.request(|respond_to| Command::Close { respond_to })
            .await
    }
}
