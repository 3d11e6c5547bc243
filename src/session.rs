use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConnectOptions;
use crate::cursor::Cursor;
use crate::error::{Result, SqlCursorError};
use crate::statement::PlaceholderStyle;
use crate::traits::{Connector, DatabaseDriver};
use crate::types::{RawOutcome, RawRows, SqlValue};

/// Lifecycle of a session.
///
/// `Disconnected -> Connected -> InTransaction -> Connected -> Closed`.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// Connected with uncommitted changes.
    InTransaction,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::InTransaction => "in transaction",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A sub-statement waiting to be sent, already rendered for the driver.
pub(crate) type PendingStatement = (String, Vec<SqlValue>);

/// The one execution on a session whose results have not been fully read.
pub(crate) struct ActiveExecution {
    pub(crate) id: u64,
    /// Liveness token of the cursor that owns these results.
    pub(crate) owner: Weak<()>,
    /// Index of the current sub-result and the batch size.
    pub(crate) index: usize,
    pub(crate) count: usize,
    /// The current sub-result still has rows on the driver.
    pub(crate) rows_open: bool,
    pub(crate) remaining: VecDeque<PendingStatement>,
}

impl ActiveExecution {
    pub(crate) fn is_settled(&self) -> bool {
        !self.rows_open && self.remaining.is_empty()
    }
}

pub(crate) struct SessionInner {
    pub(crate) state: SessionState,
    driver: Option<Box<dyn DatabaseDriver>>,
    connector: Arc<dyn Connector>,
    pub(crate) options: ConnectOptions,
    database: Option<String>,
    pub(crate) active: Option<ActiveExecution>,
    next_execution_id: u64,
}

impl SessionInner {
    /// Fails unless the session can talk to the backend.
    pub(crate) fn check_open(&self) -> Result<()> {
        match self.state {
            SessionState::Connected | SessionState::InTransaction => Ok(()),
            SessionState::Disconnected => Err(SqlCursorError::NotConnected),
            SessionState::Closed => Err(SqlCursorError::SessionClosed),
        }
    }

    /// Checks the session is open and has no unread results left by another execution.
    pub(crate) async fn check_idle(&mut self) -> Result<()> {
        self.check_open()?;
        self.discard_orphan().await?;
        if self.active.is_some() {
            return Err(SqlCursorError::UnreadResults);
        }
        Ok(())
    }

    pub(crate) fn next_execution_id(&mut self) -> u64 {
        self.next_execution_id += 1;
        self.next_execution_id
    }

    fn driver(&mut self) -> Result<&mut Box<dyn DatabaseDriver>> {
        self.check_open()?;
        self.driver.as_mut().ok_or(SqlCursorError::NotConnected)
    }

    pub(crate) fn driver_placeholder_style(&mut self) -> Result<PlaceholderStyle> {
        Ok(self.driver()?.placeholder_style())
    }

    /// Moves the session to `Closed` when the connection itself failed.
    fn observe<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_connection_error() {
                warn!(error = %err, "connection lost, closing session");
                self.state = SessionState::Closed;
                self.driver = None;
                self.active = None;
            }
        }
        result
    }

    /// Results owned by a dropped cursor can never be read; throw them away.
    async fn discard_orphan(&mut self) -> Result<()> {
        let orphaned = self
            .active
            .as_ref()
            .is_some_and(|active| active.owner.upgrade().is_none());
        if !orphaned {
            return Ok(());
        }

        if let Some(active) = self.active.take() {
            warn!(
                execution = active.id,
                abandoned = active.remaining.len(),
                "discarding unread results of a dropped cursor"
            );
            if active.rows_open {
                self.discard_rows().await?;
            }
        }
        Ok(())
    }

    /// Sends one statement and records its effect on the transaction state.
    pub(crate) async fn run(&mut self, sql: &str, params: &[SqlValue]) -> Result<RawOutcome> {
        debug!(sql, params = params.len(), "executing statement");
        let result = self.driver()?.execute(sql, params).await;
        let outcome = self.observe(result)?;

        if let RawOutcome::Affected(count) = outcome {
            debug!(affected = count, "statement modified data");
        }
        if outcome.modifies_data() {
            if !self.options.autocommit {
                self.state = SessionState::InTransaction;
            } else if let RawOutcome::Affected(_) = outcome {
                self.commit_autocommit().await?;
            }
            // Autocommit row results are committed by `finish_rows`.
        }
        Ok(outcome)
    }

    /// Called once a row result was read to the end or discarded.
    /// Under autocommit this ends the statement's transaction, reads included,
    /// so no backend locks outlive the result.
    pub(crate) async fn finish_rows(&mut self) -> Result<()> {
        self.commit_autocommit().await
    }

    async fn commit_autocommit(&mut self) -> Result<()> {
        if !self.options.autocommit {
            return Ok(());
        }
        let result = self.driver()?.commit().await;
        self.observe(result)
    }

    pub(crate) async fn fetch(&mut self, max_rows: usize) -> Result<RawRows> {
        let result = self.driver()?.fetch(max_rows).await;
        self.observe(result)
    }

    pub(crate) async fn discard_rows(&mut self) -> Result<()> {
        let result = self.driver()?.discard().await;
        self.observe(result)?;
        self.finish_rows().await
    }
}

/// One logical, serialized connection to a relational backend.
///
/// Statements run in submission order. At most one execution across all of
/// the session's cursors may have unread results at a time.
///
/// # Example
/// ```ignore
/// let session = Session::open(connector, ConnectOptions::new("localhost:5432")).await?;
/// let mut cursor = session.cursor();
/// let stmt = Statement::compile("SELECT * FROM movies WHERE collection_in_mil > ?")?;
/// cursor.execute(&stmt.bind([300])?).await?;
/// for row in cursor.fetch_all().await? {
///     println!("{:?}", row.values());
/// }
/// session.close().await?;
/// ```
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    /// Create a session in the `Disconnected` state.
    pub fn new(connector: Arc<dyn Connector>, options: ConnectOptions) -> Self {
        let inner = SessionInner {
            state: SessionState::Disconnected,
            driver: None,
            connector,
            options,
            database: None,
            active: None,
            next_execution_id: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Create a session and connect it.
    pub async fn open(connector: Arc<dyn Connector>, options: ConnectOptions) -> Result<Self> {
        let session = Self::new(connector, options);
        session.connect().await?;
        Ok(session)
    }

    /// Open the backend connection. Connecting an already connected session is a no-op.
    ///
    /// A `ConnectionFailed` error closes the session for good; other errors
    /// (such as `UnknownDatabase`) leave it disconnected.
    pub async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Closed => return Err(SqlCursorError::SessionClosed),
            SessionState::Connected | SessionState::InTransaction => return Ok(()),
            SessionState::Disconnected => {}
        }

        let connector = Arc::clone(&inner.connector);
        match connector.connect(&inner.options).await {
            Ok(driver) => {
                info!(
                    address = %inner.options.address,
                    database = inner.options.database.as_deref().unwrap_or("<none>"),
                    "session connected"
                );
                inner.driver = Some(driver);
                inner.database = inner.options.database.clone();
                inner.state = SessionState::Connected;
                Ok(())
            }
            Err(err) => {
                warn!(address = %inner.options.address, error = %err, "connect failed");
                if err.is_connection_error() {
                    inner.state = SessionState::Closed;
                }
                Err(err)
            }
        }
    }

    /// Create a cursor bound to this session.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(Arc::clone(&self.inner))
    }

    /// Switch the current database.
    pub async fn select_database(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_idle().await?;
        let result = inner.driver()?.select_database(name).await;
        inner.observe(result)?;
        info!(database = name, "database selected");
        inner.database = Some(name.to_string());
        Ok(())
    }

    /// Make all changes since the last commit or rollback durable.
    /// Committing with nothing pending succeeds.
    pub async fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_idle().await?;
        let result = inner.driver()?.commit().await;
        inner.observe(result)?;
        debug!("transaction committed");
        inner.state = SessionState::Connected;
        Ok(())
    }

    /// Discard all changes since the last commit or rollback.
    pub async fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_idle().await?;
        let result = inner.driver()?.rollback().await;
        inner.observe(result)?;
        debug!("transaction rolled back");
        inner.state = SessionState::Connected;
        Ok(())
    }

    /// Release the connection. Cursors of this session fail with
    /// `SessionClosed` from now on. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Closed {
            return Ok(());
        }
        if inner.state == SessionState::InTransaction {
            warn!("closing session with uncommitted changes");
        }

        inner.state = SessionState::Closed;
        inner.active = None;
        let Some(mut driver) = inner.driver.take() else {
            return Ok(());
        };
        info!(address = %inner.options.address, "session closed");
        driver.close().await
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// The database selected on connect or by `select_database`.
    pub async fn database(&self) -> Option<String> {
        self.inner.lock().await.database.clone()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
