use std::fmt;

use serde::Deserialize;

const DEFAULT_FETCH_BATCH_SIZE: usize = 256;

/// User name and password presented to the backend.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a `Connector` needs to open a session.
///
/// Can be built in code or deserialized from any serde format:
/// ```
/// use sqlcursor::ConnectOptions;
///
/// let options = ConnectOptions::new("localhost:5432")
///     .with_user("app", "secret")
///     .with_database("online_movie_rating");
/// assert_eq!(options.database.as_deref(), Some("online_movie_rating"));
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectOptions {
    /// Backend address. Its meaning depends on the connector
    /// (`host[:port]` for PostgreSQL, a directory for SQLite).
    pub address: String,
    #[serde(default)]
    pub credentials: Credentials,
    /// Database selected on connect. `None` leaves it unset.
    #[serde(default)]
    pub database: Option<String>,
    /// Commit after every mutating statement instead of holding a transaction open.
    #[serde(default)]
    pub autocommit: bool,
    /// Rows requested per backend round trip when fetching or draining everything.
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,
}

fn default_fetch_batch_size() -> usize {
    DEFAULT_FETCH_BATCH_SIZE
}

impl ConnectOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: Credentials::default(),
            database: None,
            autocommit: false,
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::new(user, password);
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    #[must_use]
    pub fn with_fetch_batch_size(mut self, rows: usize) -> Self {
        self.fetch_batch_size = rows.max(1);
        self
    }
}
