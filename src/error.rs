use thiserror::Error;

use crate::types::SqlType;

/// Error type for sqlcursor operations
#[derive(Debug, Error)]
pub enum SqlCursorError {
    /// The backend was unreachable, rejected the credentials, or dropped the connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Session is closed")]
    SessionClosed,

    /// A previous execution on the same session still has unread results.
    #[error("Unread results remain from a previous execution; drain them first")]
    UnreadResults,

    #[error("Expected {expected} parameter(s), got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Parameter {position} expects {expected}, got {actual}")]
    TypeMismatch {
        position: usize,
        expected: SqlType,
        actual: SqlType,
    },

    #[error("Malformed statement at byte {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    #[error("No database selected")]
    NoDatabaseSelected,

    /// Any other rejection reported by the backend, carried verbatim.
    #[error("Backend error{}: {message}", code_suffix(.code))]
    Backend {
        code: Option<String>,
        message: String,
    },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),
}

impl SqlCursorError {
    /// Builds a backend error from a code and message.
    pub fn backend(code: Option<impl Into<String>>, message: impl Into<String>) -> Self {
        SqlCursorError::Backend {
            code: code.map(Into::into),
            message: message.into(),
        }
    }

    /// Returns true if the error means the underlying connection is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, SqlCursorError::ConnectionFailed(_))
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" [{c}]"))
        .unwrap_or_default()
}

/// Result type alias for sqlcursor operations
pub type Result<T> = std::result::Result<T, SqlCursorError>;
