//! sqlcursor - A driver-agnostic SQL session and cursor core
//!
//! A [`Session`] owns one connection to a relational backend. [`Cursor`]s
//! execute compiled [`Statement`]s with safely bound parameters and read
//! their results forward-only. Changes are held in an implicit transaction
//! until [`Session::commit`] or [`Session::rollback`].
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use sqlcursor::{ConnectOptions, Session, SqlValue, Statement};
//! use sqlcursor::drivers::PostgresConnector;
//!
//! let options = ConnectOptions::new("localhost:5432")
//!     .with_user("app", "secret")
//!     .with_database("online_movie_rating");
//! let session = Session::open(Arc::new(PostgresConnector), options).await?;
//!
//! let insert = Statement::compile("INSERT INTO movies (title, collection_in_mil) VALUES (?, ?)")?;
//! let mut cursor = session.cursor();
//! cursor.execute(&insert.bind([SqlValue::from("Inception"), SqlValue::from(836)])?).await?;
//! session.commit().await?;
//!
//! let select = Statement::compile("SELECT title FROM movies WHERE collection_in_mil > ?")?;
//! cursor.execute(&select.bind([300])?).await?;
//! while let Some(row) = cursor.fetch_one().await? {
//!     println!("{:?}", row[0]);
//! }
//! session.close().await?;
//! ```

pub mod config;
pub mod drivers;
pub mod error;
pub mod statement;
pub mod traits;
pub mod types;

mod cursor;
mod session;

// Re-export main types for convenient access
pub use config::{ConnectOptions, Credentials};
pub use cursor::{Cursor, ResultInfo, ResultKind};
pub use error::{Result, SqlCursorError};
pub use session::{Session, SessionState};
pub use statement::{BoundStatement, PlaceholderStyle, Statement};
pub use traits::{Connector, DatabaseDriver};
pub use types::{ColumnInfo, Row, SqlType, SqlValue};
