use std::path::PathBuf;
use std::sync::mpsc::Receiver;

use rusqlite::{params_from_iter, Connection, Rows};
use tokio::sync::oneshot;
use tracing::debug;

use super::values::{backend_error, from_sqlite};
use crate::error::{Result, SqlCursorError};
use crate::types::{ColumnInfo, RawOutcome, RawRows, SqlValue};

pub(super) type Reply<T> = oneshot::Sender<Result<T>>;

pub(super) enum Command {
    Execute {
        sql: String,
        params: Vec<SqlValue>,
        respond_to: Reply<RawOutcome>,
    },
    Fetch {
        max_rows: usize,
        respond_to: Reply<RawRows>,
    },
    Discard {
        respond_to: Reply<()>,
    },
    SelectDatabase {
        name: String,
        respond_to: Reply<()>,
    },
    Commit {
        respond_to: Reply<()>,
    },
    Rollback {
        respond_to: Reply<()>,
    },
    Close {
        respond_to: Reply<()>,
    },
}

impl Command {
    /// Answers with an error instead of running the command.
    fn reject(self, err: SqlCursorError) {
        match self {
            Command::Execute { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            Command::Fetch { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            Command::Discard { respond_to }
            | Command::SelectDatabase { respond_to, .. }
            | Command::Commit { respond_to }
            | Command::Rollback { respond_to }
            | Command::Close { respond_to } => {
                let _ = respond_to.send(Err(err));
            }
        }
    }
}

/// How serving an open row stream ended.
enum StreamEnd {
    Finished,
    Close(Reply<()>),
    Disconnected,
}

/// Owns the SQLite connection on its own thread.
///
/// A statement with rows stays stepped-into between `Fetch` commands, so
/// rows are read only as they are asked for.
pub(super) struct Worker {
    root: PathBuf,
    create_missing: bool,
    autocommit: bool,
    conn: Option<Connection>,
    /// Data was modified inside the open transaction.
    dirty: bool,
}

impl Worker {
    pub(super) fn new(root: PathBuf, create_missing: bool, autocommit: bool) -> Self {
        Self {
            root,
            create_missing,
            autocommit,
            conn: None,
            dirty: false,
        }
    }

    pub(super) fn run(mut self, receiver: &Receiver<Command>) {
        while let Ok(command) = receiver.recv() {
            match command {
                Command::Execute {
                    sql,
                    params,
                    respond_to,
                } => match self.execute(&sql, &params, respond_to, receiver) {
                    StreamEnd::Finished => {}
                    StreamEnd::Close(respond_to) => {
                        let _ = respond_to.send(self.close());
                        return;
                    }
                    StreamEnd::Disconnected => break,
                },
                Command::Fetch { respond_to, .. } => {
                    let _ = respond_to.send(Ok(RawRows::exhausted()));
                }
                Command::Discard { respond_to } => {
                    let _ = respond_to.send(Ok(()));
                }
                Command::SelectDatabase { name, respond_to } => {
                    let _ = respond_to.send(self.select_database(&name));
                }
                Command::Commit { respond_to } => {
                    let _ = respond_to.send(self.end_transaction("COMMIT"));
                }
                Command::Rollback { respond_to } => {
                    let _ = respond_to.send(self.end_transaction("ROLLBACK"));
                }
                Command::Close { respond_to } => {
                    let _ = respond_to.send(self.close());
                    return;
                }
            }
        }
        debug!("sqlite driver dropped, worker exiting");
    }

    fn execute(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        respond_to: Reply<RawOutcome>,
        receiver: &Receiver<Command>,
    ) -> StreamEnd {
        let Some(conn) = self.conn.as_ref() else {
            let _ = respond_to.send(Err(SqlCursorError::NoDatabaseSelected));
            return StreamEnd::Finished;
        };
        if !self.autocommit && conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("BEGIN") {
                let _ = respond_to.send(Err(backend_error(err)));
                return StreamEnd::Finished;
            }
        }

        let mut stmt = match conn.prepare(sql) {
            Ok(stmt) => stmt,
            Err(err) => {
                let _ = respond_to.send(Err(backend_error(err)));
                return StreamEnd::Finished;
            }
        };
        let writes = !stmt.readonly();

        if stmt.column_count() == 0 {
            let result = stmt
                .execute(params_from_iter(params.iter()))
                .map(|changed| RawOutcome::Affected(changed as u64))
                .map_err(backend_error);
            if result.is_ok() && !self.autocommit {
                self.dirty = true;
            }
            let _ = respond_to.send(result);
            return StreamEnd::Finished;
        }

        let columns: Vec<ColumnInfo> = stmt
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), c.decl_type()))
            .collect();
        let mut rows = match stmt.query(params_from_iter(params.iter())) {
            Ok(rows) => rows,
            Err(err) => {
                let _ = respond_to.send(Err(backend_error(err)));
                return StreamEnd::Finished;
            }
        };
        // The first step runs the statement, so its errors belong to execute.
        let first = match read_row(&mut rows, &columns) {
            Ok(first) => first,
            Err(err) => {
                let _ = respond_to.send(Err(err));
                return StreamEnd::Finished;
            }
        };
        if writes && !self.autocommit {
            self.dirty = true;
        }

        let outcome = RawOutcome::Rows {
            columns: columns.clone(),
            writes,
        };
        let _ = respond_to.send(Ok(outcome));
        stream_rows(rows, &columns, first, receiver)
    }

    fn select_database(&mut self, name: &str) -> Result<()> {
        if self.dirty {
            return Err(SqlCursorError::backend(
                Some("TXN_OPEN"),
                "commit or roll back before switching database",
            ));
        }
        let next = self.open_database(name)?;
        if let Some(old) = self.conn.take() {
            if !old.is_autocommit() {
                old.execute_batch("ROLLBACK").map_err(backend_error)?;
            }
            old.close().map_err(|(_, e)| backend_error(e))?;
        }
        self.conn = Some(next);
        Ok(())
    }

    fn end_transaction(&mut self, sql: &str) -> Result<()> {
        if let Some(conn) = &self.conn {
            if !conn.is_autocommit() {
                conn.execute_batch(sql).map_err(backend_error)?;
            }
        }
        self.dirty = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.dirty = false;
        match self.conn.take() {
            // Closing with a transaction open rolls it back.
            Some(conn) => conn.close().map_err(|(_, e)| backend_error(e)),
            None => Ok(()),
        }
    }

    fn database_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(SqlCursorError::UnknownDatabase(name.to_string()));
        }
        Ok(self.root.join(format!("{name}.db")))
    }

    fn open_database(&self, name: &str) -> Result<Connection> {
        let path = self.database_path(name)?;
        if !path.exists() && !self.create_missing {
            return Err(SqlCursorError::UnknownDatabase(name.to_string()));
        }
        Connection::open(&path)
            .map_err(|e| SqlCursorError::ConnectionFailed(format!("{}: {e}", path.display())))
    }
}

/// Serves `Fetch` from the open statement until it is exhausted or discarded.
/// Returning drops the statement, which releases its locks.
fn stream_rows(
    mut rows: Rows<'_>,
    columns: &[ColumnInfo],
    mut next: Option<Vec<SqlValue>>,
    receiver: &Receiver<Command>,
) -> StreamEnd {
    while next.is_some() {
        let Ok(command) = receiver.recv() else {
            return StreamEnd::Disconnected;
        };
        match command {
            Command::Fetch {
                max_rows,
                respond_to,
            } => {
                let mut batch = Vec::new();
                while batch.len() < max_rows {
                    let Some(row) = next.take() else {
                        break;
                    };
                    batch.push(row);
                    match read_row(&mut rows, columns) {
                        Ok(row) => next = row,
                        Err(err) => {
                            let _ = respond_to.send(Err(err));
                            return StreamEnd::Finished;
                        }
                    }
                }
                let _ = respond_to.send(Ok(RawRows::new(batch, next.is_none())));
            }
            Command::Discard { respond_to } => {
                let _ = respond_to.send(Ok(()));
                return StreamEnd::Finished;
            }
            Command::Close { respond_to } => return StreamEnd::Close(respond_to),
            other => other.reject(SqlCursorError::backend(
                None::<String>,
                "a previous result is still open",
            )),
        }
    }
    StreamEnd::Finished
}

fn read_row(rows: &mut Rows<'_>, columns: &[ColumnInfo]) -> Result<Option<Vec<SqlValue>>> {
    let Some(row) = rows.next().map_err(backend_error)? else {
        return Ok(None);
    };
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            row.get_ref(i)
                .map(|value| from_sqlite(value, column.declared_type.as_deref()))
                .map_err(backend_error)
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}
