use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use futures_util::StreamExt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, RowStream};
use tracing::{error, warn};

use crate::config::ConnectOptions;
use crate::error::{Result, SqlCursorError};
use crate::statement::PlaceholderStyle;
use crate::traits::{Connector, DatabaseDriver};
use crate::types::{ColumnInfo, RawOutcome, RawRows, SqlValue};

/// Opens `TokioPostgresDriver` connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn DatabaseDriver>> {
        Ok(Box::new(TokioPostgresDriver::connect(options).await?))
    }
}

/// PostgreSQL driver implementation using tokio-postgres.
///
/// Outside autocommit, every statement runs behind a savepoint. A failed
/// statement is rolled back to it, so earlier changes in the transaction
/// stay usable instead of the whole transaction being aborted.
pub struct TokioPostgresDriver {
    client: Client,
    config: Config,
    autocommit: bool,
    rows: Option<Pin<Box<RowStream>>>,
    in_transaction: bool,
    /// Data was modified inside the open transaction.
    dirty: bool,
}

impl TokioPostgresDriver {
    /// Connect to a PostgreSQL server. The address is `host[:port]`.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let config = pg_config(options)?;
        let client = open_client(&config).await?;
        Ok(Self {
            client,
            config,
            autocommit: options.autocommit,
            rows: None,
            in_transaction: false,
            dirty: false,
        })
    }

    fn pg_params(values: &[SqlValue], types: &[Type]) -> Vec<Box<dyn ToSql + Sync + Send>> {
        values
            .iter()
            .zip(types)
            .map(|(value, ty)| sql_value_to_tosql(value, ty))
            .collect()
    }

    async fn run(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> std::result::Result<RawOutcome, tokio_postgres::Error> {
        let statement = self.client.prepare(sql).await?;
        // Convert SqlValue params to the types the server expects
        let converted_params = Self::pg_params(params, statement.params());

        if statement.columns().is_empty() {
            let param_refs: Vec<&(dyn ToSql + Sync)> = converted_params
                .iter()
                .map(|b| b.as_ref() as &(dyn ToSql + Sync))
                .collect();
            let affected = self.client.execute(&statement, &param_refs).await?;
            self.dirty |= !self.autocommit;
            return Ok(RawOutcome::Affected(affected));
        }

        let columns: Vec<ColumnInfo> = statement
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), Some(c.type_().name())))
            .collect();
        let stream = self
            .client
            .query_raw(
                &statement,
                converted_params.iter().map(|b| b.as_ref() as &dyn ToSql),
            )
            .await?;

        let writes = !is_read_only(sql);
        self.dirty |= writes && !self.autocommit;
        self.rows = Some(Box::pin(stream));
        Ok(RawOutcome::Rows { columns, writes })
    }

    /// Undoes the failed statement so the open transaction stays usable.
    async fn recover(&mut self, err: tokio_postgres::Error) -> SqlCursorError {
        let error = pg_error(err);
        if self.in_transaction && !error.is_connection_error() {
            if let Err(e) = self
                .client
                .batch_execute("ROLLBACK TO SAVEPOINT sqlcursor_statement")
                .await
            {
                warn!(error = %e, "could not roll back the failed statement");
            }
        }
        error
    }
}

async fn open_client(config: &Config) -> Result<Client> {
    let (client, connection) = config.connect(NoTls).await.map_err(|e| {
        if e.code() == Some(&SqlState::INVALID_CATALOG_NAME) {
            SqlCursorError::UnknownDatabase(config.get_dbname().unwrap_or_default().to_string())
        } else {
            SqlCursorError::ConnectionFailed(e.to_string())
        }
    })?;

    // Spawn the connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "PostgreSQL connection error");
        }
    });

    Ok(client)
}

fn pg_config(options: &ConnectOptions) -> Result<Config> {
    let mut config = Config::new();
    let (host, port) = match options.address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                SqlCursorError::ConnectionFailed(format!("invalid port in {}", options.address))
            })?;
            (host, Some(port))
        }
        None => (options.address.as_str(), None),
    };

    config.host(host);
    if let Some(port) = port {
        config.port(port);
    }
    config.user(&options.credentials.user);
    if !options.credentials.password.is_empty() {
        config.password(&options.credentials.password);
    }
    if let Some(database) = &options.database {
        config.dbname(database);
    }
    Ok(config)
}

/// What to send before a statement: open the implicit transaction and
/// mark a savepoint to return to if the statement fails.
fn statement_prelude(autocommit: bool, in_transaction: bool) -> Option<&'static str> {
    match (autocommit, in_transaction) {
        (true, _) => None,
        (false, false) => Some("BEGIN; SAVEPOINT sqlcursor_statement"),
        (false, true) => {
            Some("RELEASE SAVEPOINT sqlcursor_statement; SAVEPOINT sqlcursor_statement")
        }
    }
}

/// Whether a statement only reads, judged by its leading keyword.
/// Anything unrecognized, `WITH` included, counts as a write.
fn is_read_only(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix('(') {
            rest = after;
        } else {
            break;
        }
        rest = rest.trim_start();
    }

    let keyword: String = rest
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_uppercase();
    matches!(
        keyword.as_str(),
        "SELECT" | "VALUES" | "TABLE" | "SHOW" | "EXPLAIN"
    )
}

#[async_trait]
impl DatabaseDriver for TokioPostgresDriver {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<RawOutcome> {
        self.rows = None;
        if let Some(prelude) = statement_prelude(self.autocommit, self.in_transaction) {
            self.client.batch_execute(prelude).await.map_err(pg_error)?;
            self.in_transaction = true;
        }

        match self.run(sql, params).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.recover(err).await),
        }
    }

    async fn fetch(&mut self, max_rows: usize) -> Result<RawRows> {
        let mut rows = Vec::new();
        while rows.len() < max_rows {
            let Some(stream) = self.rows.as_mut() else {
                break;
            };
            match stream.next().await {
                Some(Ok(row)) => rows.push(row_values(&row)?),
                Some(Err(err)) => {
                    self.rows = None;
                    return Err(self.recover(err).await);
                }
                None => self.rows = None,
            }
        }
        Ok(RawRows::new(rows, self.rows.is_none()))
    }

    async fn discard(&mut self) -> Result<()> {
        // The connection skips whatever the server still sends for it.
        self.rows = None;
        Ok(())
    }

    /// PostgreSQL cannot switch databases on a live connection, so this reconnects.
    async fn select_database(&mut self, name: &str) -> Result<()> {
        if self.dirty {
            return Err(SqlCursorError::backend(
                Some("TXN_OPEN"),
                "commit or roll back before switching database",
            ));
        }
        let mut config = self.config.clone();
        config.dbname(name);
        let client = open_client(&config).await?;

        self.rows = None;
        self.client = client;
        self.config = config;
        self.in_transaction = false;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.rows = None;
        if self.in_transaction {
            self.client.batch_execute("COMMIT").await.map_err(pg_error)?;
        }
        self.in_transaction = false;
        self.dirty = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.rows = None;
        if self.in_transaction {
            self.client.batch_execute("ROLLBACK").await.map_err(pg_error)?;
        }
        self.in_transaction = false;
        self.dirty = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.rows = None;
        if self.in_transaction && !self.client.is_closed() {
            self.client.batch_execute("ROLLBACK").await.map_err(pg_error)?;
        }
        self.in_transaction = false;
        self.dirty = false;
        Ok(())
    }
}

fn pg_error(err: tokio_postgres::Error) -> SqlCursorError {
    if err.is_closed() {
        return SqlCursorError::ConnectionFailed(err.to_string());
    }
    match err.as_db_error() {
        Some(db) if *db.code() == SqlState::INVALID_CATALOG_NAME => {
            SqlCursorError::UnknownDatabase(db.message().to_string())
        }
        Some(db) => SqlCursorError::Backend {
            code: Some(db.code().code().to_string()),
            message: db.message().to_string(),
        },
        None => SqlCursorError::backend(None::<String>, err.to_string()),
    }
}

/// Convert a SqlValue to a boxed ToSql trait object matching the parameter's type.
/// Values that cannot fit are passed through unchanged and rejected by the driver.
fn sql_value_to_tosql(value: &SqlValue, ty: &Type) -> Box<dyn ToSql + Sync + Send> {
    match value {
        SqlValue::Null => typed_null(ty),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Int(i) => int_number(*i, ty).boxed(),
        SqlValue::Float(f) => float_number(*f, ty).boxed(),
        SqlValue::Decimal(d) => decimal_number(*d, ty).boxed(),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::Blob(b) => Box::new(b.clone()),
    }
}

/// A number in the wire width of the parameter it is bound to.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PgNumber {
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
}

impl PgNumber {
    fn boxed(self) -> Box<dyn ToSql + Sync + Send> {
        match self {
            PgNumber::Int2(v) => Box::new(v),
            PgNumber::Int4(v) => Box::new(v),
            PgNumber::Int8(v) => Box::new(v),
            PgNumber::Float4(v) => Box::new(v),
            PgNumber::Float8(v) => Box::new(v),
            PgNumber::Numeric(v) => Box::new(v),
        }
    }
}

fn int_number(i: i64, ty: &Type) -> PgNumber {
    if *ty == Type::INT2 {
        if let Ok(v) = i16::try_from(i) {
            return PgNumber::Int2(v);
        }
    } else if *ty == Type::INT4 {
        if let Ok(v) = i32::try_from(i) {
            return PgNumber::Int4(v);
        }
    } else if *ty == Type::NUMERIC {
        return PgNumber::Numeric(Decimal::from(i));
    } else if *ty == Type::FLOAT4 {
        return PgNumber::Float4(i as f32);
    } else if *ty == Type::FLOAT8 {
        return PgNumber::Float8(i as f64);
    }
    PgNumber::Int8(i)
}

fn float_number(f: f64, ty: &Type) -> PgNumber {
    if *ty == Type::FLOAT4 {
        PgNumber::Float4(f as f32)
    } else if *ty == Type::NUMERIC {
        // Through the shortest decimal text, so 8.5 stays 8.5 and not its binary expansion.
        Decimal::from_str(&f.to_string())
            .map(PgNumber::Numeric)
            .unwrap_or(PgNumber::Float8(f))
    } else {
        PgNumber::Float8(f)
    }
}

fn decimal_number(d: Decimal, ty: &Type) -> PgNumber {
    let converted = if *ty == Type::FLOAT8 {
        d.to_f64().map(PgNumber::Float8)
    } else if *ty == Type::FLOAT4 {
        d.to_f32().map(PgNumber::Float4)
    } else {
        None
    };
    converted.unwrap_or(PgNumber::Numeric(d))
}

fn typed_null(ty: &Type) -> Box<dyn ToSql + Sync + Send> {
    if *ty == Type::INT2 {
        Box::new(None::<i16>)
    } else if *ty == Type::INT4 {
        Box::new(None::<i32>)
    } else if *ty == Type::INT8 {
        Box::new(None::<i64>)
    } else if *ty == Type::FLOAT4 {
        Box::new(None::<f32>)
    } else if *ty == Type::FLOAT8 {
        Box::new(None::<f64>)
    } else if *ty == Type::NUMERIC {
        Box::new(None::<Decimal>)
    } else if *ty == Type::BOOL {
        Box::new(None::<bool>)
    } else if *ty == Type::DATE {
        Box::new(None::<NaiveDate>)
    } else if *ty == Type::TIMESTAMP {
        Box::new(None::<NaiveDateTime>)
    } else if *ty == Type::BYTEA {
        Box::new(None::<Vec<u8>>)
    } else {
        Box::new(None::<String>)
    }
}

fn row_values(row: &tokio_postgres::Row) -> Result<Vec<SqlValue>> {
    (0..row.len()).map(|index| row_value(row, index)).collect()
}

/// Convert a row value at a given index to a SqlValue.
fn row_value(row: &tokio_postgres::Row, index: usize) -> Result<SqlValue> {
    let ty = row.columns()[index].type_();
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index)
            .map(|v| v.map(SqlValue::Bool))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)
            .map(|v| v.map(|i| SqlValue::Int(i64::from(i))))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index)
            .map(|v| v.map(|i| SqlValue::Int(i64::from(i))))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index)
            .map(|v| v.map(SqlValue::Int))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)
            .map(|v| v.map(|f| SqlValue::Float(f64::from(f))))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index)
            .map(|v| v.map(SqlValue::Float))
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<Decimal>>(index)
            .map(|v| v.map(SqlValue::Decimal))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(index)
            .map(|v| v.map(SqlValue::Date))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(index)
            .map(|v| v.map(SqlValue::DateTime))
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(index)
            .map(|v| v.map(SqlValue::Blob))
    } else {
        row.try_get::<_, Option<String>>(index)
            .map(|v| v.map(SqlValue::Text))
    };

    value
        .map(|v| v.unwrap_or(SqlValue::Null))
        .map_err(|e| {
            SqlCursorError::backend(
                None::<String>,
                format!("cannot read column {index} of type {ty}: {e}"),
            )
        })
}
