use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlcursor::drivers::SqliteConnector;
use sqlcursor::{ConnectOptions, Session, SessionState, SqlCursorError, SqlValue, Statement};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn options(dir: &TempDir) -> ConnectOptions {
    ConnectOptions::new(dir.path().to_string_lossy()).with_user("root", "")
}

async fn movie_session(dir: &TempDir) -> Session {
    init_tracing();
    let connector = SqliteConnector::new().create_missing(true);
    let session = Session::open(
        Arc::new(connector),
        options(dir).with_database("online_movie_rating"),
    )
    .await
    .unwrap();

    let mut cursor = session.cursor();
    let schema = Statement::compile(
        "CREATE TABLE movies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title VARCHAR(100),
            release_year YEAR(4),
            genre VARCHAR(100),
            collection_in_mil INT
        );
        CREATE TABLE ratings (
            movie_id INT,
            reviewer_id INT,
            rating DECIMAL(2,1),
            rated_on DATE
        )",
    )
    .unwrap();
    cursor.execute(&schema.bind_empty().unwrap()).await.unwrap();
    cursor.drain().await.unwrap();
    session.commit().await.unwrap();
    session
}

async fn insert_movies(session: &Session, movies: &[(&str, i64, &str, i64)]) {
    let insert = Statement::compile(
        "INSERT INTO movies (title, release_year, genre, collection_in_mil) VALUES (?, ?, ?, ?)",
    )
    .unwrap();
    let mut cursor = session.cursor();
    for (title, year, genre, collection) in movies {
        let bound = insert
            .bind([
                SqlValue::from(*title),
                SqlValue::Int(*year),
                SqlValue::from(*genre),
                SqlValue::Int(*collection),
            ])
            .unwrap();
        let info = cursor.execute(&bound).await.unwrap();
        assert_eq!(info.affected_rows(), Some(1));
    }
}

async fn count_movies(session: &Session) -> i64 {
    let mut cursor = session.cursor();
    let count = Statement::compile("SELECT COUNT(*) FROM movies").unwrap();
    cursor.execute(&count.bind_empty().unwrap()).await.unwrap();
    let row = cursor.fetch_one().await.unwrap().unwrap();
    row[0].as_int().unwrap()
}

#[tokio::test]
async fn test_insert_commit_and_query() {
    let dir = TempDir::new().unwrap();
    let session = movie_session(&dir).await;

    insert_movies(
        &session,
        &[
            ("Forrest Gump", 1994, "Drama", 330),
            ("3 Idiots", 2009, "Drama", 2),
            ("Eternal Sunshine of the Spotless Mind", 2004, "Drama", 34),
            ("Good Will Hunting", 1997, "Drama", 138),
            ("Skyfall", 2012, "Action", 304),
        ],
    )
    .await;
    assert_eq!(session.state().await, SessionState::InTransaction);
    session.commit().await.unwrap();
    assert_eq!(session.state().await, SessionState::Connected);

    let mut cursor = session.cursor();
    let select = Statement::compile(
        "SELECT title, collection_in_mil FROM movies WHERE collection_in_mil > ? ORDER BY id",
    )
    .unwrap();
    let info = cursor.execute(&select.bind([300]).unwrap()).await.unwrap();
    let names: Vec<_> = info.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["title", "collection_in_mil"]);

    let titles: Vec<String> = cursor
        .fetch_all()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row[0].as_text().unwrap().to_string())
        .collect();
    assert_eq!(titles, ["Forrest Gump", "Skyfall"]);

    session.close().await.unwrap();

    // Committed rows survive a new session
    let reopened = Session::open(
        Arc::new(SqliteConnector::new()),
        options(&dir).with_database("online_movie_rating"),
    )
    .await
    .unwrap();
    assert_eq!(count_movies(&reopened).await, 5);
}

#[tokio::test]
async fn test_hostile_text_round_trips_verbatim() {
    let dir = TempDir::new().unwrap();
    let session = movie_session(&dir).await;

    let hostile = "x'); DROP TABLE movies; -- \"quoted\" ?";
    insert_movies(&session, &[(hostile, 2020, "Drama", 1)]).await;

    let mut cursor = session.cursor();
    let select = Statement::compile("SELECT title FROM movies WHERE title = ?").unwrap();
    cursor.execute(&select.bind([hostile]).unwrap()).await.unwrap();
    let row = cursor.fetch_one().await.unwrap().unwrap();
    assert_eq!(row[0].as_text(), Some(hostile));
    assert!(cursor.fetch_one().await.unwrap().is_none());

    // Table is still there
    assert_eq!(count_movies(&session).await, 1);
}

#[tokio::test]
async fn test_rollback_discards_uncommitted_changes() {
    let dir = TempDir::new().unwrap();
    let session = movie_session(&dir).await;

    insert_movies(&session, &[("Titanic", 1997, "Romance", 2195)]).await;
    session.commit().await.unwrap();

    insert_movies(&session, &[("Avatar", 2009, "Sci-Fi", 2788)]).await;
    assert_eq!(count_movies(&session).await, 2);

    session.rollback().await.unwrap();
    assert_eq!(session.state().await, SessionState::Connected);
    assert_eq!(count_movies(&session).await, 1);
}

#[tokio::test]
async fn test_database_must_exist_and_be_selected() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let strict = SqliteConnector::new();

    let session = Session::new(Arc::new(strict.clone()), options(&dir).with_database("imdb"));
    assert!(matches!(
        session.connect().await,
        Err(SqlCursorError::UnknownDatabase(name)) if name == "imdb"
    ));
    assert_eq!(session.state().await, SessionState::Disconnected);

    // Create the database through a permissive connector
    drop(movie_session(&dir).await);

    let session = Session::open(Arc::new(strict), options(&dir)).await.unwrap();
    let mut cursor = session.cursor();
    let select = Statement::compile("SELECT COUNT(*) FROM movies").unwrap();
    assert!(matches!(
        cursor.execute(&select.bind_empty().unwrap()).await,
        Err(SqlCursorError::NoDatabaseSelected)
    ));
    assert!(matches!(
        session.select_database("imdb").await,
        Err(SqlCursorError::UnknownDatabase(_))
    ));

    session.select_database("online_movie_rating").await.unwrap();
    assert_eq!(session.database().await.as_deref(), Some("online_movie_rating"));
    cursor.execute(&select.bind_empty().unwrap()).await.unwrap();
    assert_eq!(cursor.fetch_all().await.unwrap()[0][0], SqlValue::Int(0));
}

#[tokio::test]
async fn test_batch_yields_one_result_per_statement() {
    let dir = TempDir::new().unwrap();
    let session = movie_session(&dir).await;
    let mut cursor = session.cursor();

    let batch = Statement::compile(
        "INSERT INTO movies (title, collection_in_mil) VALUES (?, ?);
         INSERT INTO movies (title, collection_in_mil) VALUES (?, ?);
         SELECT title FROM movies WHERE collection_in_mil >= ? ORDER BY id",
    )
    .unwrap();
    let bound = batch
        .bind([
            SqlValue::from("Up"),
            SqlValue::Int(735),
            SqlValue::from("Heat"),
            SqlValue::Int(187),
            SqlValue::Int(100),
        ])
        .unwrap();

    let first = cursor.execute(&bound).await.unwrap();
    assert_eq!(first.result_count(), 3);
    assert_eq!(first.affected_rows(), Some(1));

    let second = cursor.next_result().await.unwrap().unwrap();
    assert_eq!(second.affected_rows(), Some(1));

    let third = cursor.next_result().await.unwrap().unwrap();
    assert!(third.is_last());
    let titles: Vec<_> = cursor
        .fetch_all()
        .await
        .unwrap()
        .iter()
        .map(|row| row[0].as_text().unwrap().to_string())
        .collect();
    assert_eq!(titles, ["Up", "Heat"]);
    assert!(cursor.next_result().await.unwrap().is_none());
}

#[tokio::test]
async fn test_typed_values_round_trip() {
    let dir = TempDir::new().unwrap();
    let session = movie_session(&dir).await;
    let mut cursor = session.cursor();

    let rated_on = NaiveDate::from_ymd_opt(2021, 3, 14).unwrap();
    let insert = Statement::compile(
        "INSERT INTO ratings (movie_id, reviewer_id, rating, rated_on) VALUES (?, ?, ?, ?)",
    )
    .unwrap();
    let bound = insert
        .bind([
            SqlValue::Int(1),
            SqlValue::Int(7),
            SqlValue::Decimal(Decimal::from_str("8.5").unwrap()),
            SqlValue::Date(rated_on),
        ])
        .unwrap();
    cursor.execute(&bound).await.unwrap();
    session.commit().await.unwrap();

    let select = Statement::compile(
        "SELECT rating, rated_on, reviewer_id FROM ratings WHERE movie_id = ?",
    )
    .unwrap();
    cursor.execute(&select.bind([1]).unwrap()).await.unwrap();
    let row = cursor.fetch_one().await.unwrap().unwrap();

    assert_eq!(row[0].as_decimal(), Some(Decimal::new(85, 1)));
    assert_eq!(row[1].as_date(), Some(rated_on));
    assert_eq!(row[2], SqlValue::Int(7));
    assert_eq!(cursor.columns()[1].declared_type.as_deref(), Some("DATE"));
}

#[tokio::test]
async fn test_backend_errors_carry_the_sqlite_code() {
    let dir = TempDir::new().unwrap();
    let session = movie_session(&dir).await;
    let mut cursor = session.cursor();

    let bad = Statement::compile("SELECT * FROM no_such_table").unwrap();
    let err = cursor.execute(&bad.bind_empty().unwrap()).await.unwrap_err();
    assert!(matches!(err, SqlCursorError::Backend { .. }));
    assert!(err.to_string().contains("no_such_table"));

    // Backend errors keep the session usable
    assert_eq!(count_movies(&session).await, 0);
}

#[tokio::test]
async fn test_autocommit_read_does_not_block_another_writer() {
    let dir = TempDir::new().unwrap();
    let writer = movie_session(&dir).await;
    let reader = Session::open(
        Arc::new(SqliteConnector::new()),
        options(&dir)
            .with_database("online_movie_rating")
            .with_autocommit(true),
    )
    .await
    .unwrap();

    let mut cursor = reader.cursor();
    let count = Statement::compile("SELECT COUNT(*) FROM movies").unwrap();
    cursor.execute(&count.bind_empty().unwrap()).await.unwrap();
    assert_eq!(cursor.fetch_all().await.unwrap()[0][0], SqlValue::Int(0));
    assert_eq!(reader.state().await, SessionState::Connected);

    insert_movies(&writer, &[("Skyfall", 2012, "Action", 304)]).await;
    writer.commit().await.unwrap();

    cursor.execute(&count.bind_empty().unwrap()).await.unwrap();
    assert_eq!(cursor.fetch_all().await.unwrap()[0][0], SqlValue::Int(1));
}

#[tokio::test]
async fn test_insert_returning_joins_the_transaction() {
    let dir = TempDir::new().unwrap();
    let session = movie_session(&dir).await;
    let mut cursor = session.cursor();

    let insert =
        Statement::compile("INSERT INTO movies (title, collection_in_mil) VALUES (?, ?) RETURNING id")
            .unwrap();
    let info = cursor
        .execute(&insert.bind([SqlValue::from("Up"), SqlValue::Int(735)]).unwrap())
        .await
        .unwrap();
    assert!(info.has_rows());
    assert_eq!(cursor.fetch_all().await.unwrap()[0][0], SqlValue::Int(1));
    assert_eq!(session.state().await, SessionState::InTransaction);

    // Switching database would silently drop the insert
    let err = session
        .select_database("online_movie_rating")
        .await
        .unwrap_err();
    assert!(matches!(err, SqlCursorError::Backend { ref code, .. } if code.as_deref() == Some("TXN_OPEN")));

    session.commit().await.unwrap();
    assert_eq!(count_movies(&session).await, 1);
}

#[tokio::test]
async fn test_trailing_comment_is_not_sent() {
    let dir = TempDir::new().unwrap();
    let session = movie_session(&dir).await;
    let mut cursor = session.cursor();

    let stmt = Statement::compile("SELECT COUNT(*) FROM movies; -- done").unwrap();
    let info = cursor.execute(&stmt.bind_empty().unwrap()).await.unwrap();
    assert_eq!(info.result_count(), 1);
    assert_eq!(cursor.fetch_all().await.unwrap()[0][0], SqlValue::Int(0));
    assert!(cursor.next_result().await.unwrap().is_none());
}
