//! Database pool and request deadlines.

use crate::error::PollError;
use once_cell::sync::OnceCell;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::future::Future;
use std::time::Duration;

static DB_POOL: OnceCell<DatabaseConnection> = OnceCell::new();

/// Connects to the database, creates the schema and stores the pool globally. Subsequent
/// calls keep the existing pool.
pub async fn init_db(database_url: String) -> Result<(), DbErr> {
    if DB_POOL.get().is_some() {
        return Ok(());
    }

    let mut options = ConnectOptions::new(database_url);
    options
        .max_connections(20)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    crate::schema::create_tables(&db).await?;

    if DB_POOL.set(db).is_err() {
        log::debug!("Database pool was initialized concurrently, keeping the first");
    }
    Ok(())
}

/// Returns the global pool.
///
/// # Panics
/// If `init_db` has not completed.
pub fn get_db_pool() -> &'static DatabaseConnection {
    DB_POOL.get().expect("Database pool not initialized")
}

/// Runs a store operation under a deadline.
///
/// The future is dropped when the deadline passes. Open transactions roll back when
/// dropped and single-statement writes either commit whole or not at all, so an
/// expired operation leaves no partial poll or vote state behind.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, PollError>
where
    F: Future<Output = Result<T, PollError>>,
{
    match actix_web::rt::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            log::debug!("Store operation exceeded {:?} deadline", deadline);
            Err(PollError::Timeout)
        }
    }
}
