//! Test database setup
//!
//! Every test gets its own SQLite file in a temporary directory, so tests never see each
//! other's polls and need no cleanup. The directory is removed when the `TestDatabase`
//! is dropped.
#![allow(dead_code)]

use pollster::app_config::LimitsConfig;
use pollster::polls::PollStore;
use pollster::rate_limit::{RateGuard, RateGuardConfig};
use pollster::results::ResultsAggregator;
use pollster::votes::VoteLedger;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestDatabase {
    pub db: DatabaseConnection,
    _dir: TempDir,
}

/// Create a fresh database with the full schema
pub async fn setup_test_database() -> Result<TestDatabase, DbErr> {
    let dir = tempfile::tempdir().map_err(|e| DbErr::Custom(e.to_string()))?;
    let path = dir.path().join("polls.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());

    let mut options = ConnectOptions::new(url);
    options.max_connections(8).sqlx_logging(false);

    let db = Database::connect(options).await?;
    pollster::schema::create_tables(&db).await?;

    Ok(TestDatabase { db, _dir: dir })
}

/// Store, ledger and aggregator sharing one database and one rate guard
pub struct TestEngine {
    pub store: PollStore,
    pub ledger: VoteLedger,
    pub results: ResultsAggregator,
    pub guard: Arc<RateGuard>,
    pub database: TestDatabase,
}

impl TestEngine {
    pub fn db(&self) -> &DatabaseConnection {
        &self.database.db
    }
}

/// Rate limits high enough that only tests about quotas ever hit them
pub fn generous_limits() -> RateGuardConfig {
    RateGuardConfig {
        poll_creation_max: 1000,
        poll_update_max: 1000,
        vote_max: 1000,
        ..RateGuardConfig::default()
    }
}

pub async fn setup_engine() -> TestEngine {
    setup_engine_with(generous_limits(), LimitsConfig::default()).await
}

pub async fn setup_engine_with(rate: RateGuardConfig, limits: LimitsConfig) -> TestEngine {
    let database = setup_test_database()
        .await
        .expect("Failed to set up test database");
    let guard = Arc::new(RateGuard::with_config(rate));

    let store = PollStore::new(database.db.clone(), guard.clone(), limits);
    let ledger = VoteLedger::new(database.db.clone(), guard.clone());
    let results = ResultsAggregator::new(store.clone(), ledger.clone());

    TestEngine {
        store,
        ledger,
        results,
        guard,
        database,
    }
}
