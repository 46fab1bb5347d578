use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::web::Data;
use actix_web::{http::header, App, HttpServer};
use anyhow::Context;
use env_logger::Env;
use pollster::app_config;
use pollster::db::{get_db_pool, init_db};
use pollster::polls::PollStore;
use pollster::rate_limit::{init_rate_limits, refresh_rate_limits, RATE_GUARD};
use pollster::results::ResultsAggregator;
use pollster::votes::VoteLedger;
use std::time::Duration;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_lib_mods();
    app_config::init();

    let config = app_config::get_config();
    let database_url = config
        .database_url()
        .context("DATABASE_URL or POLLSTER_DATABASE__URL must be set")?;

    init_db(database_url)
        .await
        .context("Failed to connect to the database")?;
    let db = get_db_pool().clone();

    init_rate_limits(&config);

    let store = PollStore::new(db.clone(), RATE_GUARD.clone(), app_config::limits());
    let ledger = VoteLedger::new(db, RATE_GUARD.clone());
    let results = ResultsAggregator::new(store.clone(), ledger.clone());

    // Spawn rate guard maintenance task. Rate limit edits in config.toml are picked up on
    // the next tick; other settings need a restart.
    actix_web::rt::spawn(async {
        let mut interval = actix_web::rt::time::interval(Duration::from_secs(300)); // Every 5 minutes
        loop {
            interval.tick().await;
            match refresh_rate_limits() {
                Ok(true) => log::info!("Rate limits updated from configuration"),
                Ok(false) => {}
                Err(e) => log::warn!("Failed to reload configuration: {}", e),
            }
            RATE_GUARD.cleanup_old_entries();
            log::debug!(
                "Rate guard cleanup completed, {} keys tracked",
                RATE_GUARD.tracked_keys_count()
            );
        }
    });

    let bind = config.server.bind.clone();
    log::info!("Listening on {}", bind);

    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(store.clone()))
            .app_data(Data::new(ledger.clone()))
            .app_data(Data::new(results.clone()))
            .wrap(DefaultHeaders::new().add((header::X_CONTENT_TYPE_OPTIONS, "nosniff")))
            .wrap(Logger::new("%a %r %s %Dms"))
            .configure(pollster::web::configure)
    })
    .bind(&bind)
    .with_context(|| format!("Failed to bind {}", bind))?
    .run()
    .await?;

    Ok(())
}

/// Initialize third party crates we rely on but don't have control over.
fn init_lib_mods() {
    // A missing .env file is fine; the environment may already be set.
    if let Err(e) = dotenv::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}

