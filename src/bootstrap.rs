use std::{sync::Arc, time::Duration};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    api::handler::AppState,
    config::{Config, StoreKind},
    error::AppResult,
    settlement::{
        memory::MemorySettlementStore, postgres::PgSettlementStore, SettlementEngine,
        SettlementStore,
    },
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let store: Arc<dyn SettlementStore> = match config.store {
        StoreKind::Postgres => {
            let pool = initialize_database(config).await?;
            Arc::new(PgSettlementStore::new(pool, config.tx_timeout()))
        }
        StoreKind::Memory => {
            let store = match &config.seed_file {
                Some(path) => {
                    info!("🌱 Seeding in-memory store from {}", path);
                    MemorySettlementStore::from_seed_file(path).await?
                }
                None => MemorySettlementStore::new(),
            };
            info!("⚠️  Running on the in-memory store, nothing is persisted");
            Arc::new(store)
        }
    };

    let engine_config = config.engine_config();
    info!(
        "✅ Settlement engine ready: store={}, tax_rate={}, scale={}, tx_timeout={:?}",
        store.name(),
        engine_config.tax.default_rate,
        engine_config.tax.scale,
        engine_config.tx_timeout
    );

    Ok(AppState::new(SettlementEngine::new(store, engine_config)))
}

async fn initialize_database(config: &Config) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", config.max_connections);

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
