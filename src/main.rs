use std::sync::Arc;

use coursegate::config::Config;
use coursegate::store::{MemoryStore, PgStore, Store};
use coursegate::{app, seed, AppState};

const SEED_FLAG: &str = "--seed";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env()?;
    log::debug!("loaded {:?}", config);
    let seeding = std::env::args().skip(1).any(|arg| arg == SEED_FLAG);

    let store: Arc<dyn Store> = if config.uses_memory_store() {
        log::warn!("Using the in-process store; data is lost on shutdown");
        Arc::new(MemoryStore::new())
    } else {
        let pg = PgStore::connect(&config.database_url, config.max_connections).await?;
        pg.migrate().await?;
        log::info!("Connected to Postgres and applied migrations");
        Arc::new(pg)
    };

    let state = AppState::from_config(store, &config);
    log::info!(
        "Tokens live {} days; passwords hashed with {} PBKDF2 rounds",
        state.tokens.lifetime().num_days(),
        state.credentials.rounds()
    );
    if seeding {
        seed::seed(state.store.as_ref(), &state.credentials).await?;
    }

    log::info!("Starting coursegate HTTP server on http://{}", config.bind_addr);
    axum::Server::bind(&config.bind_addr)
        .serve(app(state).into_make_service())
        .await?;
    Ok(())
}
