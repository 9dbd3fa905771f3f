//! Beauty Commerce - self-hosted commerce backend for a beauty retail store

use std::sync::Arc;

use anyhow::{Context, Result};
use beauty_commerce::{
    api::{self, AppState},
    auth,
    publisher::EventPublisher,
    store::{MemoryStore, PgStore, Store},
    telemetry, Config,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    telemetry::init(config.log_format);

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to Postgres")?;
            store.migrate().await.context("failed to run migrations")?;
            info!("connected to Postgres, migrations applied");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    auth::ensure_admin(store.as_ref(), &config)
        .await
        .context("failed to seed admin account")?;

    let events = EventPublisher::connect(config.nats_url.as_deref()).await;
    let address = config.bind_address();
    let app = api::router(AppState::new(store, config, events));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("Beauty Commerce listening on {address}");
    axum::serve(listener, app).await?;
    Ok(())
}
