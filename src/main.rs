//! OpenSASE Marketplace - order, payment, refund and wallet service

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_marketplace::http::{router, AppState};
use opensase_marketplace::notify::{spawn_publisher, Notifier};
use opensase_marketplace::services::TableRateCalculator;
use opensase_marketplace::store::{MemoryStore, PgStore, Store};
use opensase_marketplace::{Config, Marketplace, SystemClock};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let store = PgStore::new(pool);
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let nats = match &config.nats_url {
        Some(url) => async_nats::connect(url.as_str()).await.ok(),
        None => None,
    };

    let (notifier, receiver) = Notifier::channel(1024);
    spawn_publisher(receiver, nats);
    let marketplace = Marketplace::new(
        store,
        &config,
        Arc::new(SystemClock),
        Arc::new(TableRateCalculator::new(config.delivery)),
        notifier,
    );
    marketplace.sweeps.clone().run_every(config.sweep_interval);

    let app = router(AppState {
        marketplace,
        jwt_secret: config.jwt_secret.clone(),
        internal_api_key: config.internal_api_key.clone(),
    });
    tracing::info!("OpenSASE Marketplace listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
