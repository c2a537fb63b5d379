use anyhow::Result;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

mod catalog;
mod chat;
mod config;
mod models;
mod payments;
mod progress;
mod repositories;
mod routes;
mod state;
mod storage;

#[cfg(test)]
mod test_support;

use common::{
    cache::{RedisConfig, RedisPool},
    database::{self, DatabaseConfig},
    jwt::{JwtConfig, JwtService},
    shutdown::shutdown_signal,
    telemetry,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::CatalogService,
    chat::{ChatHub, ChatService},
    config::Settings,
    payments::{PaymentOrchestrator, Prices, gateway::MidtransGateway},
    progress::ProgressEngine,
    state::AppState,
    storage::S3ObjectStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;

    info!("Starting API service");

    let settings = Settings::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;

    if database::health_check(&pool).await {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }
    database::run_migrations(&pool).await?;

    let jwt_service = JwtService::new(JwtConfig::from_env()?);

    let redis_config = RedisConfig::from_env()?;
    let cache = Arc::new(RedisPool::new(&redis_config).await?);

    let storage = Arc::new(S3ObjectStore::from_settings(&settings).await);
    let gateway = MidtransGateway::new(
        settings.midtrans_server_key.clone(),
        settings.midtrans_environment,
        &settings.app_url,
    )?;

    let progress = ProgressEngine::new(pool.clone());
    let catalog = CatalogService::new(pool.clone(), storage, progress.clone());
    let payments = PaymentOrchestrator::new(
        pool.clone(),
        cache.clone(),
        Arc::new(gateway),
        settings.midtrans_server_key.clone(),
        Prices {
            boost: settings.payment_boost_price,
            challenge: settings.payment_challenge_price,
        },
    );
    let chat = ChatService::new(pool.clone(), ChatHub::new());

    let shutdown = CancellationToken::new();
    let app_state = AppState {
        db_pool: pool,
        cache,
        jwt_service,
        catalog,
        progress,
        payments,
        chat,
        shutdown: shutdown.clone(),
    };

    let app = routes::create_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.app_port));
    let listener = TcpListener::bind(addr).await?;
    info!("API service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // open chat sockets would otherwise hold the server open
            shutdown.cancel();
        })
        .await?;

    info!("API service stopped");
    Ok(())
}
