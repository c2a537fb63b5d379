use anyhow::Result;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

mod config;
mod mailer;
mod middleware;
mod models;
mod otp;
mod rate_limiter;
mod repositories;
mod routes;
mod service;

use axum::extract::FromRef;
use common::{
    cache::{RedisConfig, RedisPool},
    database::{self, DatabaseConfig},
    jwt::{JwtConfig, JwtService},
    shutdown::shutdown_signal,
    telemetry,
};
use sqlx::PgPool;
use tokio::net::TcpListener;

use crate::{
    config::Settings, mailer::SmtpMailer, rate_limiter::RateLimiter, service::AuthService,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub auth: AuthService,
    pub jwt_service: JwtService,
    pub rate_limiter: RateLimiter,
}

impl FromRef<AppState> for JwtService {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_service.clone()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;

    info!("Starting authentication service");

    let settings = Settings::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;

    if database::health_check(&pool).await {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    let jwt_service = JwtService::new(JwtConfig::from_env()?);

    let redis_config = RedisConfig::from_env()?;
    let redis_pool = RedisPool::new(&redis_config).await?;

    let mailer = SmtpMailer::new(&settings)?;
    let auth = AuthService::new(
        pool.clone(),
        Arc::new(redis_pool),
        Arc::new(mailer),
        jwt_service.clone(),
    );

    let rate_limiter = RateLimiter::new();
    let mut sweeper = rate_limiter.start_sweeper().await?;

    let app_state = AppState {
        db_pool: pool,
        auth,
        jwt_service,
        rate_limiter,
    };

    let app = routes::create_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.app_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Authentication service listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.shutdown().await?;
    info!("Authentication service stopped");
    Ok(())
}
