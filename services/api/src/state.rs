//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;
use common::{cache::KeyValueStore, jwt::JwtService};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::CatalogService, chat::ChatService, payments::PaymentOrchestrator,
    progress::ProgressEngine,
};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub cache: Arc<dyn KeyValueStore>,
    pub jwt_service: JwtService,
    pub catalog: CatalogService,
    pub progress: ProgressEngine,
    pub payments: PaymentOrchestrator,
    pub chat: ChatService,
    /// Cancelled when the server starts shutting down; live sockets watch it
    pub shutdown: CancellationToken,
}

impl FromRef<AppState> for JwtService {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_service.clone()
    }
}
