//! Authentication service routes

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use common::{auth::AuthUser, error::AppResult, error::problem_instance, extract::AppJson};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    AppState,
    middleware::rate_limit,
    rate_limiter::RateClass,
    service::{Registration, TokenResponse},
};

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub otp: String,
    pub name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub password: String,
}

/// Create the router for the authentication service
pub fn create_router(state: AppState) -> Router {
    let limiter = state.rate_limiter.clone();
    let limited =
        move |class: RateClass| middleware::from_fn_with_state((limiter.clone(), class), rate_limit);

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/auth/register/otp",
            post(request_register_otp).layer(limited(RateClass::Otp)),
        )
        .route(
            "/auth/register",
            post(register).layer(limited(RateClass::Credential)),
        )
        .route("/auth/login", post(login).layer(limited(RateClass::Login)))
        .route(
            "/auth/refresh",
            post(refresh_token).layer(limited(RateClass::Refresh)),
        )
        .route("/auth/logout", post(logout))
        .route(
            "/auth/reset-password/otp",
            post(request_password_reset_otp).layer(limited(RateClass::Otp)),
        )
        .route(
            "/auth/reset-password",
            post(reset_password).layer(limited(RateClass::Credential)),
        )
        .layer(middleware::from_fn(problem_instance))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool).await;
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        AppJson(serde_json::json!({
            "status": if database { "ok" } else { "degraded" },
            "service": "auth-service"
        })),
    )
}

pub async fn request_register_otp(
    State(state): State<AppState>,
    AppJson(payload): AppJson<EmailRequest>,
) -> AppResult<StatusCode> {
    info!("Registration OTP requested");
    state.auth.request_register_otp(&payload.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, AppJson<TokenResponse>)> {
    let tokens = state
        .auth
        .register(Registration {
            email: payload.email,
            otp: payload.otp,
            name: payload.name,
            password: payload.password,
        })
        .await?;
    Ok((StatusCode::CREATED, AppJson(tokens)))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<AppJson<TokenResponse>> {
    let tokens = state.auth.login(&payload.email, &payload.password).await?;
    Ok(AppJson(tokens))
}

/// Refresh token endpoint
pub async fn refresh_token(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RefreshTokenRequest>,
) -> AppResult<AppJson<TokenResponse>> {
    let tokens = state.auth.refresh(&payload.refresh_token).await?;
    Ok(AppJson(tokens))
}

/// Logout endpoint
pub async fn logout(State(state): State<AppState>, user: AuthUser) -> AppResult<StatusCode> {
    state.auth.logout(user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn request_password_reset_otp(
    State(state): State<AppState>,
    AppJson(payload): AppJson<EmailRequest>,
) -> AppResult<StatusCode> {
    info!("Password reset OTP requested");
    state.auth.request_password_reset_otp(&payload.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> AppResult<AppJson<TokenResponse>> {
    let tokens = state
        .auth
        .reset_password(&payload.email, &payload.otp, payload.password)
        .await?;
    Ok(AppJson(tokens))
}
