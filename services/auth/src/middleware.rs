//! Per-IP rate limiting middleware

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use common::error::AppError;
use tracing::warn;

use crate::rate_limiter::{Decision, RateClass, RateLimiter};

/// Reject the request with 429 once the caller's bucket for `class` is empty
pub async fn rate_limit(
    State((limiter, class)): State<(RateLimiter, RateClass)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    match limiter.check(class, addr.ip()).await {
        Decision::Allowed => Ok(next.run(req).await),
        Decision::Limited { retry_after } => {
            warn!(
                ip = %addr.ip(),
                path = req.uri().path(),
                retry_after,
                "Rate limited request"
            );
            Err(AppError::RateLimited { retry_after })
        }
    }
}
