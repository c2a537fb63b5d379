//! Request authentication extractors
//!
//! Handlers take [`AuthUser`] to require a valid bearer token, or
//! [`MaybeAuthUser`] on routes that serve anonymous callers too.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::jwt::JwtService;
use crate::role::Role;

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    /// Reject callers whose role differs from `role`
    pub fn require(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::ForbiddenRole)
        }
    }
}

/// Caller identity when a bearer token was supplied.
///
/// A missing `Authorization` header yields `None`; a present but invalid
/// token is still rejected.
#[derive(Debug, Clone, Copy)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

fn rejection_to_error(rejection: TypedHeaderRejection) -> AppError {
    if rejection.is_missing() {
        AppError::NoBearerToken
    } else {
        AppError::InvalidBearerToken
    }
}

async fn authenticate<S>(parts: &mut Parts, state: &S) -> Result<AuthUser, AppError>
where
    JwtService: FromRef<S>,
    S: Send + Sync,
{
    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .map_err(rejection_to_error)?;

    let jwt = JwtService::from_ref(state);
    let user = jwt.validate(bearer.token())?;

    Ok(AuthUser {
        id: user.user_id,
        role: user.role,
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    JwtService: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    JwtService: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match authenticate(parts, state).await {
            Ok(user) => Ok(MaybeAuthUser(Some(user))),
            Err(AppError::NoBearerToken) => Ok(MaybeAuthUser(None)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::test_service;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
        routing::get,
    };
    use tower::ServiceExt;

    fn app() -> Router {
        async fn whoami(user: AuthUser) -> String {
            user.role.to_string()
        }

        async fn maybe(MaybeAuthUser(user): MaybeAuthUser) -> String {
            user.map(|u| u.role.to_string())
                .unwrap_or_else(|| "anonymous".to_string())
        }

        Router::new()
            .route("/whoami", get(whoami))
            .route("/maybe", get(maybe))
            .with_state(test_service(900))
    }

    async fn call(uri: &str, token: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn valid_token_resolves_role() {
        let token = test_service(900)
            .generate_access_token(Uuid::now_v7(), Role::Student)
            .unwrap()
            .token;

        let (status, body) = call("/whoami", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "student");
    }

    #[tokio::test]
    async fn missing_and_invalid_tokens_are_distinguished() {
        let (status, body) = call("/whoami", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("no-bearer-token"));

        let (status, body) = call("/whoami", Some("not-a-jwt")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("invalid-bearer-token"));
    }

    #[tokio::test]
    async fn optional_extractor_allows_anonymous_but_not_garbage() {
        let (status, body) = call("/maybe", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "anonymous");

        let (status, _) = call("/maybe", Some("not-a-jwt")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn require_role_rejects_other_roles() {
        let user = AuthUser {
            id: Uuid::now_v7(),
            role: Role::Mentor,
        };
        assert!(user.require(Role::Mentor).is_ok());
        assert!(matches!(
            user.require(Role::Admin),
            Err(AppError::ForbiddenRole)
        ));
    }
}
