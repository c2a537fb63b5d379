//! JWT service for access token issuance and validation
//!
//! Access tokens are stateless HS256 tokens carrying the user id and role.
//! Refresh tokens are opaque and stored server-side by the auth service, so
//! this module only deals with the access side.

use anyhow::Result;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::role::Role;

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Shared HMAC secret
    pub secret: String,
    /// Access token lifetime in seconds (default: 15 minutes)
    pub access_token_expiry: u64,
    /// Refresh token lifetime in seconds (default: 30 days)
    pub refresh_token_expiry: u64,
}

impl JwtConfig {
    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: HMAC secret used to sign access tokens
    /// - `JWT_ACCESS_TOKEN_EXPIRY`: Access token expiry in seconds (default: 900)
    /// - `JWT_REFRESH_TOKEN_EXPIRY`: Refresh token expiry in seconds (default: 2592000)
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;

        if secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }

        let access_token_expiry = std::env::var("JWT_ACCESS_TOKEN_EXPIRY")
            .unwrap_or_else(|_| "900".to_string()) // 15 minutes
            .parse()
            .unwrap_or(900);

        let refresh_token_expiry = std::env::var("JWT_REFRESH_TOKEN_EXPIRY")
            .unwrap_or_else(|_| "2592000".to_string()) // 30 days
            .parse()
            .unwrap_or(2_592_000);

        Ok(JwtConfig {
            secret,
            access_token_expiry,
            refresh_token_expiry,
        })
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    /// User role
    pub role: Role,
    /// Issued at time
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
}

/// Identity attached to an authenticated request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Role,
}

/// A freshly signed access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        JwtService {
            encoding_key,
            decoding_key,
            validation,
            config,
        }
    }

    /// Sign an access token for a user
    pub fn generate_access_token(&self, user_id: Uuid, role: Role) -> Result<AccessToken> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(self.config.access_token_expiry as i64);

        let claims = Claims {
            sub: user_id,
            role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(AccessToken { token, expires_at })
    }

    /// Verify signature and expiry, returning the caller identity
    pub fn validate(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!("Rejected access token: {}", e);
            AppError::InvalidBearerToken
        })?;

        Ok(AuthenticatedUser {
            user_id: data.claims.sub,
            role: data.claims.role,
        })
    }

    /// Get the access token expiry time in seconds
    pub fn access_token_expiry(&self) -> u64 {
        self.config.access_token_expiry
    }

    /// Get the refresh token expiry time in seconds
    pub fn refresh_token_expiry(&self) -> u64 {
        self.config.refresh_token_expiry
    }
}

#[cfg(test)]
pub(crate) fn test_service(access_token_expiry: u64) -> JwtService {
    JwtService::new(JwtConfig {
        secret: "test-secret-that-is-long-enough-for-hs256".to_string(),
        access_token_expiry,
        refresh_token_expiry: 3600,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn issued_token_validates_to_same_identity() {
        let service = test_service(900);
        let user_id = Uuid::now_v7();

        let issued = service
            .generate_access_token(user_id, Role::Mentor)
            .unwrap();
        let user = service.validate(&issued.token).unwrap();

        assert_eq!(user.user_id, user_id);
        assert_eq!(user.role, Role::Mentor);
        assert!(issued.expires_at > Utc::now());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issuer = JwtService::new(JwtConfig {
            secret: "another-secret".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 3600,
        });
        let token = issuer
            .generate_access_token(Uuid::now_v7(), Role::Admin)
            .unwrap()
            .token;

        assert!(matches!(
            test_service(900).validate(&token),
            Err(AppError::InvalidBearerToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = test_service(900);
        let claims = Claims {
            sub: Uuid::now_v7(),
            role: Role::Student,
            iat: Utc::now().timestamp() - 1000,
            exp: Utc::now().timestamp() - 100,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret-that-is-long-enough-for-hs256"),
        )
        .unwrap();

        assert!(matches!(
            service.validate(&token),
            Err(AppError::InvalidBearerToken)
        ));
    }

    #[test]
    #[serial]
    fn test_jwt_config_from_env() {
        unsafe {
            std::env::set_var("JWT_SECRET", "s3cr3t");
            std::env::remove_var("JWT_ACCESS_TOKEN_EXPIRY");
            std::env::set_var("JWT_REFRESH_TOKEN_EXPIRY", "60");
        }

        let config = JwtConfig::from_env().unwrap();
        assert_eq!(config.secret, "s3cr3t");
        assert_eq!(config.access_token_expiry, 900);
        assert_eq!(config.refresh_token_expiry, 60);

        unsafe {
            std::env::remove_var("JWT_SECRET");
            std::env::remove_var("JWT_REFRESH_TOKEN_EXPIRY");
        }
        assert!(JwtConfig::from_env().is_err());
    }
}
