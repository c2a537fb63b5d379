//! Account lifecycle and session handling
//!
//! Access tokens are stateless JWTs; refresh tokens are opaque strings stored
//! in `auth_sessions`, one row per user, rotated on every login or refresh.

use std::sync::Arc;

use chrono::Utc;
use common::{
    cache::KeyValueStore,
    error::{AppError, AppResult},
    jwt::JwtService,
    validation::{
        Validator, validate_email, validate_length, validate_name, validate_otp, validate_password,
    },
};
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::mailer::Mailer;
use crate::models::{NewUser, User, UserSnapshot};
use crate::otp::{OtpPurpose, OtpStore};
use crate::repositories::{SessionRepository, UserRepository};

pub const BCRYPT_COST: u32 = 10;
pub const REFRESH_TOKEN_LENGTH: usize = 32;

/// Tokens handed out after a successful login, registration, refresh or reset
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: UserSnapshot,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub otp: String,
    pub name: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    otps: OtpStore,
    mailer: Arc<dyn Mailer>,
    jwt: JwtService,
}

pub fn generate_refresh_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn hash_password(password: String) -> AppResult<String> {
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
        .await
        .map_err(anyhow::Error::from)?
        .map_err(anyhow::Error::from)?;
    Ok(hash)
}

async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(anyhow::Error::from)?
        .map_err(anyhow::Error::from)?;
    Ok(matches)
}

impl AuthService {
    pub fn new(
        pool: PgPool,
        store: Arc<dyn KeyValueStore>,
        mailer: Arc<dyn Mailer>,
        jwt: JwtService,
    ) -> Self {
        AuthService {
            pool,
            otps: OtpStore::new(store),
            mailer,
            jwt,
        }
    }

    /// Send a registration OTP to an email that is not yet registered
    pub async fn request_register_otp(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email);
        validate_email(&email).map_err(|e| AppError::Validation(vec![e]))?;

        let mut conn = self.pool.acquire().await?;
        if UserRepository::email_exists(&mut conn, &email).await? {
            return Err(AppError::EmailAlreadyRegistered);
        }

        let otp = self.otps.issue(OtpPurpose::Register, &email).await?;
        self.dispatch_otp(OtpPurpose::Register, email, otp);
        Ok(())
    }

    /// Create a student account and start its session
    pub async fn register(&self, registration: Registration) -> AppResult<TokenResponse> {
        let email = normalize_email(&registration.email);
        let name = registration.name.trim().to_string();
        Validator::new()
            .check(validate_email(&email))
            .check(validate_otp(&registration.otp))
            .check(validate_name(&name))
            .check(validate_password(&registration.password))
            .finish()?;

        self.otps
            .consume(OtpPurpose::Register, &email, &registration.otp)
            .await?;

        let password_hash = hash_password(registration.password).await?;
        let new_user = NewUser {
            email,
            name,
            password_hash,
        };

        let mut tx = self.pool.begin().await?;
        let user = match UserRepository::create_student(&mut tx, &new_user).await {
            Ok(user) => user,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AppError::EmailAlreadyRegistered);
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;

        info!(user_id = %user.id, "Registered new student");
        self.start_session(&user).await
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<TokenResponse> {
        let email = normalize_email(email);
        // stored passwords may predate the current policy; a wrong one is a 401
        Validator::new()
            .check(validate_email(&email))
            .check(validate_length("password", password, 1, usize::MAX))
            .finish()?;

        let mut conn = self.pool.acquire().await?;
        let user = UserRepository::find_by_email(&mut conn, &email)
            .await?
            .ok_or(AppError::NotFound("User"))?;
        drop(conn);

        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            return Err(AppError::CredentialsNotMatch);
        }

        info!(user_id = %user.id, "User logged in");
        self.start_session(&user).await
    }

    /// Exchange a live refresh token for a new token pair
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenResponse> {
        if refresh_token.len() != REFRESH_TOKEN_LENGTH {
            return Err(AppError::InvalidRefreshToken);
        }

        let replacement = generate_refresh_token();
        let expires_at = Utc::now() + self.refresh_lifetime();

        let mut tx = self.pool.begin().await?;
        let user_id =
            SessionRepository::rotate(&mut tx, refresh_token, &replacement, expires_at)
                .await?
                .ok_or(AppError::InvalidRefreshToken)?;
        let user = UserRepository::find_by_id(&mut tx, user_id)
            .await?
            .ok_or(AppError::InvalidRefreshToken)?;
        tx.commit().await?;

        self.token_response(&user, replacement)
    }

    /// Drop the user's session. Succeeds whether or not one existed.
    pub async fn logout(&self, user_id: Uuid) -> AppResult<()> {
        let mut conn = self.pool.acquire().await?;
        if SessionRepository::delete_by_user(&mut conn, user_id).await? {
            info!(%user_id, "User logged out");
        }
        Ok(())
    }

    pub async fn request_password_reset_otp(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email);
        validate_email(&email).map_err(|e| AppError::Validation(vec![e]))?;

        let mut conn = self.pool.acquire().await?;
        if UserRepository::find_by_email(&mut conn, &email)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound("User"));
        }

        let otp = self.otps.issue(OtpPurpose::ResetPassword, &email).await?;
        self.dispatch_otp(OtpPurpose::ResetPassword, email, otp);
        Ok(())
    }

    /// Set a new password and log in with it
    pub async fn reset_password(
        &self,
        email: &str,
        otp: &str,
        password: String,
    ) -> AppResult<TokenResponse> {
        let email = normalize_email(email);
        Validator::new()
            .check(validate_email(&email))
            .check(validate_otp(otp))
            .check(validate_password(&password))
            .finish()?;

        self.otps
            .consume(OtpPurpose::ResetPassword, &email, otp)
            .await?;

        let password_hash = hash_password(password).await?;
        let mut conn = self.pool.acquire().await?;
        let user = UserRepository::update_password(&mut conn, &email, &password_hash)
            .await?
            .ok_or(AppError::NotFound("User"))?;
        drop(conn);

        info!(user_id = %user.id, "Password reset");
        self.start_session(&user).await
    }

    fn refresh_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.jwt.refresh_token_expiry() as i64)
    }

    /// Replace the user's session row and sign an access token
    async fn start_session(&self, user: &User) -> AppResult<TokenResponse> {
        let refresh_token = generate_refresh_token();
        let expires_at = Utc::now() + self.refresh_lifetime();

        let mut conn = self.pool.acquire().await?;
        SessionRepository::upsert(&mut conn, user.id, &refresh_token, expires_at).await?;

        self.token_response(user, refresh_token)
    }

    fn token_response(&self, user: &User, refresh_token: String) -> AppResult<TokenResponse> {
        let access = self.jwt.generate_access_token(user.id, user.role)?;
        Ok(TokenResponse {
            access_token: access.token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.jwt.access_token_expiry(),
            user: UserSnapshot::from(user),
        })
    }

    /// Mail the OTP in the background; failures are only logged
    fn dispatch_otp(&self, purpose: OtpPurpose, email: String, otp: String) {
        let mailer = self.mailer.clone();
        tokio::spawn(async move {
            let (subject, body) = purpose.mail(&otp);
            if let Err(e) = mailer.send(&email, subject, body).await {
                error!("Failed to send {:?} OTP to {}: {:#}", purpose, email, e);
            }
        });
    }
}
