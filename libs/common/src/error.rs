//! Error types shared by the ElevateU services
//!
//! [`AppError`] is the single domain error taxonomy. Handlers return it and
//! the edge renders it as an RFC 7807 `application/problem+json` document.
//! [`DatabaseError`] covers start-up plumbing (pool, migrations).

use axum::{
    body::Body,
    extract::{
        Request,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

const PROBLEM_TYPE_BASE: &str = "https://elevateu.dev/problems/";
const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Custom error type for database plumbing
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// A single invalid input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Domain error taxonomy
#[derive(Error, Debug)]
pub enum AppError {
    // parse
    #[error("{0}")]
    BadRequest(String),

    // auth
    #[error("Bearer token is required")]
    NoBearerToken,
    #[error("Bearer token is invalid or expired")]
    InvalidBearerToken,
    #[error("Refresh token is invalid or expired")]
    InvalidRefreshToken,
    #[error("OTP is invalid or expired")]
    InvalidOtp,
    #[error("Email and password do not match")]
    CredentialsNotMatch,

    // authorization
    #[error("Your role is not allowed to access this resource")]
    ForbiddenRole,
    #[error("You are not allowed to access this resource")]
    ForbiddenUser,
    #[error("An active subscription is required")]
    NotSubscribed,

    // not found
    #[error("{0} not found")]
    NotFound(&'static str),

    // conflict
    #[error("Email is already registered")]
    EmailAlreadyRegistered,
    #[error("Category name already exists")]
    CategoryNameExists,
    #[error("Student is already enrolled in this course")]
    StudentAlreadyEnrolled,
    #[error("Student has already submitted this challenge")]
    StudentAlreadySubmittedChallenge,
    #[error("Mentor has already submitted feedback for this submission")]
    MentorAlreadySubmittedFeedback,
    #[error("Student has already submitted feedback")]
    StudentAlreadySubmittedFeedback,
    #[error("Mentoring trial has already been used")]
    TrialUsed,

    // payload
    #[error("File is too large")]
    FileTooLarge,

    // validation
    #[error("Request validation failed")]
    Validation(Vec<FieldError>),
    #[error("Cannot give feedback to a course you are not enrolled in")]
    CannotFeedbackUnenrolledCourse,
    #[error("Cannot give feedback to a course you have not completed")]
    CannotFeedbackUncompletedCourse,
    #[error("File format is not supported")]
    InvalidFileFormat,
    #[error("Mentoring chat has expired")]
    ChatExpired,

    // rate limit
    #[error("Too many requests")]
    RateLimited { retry_after: u64 },

    // internal
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification used for the status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Auth,
    Authorization,
    NotFound,
    Conflict,
    PayloadTooLarge,
    Validation,
    RateLimit,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Parse => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AppError {
    /// Shorthand for a single-field validation failure
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::BadRequest(_) => ErrorKind::Parse,
            AppError::NoBearerToken
            | AppError::InvalidBearerToken
            | AppError::InvalidRefreshToken
            | AppError::InvalidOtp
            | AppError::CredentialsNotMatch => ErrorKind::Auth,
            AppError::ForbiddenRole | AppError::ForbiddenUser | AppError::NotSubscribed => {
                ErrorKind::Authorization
            }
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::EmailAlreadyRegistered
            | AppError::CategoryNameExists
            | AppError::StudentAlreadyEnrolled
            | AppError::StudentAlreadySubmittedChallenge
            | AppError::MentorAlreadySubmittedFeedback
            | AppError::StudentAlreadySubmittedFeedback
            | AppError::TrialUsed => ErrorKind::Conflict,
            AppError::FileTooLarge => ErrorKind::PayloadTooLarge,
            AppError::Validation(_)
            | AppError::CannotFeedbackUnenrolledCourse
            | AppError::CannotFeedbackUncompletedCourse
            | AppError::InvalidFileFormat
            | AppError::ChatExpired => ErrorKind::Validation,
            AppError::RateLimited { .. } => ErrorKind::RateLimit,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }

    /// Stable machine-readable code, used as the problem `type` suffix
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad-request",
            AppError::NoBearerToken => "no-bearer-token",
            AppError::InvalidBearerToken => "invalid-bearer-token",
            AppError::InvalidRefreshToken => "invalid-refresh-token",
            AppError::InvalidOtp => "invalid-otp",
            AppError::CredentialsNotMatch => "credentials-not-match",
            AppError::ForbiddenRole => "forbidden-role",
            AppError::ForbiddenUser => "forbidden-user",
            AppError::NotSubscribed => "not-subscribed",
            AppError::NotFound(_) => "not-found",
            AppError::EmailAlreadyRegistered => "email-already-registered",
            AppError::CategoryNameExists => "category-name-exists",
            AppError::StudentAlreadyEnrolled => "student-already-enrolled",
            AppError::StudentAlreadySubmittedChallenge => "student-already-submitted-challenge",
            AppError::MentorAlreadySubmittedFeedback => "mentor-already-submitted-feedback",
            AppError::StudentAlreadySubmittedFeedback => "student-already-submitted-feedback",
            AppError::TrialUsed => "trial-used",
            AppError::FileTooLarge => "file-too-large",
            AppError::Validation(_) => "validation",
            AppError::CannotFeedbackUnenrolledCourse => "cannot-feedback-unenrolled-course",
            AppError::CannotFeedbackUncompletedCourse => "cannot-feedback-uncompleted-course",
            AppError::InvalidFileFormat => "invalid-file-format",
            AppError::ChatExpired => "chat-expired",
            AppError::RateLimited { .. } => "rate-limited",
            AppError::Internal(_) => "internal",
        }
    }

    /// Human-readable summary shared by every instance of this error
    pub fn title(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Parse => "Bad Request",
            ErrorKind::Auth => "Unauthorized",
            ErrorKind::Authorization => "Forbidden",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::PayloadTooLarge => "Payload Too Large",
            ErrorKind::Validation => "Unprocessable Entity",
            ErrorKind::RateLimit => "Too Many Requests",
            ErrorKind::Internal => "Internal Server Error",
        }
    }

    /// Build the wire document. Internal errors get a fresh trace id and are
    /// logged here, with the full chain, so nothing leaks over the wire.
    pub fn to_problem(&self) -> ProblemDetails {
        let (detail, trace_id) = match self {
            AppError::Internal(source) => {
                let trace_id = Uuid::new_v4();
                error!(%trace_id, error = ?source, "Internal server error");
                (
                    "An unexpected error occurred, please try again later".to_string(),
                    Some(trace_id),
                )
            }
            other => (other.to_string(), None),
        };

        let errors = match self {
            AppError::Validation(errors) if !errors.is_empty() => Some(errors.clone()),
            _ => None,
        };

        ProblemDetails {
            problem_type: format!("{PROBLEM_TYPE_BASE}{}", self.code()),
            title: self.title().to_string(),
            status: self.status().as_u16(),
            detail,
            instance: None,
            trace_id,
            errors,
        }
    }
}

impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Internal(anyhow::Error::new(err).context("database query failed"))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Internal(anyhow::Error::new(err).context("cache command failed"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// RFC 7807 problem document
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl ProblemDetails {
    fn to_body(&self) -> Body {
        match serde_json::to_vec(self) {
            Ok(bytes) => Body::from(bytes),
            Err(e) => {
                error!("Failed to serialize problem document: {}", e);
                Body::empty()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let problem = self.to_problem();
        let status = self.status();

        let mut response = Response::new(problem.to_body());
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_CONTENT_TYPE),
        );
        if let AppError::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response.extensions_mut().insert(problem);
        response
    }
}

/// Edge middleware filling the problem `instance` with the request path
pub async fn problem_instance(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    let mut response = next.run(req).await;

    if let Some(mut problem) = response.extensions_mut().remove::<ProblemDetails>() {
        problem.instance = Some(path);
        response.headers_mut().remove(header::CONTENT_LENGTH);
        *response.body_mut() = problem.to_body();
    }

    response
}

/// Type alias for handler results
pub type AppResult<T> = Result<T, AppError>;
