//! Repositories for database operations
//!
//! Every function takes a `&mut PgConnection` so it can run on a pooled
//! connection or inside a caller's transaction.

pub mod account;
pub mod course;
pub mod mentoring;
pub mod payment;
pub mod progress;

pub use account::AccountRepository;
pub use course::CourseRepository;
pub use mentoring::MentoringRepository;
pub use payment::PaymentRepository;
pub use progress::ProgressRepository;

/// Postgres `unique_violation`
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
