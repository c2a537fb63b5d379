//! Authentication service models

pub mod user;

// Re-export for convenience
pub use user::{NewUser, User, UserSnapshot};
