//! Common library for the ElevateU services
//!
//! Shared plumbing used by the auth and api services: database and cache
//! connectivity, the error taxonomy and its problem+json rendering, access
//! tokens and request authentication, pagination and validation helpers.
//!
//! ```rust,no_run
//! use common::database::{DatabaseConfig, health_check, init_pool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::from_env()?;
//!     let pool = init_pool(&config).await?;
//!     println!("Database health check: {}", health_check(&pool).await);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod database;
pub mod error;
pub mod extract;
pub mod jwt;
pub mod pagination;
pub mod role;
pub mod shutdown;
pub mod sql;
pub mod telemetry;
pub mod validation;
