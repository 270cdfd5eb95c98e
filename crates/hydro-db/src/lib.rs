//! HydroBill Database Layer
//!
//! This crate provides PostgreSQL database access and repository implementations
//! for the HydroBill billing engine. It includes:
//!
//! - Connection pool management with sqlx
//! - Embedded schema migrations
//! - Repository implementations for every storage trait in hydro-core
//! - Transactional invoice and payment-allocation writes

pub mod pool;
pub mod repositories;

pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use hydro_core::{AppError, AppResult};
pub use sqlx::{PgPool, Postgres, Transaction};

/// SQLSTATE for unique_violation
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

/// True when a sqlx error is a unique constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}
