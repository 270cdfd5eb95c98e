//! HydroBill Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the HydroBill tariff billing engine. It includes:
//!
//! - Domain models (Tariff, Account, MeterReading, BillingRun, Invoice, Payment)
//! - The explicit tenant/scheme context threaded through every call
//! - Repository and notifier traits implemented by the storage layer
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use context::TenantContext;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
