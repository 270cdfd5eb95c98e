//! Unified error handling for HydroBill
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in the billing engine, with automatic HTTP response mapping.
//!
//! Inside a billing run most of these are caught per account and recorded in
//! the run's error log; only run-level variants (`Validation`,
//! `ConcurrentRun`, `NoActiveTariff`) ever reach the caller of `execute`.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::NaiveDate;
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache connection failed: {0}")]
    CacheConnection(String),

    // ==================== Billing Errors ====================
    #[error("No tariff effective for account {account_no} on {as_of}")]
    TariffNotFound { account_no: String, as_of: NaiveDate },

    #[error("Invalid tariff {0}")]
    InvalidTariff(String),

    #[error("Consumption estimation failed: {0}")]
    ConsumptionEstimation(String),

    #[error("A billing run is already active for {period_start}..{period_end}")]
    ConcurrentRun {
        period_start: NaiveDate,
        period_end: NaiveDate,
    },

    #[error("No active tariff configuration on {0}")]
    NoActiveTariff(NaiveDate),

    #[error("Account processing timed out after {0}s")]
    AccountTimeout(u64),

    #[error("Invalid billing run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Billing run not found: {0}")]
    BillingRunNotFound(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) | AppError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            AppError::TariffNotFound { .. }
            | AppError::AccountNotFound(_)
            | AppError::InvoiceNotFound(_)
            | AppError::PaymentNotFound(_)
            | AppError::BillingRunNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::ConcurrentRun { .. }
            | AppError::Conflict(_)
            | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,

            // 422 Unprocessable Entity
            AppError::InvalidTariff(_)
            | AppError::NoActiveTariff(_)
            | AppError::ConsumptionEstimation(_) => StatusCode::UNPROCESSABLE_ENTITY,

            // 504 Gateway Timeout
            AppError::AccountTimeout(_) => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::Cache(_) => "cache_error",
            AppError::CacheConnection(_) => "cache_connection_error",
            AppError::TariffNotFound { .. } => "tariff_not_found",
            AppError::InvalidTariff(_) => "invalid_tariff",
            AppError::ConsumptionEstimation(_) => "consumption_estimation_error",
            AppError::ConcurrentRun { .. } => "concurrent_run",
            AppError::NoActiveTariff(_) => "no_active_tariff",
            AppError::AccountTimeout(_) => "account_timeout",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::InvoiceNotFound(_) => "invoice_not_found",
            AppError::PaymentNotFound(_) => "payment_not_found",
            AppError::BillingRunNotFound(_) => "billing_run_not_found",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::MissingField(_) => "missing_field",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// True for storage failures
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Pool(_) | AppError::Transaction(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
