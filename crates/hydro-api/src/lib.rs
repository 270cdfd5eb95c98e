//! API layer for HydroBill
//!
//! HTTP handlers for billing runs, payments and receivables aging.
//! Every route except health is scoped by the tenant headers.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod dto;
pub mod handlers;
pub mod state;
pub mod tenant;

// Re-export DTOs (common types)
pub use dto::{ApiResponse, PaginationParams};

pub use handlers::{configure_billing, configure_health, configure_payments};
pub use state::AppState;
pub use tenant::{Tenant, SCHEME_HEADER, TENANT_HEADER};
