//! Repository implementations
//!
//! This module contains concrete implementations of all repository traits
//! defined in hydro-core, using sqlx for PostgreSQL access.

pub mod account_repo;
pub mod billing_run_repo;
pub mod invoice_repo;
pub mod payment_repo;
pub mod reading_repo;
pub mod tariff_repo;

pub use account_repo::PgAccountRepository;
pub use billing_run_repo::PgBillingRunRepository;
pub use invoice_repo::PgInvoiceRepository;
pub use payment_repo::PgPaymentRepository;
pub use reading_repo::PgMeterReadingRepository;
pub use tariff_repo::PgTariffRepository;
