//! HTTP request handlers

pub mod billing;
pub mod health;
pub mod payment;

pub use billing::configure as configure_billing;
pub use health::configure as configure_health;
pub use payment::configure as configure_payments;
