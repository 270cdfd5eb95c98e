//! Billing engine services for HydroBill
//!
//! This crate contains the business logic that turns meter readings into
//! invoices and payments into settled balances.
//!
//! # Architecture
//!
//! Services hold their storage dependencies as `Arc<dyn Trait>` so that the
//! same code runs against PostgreSQL in production and in-memory stores in
//! tests. Every operation takes an explicit [`TenantContext`].
//!
//! # Services
//!
//! - `TariffResolver` - effective tariff version lookup with optional Redis caching
//! - `ConsumptionCalculator` - bracketing readings, rollover and estimation
//! - `ChargeCalculator` - progressive block rating
//! - `BillingRunOrchestrator` - preview and execute of billing runs
//! - `PaymentAllocator` - FIFO allocation and manual reconciliation
//! - `AgingReportGenerator` - receivables aging, DSO and top debtors
//!
//! [`TenantContext`]: hydro_core::TenantContext

pub mod aging;
pub mod billing_run;
pub mod consumption;
pub mod notifier;
pub mod payment_allocator;
pub mod rating;
pub mod tariff_resolver;

pub use aging::{AgingReport, AgingReportGenerator};
pub use billing_run::{BillingRunOrchestrator, BillingRunSummary, OrchestratorSettings, PreviewResult};
pub use consumption::{Consumption, ConsumptionCalculator, ConsumptionMethod, ConsumptionSettings};
pub use notifier::LogNotifier;
pub use payment_allocator::{AllocationResult, PaymentAllocator};
pub use rating::{ChargeBreakdown, ChargeCalculator};
pub use tariff_resolver::TariffResolver;

/// Business logic constants
pub mod constants {
    /// Decimal places of monetary totals
    pub const MONEY_DP: u32 = 2;

    /// Decimal places of volumes in cubic metres
    pub const VOLUME_DP: u32 = 3;

    /// Decimal places of the DSO figure
    pub const DSO_DP: u32 = 1;

    /// Longest accepted segment name
    pub const MAX_SEGMENT_LEN: usize = 50;

    /// Upper bound for the top-debtors list
    pub const MAX_TOP_DEBTORS: usize = 100;
}
