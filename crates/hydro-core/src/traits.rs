//! Common traits for repositories and services
//!
//! Every storage call takes the tenant/scheme context explicitly; there is no
//! ambient "current tenant". Implementations must scope all reads and writes
//! to `ctx`.

use crate::context::TenantContext;
use crate::error::AppError;
use crate::models::{
    Account, AllocationEntry, BillingRun, BillingRunStatus, InsertOutcome, Invoice, MeterReading,
    NewBillingRun, NewInvoice, NewPayment, OutstandingInvoice, Payment, PaymentAllocation,
    RunCounters, RunError, Tariff,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Tariff storage
#[async_trait]
pub trait TariffRepository: Send + Sync {
    /// Find a tariff version by ID
    async fn find_by_id(&self, ctx: &TenantContext, id: i32) -> Result<Option<Tariff>, AppError>;

    /// All versions sharing a tariff code, any validity window
    async fn find_versions(&self, ctx: &TenantContext, code: &str)
        -> Result<Vec<Tariff>, AppError>;

    /// Number of tariff versions effective on a date
    async fn count_effective(&self, ctx: &TenantContext, on: NaiveDate) -> Result<i64, AppError>;
}

/// Account storage
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Find account by account number
    async fn find_by_number(
        &self,
        ctx: &TenantContext,
        account_no: &str,
    ) -> Result<Option<Account>, AppError>;

    /// Active accounts, optionally restricted to a segment, ordered by account number
    async fn list_billable(
        &self,
        ctx: &TenantContext,
        segment: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Account>, AppError>;
}

/// Meter reading storage. Suspect readings are never returned.
#[async_trait]
pub trait MeterReadingRepository: Send + Sync {
    /// Latest billable reading taken at or before `at`
    async fn latest_at_or_before(
        &self,
        ctx: &TenantContext,
        meter_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<MeterReading>, AppError>;

    /// Earliest billable reading in `(after, until)`
    async fn earliest_after(
        &self,
        ctx: &TenantContext,
        meter_id: &str,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<MeterReading>, AppError>;
}

/// Billing run storage
#[async_trait]
pub trait BillingRunRepository: Send + Sync {
    /// Open a pending run. Active runs for the period that are stale per
    /// `run.stale_before` are failed first, in the same unit of work. Fails
    /// with `ConcurrentRun` if another run for the same scope and period is
    /// still pending or processing.
    async fn create_active(
        &self,
        ctx: &TenantContext,
        run: &NewBillingRun,
    ) -> Result<BillingRun, AppError>;

    /// Move a run from `from` to `to`; fails if the stored status is not `from`
    async fn transition(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        from: BillingRunStatus,
        to: BillingRunStatus,
        counters: Option<&RunCounters>,
    ) -> Result<BillingRun, AppError>;

    /// Append to the run's error log
    async fn append_error(
        &self,
        ctx: &TenantContext,
        id: Uuid,
        error: &RunError,
    ) -> Result<(), AppError>;

    /// Find run by ID, including its error log
    async fn find_by_id(&self, ctx: &TenantContext, id: Uuid)
        -> Result<Option<BillingRun>, AppError>;

    /// Runs newest first, with the total count
    async fn list(
        &self,
        ctx: &TenantContext,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<BillingRun>, i64), AppError>;
}

/// Invoice storage
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Whether an invoice exists for (account, period)
    async fn exists_for_period(
        &self,
        ctx: &TenantContext,
        account_no: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<bool, AppError>;

    /// Write an invoice and its lines atomically. A duplicate
    /// (account, period) yields `AlreadyExists` and writes nothing.
    async fn insert_with_lines(
        &self,
        ctx: &TenantContext,
        invoice: &NewInvoice,
    ) -> Result<InsertOutcome, AppError>;

    /// Consumption of the most recent invoices ending before `before`, newest first
    async fn recent_consumption(
        &self,
        ctx: &TenantContext,
        account_no: &str,
        before: NaiveDate,
        limit: i64,
    ) -> Result<Vec<Decimal>, AppError>;

    /// Open and partially paid invoices of an account, oldest due first
    async fn find_outstanding_by_account(
        &self,
        ctx: &TenantContext,
        account_no: &str,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Invoices by ID, in no particular order
    async fn find_by_ids(&self, ctx: &TenantContext, ids: &[i64])
        -> Result<Vec<Invoice>, AppError>;

    /// All outstanding invoices joined with customer names
    async fn list_outstanding(
        &self,
        ctx: &TenantContext,
    ) -> Result<Vec<OutstandingInvoice>, AppError>;

    /// Sum of invoice totals whose period ends within `[from, to]`
    async fn billed_between(
        &self,
        ctx: &TenantContext,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Decimal, AppError>;
}

/// Payment storage
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Insert a payment and apply its allocations in one transaction.
    /// Returns the stored payment and the updated invoices.
    async fn record_with_allocations(
        &self,
        ctx: &TenantContext,
        payment: &NewPayment,
        allocations: &[AllocationEntry],
    ) -> Result<(Payment, Vec<Invoice>), AppError>;

    /// Find payment by ID
    async fn find_by_id(&self, ctx: &TenantContext, id: i64) -> Result<Option<Payment>, AppError>;

    /// Current allocations of a payment
    async fn find_allocations(
        &self,
        ctx: &TenantContext,
        payment_id: i64,
    ) -> Result<Vec<PaymentAllocation>, AppError>;

    /// Reverse a payment's allocations and apply a new set in one transaction.
    /// The payment's mode becomes manual.
    async fn replace_allocations(
        &self,
        ctx: &TenantContext,
        payment_id: i64,
        allocations: &[AllocationEntry],
    ) -> Result<(Payment, Vec<Invoice>), AppError>;
}

/// Receives billing run outcomes
#[async_trait]
pub trait RunNotifier: Send + Sync {
    /// Called once a run reaches a terminal status
    async fn run_completed(&self, ctx: &TenantContext, run: &BillingRun);
}

/// Read-through cache for JSON-serializable lookups
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Cached value, `None` on a miss
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError>;

    /// Store a value that expires after `ttl_secs`
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), AppError>;
}

/// Pagination parameters
#[derive(Debug, Clone, Default)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 100),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    pub fn new(total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 {
            (total + per_page - 1) / per_page
        } else {
            0
        };

        Self {
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_bounds() {
        let p = Pagination::new(0, 10);
        assert_eq!(p.page, 1);
        assert_eq!(p.offset(), 0);

        let p = Pagination::new(3, 500);
        assert_eq!(p.per_page, 100);
        assert_eq!(p.offset(), 200);
    }

    #[test]
    fn test_pagination_meta() {
        assert_eq!(PaginationMeta::new(0, 1, 20).total_pages, 0);
        assert_eq!(PaginationMeta::new(40, 1, 20).total_pages, 2);
        assert_eq!(PaginationMeta::new(41, 1, 20).total_pages, 3);
    }
}
