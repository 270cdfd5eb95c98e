//! In-memory repositories for service integration tests
//!
//! `MemoryStore` implements every storage trait over one mutex-guarded state
//! and enforces the same uniqueness rules as the SQL schema: one invoice per
//! (account, period) and one active run per (tenant, scheme, period).

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use hydro_core::{
    models::*,
    traits::*,
    AppError, AppResult, TenantContext,
};
use hydro_services::{
    BillingRunOrchestrator, ChargeCalculator, ConsumptionCalculator, ConsumptionSettings,
    OrchestratorSettings, PaymentAllocator, TariffResolver,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

pub fn ctx() -> TenantContext {
    TenantContext::new(1, 1)
}

pub fn january() -> BillingPeriod {
    BillingPeriod::new(day(2024, 1, 1), day(2024, 1, 31)).unwrap()
}

/// Domestic tariff: 0-6 @ 50 (lifeline), 6-20 @ 70, 20+ @ 100, fixed 200
pub fn domestic_tariff() -> Tariff {
    Tariff {
        id: 1,
        code: "DOM".to_string(),
        name: "Domestic 2024".to_string(),
        valid_from: day(2023, 1, 1),
        fixed_charge: dec!(200),
        blocks: vec![
            TariffBlock::new(dec!(0), Some(dec!(6)), dec!(50), true),
            TariffBlock::new(dec!(6), Some(dec!(20)), dec!(70), false),
            TariffBlock::new(dec!(20), None, dec!(100), false),
        ],
        ..Default::default()
    }
}

pub fn account(account_no: &str, tariff_id: i32) -> Account {
    Account {
        id: 0,
        account_no: account_no.to_string(),
        customer_name: format!("Customer {}", account_no),
        tariff_id,
        meter_id: format!("M-{}", account_no),
        ..Default::default()
    }
}

#[derive(Default)]
struct State {
    tariffs: Vec<Tariff>,
    accounts: Vec<Account>,
    readings: Vec<MeterReading>,
    runs: Vec<BillingRun>,
    invoices: Vec<Invoice>,
    lines: Vec<InvoiceLine>,
    payments: Vec<Payment>,
    allocations: Vec<PaymentAllocation>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Apply one allocation with the same guard as the SQL update
    fn apply(&mut self, payment_id: i64, entry: &AllocationEntry) -> AppResult<Invoice> {
        let invoice = self
            .invoices
            .iter_mut()
            .find(|i| i.id == entry.invoice_id)
            .ok_or_else(|| AppError::InvoiceNotFound(entry.invoice_id.to_string()))?;

        if !invoice.status.is_outstanding() || invoice.amount_paid + entry.amount > invoice.total_amount {
            return Err(AppError::Conflict(format!(
                "Invoice {} balance changed during allocation",
                entry.invoice_id
            )));
        }

        invoice.amount_paid += entry.amount;
        invoice.status = InvoiceStatus::for_amounts(invoice.total_amount, invoice.amount_paid);
        let updated = invoice.clone();

        self.allocations.push(PaymentAllocation {
            payment_id,
            invoice_id: entry.invoice_id,
            amount: entry.amount,
            created_at: Utc::now(),
        });
        Ok(updated)
    }
}

/// Every storage trait over shared in-memory state
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    /// Meters whose reading lookups stall
    slow_meters: Mutex<HashSet<String>>,
    /// Accounts whose invoice insert fails
    failing_inserts: Mutex<HashSet<String>>,
    /// Reject the `processing -> completed` transition
    failing_completion: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_tariff(&self, tariff: Tariff) {
        self.state.lock().tariffs.push(tariff);
    }

    pub fn add_account(&self, account: Account) {
        self.state.lock().accounts.push(account);
    }

    pub fn add_reading(&self, meter_id: &str, date: NaiveDate, value: Decimal) {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.readings.push(MeterReading {
            id,
            meter_id: meter_id.to_string(),
            read_at: at(date),
            value,
            quality: ReadingQuality::Actual,
        });
    }

    /// Opening and closing readings for January 2024
    pub fn add_january_readings(&self, account: &Account, consumption: Decimal) {
        self.add_reading(&account.meter_id, day(2024, 1, 1), dec!(1000));
        self.add_reading(&account.meter_id, day(2024, 1, 31), dec!(1000) + consumption);
    }

    /// Seed an open invoice and return its id
    pub fn add_invoice(
        &self,
        account_no: &str,
        period_start: NaiveDate,
        due_date: NaiveDate,
        total: Decimal,
    ) -> i64 {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.invoices.push(Invoice {
            id,
            tenant_id: 1,
            scheme_id: 1,
            account_no: account_no.to_string(),
            period_start,
            period_end: period_start,
            due_date,
            total_amount: total,
            ..Default::default()
        });
        id
    }

    pub fn set_consumption(&self, invoice_id: i64, consumption: Decimal) {
        if let Some(invoice) = self.state.lock().invoices.iter_mut().find(|i| i.id == invoice_id) {
            invoice.consumption = consumption;
        }
    }

    pub fn void_invoice(&self, invoice_id: i64) {
        if let Some(invoice) = self.state.lock().invoices.iter_mut().find(|i| i.id == invoice_id) {
            invoice.status = InvoiceStatus::Void;
        }
    }

    pub fn stall_meter(&self, meter_id: &str) {
        self.slow_meters.lock().insert(meter_id.to_string());
    }

    pub fn fail_insert_for(&self, account_no: &str) {
        self.failing_inserts.lock().insert(account_no.to_string());
    }

    pub fn clear_insert_failures(&self) {
        self.failing_inserts.lock().clear();
    }

    pub fn fail_completion(&self, fail: bool) {
        *self.failing_completion.lock() = fail;
    }

    /// Shift every run's timestamps into the past
    pub fn age_runs(&self, by: chrono::Duration) {
        for run in self.state.lock().runs.iter_mut() {
            run.created_at = run.created_at - by;
            run.started_at = run.started_at.map(|t| t - by);
        }
    }

    pub fn run(&self, id: Uuid) -> BillingRun {
        self.state
            .lock()
            .runs
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .unwrap()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.state.lock().invoices.clone()
    }

    pub fn invoice(&self, id: i64) -> Invoice {
        self.state
            .lock()
            .invoices
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .unwrap()
    }

    pub fn lines_of(&self, invoice_id: i64) -> Vec<InvoiceLine> {
        self.state
            .lock()
            .lines
            .iter()
            .filter(|l| l.invoice_id == invoice_id)
            .cloned()
            .collect()
    }

    pub fn runs(&self) -> Vec<BillingRun> {
        self.state.lock().runs.clone()
    }

    pub fn allocations(&self) -> Vec<PaymentAllocation> {
        self.state.lock().allocations.clone()
    }
}

#[async_trait]
impl TariffRepository for MemoryStore {
    async fn find_by_id(&self, _ctx: &TenantContext, id: i32) -> AppResult<Option<Tariff>> {
        Ok(self.state.lock().tariffs.iter().find(|t| t.id == id).cloned())
    }

    async fn find_versions(&self, _ctx: &TenantContext, code: &str) -> AppResult<Vec<Tariff>> {
        Ok(self
            .state
            .lock()
            .tariffs
            .iter()
            .filter(|t| t.code == code)
            .cloned()
            .collect())
    }

    async fn count_effective(&self, _ctx: &TenantContext, on: NaiveDate) -> AppResult<i64> {
        Ok(self
            .state
            .lock()
            .tariffs
            .iter()
            .filter(|t| t.is_effective_on(on))
            .count() as i64)
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn find_by_number(&self, _ctx: &TenantContext, account_no: &str) -> AppResult<Option<Account>> {
        Ok(self
            .state
            .lock()
            .accounts
            .iter()
            .find(|a| a.account_no == account_no)
            .cloned())
    }

    async fn list_billable(
        &self,
        _ctx: &TenantContext,
        segment: Option<&str>,
        limit: Option<i64>,
    ) -> AppResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .state
            .lock()
            .accounts
            .iter()
            .filter(|a| a.is_billable() && a.in_segment(segment))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.account_no.cmp(&b.account_no));
        if let Some(limit) = limit {
            accounts.truncate(limit.max(0) as usize);
        }
        Ok(accounts)
    }
}

#[async_trait]
impl MeterReadingRepository for MemoryStore {
    async fn latest_at_or_before(
        &self,
        _ctx: &TenantContext,
        meter_id: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Option<MeterReading>> {
        let stalled = self.slow_meters.lock().contains(meter_id);
        if stalled {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        Ok(self
            .state
            .lock()
            .readings
            .iter()
            .filter(|r| r.meter_id == meter_id && r.quality.is_billable() && r.read_at <= at)
            .max_by_key(|r| (r.read_at, r.id))
            .cloned())
    }

    async fn earliest_after(
        &self,
        _ctx: &TenantContext,
        meter_id: &str,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> AppResult<Option<MeterReading>> {
        Ok(self
            .state
            .lock()
            .readings
            .iter()
            .filter(|r| {
                r.meter_id == meter_id
                    && r.quality.is_billable()
                    && r.read_at > after
                    && r.read_at < until
            })
            .min_by_key(|r| (r.read_at, r.id))
            .cloned())
    }
}

#[async_trait]
impl BillingRunRepository for MemoryStore {
    async fn create_active(&self, ctx: &TenantContext, run: &NewBillingRun) -> AppResult<BillingRun> {
        let mut state = self.state.lock();
        let same_scope = |r: &BillingRun| {
            r.tenant_id == ctx.tenant_id
                && r.scheme_id == ctx.scheme_id
                && r.period_start == run.period.start
                && r.period_end == run.period.end
        };

        if let Some(cutoff) = run.stale_before {
            let now = Utc::now();
            for stale in state
                .runs
                .iter_mut()
                .filter(|r| same_scope(&**r) && r.is_stale(cutoff))
            {
                stale.apply_transition(BillingRunStatus::Failed, None, now)?;
                stale.error_log.push(RunError::run_level(ABANDONED_RUN_REASON));
            }
        }

        let clash = state
            .runs
            .iter()
            .any(|r| same_scope(r) && r.status.is_active());
        if clash {
            return Err(AppError::ConcurrentRun {
                period_start: run.period.start,
                period_end: run.period.end,
            });
        }

        let created = BillingRun {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            scheme_id: ctx.scheme_id,
            period_start: run.period.start,
            period_end: run.period.end,
            due_date: run.due_date,
            segment: run.segment.clone(),
            status: BillingRunStatus::Pending,
            accounts_processed: 0,
            invoices_generated: 0,
            accounts_skipped: 0,
            total_billed: Decimal::ZERO,
            error_log: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        state.runs.push(created.clone());
        Ok(created)
    }

    async fn transition(
        &self,
        _ctx: &TenantContext,
        id: Uuid,
        from: BillingRunStatus,
        to: BillingRunStatus,
        counters: Option<&RunCounters>,
    ) -> AppResult<BillingRun> {
        let mut state = self.state.lock();
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::BillingRunNotFound(id.to_string()))?;

        if run.status != from {
            return Err(AppError::Conflict(format!("run {} is {}", id, run.status)));
        }
        if to == BillingRunStatus::Completed && *self.failing_completion.lock() {
            return Err(AppError::Database("connection reset".to_string()));
        }
        run.apply_transition(to, counters, Utc::now())?;
        Ok(run.clone())
    }

    async fn append_error(&self, _ctx: &TenantContext, id: Uuid, error: &RunError) -> AppResult<()> {
        let mut state = self.state.lock();
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::BillingRunNotFound(id.to_string()))?;
        run.error_log.push(error.clone());
        Ok(())
    }

    async fn find_by_id(&self, _ctx: &TenantContext, id: Uuid) -> AppResult<Option<BillingRun>> {
        Ok(self.state.lock().runs.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, _ctx: &TenantContext, limit: i64, offset: i64) -> AppResult<(Vec<BillingRun>, i64)> {
        let state = self.state.lock();
        let mut runs: Vec<BillingRun> = state.runs.iter().rev().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = runs.len() as i64;
        let page = runs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl InvoiceRepository for MemoryStore {
    async fn exists_for_period(
        &self,
        _ctx: &TenantContext,
        account_no: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> AppResult<bool> {
        Ok(self.state.lock().invoices.iter().any(|i| {
            i.account_no == account_no && i.period_start == period_start && i.period_end == period_end
        }))
    }

    async fn insert_with_lines(&self, ctx: &TenantContext, invoice: &NewInvoice) -> AppResult<InsertOutcome> {
        if self.failing_inserts.lock().contains(&invoice.account_no) {
            return Err(AppError::Database("connection reset".to_string()));
        }

        let mut state = self.state.lock();
        let duplicate = state.invoices.iter().any(|i| {
            i.account_no == invoice.account_no
                && i.period_start == invoice.period_start
                && i.period_end == invoice.period_end
        });
        if duplicate {
            return Ok(InsertOutcome::AlreadyExists);
        }

        let id = state.next_id();
        let created = Invoice {
            id,
            tenant_id: ctx.tenant_id,
            scheme_id: ctx.scheme_id,
            account_no: invoice.account_no.clone(),
            billing_run_id: invoice.billing_run_id,
            tariff_id: invoice.tariff_id,
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            due_date: invoice.due_date,
            currency: invoice.currency.clone(),
            consumption: invoice.consumption,
            estimated: invoice.estimated,
            fixed_charge: invoice.fixed_charge,
            tax_amount: invoice.tax_amount,
            total_amount: invoice.total_amount,
            amount_paid: Decimal::ZERO,
            status: InvoiceStatus::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        for line in &invoice.lines {
            let line_id = state.next_id();
            state.lines.push(InvoiceLine {
                id: line_id,
                invoice_id: id,
                kind: line.kind,
                description: line.description.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                amount: line.amount,
                tariff_block: line.tariff_block,
                lifeline: line.lifeline,
                estimated: line.estimated,
            });
        }
        state.invoices.push(created.clone());

        Ok(InsertOutcome::Created(created))
    }

    async fn recent_consumption(
        &self,
        _ctx: &TenantContext,
        account_no: &str,
        before: NaiveDate,
        limit: i64,
    ) -> AppResult<Vec<Decimal>> {
        let mut history: Vec<Invoice> = self
            .state
            .lock()
            .invoices
            .iter()
            .filter(|i| i.account_no == account_no && i.period_end < before && i.status != InvoiceStatus::Void)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.period_end.cmp(&a.period_end));
        Ok(history
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|i| i.consumption)
            .collect())
    }

    async fn find_outstanding_by_account(&self, _ctx: &TenantContext, account_no: &str) -> AppResult<Vec<Invoice>> {
        let mut open: Vec<Invoice> = self
            .state
            .lock()
            .invoices
            .iter()
            .filter(|i| i.account_no == account_no && i.status.is_outstanding())
            .cloned()
            .collect();
        open.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then(a.period_start.cmp(&b.period_start))
                .then(a.id.cmp(&b.id))
        });
        Ok(open)
    }

    async fn find_by_ids(&self, _ctx: &TenantContext, ids: &[i64]) -> AppResult<Vec<Invoice>> {
        Ok(self
            .state
            .lock()
            .invoices
            .iter()
            .filter(|i| ids.contains(&i.id))
            .cloned()
            .collect())
    }

    async fn list_outstanding(&self, _ctx: &TenantContext) -> AppResult<Vec<OutstandingInvoice>> {
        let state = self.state.lock();
        Ok(state
            .invoices
            .iter()
            .filter(|i| i.status.is_outstanding())
            .map(|i| OutstandingInvoice {
                invoice_id: i.id,
                account_no: i.account_no.clone(),
                customer_name: state
                    .accounts
                    .iter()
                    .find(|a| a.account_no == i.account_no)
                    .map(|a| a.customer_name.clone())
                    .unwrap_or_default(),
                due_date: i.due_date,
                balance: i.balance(),
            })
            .collect())
    }

    async fn billed_between(&self, _ctx: &TenantContext, from: NaiveDate, to: NaiveDate) -> AppResult<Decimal> {
        Ok(self
            .state
            .lock()
            .invoices
            .iter()
            .filter(|i| i.status != InvoiceStatus::Void && i.period_end >= from && i.period_end <= to)
            .map(|i| i.total_amount)
            .sum())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn record_with_allocations(
        &self,
        ctx: &TenantContext,
        payment: &NewPayment,
        allocations: &[AllocationEntry],
    ) -> AppResult<(Payment, Vec<Invoice>)> {
        let mut state = self.state.lock();
        // Work on a copy so a rejected allocation leaves nothing behind
        let mut draft = State {
            invoices: state.invoices.clone(),
            allocations: state.allocations.clone(),
            next_id: state.next_id,
            ..Default::default()
        };

        let id = draft.next_id();
        let mut stored = Payment {
            id,
            tenant_id: ctx.tenant_id,
            scheme_id: ctx.scheme_id,
            account_no: payment.account_no.clone(),
            paid_at: payment.paid_at,
            amount: payment.amount,
            channel: payment.channel,
            reference: payment.reference.clone(),
            allocated_amount: Decimal::ZERO,
            unallocated_amount: payment.amount,
            allocation_mode: AllocationMode::Fifo,
            created_at: Utc::now(),
        };

        let mut touched = Vec::with_capacity(allocations.len());
        for entry in allocations {
            touched.push(draft.apply(id, entry)?);
        }
        stored.set_allocations(allocations, AllocationMode::Fifo);

        state.invoices = draft.invoices;
        state.allocations = draft.allocations;
        state.next_id = draft.next_id;
        state.payments.push(stored.clone());

        Ok((stored, touched))
    }

    async fn find_by_id(&self, _ctx: &TenantContext, id: i64) -> AppResult<Option<Payment>> {
        Ok(self.state.lock().payments.iter().find(|p| p.id == id).cloned())
    }

    async fn find_allocations(&self, _ctx: &TenantContext, payment_id: i64) -> AppResult<Vec<PaymentAllocation>> {
        Ok(self
            .state
            .lock()
            .allocations
            .iter()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn replace_allocations(
        &self,
        _ctx: &TenantContext,
        payment_id: i64,
        allocations: &[AllocationEntry],
    ) -> AppResult<(Payment, Vec<Invoice>)> {
        let mut state = self.state.lock();
        let mut payment = state
            .payments
            .iter()
            .find(|p| p.id == payment_id)
            .cloned()
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))?;

        let mut draft = State {
            invoices: state.invoices.clone(),
            allocations: state.allocations.clone(),
            next_id: state.next_id,
            ..Default::default()
        };

        let previous: Vec<PaymentAllocation> = draft
            .allocations
            .iter()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect();
        draft.allocations.retain(|a| a.payment_id != payment_id);

        let mut touched: Vec<i64> = Vec::new();
        for allocation in &previous {
            if let Some(invoice) = draft.invoices.iter_mut().find(|i| i.id == allocation.invoice_id) {
                invoice.reverse_payment(allocation.amount);
                touched.push(invoice.id);
            }
        }

        for entry in allocations {
            draft.apply(payment_id, entry)?;
            touched.push(entry.invoice_id);
        }

        payment.set_allocations(allocations, AllocationMode::Manual);
        touched.sort_unstable();
        touched.dedup();
        let updated: Vec<Invoice> = draft
            .invoices
            .iter()
            .filter(|i| touched.contains(&i.id))
            .cloned()
            .collect();

        state.invoices = draft.invoices;
        state.allocations = draft.allocations;
        if let Some(p) = state.payments.iter_mut().find(|p| p.id == payment_id) {
            *p = payment.clone();
        }

        Ok((payment, updated))
    }
}

/// Notifier that keeps every run it is told about
#[derive(Default)]
pub struct RecordingNotifier {
    pub runs: Mutex<Vec<BillingRun>>,
}

#[async_trait]
impl RunNotifier for RecordingNotifier {
    async fn run_completed(&self, _ctx: &TenantContext, run: &BillingRun) {
        self.runs.lock().push(run.clone());
    }
}

/// Orchestrator wired to the store with a short account timeout
pub fn orchestrator(store: &Arc<MemoryStore>, notifier: Arc<RecordingNotifier>) -> BillingRunOrchestrator {
    let resolver = Arc::new(TariffResolver::new(store.clone(), store.clone()));
    let consumption = Arc::new(ConsumptionCalculator::new(
        store.clone(),
        store.clone(),
        ConsumptionSettings::default(),
    ));

    BillingRunOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        resolver,
        consumption,
        ChargeCalculator::default(),
    )
    .with_notifier(notifier)
    .with_settings(OrchestratorSettings {
        max_parallel_accounts: 4,
        account_timeout: Duration::from_millis(200),
        preview_default_limit: 50,
        preview_max_limit: 1000,
        stale_run_after: Duration::from_secs(60),
    })
}

pub fn allocator(store: &Arc<MemoryStore>) -> PaymentAllocator {
    PaymentAllocator::new(store.clone(), store.clone(), store.clone())
}
