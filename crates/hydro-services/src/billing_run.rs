//! Billing run orchestration
//!
//! `preview` rates a sample of accounts without touching storage. `execute`
//! opens a run under the storage-level exclusivity lock, rates and invoices
//! every billable account with bounded parallelism, and closes the run with
//! its counters. Per-account failures land in the run's error log and never
//! abort the batch.
//!
//! Once opened, a run is driven on its own task: dropping the `execute`
//! future (a disconnected HTTP client) does not cancel it, and any error
//! that escapes the run moves it to `failed` so the period lock is released.

use futures::stream::{self, StreamExt};
use hydro_core::{
    config::BillingConfig,
    models::{
        Account, BillingPeriod, BillingRun, BillingRunStatus, InsertOutcome, NewBillingRun,
        NewInvoice, RunCounters, RunError, Tariff,
    },
    traits::{
        AccountRepository, BillingRunRepository, InvoiceRepository, Pagination, RunNotifier,
    },
    AppError, AppResult, TenantContext,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::consumption::{Consumption, ConsumptionCalculator};
use crate::constants::MAX_SEGMENT_LEN;
use crate::notifier::LogNotifier;
use crate::rating::{round_money, ChargeBreakdown, ChargeCalculator};
use crate::tariff_resolver::TariffResolver;

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Accounts rated concurrently
    pub max_parallel_accounts: usize,
    /// Upper bound for one account's rate-and-persist sequence
    pub account_timeout: Duration,
    pub preview_default_limit: i64,
    pub preview_max_limit: i64,
    /// Age after which another run's active status is ignored and reclaimed
    pub stale_run_after: Duration,
}

impl OrchestratorSettings {
    /// Clamp a requested preview size
    pub fn preview_limit(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.preview_default_limit)
            .clamp(1, self.preview_max_limit.max(1))
    }
}

impl From<&BillingConfig> for OrchestratorSettings {
    fn from(config: &BillingConfig) -> Self {
        Self {
            max_parallel_accounts: config.max_parallel_accounts.max(1),
            account_timeout: config.account_timeout(),
            preview_default_limit: config.preview_default_limit,
            preview_max_limit: config.preview_max_limit,
            stale_run_after: config.stale_run_after(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&BillingConfig::default())
    }
}

/// Reject blank or oversized segment names
pub fn validate_segment(segment: Option<&str>) -> AppResult<()> {
    if let Some(s) = segment {
        if s.trim().is_empty() {
            return Err(AppError::Validation("segment must not be blank".to_string()));
        }
        if s.chars().count() > MAX_SEGMENT_LEN {
            return Err(AppError::Validation(format!(
                "segment exceeds {} characters",
                MAX_SEGMENT_LEN
            )));
        }
    }
    Ok(())
}

/// One account rated for a period
#[derive(Debug, Clone)]
pub struct RatedAccount {
    pub tariff: Tariff,
    pub consumption: Consumption,
    pub charge: ChargeBreakdown,
}

impl RatedAccount {
    fn into_invoice(
        self,
        account_no: &str,
        run_id: Uuid,
        period: &BillingPeriod,
        due_date: NaiveDate,
    ) -> NewInvoice {
        NewInvoice {
            account_no: account_no.to_string(),
            billing_run_id: Some(run_id),
            tariff_id: self.tariff.id,
            period_start: period.start,
            period_end: period.end,
            due_date,
            currency: self.tariff.currency,
            consumption: self.consumption.volume,
            estimated: self.consumption.is_estimated(),
            fixed_charge: self.charge.fixed_charge,
            tax_amount: round_money(self.charge.tax),
            total_amount: self.charge.total,
            lines: self.charge.lines,
        }
    }
}

/// Preview row for one account
#[derive(Debug, Clone, Serialize)]
pub struct PreviewAccount {
    pub account_no: String,
    pub customer_name: String,
    pub consumption: Decimal,
    pub estimated: bool,
    pub estimated_charge: Decimal,
    /// Name of the resolved tariff version
    pub tariff: String,
}

/// Outcome of a preview
#[derive(Debug, Clone, Serialize)]
pub struct PreviewResult {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub preview_count: usize,
    pub total_estimated: Decimal,
    pub accounts: Vec<PreviewAccount>,
    /// Accounts that could not be rated
    pub errors: Vec<RunError>,
}

/// Outcome of an execute call
#[derive(Debug, Clone, Serialize)]
pub struct BillingRunSummary {
    pub run_id: Uuid,
    pub status: BillingRunStatus,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub invoices_created: i32,
    pub total_billed: Decimal,
    pub accounts_processed: i32,
    pub accounts_skipped: i32,
    pub errors: Vec<RunError>,
}

impl BillingRunSummary {
    fn from_run(run: &BillingRun, errors: Vec<RunError>) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            period_start: run.period_start,
            period_end: run.period_end,
            invoices_created: run.invoices_generated,
            total_billed: run.total_billed,
            accounts_processed: run.accounts_processed,
            accounts_skipped: run.accounts_skipped,
            errors,
        }
    }
}

enum AccountOutcome {
    Invoiced(Decimal),
    Skipped,
}

/// Drives preview and execute over an account set
#[derive(Clone)]
pub struct BillingRunOrchestrator {
    accounts: Arc<dyn AccountRepository>,
    runs: Arc<dyn BillingRunRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    resolver: Arc<TariffResolver>,
    consumption: Arc<ConsumptionCalculator>,
    charges: ChargeCalculator,
    notifier: Arc<dyn RunNotifier>,
    settings: OrchestratorSettings,
}

impl BillingRunOrchestrator {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        runs: Arc<dyn BillingRunRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        resolver: Arc<TariffResolver>,
        consumption: Arc<ConsumptionCalculator>,
        charges: ChargeCalculator,
    ) -> Self {
        Self {
            accounts,
            runs,
            invoices,
            resolver,
            consumption,
            charges,
            notifier: Arc::new(LogNotifier),
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RunNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Resolve, measure and rate one account
    pub async fn rate_account(
        &self,
        ctx: &TenantContext,
        account: &Account,
        period: &BillingPeriod,
    ) -> AppResult<RatedAccount> {
        let tariff = self.resolver.resolve_for(ctx, account, period.end).await?;
        let consumption = self.consumption.calculate(ctx, account, period).await?;
        let charge = self
            .charges
            .calculate(&tariff, consumption.volume, consumption.is_estimated());

        Ok(RatedAccount {
            tariff,
            consumption,
            charge,
        })
    }

    /// Rate up to `limit` accounts without writing anything
    #[instrument(skip(self))]
    pub async fn preview(
        &self,
        ctx: &TenantContext,
        period: BillingPeriod,
        segment: Option<&str>,
        limit: Option<i64>,
    ) -> AppResult<PreviewResult> {
        validate_segment(segment)?;
        let limit = self.settings.preview_limit(limit);

        let accounts = self.accounts.list_billable(ctx, segment, Some(limit)).await?;
        debug!("Previewing {} accounts for {}..{}", accounts.len(), period.start, period.end);

        let account_timeout = self.settings.account_timeout;
        let rated: Vec<(Account, AppResult<RatedAccount>)> = stream::iter(accounts)
            .map(|account| async move {
                let result = tokio::time::timeout(
                    account_timeout,
                    self.rate_account(ctx, &account, &period),
                )
                .await
                .unwrap_or_else(|_| Err(AppError::AccountTimeout(account_timeout.as_secs())));
                (account, result)
            })
            .buffered(self.settings.max_parallel_accounts.max(1))
            .collect()
            .await;

        let mut result = PreviewResult {
            period_start: period.start,
            period_end: period.end,
            preview_count: 0,
            total_estimated: Decimal::ZERO,
            accounts: Vec::with_capacity(rated.len()),
            errors: Vec::new(),
        };

        for (account, outcome) in rated {
            match outcome {
                Ok(r) => {
                    result.total_estimated += r.charge.total;
                    result.accounts.push(PreviewAccount {
                        account_no: account.account_no,
                        customer_name: account.customer_name,
                        consumption: r.consumption.volume,
                        estimated: r.consumption.is_estimated(),
                        estimated_charge: r.charge.total,
                        tariff: r.tariff.name,
                    });
                }
                Err(e) => {
                    debug!("Preview skipped {}: {}", account.account_no, e);
                    result
                        .errors
                        .push(RunError::account(account.account_no, e.to_string()));
                }
            }
        }
        result.preview_count = result.accounts.len();

        Ok(result)
    }

    /// Bill every eligible account for the period
    ///
    /// # Errors
    ///
    /// `Validation` for a bad segment or due date and `ConcurrentRun` when
    /// another run holds the period. Run-level preconditions are reported in
    /// the returned summary. A storage failure while opening or closing the
    /// run is returned after the run has been moved to `failed`.
    #[instrument(skip(self), fields(tenant = %ctx))]
    pub async fn execute(
        &self,
        ctx: &TenantContext,
        period: BillingPeriod,
        due_date: NaiveDate,
        segment: Option<String>,
    ) -> AppResult<BillingRunSummary> {
        validate_segment(segment.as_deref())?;
        period.check_due_date(due_date)?;

        let stale_before = chrono::Duration::from_std(self.settings.stale_run_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        let run = self
            .runs
            .create_active(
                ctx,
                &NewBillingRun {
                    period,
                    due_date,
                    segment: segment.clone(),
                    stale_before,
                },
            )
            .await?;

        info!(
            run_id = %run.id,
            "Billing run opened for {}..{} (segment: {:?})",
            period.start, period.end, segment
        );

        let ctx = *ctx;
        let run_id = run.id;
        let worker = self.clone();
        let task = tokio::spawn(
            async move { worker.drive(ctx, run, period, segment).await }
                .instrument(tracing::Span::current()),
        );

        match task.await {
            Ok(summary) => summary,
            Err(e) => {
                let reason = format!("Billing run task aborted: {}", e);
                self.abandon(&ctx, run_id, &reason).await;
                Err(AppError::Internal(reason))
            }
        }
    }

    /// Run body on the spawned task; never leaves the run active on error
    async fn drive(
        self,
        ctx: TenantContext,
        run: BillingRun,
        period: BillingPeriod,
        segment: Option<String>,
    ) -> AppResult<BillingRunSummary> {
        let run_id = run.id;
        match self.process_run(&ctx, run, period, segment).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.abandon(&ctx, run_id, &format!("Billing run aborted: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn process_run(
        &self,
        ctx: &TenantContext,
        run: BillingRun,
        period: BillingPeriod,
        segment: Option<String>,
    ) -> AppResult<BillingRunSummary> {
        let run = self
            .runs
            .transition(ctx, run.id, BillingRunStatus::Pending, BillingRunStatus::Processing, None)
            .await?;

        let accounts = match self.accounts.list_billable(ctx, segment.as_deref(), None).await {
            Ok(accounts) => accounts,
            Err(e) => {
                return self
                    .fail_run(ctx, &run, format!("Failed to load accounts: {}", e))
                    .await;
            }
        };

        match self.resolver.covers_any(ctx, &accounts, period.end).await {
            Ok(true) => {}
            Ok(false) => {
                return self
                    .fail_run(ctx, &run, AppError::NoActiveTariff(period.end).to_string())
                    .await;
            }
            Err(e) => {
                return self
                    .fail_run(ctx, &run, format!("Tariff precondition check failed: {}", e))
                    .await;
            }
        }

        info!(run_id = %run.id, "Processing {} accounts", accounts.len());

        let mut counters = RunCounters::default();
        let mut errors = Vec::new();

        let account_timeout = self.settings.account_timeout;
        let (run_id, due_date) = (run.id, run.due_date);
        let ctx_owned = *ctx;
        let worker = self.clone();
        let mut outcomes = stream::iter(accounts)
            .map(move |account| {
                let worker = worker.clone();
                async move {
                    let outcome = tokio::time::timeout(
                        account_timeout,
                        worker.process_account(&ctx_owned, run_id, due_date, &period, &account),
                    )
                    .await
                    .unwrap_or_else(|_| Err(AppError::AccountTimeout(account_timeout.as_secs())));
                    (account.account_no, outcome)
                }
            })
            .buffer_unordered(self.settings.max_parallel_accounts.max(1));

        // Single writer for counters and the error log
        while let Some((account_no, outcome)) = outcomes.next().await {
            counters.accounts_processed += 1;

            match outcome {
                Ok(AccountOutcome::Invoiced(total)) => {
                    counters.invoices_generated += 1;
                    counters.total_billed += total;
                }
                Ok(AccountOutcome::Skipped) => counters.accounts_skipped += 1,
                Err(e) => {
                    warn!(run_id = %run.id, account_no = %account_no, "Account failed: {}", e);
                    let entry = RunError::account(account_no, e.to_string());
                    if let Err(log_err) = self.runs.append_error(ctx, run.id, &entry).await {
                        error!(run_id = %run.id, "Failed to record account error: {}", log_err);
                    }
                    errors.push(entry);
                }
            }
        }

        let finished = self
            .runs
            .transition(
                ctx,
                run.id,
                BillingRunStatus::Processing,
                BillingRunStatus::Completed,
                Some(&counters),
            )
            .await?;

        info!(
            run_id = %finished.id,
            "Billing run completed: {} invoices, {} billed, {} skipped, {} errors",
            counters.invoices_generated,
            counters.total_billed,
            counters.accounts_skipped,
            errors.len()
        );

        self.notifier.run_completed(ctx, &finished).await;
        Ok(BillingRunSummary::from_run(&finished, errors))
    }

    /// Look up a run with its error log
    #[instrument(skip(self))]
    pub async fn find_run(&self, ctx: &TenantContext, id: Uuid) -> AppResult<BillingRun> {
        self.runs
            .find_by_id(ctx, id)
            .await?
            .ok_or_else(|| AppError::BillingRunNotFound(id.to_string()))
    }

    /// Runs newest first, with the total count
    pub async fn list_runs(
        &self,
        ctx: &TenantContext,
        pagination: &Pagination,
    ) -> AppResult<(Vec<BillingRun>, i64)> {
        self.runs
            .list(ctx, pagination.limit(), pagination.offset())
            .await
    }

    async fn process_account(
        &self,
        ctx: &TenantContext,
        run_id: Uuid,
        due_date: NaiveDate,
        period: &BillingPeriod,
        account: &Account,
    ) -> AppResult<AccountOutcome> {
        if self
            .invoices
            .exists_for_period(ctx, &account.account_no, period.start, period.end)
            .await?
        {
            debug!("{} already invoiced for the period", account.account_no);
            return Ok(AccountOutcome::Skipped);
        }

        let rated = self.rate_account(ctx, account, period).await?;
        let invoice = rated.into_invoice(&account.account_no, run_id, period, due_date);

        match self.invoices.insert_with_lines(ctx, &invoice).await? {
            InsertOutcome::Created(created) => {
                debug!(
                    "Invoice {} for {}: {}",
                    created.id, account.account_no, created.total_amount
                );
                Ok(AccountOutcome::Invoiced(created.total_amount))
            }
            // Another run won the insert
            InsertOutcome::AlreadyExists => Ok(AccountOutcome::Skipped),
        }
    }

    /// Record a run-level failure and close the run as failed
    async fn fail_run(
        &self,
        ctx: &TenantContext,
        run: &BillingRun,
        reason: String,
    ) -> AppResult<BillingRunSummary> {
        error!(run_id = %run.id, "Billing run failed: {}", reason);

        let entry = RunError::run_level(reason);
        if let Err(e) = self.runs.append_error(ctx, run.id, &entry).await {
            error!(run_id = %run.id, "Failed to record run error: {}", e);
        }

        let failed = self
            .runs
            .transition(
                ctx,
                run.id,
                BillingRunStatus::Processing,
                BillingRunStatus::Failed,
                Some(&RunCounters::default()),
            )
            .await?;

        self.notifier.run_completed(ctx, &failed).await;
        Ok(BillingRunSummary::from_run(&failed, vec![entry]))
    }

    /// Best-effort move of a run that hit an unexpected error to `failed`
    async fn abandon(&self, ctx: &TenantContext, run_id: Uuid, reason: &str) {
        error!(run_id = %run_id, "{}", reason);

        if let Err(e) = self
            .runs
            .append_error(ctx, run_id, &RunError::run_level(reason))
            .await
        {
            error!(run_id = %run_id, "Failed to record run error: {}", e);
        }

        for from in [BillingRunStatus::Processing, BillingRunStatus::Pending] {
            match self
                .runs
                .transition(ctx, run_id, from, BillingRunStatus::Failed, None)
                .await
            {
                Ok(failed) => {
                    self.notifier.run_completed(ctx, &failed).await;
                    return;
                }
                Err(AppError::Conflict(_)) => continue,
                Err(e) => {
                    error!(run_id = %run_id, "Failed to mark run failed: {}", e);
                    return;
                }
            }
        }
        warn!(run_id = %run_id, "Run already terminal, nothing to release");
    }
}
