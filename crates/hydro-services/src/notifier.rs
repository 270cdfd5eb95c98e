//! Run completion notifier

use async_trait::async_trait;
use hydro_core::{models::BillingRun, traits::RunNotifier, TenantContext};
use tracing::{info, warn};

/// Notifier that only records outcomes in the log
///
/// Delivery to customers or operators is handled by an external dispatcher
/// subscribed to these events.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl RunNotifier for LogNotifier {
    async fn run_completed(&self, ctx: &TenantContext, run: &BillingRun) {
        if run.error_log.is_empty() {
            info!(
                tenant = %ctx,
                run_id = %run.id,
                status = %run.status,
                "Billing run {}..{} finished: {} invoices, {} billed, {} accounts processed",
                run.period_start,
                run.period_end,
                run.invoices_generated,
                run.total_billed,
                run.accounts_processed
            );
        } else {
            warn!(
                tenant = %ctx,
                run_id = %run.id,
                status = %run.status,
                "Billing run {}..{} finished with {} errors: {} invoices, {} billed",
                run.period_start,
                run.period_end,
                run.error_log.len(),
                run.invoices_generated,
                run.total_billed
            );
        }
    }
}
