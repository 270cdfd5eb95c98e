//! Shared application state

use hydro_services::{AgingReportGenerator, BillingRunOrchestrator, PaymentAllocator};
use std::sync::Arc;

/// Services shared by all workers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BillingRunOrchestrator>,
    pub allocator: Arc<PaymentAllocator>,
    pub aging: Arc<AgingReportGenerator>,
    /// Days after period end used when execute omits a due date
    pub default_due_days: i64,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<BillingRunOrchestrator>,
        allocator: Arc<PaymentAllocator>,
        aging: Arc<AgingReportGenerator>,
        default_due_days: i64,
    ) -> Self {
        Self {
            orchestrator,
            allocator,
            aging,
            default_due_days,
        }
    }
}
