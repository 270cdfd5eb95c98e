//! Payment handlers
//!
//! Receipts, manual reconciliation and the receivables aging report.

use crate::dto::payment::{AgingParams, PaymentCreateRequest, ReconcileRequest};
use crate::dto::ApiResponse;
use crate::state::AppState;
use crate::tenant::Tenant;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use hydro_core::AppError;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Record a payment and allocate it to the oldest open invoices
///
/// POST /api/v1/payments
#[instrument(skip(state, req), fields(tenant = %tenant.0))]
pub async fn create_payment(
    state: web::Data<AppState>,
    tenant: Tenant,
    req: web::Json<PaymentCreateRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Payment validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let result = state
        .allocator
        .receive(&tenant, req.into_inner().into_new_payment())
        .await?;

    info!(
        payment_id = result.payment.id,
        account_no = %result.payment.account_no,
        allocated = %result.payment.allocated_amount,
        "Payment recorded"
    );

    Ok(HttpResponse::Created().json(ApiResponse::with_message(result, "Payment recorded")))
}

/// Re-allocate a payment to an explicit list of invoices
///
/// POST /api/v1/payments/{id}/reconcile
#[instrument(skip(state, req), fields(tenant = %tenant.0))]
pub async fn reconcile_payment(
    state: web::Data<AppState>,
    tenant: Tenant,
    path: web::Path<i64>,
    req: web::Json<ReconcileRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Reconcile validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let payment_id = path.into_inner();
    let result = state
        .allocator
        .reconcile(&tenant, payment_id, &req.invoice_ids)
        .await?;

    info!(payment_id, invoices = req.invoice_ids.len(), "Payment reconciled");

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(result, "Payment reconciled")))
}

/// Receivables aging with DSO and top debtors
///
/// GET /api/v1/payments/aging
#[instrument(skip(state), fields(tenant = %tenant.0))]
pub async fn aging_report(
    state: web::Data<AppState>,
    tenant: Tenant,
    query: web::Query<AgingParams>,
) -> Result<HttpResponse, AppError> {
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let report = state.aging.generate(&tenant, as_of, query.top).await?;

    Ok(HttpResponse::Ok().json(report))
}

/// Configure payment routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/payments")
            .route("", web::post().to(create_payment))
            .route("/aging", web::get().to(aging_report))
            .route("/{id}/reconcile", web::post().to(reconcile_payment)),
    );
}
