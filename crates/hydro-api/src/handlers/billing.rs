//! Billing run handlers
//!
//! HTTP handlers for previewing, executing and inspecting billing runs.

use crate::dto::billing::{
    BillingRunDetailResponse, BillingRunResponse, ExecuteRequest, PreviewRequest,
};
use crate::dto::{ApiResponse, PaginationParams};
use crate::state::AppState;
use crate::tenant::Tenant;
use actix_web::{web, HttpResponse};
use hydro_core::models::BillingRunStatus;
use hydro_core::AppError;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Rate a sample of accounts without persisting anything
///
/// POST /api/v1/billing/preview
#[instrument(skip(state, req), fields(tenant = %tenant.0))]
pub async fn preview(
    state: web::Data<AppState>,
    tenant: Tenant,
    req: web::Json<PreviewRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Billing preview validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let period = req.period()?;
    debug!(
        period_start = %period.start,
        period_end = %period.end,
        segment = ?req.segment,
        limit = ?req.limit,
        "Previewing billing run"
    );

    let result = state
        .orchestrator
        .preview(&tenant, period, req.segment.as_deref(), req.limit)
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

/// Execute a billing run for a period
///
/// POST /api/v1/billing/execute
#[instrument(skip(state, req), fields(tenant = %tenant.0))]
pub async fn execute(
    state: web::Data<AppState>,
    tenant: Tenant,
    req: web::Json<ExecuteRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Billing execute validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let period = req.period()?;
    let due_date = req.due_date_or(state.default_due_days)?;
    let req = req.into_inner();

    let summary = state
        .orchestrator
        .execute(&tenant, period, due_date, req.segment)
        .await?;

    info!(
        run_id = %summary.run_id,
        status = %summary.status,
        invoices = summary.invoices_created,
        total = %summary.total_billed,
        "Billing run finished"
    );

    if summary.status == BillingRunStatus::Completed {
        Ok(HttpResponse::Created().json(summary))
    } else {
        Ok(HttpResponse::Ok().json(summary))
    }
}

/// List billing runs, newest first
///
/// GET /api/v1/billing/runs
#[instrument(skip(state), fields(tenant = %tenant.0))]
pub async fn list_runs(
    state: web::Data<AppState>,
    tenant: Tenant,
    query: web::Query<PaginationParams>,
) -> Result<HttpResponse, AppError> {
    query.validate().map_err(|e| {
        warn!("Pagination validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let (runs, total) = state
        .orchestrator
        .list_runs(&tenant, &query.to_pagination())
        .await?;

    let data: Vec<BillingRunResponse> = runs.iter().map(BillingRunResponse::from).collect();
    Ok(HttpResponse::Ok().json(query.paginate(data, total)))
}

/// Get one billing run with its error log
///
/// GET /api/v1/billing/runs/{id}
#[instrument(skip(state), fields(tenant = %tenant.0))]
pub async fn get_run(
    state: web::Data<AppState>,
    tenant: Tenant,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let run = state
        .orchestrator
        .find_run(&tenant, path.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(BillingRunDetailResponse::from(run))))
}

/// Configure billing routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/billing")
            .route("/preview", web::post().to(preview))
            .route("/execute", web::post().to(execute))
            .route("/runs", web::get().to(list_runs))
            .route("/runs/{id}", web::get().to(get_run)),
    );
}
