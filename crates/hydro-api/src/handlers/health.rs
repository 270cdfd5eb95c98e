//! Health check handler

use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /api/v1/health
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "hydrobill",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Configure health routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check));
}
