//! HydroBill server
//!
//! Progressive-block water tariff billing: billing runs, payment allocation
//! and receivables aging over HTTP.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use hydro_api::{configure_billing, configure_health, configure_payments, AppState};
use hydro_cache::RedisCache;
use hydro_core::AppConfig;
use hydro_db::{
    create_pool, run_migrations, PgAccountRepository, PgBillingRunRepository, PgInvoiceRepository,
    PgMeterReadingRepository, PgPaymentRepository, PgTariffRepository,
};
use hydro_services::{
    AgingReportGenerator, BillingRunOrchestrator, ChargeCalculator, ConsumptionCalculator,
    ConsumptionSettings, LogNotifier, OrchestratorSettings, PaymentAllocator, TariffResolver,
};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configure API routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(configure_health)
            .configure(configure_billing)
            .configure(configure_payments),
    );
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "hydrobill={lvl},hydro_api={lvl},hydro_services={lvl},hydro_db={lvl},hydro_cache={lvl},actix_web=info,sqlx=warn",
            lvl = log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Wire repositories and services
async fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    info!("Connecting to database...");
    let pool = create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;

    if config.database.run_migrations {
        run_migrations(&pool).await.context("Failed to apply migrations")?;
    }

    let tariffs = Arc::new(PgTariffRepository::new(pool.clone()));
    let accounts = Arc::new(PgAccountRepository::new(pool.clone()));
    let readings = Arc::new(PgMeterReadingRepository::new(pool.clone()));
    let invoices = Arc::new(PgInvoiceRepository::new(pool.clone()));
    let runs = Arc::new(PgBillingRunRepository::new(pool.clone()));
    let payments = Arc::new(PgPaymentRepository::new(pool));

    let mut resolver = TariffResolver::new(tariffs, accounts.clone());
    match config.redis.url.as_deref() {
        Some(url) => {
            let connected = match RedisCache::new(url).await {
                Ok(cache) => cache.ping().await.map(|_| cache),
                Err(e) => Err(e),
            };
            match connected {
                Ok(cache) => {
                    info!("Tariff cache enabled ({}s TTL)", config.redis.tariff_ttl_secs);
                    resolver = resolver.with_cache(Arc::new(cache), config.redis.tariff_ttl_secs);
                }
                Err(e) => warn!("Redis unavailable, tariff cache disabled: {}", e),
            }
        }
        None => info!("No Redis URL configured, tariff cache disabled"),
    }

    let billing = &config.billing;
    let consumption = ConsumptionCalculator::new(
        readings,
        invoices.clone(),
        ConsumptionSettings::from(billing),
    );

    let orchestrator = BillingRunOrchestrator::new(
        accounts.clone(),
        runs,
        invoices.clone(),
        Arc::new(resolver),
        Arc::new(consumption),
        ChargeCalculator::new(billing.vat_percent),
    )
    .with_notifier(Arc::new(LogNotifier))
    .with_settings(OrchestratorSettings::from(billing));

    let allocator = PaymentAllocator::new(invoices.clone(), payments, accounts);
    let aging = AgingReportGenerator::new(invoices, billing.dso_window_days, billing.top_debtors);

    Ok(AppState::new(
        Arc::new(orchestrator),
        Arc::new(allocator),
        Arc::new(aging),
        billing.default_due_days,
    ))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting HydroBill v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;
    let state = web::Data::new(build_state(&config).await?);

    let bind_addr = config.server_addr();
    let workers = config.server.workers.max(1);
    let cors_origins = config.server.cors_origins.clone();

    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    HttpServer::new(move || {
        let cors_origins_inner = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                origin
                    .to_str()
                    .map(|o| cors_origins_inner.split(',').any(|allowed| allowed.trim() == o))
                    .unwrap_or(false)
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                header::ACCEPT,
                header::CONTENT_TYPE,
                header::HeaderName::from_static("x-tenant-id"),
                header::HeaderName::from_static("x-scheme-id"),
            ])
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                let message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_json",
                        "message": message,
                        "status": 400
                    })),
                )
                .into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                let message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_query",
                        "message": message,
                        "status": 400
                    })),
                )
                .into()
            }))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::Compress::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/api/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(workers)
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await?;

    info!("Server stopped");
    Ok(())
}
