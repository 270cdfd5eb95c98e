//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Comma-separated list of allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_timeout() -> u64 {
    30
}

fn default_cors_origins() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply bundled migrations on start-up
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

/// Redis configuration
///
/// Tariff caching is disabled when no URL is configured.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: Option<String>,

    /// TTL for cached tariff version families in seconds
    #[serde(default = "default_tariff_ttl")]
    pub tariff_ttl_secs: u64,
}

fn default_tariff_ttl() -> u64 {
    300
}

/// Billing-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// VAT percentage applied to invoice totals (None = no tax)
    #[serde(default)]
    pub vat_percent: Option<Decimal>,

    /// Register capacity used for rollover when the connection has none
    #[serde(default = "default_meter_max_value")]
    pub default_meter_max_value: Decimal,

    /// Negative differences larger than this are treated as a register wrap
    #[serde(default = "default_rollover_threshold")]
    pub rollover_threshold: Decimal,

    /// Number of past periods averaged when a reading is missing
    #[serde(default = "default_estimation_periods")]
    pub estimation_periods: i64,

    /// Accounts rated concurrently within one run
    #[serde(default = "default_max_parallel_accounts")]
    pub max_parallel_accounts: usize,

    /// Upper bound for one account's rate-and-persist sequence
    #[serde(default = "default_account_timeout")]
    pub account_timeout_secs: u64,

    /// Preview sample size when the caller gives none
    #[serde(default = "default_preview_limit")]
    pub preview_default_limit: i64,

    /// Largest preview sample a caller may request
    #[serde(default = "default_preview_max_limit")]
    pub preview_max_limit: i64,

    /// Trailing window for average daily billed revenue (DSO)
    #[serde(default = "default_dso_window")]
    pub dso_window_days: i64,

    /// Size of the top-debtors list
    #[serde(default = "default_top_debtors")]
    pub top_debtors: usize,

    /// Days after period end used when a due date is not supplied
    #[serde(default = "default_due_days")]
    pub default_due_days: i64,

    /// Age after which an active run is considered abandoned
    #[serde(default = "default_stale_run_secs")]
    pub stale_run_secs: u64,
}

fn default_meter_max_value() -> Decimal {
    Decimal::from(99_999)
}

fn default_rollover_threshold() -> Decimal {
    Decimal::from(10_000)
}

fn default_estimation_periods() -> i64 {
    3
}

fn default_max_parallel_accounts() -> usize {
    8
}

fn default_account_timeout() -> u64 {
    30
}

fn default_preview_limit() -> i64 {
    50
}

fn default_preview_max_limit() -> i64 {
    1000
}

fn default_dso_window() -> i64 {
    90
}

fn default_top_debtors() -> usize {
    10
}

fn default_due_days() -> i64 {
    30
}

fn default_stale_run_secs() -> u64 {
    3600
}

impl BillingConfig {
    /// Per-account processing bound as a `Duration`
    pub fn account_timeout(&self) -> Duration {
        Duration::from_secs(self.account_timeout_secs.max(1))
    }

    /// Age at which an active run stops holding the period lock
    pub fn stale_run_after(&self) -> Duration {
        // Never shorter than one account's bound
        Duration::from_secs(self.stale_run_secs.max(self.account_timeout_secs).max(1))
    }

    /// Clamp a requested preview limit into the allowed range
    pub fn preview_limit(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.preview_default_limit)
            .clamp(1, self.preview_max_limit.max(1))
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("server.timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.run_migrations", true)?
            .set_default("redis.tariff_ttl_secs", 300)?
            .set_default("billing.estimation_periods", 3)?
            .set_default("billing.max_parallel_accounts", 8)?
            .set_default("billing.account_timeout_secs", 30)?
            .set_default("billing.preview_default_limit", 50)?
            .set_default("billing.preview_max_limit", 1000)?
            .set_default("billing.dso_window_days", 90)?
            .set_default("billing.top_debtors", 10)?
            .set_default("billing.default_due_days", 30)?
            .set_default("billing.stale_run_secs", 3600)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with HYDRO_ prefix
            .add_source(
                Environment::with_prefix("HYDRO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("HYDRO").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            vat_percent: None,
            default_meter_max_value: default_meter_max_value(),
            rollover_threshold: default_rollover_threshold(),
            estimation_periods: default_estimation_periods(),
            max_parallel_accounts: default_max_parallel_accounts(),
            account_timeout_secs: default_account_timeout(),
            preview_default_limit: default_preview_limit(),
            preview_max_limit: default_preview_max_limit(),
            dso_window_days: default_dso_window(),
            top_debtors: default_top_debtors(),
            default_due_days: default_due_days(),
            stale_run_secs: default_stale_run_secs(),
        }
    }
}
