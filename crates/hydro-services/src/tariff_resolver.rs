//! Tariff resolution
//!
//! An account points at one tariff version; the resolver looks up every
//! version of that tariff family and picks the one effective on the
//! requested date. Families are cached in Redis when a cache is configured.

use hydro_cache::{keys, RedisCache};
use hydro_core::{
    models::{Account, Tariff},
    traits::{AccountRepository, CacheService, TariffRepository},
    AppError, AppResult, TenantContext,
};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Pick the version effective on `as_of`
///
/// When several versions match, the most recently started one wins; equal
/// start dates fall back to the highest id.
pub fn select_effective(versions: &[Tariff], as_of: NaiveDate) -> Option<&Tariff> {
    versions
        .iter()
        .filter(|t| t.is_effective_on(as_of))
        .max_by(|a, b| a.valid_from.cmp(&b.valid_from).then(a.id.cmp(&b.id)))
}

/// Resolves the effective tariff for an account
pub struct TariffResolver {
    tariffs: Arc<dyn TariffRepository>,
    accounts: Arc<dyn AccountRepository>,
    cache: Option<Arc<RedisCache>>,
    cache_ttl_secs: u64,
}

impl TariffResolver {
    /// Create a resolver without caching
    pub fn new(tariffs: Arc<dyn TariffRepository>, accounts: Arc<dyn AccountRepository>) -> Self {
        Self {
            tariffs,
            accounts,
            cache: None,
            cache_ttl_secs: keys::TARIFF_TTL_SECS,
        }
    }

    /// Enable Redis caching of tariff lookups
    pub fn with_cache(mut self, cache: Arc<RedisCache>, ttl_secs: u64) -> Self {
        self.cache = Some(cache);
        self.cache_ttl_secs = ttl_secs;
        self
    }

    /// Resolve by account number
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        ctx: &TenantContext,
        account_no: &str,
        as_of: NaiveDate,
    ) -> AppResult<Tariff> {
        let account = self
            .accounts
            .find_by_number(ctx, account_no)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_no.to_string()))?;

        self.resolve_for(ctx, &account, as_of).await
    }

    /// Resolve for an already loaded account
    #[instrument(skip(self, account), fields(account_no = %account.account_no))]
    pub async fn resolve_for(
        &self,
        ctx: &TenantContext,
        account: &Account,
        as_of: NaiveDate,
    ) -> AppResult<Tariff> {
        let not_found = || AppError::TariffNotFound {
            account_no: account.account_no.clone(),
            as_of,
        };

        let anchor = self
            .load_tariff(ctx, account.tariff_id)
            .await?
            .ok_or_else(not_found)?;

        let versions = self.load_versions(ctx, &anchor.code).await?;
        let tariff = select_effective(&versions, as_of)
            .cloned()
            .ok_or_else(not_found)?;

        tariff.validate()?;

        debug!(
            "Resolved tariff {} v{} for {} on {}",
            tariff.code, tariff.id, account.account_no, as_of
        );
        Ok(tariff)
    }

    /// Whether any tariff version of the scheme is effective on `on`
    #[instrument(skip(self))]
    pub async fn has_active_tariff(&self, ctx: &TenantContext, on: NaiveDate) -> AppResult<bool> {
        Ok(self.tariffs.count_effective(ctx, on).await? > 0)
    }

    /// Whether at least one tariff family referenced by `accounts` has a
    /// version effective on `on`. An empty account set falls back to the
    /// scheme-wide check.
    #[instrument(skip(self, accounts), fields(accounts = accounts.len()))]
    pub async fn covers_any(
        &self,
        ctx: &TenantContext,
        accounts: &[Account],
        on: NaiveDate,
    ) -> AppResult<bool> {
        if accounts.is_empty() {
            return self.has_active_tariff(ctx, on).await;
        }

        let mut tariff_ids: Vec<i32> = accounts.iter().map(|a| a.tariff_id).collect();
        tariff_ids.sort_unstable();
        tariff_ids.dedup();

        let mut seen_codes: Vec<String> = Vec::new();
        for id in tariff_ids {
            let Some(anchor) = self.load_tariff(ctx, id).await? else {
                continue;
            };
            if seen_codes.contains(&anchor.code) {
                continue;
            }

            let versions = self.load_versions(ctx, &anchor.code).await?;
            if select_effective(&versions, on).is_some() {
                return Ok(true);
            }
            seen_codes.push(anchor.code);
        }

        debug!("No referenced tariff family is effective on {}", on);
        Ok(false)
    }

    async fn load_tariff(&self, ctx: &TenantContext, id: i32) -> AppResult<Option<Tariff>> {
        let key = keys::tariff_key(ctx, id);

        if let Some(tariff) = self.cache_get::<Tariff>(&key).await {
            return Ok(Some(tariff));
        }

        let tariff = self.tariffs.find_by_id(ctx, id).await?;
        if let Some(ref t) = tariff {
            self.cache_put(&key, t).await;
        }
        Ok(tariff)
    }

    async fn load_versions(&self, ctx: &TenantContext, code: &str) -> AppResult<Vec<Tariff>> {
        let key = keys::tariff_versions_key(ctx, code);

        if let Some(versions) = self.cache_get::<Vec<Tariff>>(&key).await {
            return Ok(versions);
        }

        let versions = self.tariffs.find_versions(ctx, code).await?;
        if !versions.is_empty() {
            self.cache_put(&key, &versions).await;
        }
        Ok(versions)
    }

    async fn cache_get<T: serde::de::DeserializeOwned + Send>(&self, key: &str) -> Option<T> {
        let cache = self.cache.as_ref()?;

        match cache.get::<T>(key).await {
            Ok(value) => value,
            Err(e) => {
                // Cache errors never fail a lookup
                warn!("Tariff cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn cache_put<T: serde::Serialize + Send + Sync>(&self, key: &str, value: &T) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(key, value, self.cache_ttl_secs).await {
                warn!("Failed to cache tariff data for {}: {}", key, e);
            }
        }
    }
}
