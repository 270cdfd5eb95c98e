//! Cache key builders for HydroBill
//!
//! # Key Patterns
//!
//! - `tariff_versions:{tenant}:{scheme}:{code}` - all versions of a tariff family
//! - `tariff:{tenant}:{scheme}:{id}` - a single tariff version
//!
//! Tariff storage is scoped by tenant and scheme, and so are the keys: two
//! schemes publishing the same code never share a cached family.
//!
//! # Example
//!
//! ```
//! use hydro_cache::keys;
//! use hydro_core::TenantContext;
//!
//! let ctx = TenantContext::new(7, 2);
//! assert_eq!(keys::tariff_versions_key(&ctx, "DOM"), "tariff_versions:7:2:DOM");
//! ```

use hydro_core::TenantContext;

/// Prefix for cached tariff version families
pub const TARIFF_VERSIONS_PREFIX: &str = "tariff_versions";

/// Prefix for single tariff versions
pub const TARIFF_PREFIX: &str = "tariff";

/// Default TTL for tariff data (5 minutes)
pub const TARIFF_TTL_SECS: u64 = 300;

/// Key for all versions of a tariff family
pub fn tariff_versions_key(ctx: &TenantContext, code: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        TARIFF_VERSIONS_PREFIX, ctx.tenant_id, ctx.scheme_id, code
    )
}

/// Key for one tariff version
pub fn tariff_key(ctx: &TenantContext, tariff_id: i32) -> String {
    format!(
        "{}:{}:{}:{}",
        TARIFF_PREFIX, ctx.tenant_id, ctx.scheme_id, tariff_id
    )
}
