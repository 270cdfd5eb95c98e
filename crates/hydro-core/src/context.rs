//! Tenant/scheme scoping
//!
//! Every resolver, calculator, orchestrator and repository call receives a
//! `TenantContext` explicitly. There is no ambient session state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant and scheme a call is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    /// Utility (tenant) identifier
    pub tenant_id: i32,

    /// Water supply scheme within the tenant
    pub scheme_id: i32,
}

impl TenantContext {
    pub fn new(tenant_id: i32, scheme_id: i32) -> Self {
        Self {
            tenant_id,
            scheme_id,
        }
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.scheme_id)
    }
}
