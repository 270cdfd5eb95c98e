//! Tenant context extractor
//!
//! The upstream session layer identifies the caller's utility and supply
//! scheme through two headers. Handlers take a [`Tenant`] argument and pass
//! the inner [`TenantContext`] to every service call.

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use hydro_core::{AppError, TenantContext};
use std::ops::Deref;
use tracing::debug;

/// Header carrying the tenant (utility) id
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Header carrying the scheme id
pub const SCHEME_HEADER: &str = "X-Scheme-Id";

/// Request-scoped tenant context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenant(pub TenantContext);

impl Deref for Tenant {
    type Target = TenantContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn header_id(req: &HttpRequest, name: &str) -> Result<i32, AppError> {
    let raw = req
        .headers()
        .get(name)
        .ok_or_else(|| AppError::MissingField(name.to_string()))?;

    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::InvalidInput(format!("{} must be a positive integer", name)))
}

impl FromRequest for Tenant {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let extracted = header_id(req, TENANT_HEADER)
            .and_then(|tenant_id| Ok(TenantContext::new(tenant_id, header_id(req, SCHEME_HEADER)?)));

        match extracted {
            Ok(ctx) => ready(Ok(Tenant(ctx))),
            Err(e) => {
                debug!(error = %e, path = %req.path(), "Rejected request without tenant context");
                ready(Err(e.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test::TestRequest};

    #[actix_web::test]
    async fn test_extracts_context() {
        let req = TestRequest::default()
            .insert_header((TENANT_HEADER, "7"))
            .insert_header((SCHEME_HEADER, " 3 "))
            .to_http_request();

        let tenant = Tenant::extract(&req).await.unwrap();
        assert_eq!(tenant.tenant_id, 7);
        assert_eq!(tenant.scheme_id, 3);
    }

    #[actix_web::test]
    async fn test_missing_header_is_bad_request() {
        let req = TestRequest::default()
            .insert_header((TENANT_HEADER, "7"))
            .to_http_request();

        let err = Tenant::extract(&req).await.unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_malformed_header_is_bad_request() {
        for bad in ["abc", "0", "-4"] {
            let req = TestRequest::default()
                .insert_header((TENANT_HEADER, bad))
                .insert_header((SCHEME_HEADER, "1"))
                .to_http_request();

            let err = Tenant::extract(&req).await.unwrap_err();
            assert_eq!(err.as_response_error().status_code(), StatusCode::BAD_REQUEST);
        }
    }
}
