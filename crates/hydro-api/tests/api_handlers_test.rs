//! Integration tests for the HTTP surface that does not need storage

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, web, App, HttpResponse};
    use hydro_api::dto::ApiResponse;
    use hydro_api::{configure_health, Tenant, SCHEME_HEADER, TENANT_HEADER};
    use serde_json::Value;

    async fn whoami(tenant: Tenant) -> HttpResponse {
        HttpResponse::Ok().json(ApiResponse::success(tenant.0))
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = test::init_service(
            App::new().service(web::scope("/api/v1").configure(configure_health)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "hydrobill");
    }

    #[actix_web::test]
    async fn test_tenant_headers_scope_requests() {
        let app = test::init_service(App::new().route("/whoami", web::get().to(whoami))).await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((TENANT_HEADER, "4"))
            .insert_header((SCHEME_HEADER, "9"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["tenant_id"], 4);
        assert_eq!(body["data"]["scheme_id"], 9);
    }

    #[actix_web::test]
    async fn test_missing_tenant_headers_rejected() {
        let app = test::init_service(App::new().route("/whoami", web::get().to(whoami))).await;

        let req = test::TestRequest::get().uri("/whoami").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "missing_field");
        assert_eq!(body["status"], 400);
    }
}
