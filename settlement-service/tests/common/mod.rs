//! Common test utilities for settlement-service integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request};
use settlement_service::middleware::{
    COMPANY_ID_HEADER, ROLE_HEADER, TENANT_ID_HEADER, USER_ID_HEADER,
};
use settlement_service::models::Actor;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,settlement_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Build a request carrying the caller's identity headers.
pub fn request_as(
    actor: &Actor,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_ID_HEADER, actor.user_id.to_string())
        .header(COMPANY_ID_HEADER, actor.company_id.to_string())
        .header(ROLE_HEADER, actor.role.as_str());
    if let Some(tenant_id) = actor.tenant_id {
        builder = builder.header(TENANT_ID_HEADER, tenant_id.to_string());
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("Failed to build request"),
        None => builder.body(Body::empty()).expect("Failed to build request"),
    }
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}
