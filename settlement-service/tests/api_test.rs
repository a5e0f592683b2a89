//! HTTP API tests over the in-memory store.
//!
//! Run with: cargo test -p settlement-service --features test-utils

mod common;

use axum::http::{Method, StatusCode};
use axum::Router;
use chrono::NaiveDate;
use common::{body_json, init_tracing, request_as};
use rust_decimal::Decimal;
use serde_json::json;
use settlement_service::models::{Actor, Invoice, InvoiceStatus, Role, Tenant};
use settlement_service::services::notifier::testing::RecordingNotifier;
use settlement_service::services::MemoryStore;
use settlement_service::{build_router, AppState, Application};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    store: MemoryStore,
    company_id: Uuid,
    tenant: Tenant,
}

impl TestApp {
    async fn spawn() -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let company_id = Uuid::new_v4();
        let tenant = store.seed_tenant(company_id, "Wanjiku Mwangi").await;
        let state = AppState::new(
            Arc::new(store.clone()),
            Arc::new(RecordingNotifier::new()),
            "KES",
        );
        Self {
            router: build_router(state),
            store,
            company_id,
            tenant,
        }
    }

    fn staff(&self, role: Role) -> Actor {
        Actor::staff(Uuid::new_v4(), self.company_id, role)
    }

    fn tenant_actor(&self) -> Actor {
        Actor::tenant(Uuid::new_v4(), self.company_id, self.tenant.tenant_id)
    }

    async fn invoice(&self, amount: i64) -> Invoice {
        self.store
            .seed_invoice(
                &self.tenant,
                Decimal::from(amount),
                InvoiceStatus::Sent,
                NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            )
            .await
    }

    async fn send(
        &self,
        actor: &Actor,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request_as(actor, method, uri, body))
            .await
            .expect("Request failed")
    }

    async fn create_payment(&self, amount: &str) -> serde_json::Value {
        let response = self
            .send(
                &self.staff(Role::Landlord),
                Method::POST,
                "/payments",
                Some(json!({
                    "tenant_id": self.tenant.tenant_id,
                    "amount": amount,
                    "payment_method": "cash",
                    "payment_type": "rent"
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }
}

#[tokio::test]
async fn health_check_reports_ok() {
    let app = TestApp::spawn().await;
    let response = app
        .router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "settlement-service");
}

#[tokio::test]
async fn application_serves_on_ephemeral_port() {
    init_tracing();
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingNotifier::new()),
        "KES",
    );
    let application = Application::build_with_state(0, state)
        .await
        .expect("Failed to bind");
    let port = application.port();
    assert_ne!(port, 0);

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(application.run_until_stopped(async move {
        stopped.await.ok();
    }));

    let response = reqwest::get(format!("http://127.0.0.1:{}/health", port))
        .await
        .expect("Failed to reach server");
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));

    stop.send(()).ok();
    server
        .await
        .expect("Server task panicked")
        .expect("Server failed");
}

#[tokio::test]
async fn metrics_endpoint_serves_text() {
    let app = TestApp::spawn().await;
    let response = app
        .router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/metrics")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_identity_headers_are_unauthorized() {
    let app = TestApp::spawn().await;
    let response = app
        .router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/payments")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_payment_returns_pending_record() {
    let app = TestApp::spawn().await;

    let payment = app.create_payment("3000").await;

    assert_eq!(payment["status"], "pending");
    assert_eq!(payment["currency"], "KES");
    assert!(payment["invoice_id"].is_null());
    assert!(payment["receipt_number"]
        .as_str()
        .unwrap()
        .starts_with("RCP-"));
}

#[tokio::test]
async fn tenant_cannot_create_payment() {
    let app = TestApp::spawn().await;
    let response = app
        .send(
            &app.tenant_actor(),
            Method::POST,
            "/payments",
            Some(json!({
                "tenant_id": app.tenant.tenant_id,
                "amount": "100",
                "payment_method": "cash",
                "payment_type": "rent"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn approve_then_delete_conflicts() {
    let app = TestApp::spawn().await;
    let payment = app.create_payment("1500").await;
    let id = payment["payment_id"].as_str().unwrap();
    let admin = app.staff(Role::AgencyAdmin);

    let approved = app
        .send(&admin, Method::POST, &format!("/payments/{}/approve", id), None)
        .await;
    assert_eq!(approved.status(), StatusCode::OK);
    let approved = body_json(approved).await;
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["approved_by"], admin.user_id.to_string());

    let deleted = app
        .send(&admin, Method::DELETE, &format!("/payments/{}", id), None)
        .await;
    assert_eq!(deleted.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn delete_pending_payment_returns_no_content() {
    let app = TestApp::spawn().await;
    let payment = app.create_payment("800").await;
    let id = payment["payment_id"].as_str().unwrap();
    let landlord = app.staff(Role::Landlord);

    let deleted = app
        .send(&landlord, Method::DELETE, &format!("/payments/{}", id), None)
        .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let fetched = app
        .send(&landlord, Method::GET, &format!("/payments/{}", id), None)
        .await;
    assert_eq!(fetched.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_payments_pages_results() {
    let app = TestApp::spawn().await;
    app.create_payment("100").await;
    app.create_payment("200").await;

    let response = app
        .send(
            &app.staff(Role::Agent),
            Method::GET,
            "/payments?page=1&page_size=1",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["page_size"], 1);
    assert_eq!(page["payments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn settle_and_replay() {
    let app = TestApp::spawn().await;
    let invoice = app.invoice(5000).await;
    let tenant = app.tenant_actor();
    let body = json!({
        "invoice_ids": [invoice.invoice_id],
        "transaction_id": "TX1",
        "gateway_response": { "provider": "mpesa", "mpesa_receipt_number": "QK71ABC" }
    });

    let first = app
        .send(&tenant, Method::POST, "/settlements", Some(body.clone()))
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_json(first).await;
    assert_eq!(first["invoices_paid"], 1);
    assert_eq!(first["receipts"][0]["invoice_id"], invoice.invoice_id.to_string());

    let replay = app
        .send(&tenant, Method::POST, "/settlements", Some(body))
        .await;
    assert_eq!(replay.status(), StatusCode::OK);
    let replay = body_json(replay).await;
    assert_eq!(replay["invoices_paid"], 0);
    assert_eq!(replay["message"], "No payable invoices");

    assert_eq!(
        app.store.invoice(invoice.invoice_id).await.unwrap().status,
        InvoiceStatus::Paid
    );
}

#[tokio::test]
async fn settle_with_empty_invoice_ids_is_unprocessable() {
    let app = TestApp::spawn().await;
    let response = app
        .send(
            &app.tenant_actor(),
            Method::POST,
            "/settlements",
            Some(json!({ "invoice_ids": [] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn settle_other_tenants_invoice_is_forbidden() {
    let app = TestApp::spawn().await;
    let invoice = app.invoice(5000).await;
    let stranger = Actor::tenant(Uuid::new_v4(), app.company_id, Uuid::new_v4());

    let response = app
        .send(
            &stranger,
            Method::POST,
            "/settlements",
            Some(json!({ "invoice_ids": [invoice.invoice_id] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        app.store.invoice(invoice.invoice_id).await.unwrap().status,
        InvoiceStatus::Sent
    );
}

#[tokio::test]
async fn reserve_placeholder_is_idempotent_over_http() {
    let app = TestApp::spawn().await;
    let invoice = app.invoice(4500).await;
    let agent = app.staff(Role::Agent);
    let uri = format!("/invoices/{}/placeholder-payment", invoice.invoice_id);

    let first = body_json(app.send(&agent, Method::POST, &uri, None).await).await;
    let second = body_json(app.send(&agent, Method::POST, &uri, None).await).await;

    assert_eq!(first["payment_id"], second["payment_id"]);
    assert!(first["receipt_number"]
        .as_str()
        .unwrap()
        .starts_with("PENDING-"));
}
