//! Application startup and lifecycle management.

use crate::config::SettlementConfig;
use crate::handlers;
use crate::services::{
    Database, HttpNotifier, InvoiceMatcher, LogNotifier, Notifier, PaymentService, PaymentStore,
    SettlementOrchestrator,
};
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id, request_id_middleware};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub payments: PaymentService,
    pub settlements: SettlementOrchestrator,
}

impl AppState {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        notifier: Arc<dyn Notifier>,
        default_currency: &str,
    ) -> Self {
        let linker = Arc::new(InvoiceMatcher::new(store.clone()));
        Self {
            payments: PaymentService::new(store.clone(), linker, default_currency),
            settlements: SettlementOrchestrator::new(store.clone(), notifier),
            store,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/payments",
            get(handlers::payments::list_payments).post(handlers::payments::create_payment),
        )
        .route(
            "/payments/:id",
            get(handlers::payments::get_payment)
                .patch(handlers::payments::update_payment)
                .delete(handlers::payments::delete_payment),
        )
        .route(
            "/payments/:id/approve",
            post(handlers::payments::approve_payment),
        )
        .route(
            "/invoices/:id/placeholder-payment",
            post(handlers::payments::reserve_placeholder),
        )
        .route(
            "/settlements",
            post(handlers::settlements::settle_invoices),
        )
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let id = request_id(request.headers()).unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                    company_id = tracing::field::Empty,
                    role = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

fn notifier_from_config(config: &SettlementConfig) -> Arc<dyn Notifier> {
    match config.notification.service_url.as_deref() {
        Some(url) => match HttpNotifier::new(url, config.notification.timeout()) {
            Ok(notifier) => {
                tracing::info!(endpoint = %url, "HTTP notifier initialized");
                Arc::new(notifier)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize HTTP notifier: {}. Logging notifications instead.",
                    e
                );
                Arc::new(LogNotifier)
            }
        },
        None => {
            tracing::info!("NOTIFICATION_SERVICE_URL not set, notifications will be logged");
            Arc::new(LogNotifier)
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Connect to Postgres, apply migrations and bind the listener.
    pub async fn build(config: SettlementConfig) -> Result<Self, AppError> {
        let db = Self::connect(&config).await?;
        db.run_migrations().await?;
        Self::build_with_database(config, db).await
    }

    async fn connect(config: &SettlementConfig) -> Result<Database, AppError> {
        Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            e
        })
    }

    async fn build_with_database(config: SettlementConfig, db: Database) -> Result<Self, AppError> {
        let store: Arc<dyn PaymentStore> = Arc::new(db);
        let state = AppState::new(store, notifier_from_config(&config), &config.default_currency);
        Self::build_with_state(config.common.port, state).await
    }

    /// Bind to `port` (0 picks a free one) and serve `state`.
    pub async fn build_with_state(port: u16, state: AppState) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();
        tracing::info!("Settlement service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router: build_router(state),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| {
                tracing::error!("HTTP server error: {}", e);
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
