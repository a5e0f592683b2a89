//! Prometheus metrics for settlement-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Settlement calls by outcome (`settled`, `nothing_payable`, `forbidden`, `failed`).
pub static SETTLEMENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_requests_total",
        "Total number of settlement requests",
        &["outcome"]
    )
    .expect("Failed to register SETTLEMENTS")
});

pub static INVOICES_SETTLED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_invoices_settled_total",
        "Total number of invoices moved to paid",
        &["source"]
    )
    .expect("Failed to register INVOICES_SETTLED")
});

pub static SETTLED_AMOUNT: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_amount_total",
        "Total settled amount by currency",
        &["currency"]
    )
    .expect("Failed to register SETTLED_AMOUNT")
});

/// Payment record operations by operation and status.
pub static PAYMENT_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_payment_operations_total",
        "Total number of payment record operations",
        &["operation", "status"]
    )
    .expect("Failed to register PAYMENT_OPERATIONS")
});

pub static AUTO_RECONCILIATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_auto_reconciliations_total",
        "Automatic payment-to-invoice linking attempts",
        &["outcome"]
    )
    .expect("Failed to register AUTO_RECONCILIATIONS")
});

pub static NOTIFICATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_notifications_total",
        "Post-commit notifications by outcome",
        &["outcome"]
    )
    .expect("Failed to register NOTIFICATIONS")
});

pub static POLICY_DENIALS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_policy_denials_total",
        "Access policy denials by action",
        &["action", "reason"]
    )
    .expect("Failed to register POLICY_DENIALS")
});

pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "settlement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SETTLEMENTS);
    Lazy::force(&INVOICES_SETTLED);
    Lazy::force(&SETTLED_AMOUNT);
    Lazy::force(&PAYMENT_OPERATIONS);
    Lazy::force(&AUTO_RECONCILIATIONS);
    Lazy::force(&NOTIFICATIONS);
    Lazy::force(&POLICY_DENIALS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_settlement(outcome: &str) {
    SETTLEMENTS.with_label_values(&[outcome]).inc();
}

pub fn record_invoice_settled(source: &str, currency: &str, amount: f64) {
    INVOICES_SETTLED.with_label_values(&[source]).inc();
    SETTLED_AMOUNT.with_label_values(&[currency]).inc_by(amount);
}

pub fn record_payment_operation(operation: &str, status: &str) {
    PAYMENT_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_auto_reconciliation(outcome: &str) {
    AUTO_RECONCILIATIONS.with_label_values(&[outcome]).inc();
}

pub fn record_notification(outcome: &str) {
    NOTIFICATIONS.with_label_values(&[outcome]).inc();
}

pub fn record_policy_denial(action: &str, reason: &str) {
    POLICY_DENIALS.with_label_values(&[action, reason]).inc();
}

pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
