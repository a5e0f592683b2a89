//! Payment record endpoints.
//!
//! Every handler takes the caller's [`Actor`]; scoping and permission checks
//! happen in the service layer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    models::{
        Actor, ApprovePayment, CreatePayment, ListPaymentsFilter, Payment, PaymentPage,
        UpdatePayment,
    },
    startup::AppState,
};

pub async fn list_payments(
    State(state): State<AppState>,
    actor: Actor,
    Query(filter): Query<ListPaymentsFilter>,
) -> Result<Json<PaymentPage>, AppError> {
    let page = state.payments.list(&actor, &filter).await?;
    Ok(Json(page))
}

pub async fn get_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.payments.get(&actor, payment_id).await?;
    Ok(Json(payment))
}

pub async fn create_payment(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreatePayment>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    tracing::info!(
        tenant_id = %payload.tenant_id,
        amount = %payload.amount,
        "Recording payment"
    );
    let payment = state.payments.create(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn update_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UpdatePayment>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.payments.update(&actor, payment_id, payload).await?;
    Ok(Json(payment))
}

pub async fn delete_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(payment_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.payments.delete(&actor, payment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The body is optional; an empty POST approves without notes.
pub async fn approve_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(payment_id): Path<Uuid>,
    payload: Option<Json<ApprovePayment>>,
) -> Result<Json<Payment>, AppError> {
    let input = payload.map(|Json(p)| p).unwrap_or_default();
    let payment = state.payments.approve(&actor, payment_id, input).await?;
    Ok(Json(payment))
}

pub async fn reserve_placeholder(
    State(state): State<AppState>,
    actor: Actor,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.payments.reserve_placeholder(&actor, invoice_id).await?;
    Ok(Json(payment))
}
