use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{
    models::{Actor, SettlementRequest, SettlementResponse},
    startup::AppState,
};

/// Settle one or more invoices. Replays of an already-settled request
/// return `invoices_paid: 0` rather than an error.
pub async fn settle_invoices(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<SettlementRequest>,
) -> Result<Json<SettlementResponse>, AppError> {
    let response = state.settlements.settle(&actor, payload).await?;
    Ok(Json(response))
}
