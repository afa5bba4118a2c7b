//! HTTP request handlers.

use super::types::{HealthResponse, SendMessageRequest, SendMessageResponse};
use super::AppState;
use crate::error::RelayError;
use crate::relay::TurnRequest;
use axum::extract::rejection::JsonRejection;
use axum::{extract::State, Json};
use credit_ledger::format_amount;

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.relay.pool();
    let ledger_healthy = state.relay.ledger().health_check().await;

    Json(HealthResponse {
        status: if ledger_healthy { "ok" } else { "degraded" }.to_string(),
        credentials_total: pool.len(),
        credentials_free: pool.free_count(),
        ledger_healthy,
    })
}

/// Relay one chat message and bill the account.
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, RelayError> {
    let Json(body) = payload?;
    let reply = state.relay.submit(TurnRequest::from(body)).await?;

    Ok(Json(SendMessageResponse {
        message: reply.reply,
        cost: format_amount(reply.cost),
        balance: format_amount(reply.balance),
    }))
}
