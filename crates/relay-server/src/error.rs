//! Request outcomes and their HTTP mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use completion_client::CompletionError;
use conversation_store::ConversationError;
use credit_ledger::LedgerError;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Every way a relayed turn can fail.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("All upstream credentials are busy, try again shortly")]
    CapacityExhausted,

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient funds: {required} required, {available} available")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Upstream rejected the credential")]
    UpstreamAuth,

    #[error("Upstream rate limited the request")]
    UpstreamRateLimited,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Billing failed after completion: {0}")]
    Billing(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl RelayError {
    /// Map a ledger failure on the post-completion debit.
    ///
    /// The reply was already produced, so every ledger fault here is a
    /// billing fault regardless of its kind.
    pub fn billing(err: LedgerError) -> Self {
        RelayError::Billing(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_) | RelayError::UnknownModel(_) => StatusCode::BAD_REQUEST,
            RelayError::CapacityExhausted | RelayError::UpstreamRateLimited => {
                StatusCode::TOO_MANY_REQUESTS
            }
            RelayError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::InsufficientFunds { .. } => StatusCode::FORBIDDEN,
            RelayError::UpstreamAuth => StatusCode::UNAUTHORIZED,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Billing(_) | RelayError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidRequest(_) => "INVALID_REQUEST",
            RelayError::UnknownModel(_) => "UNKNOWN_MODEL",
            RelayError::CapacityExhausted => "CAPACITY_EXHAUSTED",
            RelayError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            RelayError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            RelayError::UpstreamAuth => "UPSTREAM_AUTH",
            RelayError::UpstreamRateLimited => "UPSTREAM_RATE_LIMITED",
            RelayError::Upstream(_) => "UPSTREAM_ERROR",
            RelayError::Billing(_) => "BILLING_ERROR",
            RelayError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<CompletionError> for RelayError {
    fn from(e: CompletionError) -> Self {
        match e {
            CompletionError::Unauthorized => RelayError::UpstreamAuth,
            CompletionError::RateLimit => RelayError::UpstreamRateLimited,
            other => RelayError::Upstream(other.to_string()),
        }
    }
}

/// Ledger faults seen before the completion call.
impl From<LedgerError> for RelayError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AccountNotFound(id) => RelayError::AccountNotFound(id),
            LedgerError::InsufficientFunds { required, available } => {
                RelayError::InsufficientFunds { required, available }
            }
            LedgerError::InvalidAmount(amount) => {
                RelayError::InvalidRequest(format!("invalid amount {}", amount))
            }
            other => RelayError::Persistence(other.to_string()),
        }
    }
}

/// Malformed or mistyped request bodies get the same JSON error body as
/// every other outcome.
impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        RelayError::InvalidRequest(rejection.body_text())
    }
}

impl From<ConversationError> for RelayError {
    fn from(e: ConversationError) -> Self {
        RelayError::Persistence(e.to_string())
    }
}
