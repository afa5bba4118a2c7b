//! Request and response bodies.

use crate::relay::TurnRequest;
use serde::{Deserialize, Serialize};

/// Body of `POST /chat/send-message`.
///
/// Fields are optional so a missing one is reported as an invalid request
/// rather than a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default, alias = "conversation_id")]
    pub roomid: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl From<SendMessageRequest> for TurnRequest {
    fn from(body: SendMessageRequest) -> Self {
        TurnRequest {
            account_id: body.account_id.unwrap_or_default(),
            conversation_id: body.roomid.unwrap_or_default(),
            message: body.message.unwrap_or_default(),
            model: body.model.unwrap_or_default(),
        }
    }
}

/// Successful reply, amounts formatted like `$7.00`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message: String,
    pub cost: String,
    pub balance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub credentials_total: usize,
    pub credentials_free: usize,
    pub ledger_healthy: bool,
}
