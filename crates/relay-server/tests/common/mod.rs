//! Common test utilities for integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use completion_client::CompletionClient;
use conversation_store::{HistoryStore, TokenCounter};
use credential_pool::CredentialPool;
use credit_ledger::{CostTable, CreditLedger};
use relay_server::api::{create_router, AppState};
use relay_server::{RelayService, RelaySettings};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;

/// Start a mock completion provider.
pub async fn mock_upstream_server() -> MockServer {
    MockServer::start().await
}

/// Create a completion client configured for a mock server.
pub fn test_client(mock_server: &MockServer) -> CompletionClient {
    CompletionClient::new(mock_server.uri(), Duration::from_secs(5)).unwrap()
}

/// A chat completion response carrying `content`.
pub fn chat_response(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content
            },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 9,
            "completion_tokens": 12,
            "total_tokens": 21
        }
    })
}

/// Relay wired to a mock server, with gpt-4 priced at 3.00.
pub async fn test_state(
    mock_server: &MockServer,
    credentials: &[&str],
    accounts: &[(&str, Decimal)],
) -> AppState {
    let ledger = CreditLedger::in_memory();
    for (account, balance) in accounts {
        ledger.open_account(account, *balance).await.unwrap();
    }

    let relay = RelayService::new(
        CredentialPool::new(credentials.iter().copied()).unwrap(),
        ledger,
        HistoryStore::in_memory(TokenCounter::for_model("gpt-4").unwrap(), 3000),
        Arc::new(test_client(mock_server)),
        CostTable::new()
            .with("gpt-4", dec!(3.00))
            .with("gpt-4o", dec!(7.00)),
        RelaySettings {
            debit_backoff: Duration::from_millis(1),
            ..RelaySettings::default()
        },
    );

    AppState::new(relay)
}

pub fn test_router(state: &AppState) -> Router {
    create_router(state.clone())
}

/// POST a chat message and return the status and JSON body.
pub async fn send_message(app: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat/send-message")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    read_json(response).await
}

/// POST a raw body to the send-message route, with an optional content type.
pub async fn post_raw(
    app: Router,
    content_type: Option<&str>,
    body: &str,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().method("POST").uri("/chat/send-message");
    if let Some(content_type) = content_type {
        request = request.header("content-type", content_type);
    }

    let response = app
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    read_json(response).await
}

/// GET a path and return the status and JSON body.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}
