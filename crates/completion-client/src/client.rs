//! OpenAI-compatible chat completion HTTP client.

use crate::error::CompletionError;
use crate::types::*;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Chat completion client.
///
/// The client carries no credential of its own. Every request is signed
/// with the key the caller currently holds, so one client can be shared by
/// all in-flight requests while each uses a different pooled credential.
#[derive(Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
}

impl CompletionClient {
    /// Create a new completion client.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CompletionError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a chat completion request signed with `api_key`.
    #[instrument(skip(self, api_key, messages), fields(message_count = messages.len()))]
    pub async fn chat(
        &self,
        api_key: &SecretString,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<Completion, CompletionError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            temperature: None,
            max_tokens: None,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key.expose_secret()))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let chat_response = self.handle_response::<ChatResponse>(response).await?;
        let served_by = chat_response.model;
        let usage = chat_response.usage;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .map(|content| Completion {
                content,
                model: served_by,
                usage,
            })
            .ok_or(CompletionError::EmptyResponse)
    }

    /// Handle HTTP response, converting errors appropriately.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CompletionError> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            debug!("Response body: {}", body.chars().take(200).collect::<String>());
            serde_json::from_str(&body).map_err(CompletionError::from)
        } else {
            Err(self.extract_error(response).await)
        }
    }

    /// Extract error information from failed response.
    async fn extract_error(&self, response: reqwest::Response) -> CompletionError {
        let status = response.status();

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Rate limit exceeded");
                CompletionError::RateLimit
            }
            StatusCode::UNAUTHORIZED => {
                warn!("Authentication failed");
                CompletionError::Unauthorized
            }
            _ => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".into());
                CompletionError::Api {
                    status: status.as_u16(),
                    message,
                }
            }
        }
    }
}
