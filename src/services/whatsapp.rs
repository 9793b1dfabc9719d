use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Abstraction over the outbound messaging provider so the worker can be
/// exercised against a stub in tests.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send one message; returns the provider-assigned message id.
    async fn send(
        &self,
        to: &str,
        message_type: &str,
        payload: &serde_json::Value,
    ) -> AppResult<String>;
}

/// Upper bound on one provider call. The worker's stale-claim cutoff is
/// derived from this, so it must stay the single source of truth.
pub const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// WhatsApp Cloud API client.
#[derive(Debug, Clone)]
pub struct WhatsAppService {
    client: Client,
    api_url: String,
    access_token: String,
    phone_number_id: String,
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendMessageResponse {
    pub messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub code: Option<i64>,
    pub message: String,
}

impl WhatsAppService {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            api_url: config.whatsapp.api_url.clone(),
            access_token: config.whatsapp.access_token.clone(),
            phone_number_id: config.whatsapp.phone_number_id.clone(),
        })
    }
}

#[async_trait]
impl MessageSender for WhatsAppService {
    async fn send(
        &self,
        to: &str,
        message_type: &str,
        payload: &serde_json::Value,
    ) -> AppResult<String> {
        // The provider contract is fixed upstream: merge the opaque payload
        // into the standard envelope without interpreting it.
        let mut body = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": message_type,
        });
        if let (Some(envelope), Some(extra)) = (body.as_object_mut(), payload.as_object()) {
            for (key, value) in extra {
                envelope.insert(key.clone(), value.clone());
            }
        }

        let response = self
            .client
            .post(format!(
                "{}/{}/messages",
                self.api_url, self.phone_number_id
            ))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<ApiErrorResponse>(&text) {
                Ok(parsed) => Err(AppError::Provider {
                    code: parsed.error.code,
                    message: parsed.error.message,
                }),
                Err(_) => Err(AppError::provider(
                    None,
                    format!("HTTP {}: {}", status, text),
                )),
            };
        }

        let parsed: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| AppError::provider(None, format!("Failed to parse response: {}", e)))?;

        parsed
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| AppError::provider(None, "Response contained no message id"))
    }
}
