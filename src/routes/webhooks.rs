use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::services::webhooks::{StatusWebhookService, SIGNATURE_HEADER};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/status",
        get(verify_subscription).post(handle_status_webhook),
    )
}

// Meta sends the handshake params with `hub.` prefixes.
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Webhook subscription handshake: echo the challenge back when the verify
/// token matches, otherwise 403.
async fn verify_subscription(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> (StatusCode, String) {
    let mode_ok = query.mode.as_deref() == Some("subscribe");
    let token_ok = query.verify_token.as_deref() == Some(state.config.whatsapp.verify_token.as_str());

    match (mode_ok && token_ok, query.challenge) {
        (true, Some(challenge)) => {
            tracing::info!("Webhook subscription handshake verified");
            (StatusCode::OK, challenge)
        }
        _ => {
            tracing::warn!("Webhook subscription handshake rejected");
            (StatusCode::FORBIDDEN, "Forbidden".to_string())
        }
    }
}

/// Delivery-status callback endpoint.
///
/// The signature is checked over the exact raw bytes before any parsing.
/// After verification the endpoint always answers 200 so the provider does
/// not redeliver payloads we have already recorded; per-status failures are
/// logged inside the ingest service.
async fn handle_status_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let invalid_signature = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Invalid signature" })),
        )
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(invalid_signature)?;

    StatusWebhookService::verify_signature(&state.config.whatsapp.app_secret, &body, signature)
        .map_err(|_| invalid_signature())?;

    match StatusWebhookService::handle_payload(&state.db, &body).await {
        Ok(outcome) => {
            tracing::info!(
                "Webhook ingested: applied={}, duplicates={}, unmatched={}",
                outcome.applied,
                outcome.duplicates,
                outcome.unmatched
            );
        }
        Err(e) => {
            // Unparseable bodies are logged and acknowledged; retrying them
            // would produce the same garbage again.
            tracing::error!("Webhook payload rejected: {:?}", e);
        }
    }

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use hmac::Mac;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::db::test_util::test_pool;
    use crate::error::AppResult;
    use crate::services::breaker::CircuitBreaker;
    use crate::services::system_lock::SystemLock;
    use crate::services::whatsapp::MessageSender;
    use crate::services::worker::QueueWorker;

    const SECRET: &str = "app-secret";
    const VERIFY_TOKEN: &str = "verify-me";

    struct NoopSender;

    #[async_trait]
    impl MessageSender for NoopSender {
        async fn send(
            &self,
            _to: &str,
            _message_type: &str,
            _payload: &serde_json::Value,
        ) -> AppResult<String> {
            Ok("wamid.1".to_string())
        }
    }

    async fn app() -> Router<()> {
        let pool = test_pool().await;
        let mut config = Config::default();
        config.whatsapp.app_secret = SECRET.to_string();
        config.whatsapp.verify_token = VERIFY_TOKEN.to_string();
        let lock = Arc::new(SystemLock::new(false));
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(30)));
        let worker = Arc::new(QueueWorker::new(
            pool.clone(),
            Arc::new(NoopSender),
            breaker,
            lock.clone(),
            config.worker.clone(),
        ));
        let state = Arc::new(crate::AppState {
            db: pool,
            config,
            lock,
            worker,
        });
        router().with_state(state)
    }

    fn sign(body: &[u8]) -> String {
        let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(SECRET.as_bytes()).expect("hmac");
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[tokio::test]
    async fn handshake_echoes_challenge_for_valid_token() {
        let uri = format!(
            "/status?hub.mode=subscribe&hub.verify_token={}&hub.challenge=12345",
            VERIFY_TOKEN
        );
        let response = app()
            .await
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&bytes[..], b"12345");
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_token() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .uri("/status?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=12345")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unsigned_delivery_is_rejected_with_flat_error() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/status")
                    .body(Body::from(r#"{"entry":[]}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(body["error"], "Invalid signature");
    }

    #[tokio::test]
    async fn signed_delivery_is_acknowledged() {
        let payload = br#"{"entry":[]}"#;
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/status")
                    .header(SIGNATURE_HEADER, sign(payload))
                    .body(Body::from(payload.to_vec()))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(body["ok"], true);
    }
}
