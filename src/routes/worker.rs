use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/worker", post(trigger_worker))
}

/// External trigger for one queue worker invocation.
///
/// Meant to be hit by a scheduler (cron, Cloud Scheduler, ...) every few
/// seconds. Authenticated with a pre-shared secret; a deployment without the
/// secret configured fails closed rather than exposing an open trigger.
async fn trigger_worker(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<serde_json::Value>> {
    let secret = state
        .config
        .worker
        .secret
        .as_deref()
        .ok_or_else(|| AppError::Config("WORKER_SECRET is not configured".to_string()))?;

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    if authorization != format!("Bearer {}", secret) {
        return Err(AppError::Unauthorized);
    }

    if state.lock.is_locked() {
        return Ok(Json(serde_json::json!({
            "message": "System in maintenance mode",
            "processed": 0,
        })));
    }

    let outcome = state.worker.process_batch().await?;

    Ok(Json(serde_json::json!({
        "message": format!("Processed {} messages", outcome.total),
        "sent": outcome.sent,
        "failed": outcome.failed,
        "retrying": outcome.retrying,
        "total": outcome.total,
    })))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
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

    async fn app(secret: Option<&str>, locked: bool) -> Router<()> {
        let pool = test_pool().await;
        let mut config = Config::default();
        config.worker.secret = secret.map(String::from);
        config.worker.message_delay_ms = 0;
        let lock = Arc::new(SystemLock::new(locked));
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

    fn request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/worker");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).expect("request")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn missing_or_wrong_secret_is_rejected() {
        let app = app(Some("s3cret"), false).await;

        let response = app.clone().oneshot(request(None)).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request(Some("Bearer wrong")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unconfigured_secret_fails_closed() {
        let app = app(None, false).await;

        let response = app
            .oneshot(request(Some("Bearer anything")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn maintenance_mode_short_circuits() {
        let app = app(Some("s3cret"), true).await;

        let response = app
            .oneshot(request(Some("Bearer s3cret")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["message"], "System in maintenance mode");
        assert_eq!(body["processed"], 0);
    }

    #[tokio::test]
    async fn empty_queue_reports_zero_totals() {
        let app = app(Some("s3cret"), false).await;

        let response = app
            .oneshot(request(Some("Bearer s3cret")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["total"], 0);
        assert_eq!(body["sent"], 0);
    }
}
