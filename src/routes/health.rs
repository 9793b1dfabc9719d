use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::db::models::QueueDepth;
use crate::db::MessageQueueRepository;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    /// Kill-switch state; a locked system answers healthy but idle.
    pub maintenance: bool,
    pub queue: QueueDepth,
}

/// Liveness plus delivery-pipeline visibility: queue depth per status and the
/// maintenance flag. A failed depth query degrades the status instead of
/// turning the probe into a 500.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, queue) = match MessageQueueRepository::queue_depth(&state.db).await {
        Ok(depth) => ("healthy", depth),
        Err(e) => {
            tracing::error!("Health check failed to read queue depth: {:?}", e);
            ("degraded", QueueDepth::default())
        }
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        maintenance: state.lock.is_locked(),
        queue,
    };

    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::db::models::CreateQueuedMessage;
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

    async fn app(locked: bool) -> (Router<()>, sqlx::SqlitePool) {
        let pool = test_pool().await;
        let config = Config::default();
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
            db: pool.clone(),
            config,
            lock,
            worker,
        });
        let router = Router::new()
            .route("/health", get(health_check))
            .with_state(state);
        (router, pool)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn reports_queue_depth_and_maintenance_flag() {
        let (app, pool) = app(false).await;
        crate::db::UserRepository::create(&pool, "u1", "growth")
            .await
            .unwrap();
        MessageQueueRepository::create(
            &pool,
            CreateQueuedMessage {
                user_id: "u1".to_string(),
                campaign_id: None,
                phone: "+15551234567".to_string(),
                message_type: "text".to_string(),
                payload: r#"{"text":{"body":"hi"}}"#.to_string(),
            },
        )
        .await
        .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["maintenance"], false);
        assert_eq!(body["queue"]["pending"], 1);
        assert_eq!(body["queue"]["sent"], 0);
    }

    #[tokio::test]
    async fn surfaces_engaged_kill_switch() {
        let (app, _pool) = app(true).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        let body = body_json(response).await;
        assert_eq!(body["maintenance"], true);
    }
}
