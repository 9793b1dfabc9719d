use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::{CreateQueuedMessage, QueuedMessage};
use crate::db::MessageQueueRepository;
use crate::error::{AppError, AppErrorWithDetails};
use crate::services::quota::{LimitCategory, QuotaService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(enqueue_message))
        .route("/:id", get(get_message))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueMessageRequest {
    pub user_id: String,
    pub campaign_id: Option<String>,
    pub phone: String,
    pub message_type: String,
    /// Provider-specific message body, stored verbatim and forwarded untouched.
    pub payload: serde_json::Value,
}

/// Enqueue one outbound message.
///
/// The tenant's MESSAGE window gates admission here; the count itself is
/// consumed by the worker at actual send time, so a rejected or failed
/// message never burns quota.
async fn enqueue_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnqueueMessageRequest>,
) -> Result<(StatusCode, Json<QueuedMessage>), AppErrorWithDetails> {
    if request.user_id.trim().is_empty() {
        return Err(AppError::Validation("user_id must not be empty".to_string()).into());
    }
    if request.phone.trim().is_empty() {
        return Err(AppError::Validation("phone must not be empty".to_string()).into());
    }
    if request.message_type.trim().is_empty() {
        return Err(AppError::Validation("message_type must not be empty".to_string()).into());
    }
    if !request.payload.is_object() {
        return Err(AppError::Validation("payload must be a JSON object".to_string()).into());
    }

    let quota =
        QuotaService::can_send(&state.db, &request.user_id, LimitCategory::Message).await;
    if !quota.allowed {
        return Err(AppError::RateLimited.with_details(serde_json::json!({
            "limit": quota.limit,
            "remaining": quota.remaining,
            "retry_after_seconds": quota.retry_after_seconds,
        })));
    }

    let message = MessageQueueRepository::create(
        &state.db,
        CreateQueuedMessage {
            user_id: request.user_id,
            campaign_id: request.campaign_id,
            phone: request.phone,
            message_type: request.message_type,
            payload: request.payload.to_string(),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QueuedMessage>, AppError> {
    let message = MessageQueueRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Message {} not found", id)))?;

    Ok(Json(message))
}
