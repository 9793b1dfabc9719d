use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Idempotency ledger entry for a status webhook event.
///
/// `event_id` is unique; the first INSERT claims the event and any replay is
/// a no-op. `processed` flips to 1 once side effects have been applied.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub message_id: Option<String>,
    pub source: String,
    pub processed: i64,
    pub created_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
}
