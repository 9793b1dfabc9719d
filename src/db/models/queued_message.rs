use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single outbound message awaiting delivery.
///
/// The worker owns `status`/`attempts`/`error_*`; the webhook ingestor owns
/// `delivery_status` and the delivery timestamps. `whatsapp_message_id` is set
/// exactly once at send time and is the join key for status reconciliation.
///
/// Status transitions: 'pending' -> 'processing' -> 'sent' | 'pending'
/// (self-requeue for retryable failures) | 'failed'. Once sent,
/// `delivery_status` only ever advances: 'sent' -> 'delivered' -> 'read'.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Primary key (UUID)
    pub id: String,

    /// Owning tenant id (references `users.id`)
    pub user_id: String,

    /// Optional campaign this message belongs to.
    pub campaign_id: Option<String>,

    /// Destination phone number in E.164 form.
    pub phone: String,

    /// Provider message type ('text', 'template', 'image', ...).
    pub message_type: String,

    /// JSON-serialized provider-specific message body. Passed through to the
    /// provider untouched; never interpreted by the delivery core.
    pub payload: String,

    /// Queue status: 'pending', 'processing', 'sent', 'failed'.
    pub status: String,

    /// Number of delivery attempts already made.
    pub attempts: i32,

    /// Internal error code from the last failed attempt (if any).
    pub error_code: Option<String>,

    /// Human-readable error message from the last failed attempt.
    pub error_message: Option<String>,

    /// Provider-assigned message id, set once at send time.
    pub whatsapp_message_id: Option<String>,

    /// Delivery progress reported by webhooks:
    /// 'none', 'sent', 'delivered', 'read', 'failed'.
    pub delivery_status: String,

    pub last_attempt_at: Option<NaiveDateTime>,
    pub sent_at: Option<NaiveDateTime>,
    pub delivered_at: Option<NaiveDateTime>,
    pub read_at: Option<NaiveDateTime>,
    pub failed_at: Option<NaiveDateTime>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Per-status row counts across the queue.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct QueueDepth {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
}

/// Data required to enqueue a new outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQueuedMessage {
    pub user_id: String,
    pub campaign_id: Option<String>,
    pub phone: String,
    pub message_type: String,
    pub payload: String,
}
