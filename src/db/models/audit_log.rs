use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Operator-visible audit entry. The worker records one for every delivery
/// failure classified as critical, even though the message itself is not
/// retried further.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub action: String,
    pub message_id: Option<String>,
    pub severity: String,
    pub detail: String,
    pub created_at: NaiveDateTime,
}
