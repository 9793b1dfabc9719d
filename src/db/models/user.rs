use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Minimal tenant record. Account management lives elsewhere; the delivery
/// core only needs the current subscription plan for quota lookups.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub plan: String,
    pub created_at: NaiveDateTime,
}
