use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-day chatbot reply counter for one tenant.
///
/// One row per (user_id, usage_date). `daily_limit` snapshots the plan limit
/// at the first write of the day; a mid-day plan change applies from the next
/// day for the snapshot but `can_send` always consults the current plan.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatbotUsageRecord {
    pub user_id: String,

    /// Calendar day in `YYYY-MM-DD` form (UTC).
    pub usage_date: String,

    pub count: i64,
    pub daily_limit: i64,
}
