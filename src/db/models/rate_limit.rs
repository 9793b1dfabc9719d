use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One fixed-window counter for an (identifier, limit_type) pair.
///
/// Exactly one row exists per pair; window rollover rewrites the row in place.
/// The count is monotonic within a window and is reset only by window expiry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// User id or `ip:<addr>`.
    pub identifier: String,

    /// Limit table key, e.g. 'MESSAGE_growth' or 'WEBHOOK'.
    pub limit_type: String,

    pub count: i64,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
}
