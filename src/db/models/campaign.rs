use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Campaign aggregate counters as consumed by the delivery core.
///
/// Counters are monotonic. They are only ever updated with atomic
/// `SET x = x + 1` statements so the worker and concurrent webhook deliveries
/// cannot lose increments to read-modify-write races.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub total_count: i64,
    pub sent_count: i64,
    pub delivered_count: i64,
    pub read_count: i64,
    pub failed_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// The campaign counter fields the core is allowed to increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignCounter {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl CampaignCounter {
    pub fn column(&self) -> &'static str {
        match self {
            CampaignCounter::Sent => "sent_count",
            CampaignCounter::Delivered => "delivered_count",
            CampaignCounter::Read => "read_count",
            CampaignCounter::Failed => "failed_count",
        }
    }
}
