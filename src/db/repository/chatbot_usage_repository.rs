use sqlx::SqlitePool;

use crate::db::models::ChatbotUsageRecord;
use crate::error::{AppError, AppResult};

/// Repository for calendar-day chatbot reply counters.
pub struct ChatbotUsageRepository;

impl ChatbotUsageRepository {
    pub async fn find(
        pool: &SqlitePool,
        user_id: &str,
        usage_date: &str,
    ) -> AppResult<Option<ChatbotUsageRecord>> {
        let row = sqlx::query_as::<_, ChatbotUsageRecord>(
            r#"
            SELECT user_id, usage_date, count, daily_limit
            FROM chatbot_usage
            WHERE user_id = ? AND usage_date = ?
            "#,
        )
        .bind(user_id)
        .bind(usage_date)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Count one accepted chatbot reply for the day. The first write of the
    /// day snapshots `daily_limit`; subsequent increments never lower it.
    /// The increment is allowed to push `count` past the limit; enforcement
    /// happens in the read-only check.
    pub async fn increment(
        pool: &SqlitePool,
        user_id: &str,
        usage_date: &str,
        daily_limit: i64,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chatbot_usage (user_id, usage_date, count, daily_limit)
            VALUES (?, ?, 1, ?)
            ON CONFLICT (user_id, usage_date) DO UPDATE SET count = count + 1
            "#,
        )
        .bind(user_id)
        .bind(usage_date)
        .bind(daily_limit)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
