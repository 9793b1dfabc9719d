use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::db::models::RateLimitRecord;
use crate::error::{AppError, AppResult};

/// Repository for fixed-window rate limit counters.
///
/// One row per (identifier, limit_type); rollover to a new window rewrites
/// the row in place. All writes go through upserts so concurrent requests
/// racing to open a window are benign (the loser's bounds win, counts merge).
pub struct RateLimitRepository;

impl RateLimitRepository {
    pub async fn find(
        pool: &SqlitePool,
        identifier: &str,
        limit_type: &str,
    ) -> AppResult<Option<RateLimitRecord>> {
        let row = sqlx::query_as::<_, RateLimitRecord>(
            r#"
            SELECT identifier, limit_type, count, window_start, window_end
            FROM rate_limit_tracking
            WHERE identifier = ? AND limit_type = ?
            "#,
        )
        .bind(identifier)
        .bind(limit_type)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Open a fresh empty window if no row exists yet. A concurrent creator
    /// winning the race is fine; this never overwrites an existing window.
    pub async fn create_window(
        pool: &SqlitePool,
        identifier: &str,
        limit_type: &str,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO rate_limit_tracking
                (identifier, limit_type, count, window_start, window_end)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(identifier)
        .bind(limit_type)
        .bind(window_start)
        .bind(window_end)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Count one operation against the active window. If the stored window
    /// has expired (or no row exists) this starts a fresh window at count 1.
    pub async fn increment(
        pool: &SqlitePool,
        identifier: &str,
        limit_type: &str,
        now: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_limit_tracking
                (identifier, limit_type, count, window_start, window_end)
            VALUES (?, ?, 1, ?, ?)
            ON CONFLICT (identifier, limit_type) DO UPDATE SET
                count = CASE WHEN window_end <= excluded.window_start
                             THEN 1 ELSE count + 1 END,
                window_start = CASE WHEN window_end <= excluded.window_start
                                    THEN excluded.window_start ELSE window_start END,
                window_end = CASE WHEN window_end <= excluded.window_start
                                  THEN excluded.window_end ELSE window_end END
            "#,
        )
        .bind(identifier)
        .bind(limit_type)
        .bind(now)
        .bind(window_end)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Administrative reset of a single counter.
    #[allow(dead_code)]
    pub async fn reset(pool: &SqlitePool, identifier: &str, limit_type: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM rate_limit_tracking WHERE identifier = ? AND limit_type = ?")
            .bind(identifier)
            .bind(limit_type)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }
}
