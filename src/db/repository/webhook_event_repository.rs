use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{AppError, AppResult};

/// Repository for the webhook idempotency ledger and raw payload audit trail.
pub struct WebhookEventRepository;

impl WebhookEventRepository {
    /// Try to claim an event id. Returns `true` if this call inserted the
    /// ledger row (first delivery) and `false` if the id was already present
    /// (replay — the caller must skip side effects).
    ///
    /// The row is written before side effects are applied, so a retry after a
    /// partial downstream failure cannot double-apply counter increments.
    pub async fn try_claim(
        pool: &SqlitePool,
        event_id: &str,
        message_id: Option<&str>,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO webhook_events (event_id, message_id, source, processed, created_at)
            VALUES (?, ?, 'whatsapp', 0, ?)
            "#,
        )
        .bind(event_id)
        .bind(message_id)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip an event to processed once its side effects have been applied.
    pub async fn mark_processed(pool: &SqlitePool, event_id: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query("UPDATE webhook_events SET processed = 1, processed_at = ? WHERE event_id = ?")
            .bind(now)
            .bind(event_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Append the raw payload to the audit trail.
    pub async fn log_payload(pool: &SqlitePool, payload: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query("INSERT INTO webhook_logs (source, payload, created_at) VALUES ('whatsapp', ?, ?)")
            .bind(payload)
            .bind(now)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }
}
