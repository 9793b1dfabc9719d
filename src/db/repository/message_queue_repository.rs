use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateQueuedMessage, QueueDepth, QueuedMessage};
use crate::error::{AppError, AppResult};

const MESSAGE_COLUMNS: &str = r#"
    id,
    user_id,
    campaign_id,
    phone,
    message_type,
    payload,
    status,
    attempts,
    error_code,
    error_message,
    whatsapp_message_id,
    delivery_status,
    last_attempt_at,
    sent_at,
    delivered_at,
    read_at,
    failed_at,
    created_at,
    updated_at
"#;

/// Repository for the persistent outbound message queue.
///
/// Implementation notes:
/// - Claiming uses an atomic single-statement UPDATE with a subselect:
///   `UPDATE ... WHERE id = (SELECT id FROM ... LIMIT 1) RETURNING ...`
///   The `status = 'pending'` guard inside the UPDATE is the mutual-exclusion
///   point: two overlapping worker invocations can never claim the same row.
/// - Webhook-side updates advance `delivery_status` monotonically and never
///   regress it (a late 'delivered' after 'read' only fills the timestamp).
pub struct MessageQueueRepository;

impl MessageQueueRepository {
    /// Enqueue a new outbound message with status 'pending'.
    pub async fn create(
        pool: &SqlitePool,
        message: CreateQueuedMessage,
    ) -> AppResult<QueuedMessage> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, QueuedMessage>(&format!(
            r#"
            INSERT INTO queued_messages (
                id, user_id, campaign_id, phone, message_type, payload,
                status, attempts, delivery_status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, 'none', ?, ?)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(message.user_id)
        .bind(message.campaign_id)
        .bind(message.phone)
        .bind(message.message_type)
        .bind(message.payload)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Claim up to `limit` pending messages, oldest first, and return them.
    ///
    /// Each message is claimed individually with its own atomic statement, so
    /// a worker crash mid-batch leaves clearly attributable partial state and
    /// overlapping invocations never double-claim a row.
    pub async fn claim_pending(pool: &SqlitePool, limit: i64) -> AppResult<Vec<QueuedMessage>> {
        let mut messages: Vec<QueuedMessage> = Vec::new();
        if limit <= 0 {
            return Ok(messages);
        }

        for _ in 0..(limit as usize) {
            let now = Utc::now().naive_utc();

            let opt = sqlx::query_as::<_, QueuedMessage>(&format!(
                r#"
                UPDATE queued_messages
                SET status = 'processing', updated_at = ?
                WHERE status = 'pending'
                  AND id = (
                    SELECT id FROM queued_messages
                    WHERE status = 'pending'
                    ORDER BY created_at ASC, id ASC
                    LIMIT 1
                )
                RETURNING {MESSAGE_COLUMNS}
                "#
            ))
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

            if let Some(message) = opt {
                messages.push(message);
            } else {
                break;
            }
        }

        Ok(messages)
    }

    /// Mark a message as sent and record the provider-assigned id.
    /// `whatsapp_message_id` is only ever written here, exactly once.
    ///
    /// Guarded on `status = 'processing'`: if the claim was reclaimed by
    /// another invocation in the meantime this returns `None` and leaves the
    /// winner's state untouched.
    pub async fn mark_sent(
        pool: &SqlitePool,
        id: &str,
        whatsapp_message_id: &str,
    ) -> AppResult<Option<QueuedMessage>> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, QueuedMessage>(&format!(
            r#"
            UPDATE queued_messages
            SET status = 'sent',
                whatsapp_message_id = ?,
                attempts = attempts + 1,
                sent_at = ?,
                last_attempt_at = ?,
                error_code = NULL,
                error_message = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'processing'
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(whatsapp_message_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Self-requeue a message after a retryable failure: increment attempts,
    /// record the error and flip the status back to 'pending' so the next
    /// worker invocation picks it up again. Guarded on `status = 'processing'`
    /// like the other terminal transitions.
    pub async fn requeue_for_retry(
        pool: &SqlitePool,
        id: &str,
        error_code: &str,
        error_message: &str,
    ) -> AppResult<Option<QueuedMessage>> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, QueuedMessage>(&format!(
            r#"
            UPDATE queued_messages
            SET status = 'pending',
                attempts = attempts + 1,
                error_code = ?,
                error_message = ?,
                last_attempt_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'processing'
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(error_code)
        .bind(error_message)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Permanently fail a message (non-retryable error or retries exhausted).
    /// Guarded on `status = 'processing'`.
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: &str,
        error_code: &str,
        error_message: &str,
    ) -> AppResult<Option<QueuedMessage>> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, QueuedMessage>(&format!(
            r#"
            UPDATE queued_messages
            SET status = 'failed',
                delivery_status = 'failed',
                attempts = attempts + 1,
                error_code = ?,
                error_message = ?,
                last_attempt_at = ?,
                failed_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'processing'
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(error_code)
        .bind(error_message)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Release a claimed message back to 'pending' without burning an attempt
    /// (used when the tenant's quota is exhausted for this window).
    pub async fn release(pool: &SqlitePool, id: &str) -> AppResult<Option<QueuedMessage>> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, QueuedMessage>(&format!(
            r#"
            UPDATE queued_messages
            SET status = 'pending', updated_at = ?
            WHERE id = ? AND status = 'processing'
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Reclaim messages stuck in 'processing' (a worker crashed mid-batch)
    /// back to 'pending'. Attempts are not incremented; the claim never
    /// completed. Returns the number of reclaimed rows.
    pub async fn reset_stale_processing(
        pool: &SqlitePool,
        older_than: chrono::NaiveDateTime,
    ) -> AppResult<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE queued_messages
            SET status = 'pending', updated_at = ?
            WHERE status = 'processing' AND updated_at < ?
            "#,
        )
        .bind(now)
        .bind(older_than)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Per-status row counts, for operational visibility.
    pub async fn queue_depth(pool: &SqlitePool) -> AppResult<QueueDepth> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM queued_messages GROUP BY status")
                .fetch_all(pool)
                .await
                .map_err(AppError::Database)?;

        let mut depth = QueueDepth::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => depth.pending = count,
                "processing" => depth.processing = count,
                "sent" => depth.sent = count,
                "failed" => depth.failed = count,
                _ => {}
            }
        }

        Ok(depth)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<QueuedMessage>> {
        let row = sqlx::query_as::<_, QueuedMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM queued_messages WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Look up a message by the provider-assigned id (webhook join key).
    pub async fn find_by_whatsapp_message_id(
        pool: &SqlitePool,
        whatsapp_message_id: &str,
    ) -> AppResult<Option<QueuedMessage>> {
        let row = sqlx::query_as::<_, QueuedMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM queued_messages WHERE whatsapp_message_id = ?"
        ))
        .bind(whatsapp_message_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Record a 'sent' status callback: fill `sent_at` if missing and advance
    /// `delivery_status` from 'none' only.
    pub async fn apply_sent_status(pool: &SqlitePool, id: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE queued_messages
            SET sent_at = COALESCE(sent_at, ?),
                delivery_status = CASE
                    WHEN delivery_status = 'none' THEN 'sent'
                    ELSE delivery_status
                END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Record a 'delivered' status callback. `delivery_status` never regresses
    /// from 'read'.
    pub async fn apply_delivered_status(pool: &SqlitePool, id: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE queued_messages
            SET delivered_at = COALESCE(delivered_at, ?),
                delivery_status = CASE
                    WHEN delivery_status IN ('none', 'sent') THEN 'delivered'
                    ELSE delivery_status
                END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Record a 'read' status callback.
    pub async fn apply_read_status(pool: &SqlitePool, id: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE queued_messages
            SET read_at = COALESCE(read_at, ?),
                delivery_status = CASE
                    WHEN delivery_status IN ('none', 'sent', 'delivered') THEN 'read'
                    ELSE delivery_status
                END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Record a 'failed' status callback with the provider's error detail.
    pub async fn apply_failed_status(
        pool: &SqlitePool,
        id: &str,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE queued_messages
            SET status = 'failed',
                delivery_status = 'failed',
                failed_at = COALESCE(failed_at, ?),
                error_code = COALESCE(?, error_code),
                error_message = COALESCE(?, error_message),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(error_code)
        .bind(error_message)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
