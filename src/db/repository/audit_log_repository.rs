use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub struct AuditLogRepository;

impl AuditLogRepository {
    /// Record an operator-visible audit entry.
    pub async fn record(
        pool: &SqlitePool,
        action: &str,
        message_id: Option<&str>,
        severity: &str,
        detail: &str,
    ) -> AppResult<()> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, message_id, severity, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(action)
        .bind(message_id)
        .bind(severity)
        .bind(detail)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
