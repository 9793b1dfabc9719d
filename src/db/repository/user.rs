use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::User;
use crate::error::{AppError, AppResult};

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, User>("SELECT id, plan, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Current subscription plan for a tenant. Looked up per call, never
    /// cached, so a mid-day plan change takes effect immediately. Unknown
    /// tenants fall back to the lowest tier.
    pub async fn plan_for(pool: &SqlitePool, id: &str) -> AppResult<String> {
        let plan: Option<String> = sqlx::query_scalar("SELECT plan FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(plan.unwrap_or_else(|| "starter".to_string()))
    }

    #[allow(dead_code)]
    pub async fn create(pool: &SqlitePool, id: &str, plan: &str) -> AppResult<User> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, plan, created_at) VALUES (?, ?, ?) RETURNING id, plan, created_at",
        )
        .bind(id)
        .bind(plan)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
