use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{Campaign, CampaignCounter};
use crate::error::{AppError, AppResult};

const CAMPAIGN_COLUMNS: &str = r#"
    id,
    user_id,
    name,
    total_count,
    sent_count,
    delivered_count,
    read_count,
    failed_count,
    created_at,
    updated_at
"#;

/// Repository for campaign aggregate counters.
pub struct CampaignRepository;

impl CampaignRepository {
    pub async fn create(
        pool: &SqlitePool,
        user_id: &str,
        name: &str,
        total_count: i64,
    ) -> AppResult<Campaign> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, Campaign>(&format!(
            r#"
            INSERT INTO campaigns (id, user_id, name, total_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .bind(name)
        .bind(total_count)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Campaign>> {
        let row = sqlx::query_as::<_, Campaign>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Atomically increment one counter by 1.
    ///
    /// Expressed as `SET x = x + 1` at the storage layer so concurrent worker
    /// and webhook writes cannot lose updates. The column name comes from a
    /// closed enum, never from caller input.
    pub async fn increment(
        pool: &SqlitePool,
        id: &str,
        counter: CampaignCounter,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let column = counter.column();

        sqlx::query(&format!(
            "UPDATE campaigns SET {column} = {column} + 1, updated_at = ? WHERE id = ?"
        ))
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
