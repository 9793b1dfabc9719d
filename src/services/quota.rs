use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::{ChatbotUsageRepository, RateLimitRepository, UserRepository};
use crate::error::AppResult;

/// Subscription tiers that parameterize quota limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Starter,
    Growth,
    Pro,
    Enterprise,
}

impl Plan {
    /// Unknown or missing plans default to the lowest tier.
    pub fn parse(value: &str) -> Plan {
        match value {
            "growth" => Plan::Growth,
            "pro" => Plan::Pro,
            "enterprise" => Plan::Enterprise,
            _ => Plan::Starter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Starter => "starter",
            Plan::Growth => "growth",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }
}

/// Throttled operation categories. API/MESSAGE/CHATBOT are plan-scoped;
/// AUTH and WEBHOOK carry fixed limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCategory {
    Api,
    Message,
    Chatbot,
    Auth,
    Webhook,
}

impl LimitCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitCategory::Api => "API",
            LimitCategory::Message => "MESSAGE",
            LimitCategory::Chatbot => "CHATBOT",
            LimitCategory::Auth => "AUTH",
            LimitCategory::Webhook => "WEBHOOK",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LimitConfig {
    pub window_ms: i64,
    pub max: i64,
}

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Static limits table, the single source of truth for all throttling.
/// Keys are `{category}_{plan}` for plan-scoped categories.
pub fn limit_for(category: LimitCategory, plan: Plan) -> LimitConfig {
    match (category, plan) {
        (LimitCategory::Api, Plan::Starter) => LimitConfig { window_ms: MINUTE_MS, max: 60 },
        (LimitCategory::Api, Plan::Growth) => LimitConfig { window_ms: MINUTE_MS, max: 300 },
        (LimitCategory::Api, Plan::Pro) => LimitConfig { window_ms: MINUTE_MS, max: 1000 },
        (LimitCategory::Api, Plan::Enterprise) => LimitConfig { window_ms: MINUTE_MS, max: 5000 },

        (LimitCategory::Message, Plan::Starter) => LimitConfig { window_ms: HOUR_MS, max: 250 },
        (LimitCategory::Message, Plan::Growth) => LimitConfig { window_ms: HOUR_MS, max: 1000 },
        (LimitCategory::Message, Plan::Pro) => LimitConfig { window_ms: HOUR_MS, max: 5000 },
        (LimitCategory::Message, Plan::Enterprise) => LimitConfig { window_ms: HOUR_MS, max: 20000 },

        (LimitCategory::Chatbot, Plan::Starter) => LimitConfig { window_ms: DAY_MS, max: 50 },
        (LimitCategory::Chatbot, Plan::Growth) => LimitConfig { window_ms: DAY_MS, max: 500 },
        (LimitCategory::Chatbot, Plan::Pro) => LimitConfig { window_ms: DAY_MS, max: 2000 },
        (LimitCategory::Chatbot, Plan::Enterprise) => LimitConfig { window_ms: DAY_MS, max: 10000 },

        // Fixed entries, independent of plan.
        (LimitCategory::Auth, _) => LimitConfig { window_ms: 15 * MINUTE_MS, max: 10 },
        (LimitCategory::Webhook, _) => LimitConfig { window_ms: MINUTE_MS, max: 600 },
    }
}

/// Limit table key stored in `rate_limit_tracking.limit_type`.
pub fn limit_type_key(category: LimitCategory, plan: Plan) -> String {
    match category {
        LimitCategory::Auth | LimitCategory::Webhook => category.as_str().to_string(),
        _ => format!("{}_{}", category.as_str(), plan.as_str()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

/// Quota and rate limit checks for the delivery pipeline.
///
/// Checks are read-only (beyond lazily opening an empty window); increments
/// are a separate explicit call made only after the gated operation proceeds.
/// Storage errors fail open: this layer is advisory throttling, not a billing
/// ledger, so availability wins over strict enforcement.
pub struct QuotaService;

impl QuotaService {
    /// Fixed-window check for an (identifier, category, plan) triple.
    pub async fn check_rate_limit(
        pool: &SqlitePool,
        identifier: &str,
        category: LimitCategory,
        plan: Plan,
    ) -> RateLimitStatus {
        let config = limit_for(category, plan);
        match Self::check_rate_limit_inner(pool, identifier, category, plan).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    "Rate limit check failed for {} ({}): {:?}; failing open",
                    identifier,
                    limit_type_key(category, plan),
                    e
                );
                Self::fail_open(config)
            }
        }
    }

    async fn check_rate_limit_inner(
        pool: &SqlitePool,
        identifier: &str,
        category: LimitCategory,
        plan: Plan,
    ) -> AppResult<RateLimitStatus> {
        let config = limit_for(category, plan);
        let limit_type = limit_type_key(category, plan);
        let now = Utc::now().naive_utc();
        let window = ChronoDuration::milliseconds(config.window_ms);

        let record = RateLimitRepository::find(pool, identifier, &limit_type).await?;

        match record {
            Some(rec) if rec.window_end > now => {
                let remaining = (config.max - rec.count).max(0);
                let allowed = rec.count < config.max;
                let retry_after = if allowed {
                    None
                } else {
                    Some((rec.window_end - now).num_seconds().max(0))
                };
                Ok(RateLimitStatus {
                    allowed,
                    limit: config.max,
                    remaining,
                    reset_at: rec.window_end,
                    retry_after_seconds: retry_after,
                })
            }
            _ => {
                // No active window: open a fresh empty one. Expired rows are
                // left in place; the increment upsert rewrites them.
                let window_end = now + window;
                RateLimitRepository::create_window(pool, identifier, &limit_type, now, window_end)
                    .await?;
                Ok(RateLimitStatus {
                    allowed: true,
                    limit: config.max,
                    remaining: config.max,
                    reset_at: window_end,
                    retry_after_seconds: None,
                })
            }
        }
    }

    /// Count one operation against the active window. Called only after the
    /// gated operation was allowed to proceed.
    pub async fn increment_rate_limit(
        pool: &SqlitePool,
        identifier: &str,
        category: LimitCategory,
        plan: Plan,
    ) {
        let config = limit_for(category, plan);
        let limit_type = limit_type_key(category, plan);
        let now = Utc::now().naive_utc();
        let window_end = now + ChronoDuration::milliseconds(config.window_ms);

        if let Err(e) =
            RateLimitRepository::increment(pool, identifier, &limit_type, now, window_end).await
        {
            tracing::warn!(
                "Failed to increment rate limit for {} ({}): {:?}",
                identifier,
                limit_type,
                e
            );
        }
    }

    /// Plan-aware quota check for a tenant. The plan is looked up per call so
    /// a mid-day upgrade takes effect immediately.
    pub async fn can_send(
        pool: &SqlitePool,
        user_id: &str,
        category: LimitCategory,
    ) -> RateLimitStatus {
        let plan = match UserRepository::plan_for(pool, user_id).await {
            Ok(p) => Plan::parse(&p),
            Err(e) => {
                tracing::warn!("Plan lookup failed for {}: {:?}; failing open", user_id, e);
                return Self::fail_open(limit_for(category, Plan::Starter));
            }
        };

        match category {
            LimitCategory::Chatbot => Self::check_chatbot(pool, user_id, plan).await,
            _ => Self::check_rate_limit(pool, user_id, category, plan).await,
        }
    }

    /// Count one operation for a tenant in the given category.
    pub async fn increment(pool: &SqlitePool, user_id: &str, category: LimitCategory) {
        let plan = match UserRepository::plan_for(pool, user_id).await {
            Ok(p) => Plan::parse(&p),
            Err(e) => {
                tracing::warn!("Plan lookup failed for {}: {:?}", user_id, e);
                return;
            }
        };

        match category {
            LimitCategory::Chatbot => {
                let limit = limit_for(LimitCategory::Chatbot, plan).max;
                let today = Utc::now().format("%Y-%m-%d").to_string();
                if let Err(e) = ChatbotUsageRepository::increment(pool, user_id, &today, limit).await
                {
                    tracing::warn!("Failed to increment chatbot usage for {}: {:?}", user_id, e);
                }
            }
            _ => Self::increment_rate_limit(pool, user_id, category, plan).await,
        }
    }

    /// Calendar-day chatbot quota: resets at midnight UTC.
    async fn check_chatbot(pool: &SqlitePool, user_id: &str, plan: Plan) -> RateLimitStatus {
        let limit = limit_for(LimitCategory::Chatbot, plan).max;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let midnight = (Utc::now() + ChronoDuration::days(1))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time");

        match ChatbotUsageRepository::find(pool, user_id, &today).await {
            Ok(record) => {
                let count = record.map(|r| r.count).unwrap_or(0);
                RateLimitStatus {
                    allowed: count < limit,
                    limit,
                    remaining: (limit - count).max(0),
                    reset_at: midnight,
                    retry_after_seconds: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Chatbot usage check failed for {}: {:?}; failing open",
                    user_id,
                    e
                );
                Self::fail_open(limit_for(LimitCategory::Chatbot, plan))
            }
        }
    }

    fn fail_open(config: LimitConfig) -> RateLimitStatus {
        RateLimitStatus {
            allowed: true,
            limit: config.max,
            remaining: config.max,
            reset_at: Utc::now().naive_utc() + ChronoDuration::milliseconds(config.window_ms),
            retry_after_seconds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::test_pool;
    use crate::db::UserRepository;

    #[test]
    fn unknown_plan_defaults_to_starter() {
        assert_eq!(Plan::parse("nonsense"), Plan::Starter);
        assert_eq!(Plan::parse(""), Plan::Starter);
        assert_eq!(Plan::parse("enterprise"), Plan::Enterprise);
    }

    #[test]
    fn fixed_categories_ignore_plan() {
        assert_eq!(limit_type_key(LimitCategory::Auth, Plan::Pro), "AUTH");
        assert_eq!(
            limit_type_key(LimitCategory::Message, Plan::Growth),
            "MESSAGE_growth"
        );
    }

    #[tokio::test]
    async fn window_exhaustion_blocks_and_reset_reopens() {
        let pool = test_pool().await;
        let config = limit_for(LimitCategory::Auth, Plan::Starter);

        // First check opens an empty window and allows.
        let status =
            QuotaService::check_rate_limit(&pool, "u1", LimitCategory::Auth, Plan::Starter).await;
        assert!(status.allowed);
        assert_eq!(status.remaining, config.max);

        for _ in 0..config.max {
            QuotaService::increment_rate_limit(&pool, "u1", LimitCategory::Auth, Plan::Starter)
                .await;
        }

        let status =
            QuotaService::check_rate_limit(&pool, "u1", LimitCategory::Auth, Plan::Starter).await;
        assert!(!status.allowed);
        assert_eq!(status.remaining, 0);
        assert!(status.retry_after_seconds.is_some());
    }

    #[tokio::test]
    async fn expired_window_is_treated_as_fresh() {
        let pool = test_pool().await;
        let past_start = Utc::now().naive_utc() - ChronoDuration::hours(2);
        let past_end = past_start + ChronoDuration::minutes(15);

        // Simulate an old exhausted window left behind.
        RateLimitRepository::create_window(&pool, "u1", "AUTH", past_start, past_end)
            .await
            .unwrap();
        sqlx::query("UPDATE rate_limit_tracking SET count = 10 WHERE identifier = 'u1'")
            .execute(&pool)
            .await
            .unwrap();

        let status =
            QuotaService::check_rate_limit(&pool, "u1", LimitCategory::Auth, Plan::Starter).await;
        assert!(status.allowed);
        assert_eq!(status.remaining, status.limit);

        // The next increment rolls the row over to a fresh window at count 1.
        QuotaService::increment_rate_limit(&pool, "u1", LimitCategory::Auth, Plan::Starter).await;
        let record = RateLimitRepository::find(&pool, "u1", "AUTH")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.count, 1);
        assert!(record.window_end > Utc::now().naive_utc());
    }

    #[tokio::test]
    async fn check_does_not_mutate_counts() {
        let pool = test_pool().await;

        for _ in 0..5 {
            QuotaService::check_rate_limit(&pool, "u1", LimitCategory::Auth, Plan::Starter).await;
        }

        let record = RateLimitRepository::find(&pool, "u1", "AUTH")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.count, 0);
    }

    #[tokio::test]
    async fn storage_errors_fail_open() {
        let pool = test_pool().await;
        pool.close().await;

        let status =
            QuotaService::check_rate_limit(&pool, "u1", LimitCategory::Message, Plan::Starter)
                .await;
        assert!(status.allowed);

        let status = QuotaService::can_send(&pool, "u1", LimitCategory::Chatbot).await;
        assert!(status.allowed);
    }

    #[tokio::test]
    async fn chatbot_quota_caps_at_daily_limit() {
        let pool = test_pool().await;
        UserRepository::create(&pool, "u1", "starter").await.unwrap();
        let limit = limit_for(LimitCategory::Chatbot, Plan::Starter).max;

        for _ in 0..limit {
            QuotaService::increment(&pool, "u1", LimitCategory::Chatbot).await;
        }

        let status = QuotaService::can_send(&pool, "u1", LimitCategory::Chatbot).await;
        assert!(!status.allowed);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn plan_change_takes_effect_immediately() {
        let pool = test_pool().await;
        UserRepository::create(&pool, "u1", "starter").await.unwrap();
        let starter_limit = limit_for(LimitCategory::Chatbot, Plan::Starter).max;

        for _ in 0..starter_limit {
            QuotaService::increment(&pool, "u1", LimitCategory::Chatbot).await;
        }
        let status = QuotaService::can_send(&pool, "u1", LimitCategory::Chatbot).await;
        assert!(!status.allowed);

        sqlx::query("UPDATE users SET plan = 'growth' WHERE id = 'u1'")
            .execute(&pool)
            .await
            .unwrap();

        let status = QuotaService::can_send(&pool, "u1", LimitCategory::Chatbot).await;
        assert!(status.allowed);
    }
}
