use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::db::models::CampaignCounter;
use crate::db::{CampaignRepository, MessageQueueRepository, WebhookEventRepository};
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature-256";

const STATUS_SENT: &str = "sent";
const STATUS_DELIVERED: &str = "delivered";
const STATUS_READ: &str = "read";
const STATUS_FAILED: &str = "failed";

// ============================================================================
// Cloud API status envelope
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StatusWebhookPayload {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: WebhookValue,
}

#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    #[serde(default)]
    pub statuses: Vec<StatusUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    /// Provider message id (`wamid...`), the join key back to the queue.
    pub id: Option<String>,
    pub status: String,
    #[allow(dead_code)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub errors: Vec<StatusError>,
}

#[derive(Debug, Deserialize)]
pub struct StatusError {
    pub code: Option<i64>,
    pub title: Option<String>,
    pub message: Option<String>,
}

/// Outcome counters for one webhook delivery, for logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub applied: usize,
    pub duplicates: usize,
    pub unmatched: usize,
}

/// Ingests delivery-status callbacks from the provider.
pub struct StatusWebhookService;

impl StatusWebhookService {
    /// Verify the HMAC-SHA256 signature over the exact raw body bytes.
    ///
    /// This is the security gate for the whole endpoint: without it anyone
    /// could forge status updates and corrupt campaign stats. Comparison is
    /// constant-time via `Mac::verify_slice`.
    pub fn verify_signature(app_secret: &str, body: &[u8], signature: &str) -> AppResult<()> {
        let hex_sig = signature
            .strip_prefix("sha256=")
            .ok_or(AppError::Unauthorized)?;
        let expected = hex::decode(hex_sig).map_err(|_| AppError::Unauthorized)?;

        let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
        mac.update(body);

        mac.verify_slice(&expected).map_err(|_| AppError::Unauthorized)
    }

    /// Handle a signature-verified callback body.
    ///
    /// Webhook delivery is at-least-once, so every status is claimed in the
    /// idempotency ledger before its side effects are applied; replays lose
    /// the claim and are skipped. Failures on one status never abort the
    /// rest of the payload.
    pub async fn handle_payload(pool: &SqlitePool, raw_body: &[u8]) -> AppResult<IngestOutcome> {
        let body_text = String::from_utf8_lossy(raw_body);
        if let Err(e) = WebhookEventRepository::log_payload(pool, &body_text).await {
            tracing::warn!("Failed to record webhook payload audit entry: {:?}", e);
        }

        let payload: StatusWebhookPayload = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))?;

        let mut outcome = IngestOutcome::default();
        let mut index = 0usize;

        for entry in &payload.entry {
            for change in &entry.changes {
                for status in &change.value.statuses {
                    match Self::apply_status(pool, raw_body, status, index).await {
                        Ok(StatusResult::Applied) => outcome.applied += 1,
                        Ok(StatusResult::Duplicate) => outcome.duplicates += 1,
                        Ok(StatusResult::Unmatched) => outcome.unmatched += 1,
                        Err(e) => {
                            tracing::error!(
                                "Failed to apply status update {:?} for {:?}: {:?}",
                                status.status,
                                status.id,
                                e
                            );
                        }
                    }
                    index += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn apply_status(
        pool: &SqlitePool,
        raw_body: &[u8],
        status: &StatusUpdate,
        index: usize,
    ) -> AppResult<StatusResult> {
        let event_id = Self::dedup_key(raw_body, status, index);

        let claimed =
            WebhookEventRepository::try_claim(pool, &event_id, status.id.as_deref()).await?;
        if !claimed {
            tracing::debug!("Duplicate webhook event {}, skipping", event_id);
            return Ok(StatusResult::Duplicate);
        }

        let Some(wamid) = status.id.as_deref() else {
            tracing::warn!("Status update without message id, nothing to reconcile");
            WebhookEventRepository::mark_processed(pool, &event_id).await?;
            return Ok(StatusResult::Unmatched);
        };

        let Some(message) = MessageQueueRepository::find_by_whatsapp_message_id(pool, wamid).await?
        else {
            tracing::warn!("No queued message found for provider id {}", wamid);
            WebhookEventRepository::mark_processed(pool, &event_id).await?;
            return Ok(StatusResult::Unmatched);
        };

        match status.status.as_str() {
            STATUS_SENT => {
                MessageQueueRepository::apply_sent_status(pool, &message.id).await?;
            }
            STATUS_DELIVERED => {
                MessageQueueRepository::apply_delivered_status(pool, &message.id).await?;
                if let Some(campaign_id) = &message.campaign_id {
                    CampaignRepository::increment(pool, campaign_id, CampaignCounter::Delivered)
                        .await?;
                }
            }
            STATUS_READ => {
                MessageQueueRepository::apply_read_status(pool, &message.id).await?;
                if let Some(campaign_id) = &message.campaign_id {
                    CampaignRepository::increment(pool, campaign_id, CampaignCounter::Read).await?;
                }
            }
            STATUS_FAILED => {
                let (code, detail) = Self::extract_error(status);
                MessageQueueRepository::apply_failed_status(
                    pool,
                    &message.id,
                    code.as_deref(),
                    detail.as_deref(),
                )
                .await?;
                if let Some(campaign_id) = &message.campaign_id {
                    CampaignRepository::increment(pool, campaign_id, CampaignCounter::Failed)
                        .await?;
                }
            }
            other => {
                tracing::debug!("Unhandled status value '{}' for {}", other, wamid);
            }
        }

        WebhookEventRepository::mark_processed(pool, &event_id).await?;
        Ok(StatusResult::Applied)
    }

    /// Stable dedup key for one status update.
    ///
    /// The Cloud API does not assign per-status event ids, but
    /// `(message id, status value)` is stable across redeliveries because
    /// each status is emitted at most once per message. Payloads missing the
    /// message id fall back to a digest of the raw body, which still
    /// deduplicates byte-identical redeliveries.
    fn dedup_key(raw_body: &[u8], status: &StatusUpdate, index: usize) -> String {
        match status.id.as_deref() {
            Some(id) if !id.is_empty() => format!("{}:{}", id, status.status),
            _ => {
                let digest = Sha256::digest(raw_body);
                format!("payload:{}:{}", hex::encode(digest), index)
            }
        }
    }

    fn extract_error(status: &StatusUpdate) -> (Option<String>, Option<String>) {
        let first = status.errors.first();
        let code = first.and_then(|e| e.code).map(|c| c.to_string());
        let detail = first.and_then(|e| e.message.clone().or_else(|| e.title.clone()));
        (code, detail)
    }
}

enum StatusResult {
    Applied,
    Duplicate,
    Unmatched,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::CreateQueuedMessage;
    use crate::db::test_util::test_pool;
    use crate::db::{CampaignRepository, UserRepository};

    const SECRET: &str = "test-app-secret";

    fn sign(body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn status_body(wamid: &str, status: &str) -> Vec<u8> {
        serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "0",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "statuses": [{
                            "id": wamid,
                            "status": status,
                            "timestamp": "1700000000"
                        }]
                    }
                }]
            }]
        })
        .to_string()
        .into_bytes()
    }

    async fn sent_message(pool: &SqlitePool, wamid: &str) -> (String, String) {
        UserRepository::create(pool, "u1", "growth").await.unwrap();
        let campaign = CampaignRepository::create(pool, "u1", "promo", 10)
            .await
            .unwrap();
        let message = MessageQueueRepository::create(
            pool,
            CreateQueuedMessage {
                user_id: "u1".to_string(),
                campaign_id: Some(campaign.id.clone()),
                phone: "+15551234567".to_string(),
                message_type: "text".to_string(),
                payload: r#"{"text":{"body":"hi"}}"#.to_string(),
            },
        )
        .await
        .unwrap();
        // Walk the real lifecycle: claim, then record the send.
        MessageQueueRepository::claim_pending(pool, 1).await.unwrap();
        let message = MessageQueueRepository::mark_sent(pool, &message.id, wamid)
            .await
            .unwrap()
            .expect("claimed message accepts mark_sent");
        (message.id, campaign.id)
    }

    #[test]
    fn signature_roundtrip_verifies() {
        let body = b"{\"entry\":[]}";
        let sig = sign(body);
        assert!(StatusWebhookService::verify_signature(SECRET, body, &sig).is_ok());
    }

    #[test]
    fn bad_signature_is_rejected() {
        let body = b"{\"entry\":[]}";
        let sig = sign(b"different body");
        assert!(matches!(
            StatusWebhookService::verify_signature(SECRET, body, &sig),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            StatusWebhookService::verify_signature(SECRET, body, "not-even-prefixed"),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            StatusWebhookService::verify_signature(SECRET, body, "sha256=nothex"),
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn delivered_status_updates_message_and_campaign() {
        let pool = test_pool().await;
        let (message_id, campaign_id) = sent_message(&pool, "wamid.123").await;

        let body = status_body("wamid.123", "delivered");
        let outcome = StatusWebhookService::handle_payload(&pool, &body)
            .await
            .unwrap();
        assert_eq!(outcome.applied, 1);

        let message = MessageQueueRepository::find_by_id(&pool, &message_id)
            .await
            .unwrap()
            .unwrap();
        assert!(message.delivered_at.is_some());
        assert_eq!(message.delivery_status, "delivered");
        // Queue status stays 'sent'; delivery progress is tracked separately.
        assert_eq!(message.status, "sent");

        let campaign = CampaignRepository::find_by_id(&pool, &campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.delivered_count, 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_applies_side_effects_once() {
        let pool = test_pool().await;
        let (_, campaign_id) = sent_message(&pool, "wamid.123").await;

        let body = status_body("wamid.123", "delivered");
        StatusWebhookService::handle_payload(&pool, &body)
            .await
            .unwrap();
        let outcome = StatusWebhookService::handle_payload(&pool, &body)
            .await
            .unwrap();

        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.duplicates, 1);

        let campaign = CampaignRepository::find_by_id(&pool, &campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.delivered_count, 1);
    }

    #[tokio::test]
    async fn read_after_delivered_never_regresses() {
        let pool = test_pool().await;
        let (message_id, _) = sent_message(&pool, "wamid.123").await;

        StatusWebhookService::handle_payload(&pool, &status_body("wamid.123", "delivered"))
            .await
            .unwrap();
        StatusWebhookService::handle_payload(&pool, &status_body("wamid.123", "read"))
            .await
            .unwrap();
        // A late 'sent' must not pull delivery_status backwards.
        StatusWebhookService::handle_payload(&pool, &status_body("wamid.123", "sent"))
            .await
            .unwrap();

        let message = MessageQueueRepository::find_by_id(&pool, &message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.delivery_status, "read");
        assert!(message.read_at.is_some());
    }

    #[tokio::test]
    async fn failed_status_captures_provider_error() {
        let pool = test_pool().await;
        let (message_id, campaign_id) = sent_message(&pool, "wamid.123").await;

        let body = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "statuses": [{
                            "id": "wamid.123",
                            "status": "failed",
                            "errors": [{"code": 131026, "title": "Message undeliverable"}]
                        }]
                    }
                }]
            }]
        })
        .to_string()
        .into_bytes();

        StatusWebhookService::handle_payload(&pool, &body)
            .await
            .unwrap();

        let message = MessageQueueRepository::find_by_id(&pool, &message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.status, "failed");
        assert_eq!(message.error_code.as_deref(), Some("131026"));
        assert!(message.failed_at.is_some());

        let campaign = CampaignRepository::find_by_id(&pool, &campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.failed_count, 1);
    }

    #[tokio::test]
    async fn unknown_message_id_is_skipped_without_failing() {
        let pool = test_pool().await;

        let body = status_body("wamid.unknown", "delivered");
        let outcome = StatusWebhookService::handle_payload(&pool, &body)
            .await
            .unwrap();
        assert_eq!(outcome.unmatched, 1);
    }
}
