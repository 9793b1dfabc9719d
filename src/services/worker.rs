use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::WorkerConfig;
use crate::db::models::{CampaignCounter, QueuedMessage};
use crate::db::{AuditLogRepository, CampaignRepository, MessageQueueRepository};
use crate::error::{AppError, AppResult};
use crate::services::breaker::CircuitBreaker;
use crate::services::errors::{self, Severity};
use crate::services::quota::{LimitCategory, QuotaService};
use crate::services::retry::{retry_with_backoff, RetryPolicy};
use crate::services::system_lock::SystemLock;
use crate::services::whatsapp::{self, MessageSender};

/// Worst-case wall-clock time one invocation can hold its claims, derived
/// from config: per message, `max_attempts` provider calls each bounded by
/// the client timeout plus a backoff sleep capped at `retry_max_delay_ms`,
/// then the inter-message delay; the whole batch, doubled for slack. Claims
/// older than this can only belong to a dead worker, so reclaiming them
/// cannot steal from a live invocation.
fn stale_threshold_ms(config: &WorkerConfig) -> u64 {
    let per_message_ms = (config.max_attempts.max(1) as u64)
        .saturating_mul(whatsapp::REQUEST_TIMEOUT.as_millis() as u64 + config.retry_max_delay_ms)
        .saturating_add(config.message_delay_ms);
    let batch_ms = per_message_ms.saturating_mul(config.batch_size.max(1) as u64);
    batch_ms.saturating_mul(2).max(600_000)
}

/// Aggregate counts for one worker invocation.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct BatchOutcome {
    pub sent: u32,
    pub failed: u32,
    pub retrying: u32,
    pub total: u32,
}

/// Batch worker that drains the outbound message queue.
///
/// One invocation claims a bounded batch of pending messages and delivers
/// them sequentially. Sequential processing and the fixed inter-message delay
/// are deliberate: the provider's per-tenant throughput ceiling is stricter
/// than our own quotas, so parallelism here would only buy error responses.
pub struct QueueWorker {
    pool: SqlitePool,
    sender: Arc<dyn MessageSender>,
    breaker: Arc<CircuitBreaker>,
    lock: Arc<SystemLock>,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(
        pool: SqlitePool,
        sender: Arc<dyn MessageSender>,
        breaker: Arc<CircuitBreaker>,
        lock: Arc<SystemLock>,
        config: WorkerConfig,
    ) -> Self {
        QueueWorker {
            pool,
            sender,
            breaker,
            lock,
            config,
        }
    }

    /// Process one batch of pending messages. Bounded work: at most
    /// `batch_size` messages, each with bounded retries, plus the fixed
    /// inter-message delay.
    pub async fn process_batch(&self) -> AppResult<BatchOutcome> {
        if self.lock.is_locked() {
            tracing::info!("System locked; skipping queue worker invocation");
            return Ok(BatchOutcome::default());
        }

        let stale_cutoff = chrono::Utc::now().naive_utc()
            - chrono::Duration::milliseconds(stale_threshold_ms(&self.config) as i64);
        match MessageQueueRepository::reset_stale_processing(&self.pool, stale_cutoff).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!("Reclaimed {} messages stuck in 'processing'", n),
            Err(e) => tracing::error!("Failed to reclaim stale processing messages: {:?}", e),
        }

        let messages =
            MessageQueueRepository::claim_pending(&self.pool, self.config.batch_size).await?;

        let mut outcome = BatchOutcome {
            total: messages.len() as u32,
            ..BatchOutcome::default()
        };

        if messages.is_empty() {
            return Ok(outcome);
        }

        tracing::info!("Queue worker claimed {} messages", messages.len());

        let last = messages.len() - 1;
        for (i, message) in messages.into_iter().enumerate() {
            self.process_message(message, &mut outcome).await;

            // Courtesy pacing toward the provider, independent of tenant
            // quotas. Skipped after the final message.
            if i < last && self.config.message_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.message_delay_ms)).await;
            }
        }

        tracing::info!(
            "Queue worker finished: sent={}, failed={}, retrying={}, total={}",
            outcome.sent,
            outcome.failed,
            outcome.retrying,
            outcome.total
        );

        Ok(outcome)
    }

    async fn process_message(&self, message: QueuedMessage, outcome: &mut BatchOutcome) {
        // Plan quota gate. An exhausted window releases the claim without
        // burning an attempt; the message becomes eligible again next tick.
        let quota = QuotaService::can_send(&self.pool, &message.user_id, LimitCategory::Message)
            .await;
        if !quota.allowed {
            tracing::debug!(
                "Message quota exhausted for tenant {}; deferring message {}",
                message.user_id,
                message.id
            );
            if let Err(e) = MessageQueueRepository::release(&self.pool, &message.id).await {
                tracing::error!("Failed to release deferred message {}: {:?}", message.id, e);
            }
            outcome.retrying += 1;
            return;
        }

        match self.send_with_retry(&message).await {
            Ok(whatsapp_message_id) => {
                match MessageQueueRepository::mark_sent(&self.pool, &message.id, &whatsapp_message_id)
                    .await
                {
                    Ok(Some(_)) => {
                        if let Some(campaign_id) = &message.campaign_id {
                            if let Err(e) = CampaignRepository::increment(
                                &self.pool,
                                campaign_id,
                                CampaignCounter::Sent,
                            )
                            .await
                            {
                                tracing::error!(
                                    "Failed to increment sent count for campaign {}: {:?}",
                                    campaign_id,
                                    e
                                );
                            }
                        }
                        QuotaService::increment(&self.pool, &message.user_id, LimitCategory::Message)
                            .await;
                        outcome.sent += 1;
                    }
                    Ok(None) => {
                        // Claim lost to a reclaiming invocation mid-flight.
                        // The winner owns all bookkeeping from here.
                        tracing::error!(
                            "Claim on message {} was lost before completion; skipping bookkeeping",
                            message.id
                        );
                    }
                    Err(e) => {
                        tracing::error!("Failed to mark message {} as sent: {:?}", message.id, e);
                        outcome.sent += 1;
                    }
                }
            }
            Err(err) => {
                self.handle_send_failure(&message, err, outcome).await;
            }
        }
    }

    async fn handle_send_failure(
        &self,
        message: &QueuedMessage,
        err: AppError,
        outcome: &mut BatchOutcome,
    ) {
        let kind = errors::classify(&err);
        let detail = err.to_string();

        if kind.is_retryable() && message.attempts + 1 < self.config.max_attempts {
            tracing::warn!(
                "Retryable failure for message {} (attempt {}): {} [{}]",
                message.id,
                message.attempts + 1,
                detail,
                kind.as_str()
            );
            match MessageQueueRepository::requeue_for_retry(
                &self.pool,
                &message.id,
                kind.as_str(),
                &detail,
            )
            .await
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::error!(
                        "Claim on message {} was lost before requeue; skipping",
                        message.id
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to requeue message {}: {:?}", message.id, e);
                }
            }
            outcome.retrying += 1;
            return;
        }

        tracing::error!(
            "Permanent failure for message {} after {} attempts: {} [{}]",
            message.id,
            message.attempts + 1,
            detail,
            kind.as_str()
        );

        match MessageQueueRepository::mark_failed(&self.pool, &message.id, kind.as_str(), &detail)
            .await
        {
            Ok(None) => {
                tracing::error!(
                    "Claim on message {} was lost before failure bookkeeping; skipping",
                    message.id
                );
                return;
            }
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::error!("Failed to mark message {} as failed: {:?}", message.id, e);
            }
        }
        if let Some(campaign_id) = &message.campaign_id {
            if let Err(e) =
                CampaignRepository::increment(&self.pool, campaign_id, CampaignCounter::Failed)
                    .await
            {
                tracing::error!(
                    "Failed to increment failed count for campaign {}: {:?}",
                    campaign_id,
                    e
                );
            }
        }

        // Critical failures must stay visible to operators even though the
        // message itself is done.
        if kind.severity() == Severity::Critical {
            if let Err(e) = AuditLogRepository::record(
                &self.pool,
                "message_delivery_failed",
                Some(&message.id),
                kind.severity().as_str(),
                &detail,
            )
            .await
            {
                tracing::error!("Failed to write audit log for {}: {:?}", message.id, e);
            }
        }

        outcome.failed += 1;
    }

    /// One delivery attempt chain: Retry Executor wrapping the circuit
    /// breaker wrapping the provider call.
    async fn send_with_retry(&self, message: &QueuedMessage) -> AppResult<String> {
        let payload: serde_json::Value = serde_json::from_str(&message.payload)
            .map_err(|e| AppError::Validation(format!("Unparseable message payload: {}", e)))?;

        let policy = RetryPolicy {
            max_attempts: self.config.max_attempts as u32,
            base_delay: Duration::from_millis(self.config.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.config.retry_max_delay_ms),
        };

        let message_id = message.id.clone();
        retry_with_backoff(
            policy,
            || {
                self.breaker
                    .execute(|| self.sender.send(&message.phone, &message.message_type, &payload))
            },
            |attempt, err| {
                tracing::warn!(
                    "Send attempt {} for message {} failed: {}",
                    attempt,
                    message_id,
                    err
                );
            },
        )
        .await
    }
}
