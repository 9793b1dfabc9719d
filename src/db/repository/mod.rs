pub mod audit_log_repository;
pub mod campaign_repository;
pub mod chatbot_usage_repository;
pub mod message_queue_repository;
pub mod rate_limit_repository;
pub mod user;
pub mod webhook_event_repository;

pub use audit_log_repository::AuditLogRepository;
pub use campaign_repository::CampaignRepository;
pub use chatbot_usage_repository::ChatbotUsageRepository;
pub use message_queue_repository::MessageQueueRepository;
pub use rate_limit_repository::RateLimitRepository;
pub use user::UserRepository;
pub use webhook_event_repository::WebhookEventRepository;
