use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub worker: WorkerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    /// Base URL of the WhatsApp Cloud API (overridable for tests).
    pub api_url: String,
    pub access_token: String,
    pub phone_number_id: String,
    /// Shared app secret used for HMAC verification of status webhooks.
    pub app_secret: String,
    /// Token echoed back during the webhook subscription handshake.
    pub verify_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Pre-shared secret for the worker trigger endpoint. When unset the
    /// endpoint fails closed with a configuration error.
    pub secret: Option<String>,
    /// Maximum messages processed per worker invocation.
    pub batch_size: i64,
    /// Maximum delivery attempts per message (across invocations).
    pub max_attempts: i32,
    /// Fixed delay between messages within one batch (milliseconds).
    pub message_delay_ms: u64,
    /// Base delay for exponential retry backoff (milliseconds).
    pub retry_base_delay_ms: u64,
    /// Cap for exponential retry backoff (milliseconds).
    pub retry_max_delay_ms: u64,
    /// Consecutive failures before the circuit breaker opens.
    pub breaker_failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call (seconds).
    pub breaker_cooldown_seconds: u64,
    /// Whether the in-process poll loop is enabled. Deployments driven by an
    /// external scheduler hitting POST /queue/worker leave this off.
    pub poll_enabled: bool,
    /// Poll interval for the in-process loop (seconds).
    pub poll_interval_seconds: u64,
    /// Start with the system kill-switch engaged.
    pub maintenance_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for webhook endpoints.
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints.
    pub webhook_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/app.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            whatsapp: WhatsAppConfig {
                api_url: env::var("WHATSAPP_API_URL")
                    .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".to_string()),
                access_token: env::var("WHATSAPP_ACCESS_TOKEN")
                    .map_err(|_| ConfigError::MissingEnv("WHATSAPP_ACCESS_TOKEN".to_string()))?,
                phone_number_id: env::var("WHATSAPP_PHONE_NUMBER_ID")
                    .map_err(|_| ConfigError::MissingEnv("WHATSAPP_PHONE_NUMBER_ID".to_string()))?,
                app_secret: env::var("WHATSAPP_APP_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("WHATSAPP_APP_SECRET".to_string()))?,
                verify_token: env::var("WHATSAPP_VERIFY_TOKEN")
                    .map_err(|_| ConfigError::MissingEnv("WHATSAPP_VERIFY_TOKEN".to_string()))?,
            },
            worker: WorkerConfig {
                secret: env::var("WORKER_SECRET").ok(),
                batch_size: env::var("WORKER_BATCH_SIZE")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .unwrap_or(15),
                max_attempts: env::var("WORKER_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                message_delay_ms: env::var("WORKER_MESSAGE_DELAY_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .unwrap_or(2000),
                retry_base_delay_ms: env::var("WORKER_RETRY_BASE_DELAY_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
                retry_max_delay_ms: env::var("WORKER_RETRY_MAX_DELAY_MS")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .unwrap_or(30_000),
                breaker_failure_threshold: env::var("BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                breaker_cooldown_seconds: env::var("BREAKER_COOLDOWN_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                poll_enabled: match env::var("WORKER_POLL_ENABLED") {
                    Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
                    Err(_) => false,
                },
                poll_interval_seconds: env::var("WORKER_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
                maintenance_mode: match env::var("MAINTENANCE_MODE") {
                    Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
                    Err(_) => false,
                },
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: env::var("RATE_LIMIT_WEBHOOKS_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_burst: env::var("RATE_LIMIT_WEBHOOKS_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            whatsapp: WhatsAppConfig {
                api_url: "https://graph.facebook.com/v19.0".to_string(),
                access_token: String::new(),
                phone_number_id: String::new(),
                app_secret: String::new(),
                verify_token: String::new(),
            },
            worker: WorkerConfig {
                secret: None,
                batch_size: 15,
                max_attempts: 5,
                message_delay_ms: 2000,
                retry_base_delay_ms: 500,
                retry_max_delay_ms: 30_000,
                breaker_failure_threshold: 5,
                breaker_cooldown_seconds: 30,
                poll_enabled: false,
                poll_interval_seconds: 2,
                maintenance_mode: false,
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: 10,
                webhook_burst: 50,
            },
        }
    }
}
