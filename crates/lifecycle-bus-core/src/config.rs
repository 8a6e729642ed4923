//! Environment-driven configuration tree.
//!
//! Assembled once at startup via [`Config::from_env`] and shared read-only
//! (`Arc<Config>`) across the ingress, adapters, producer, consumer groups,
//! and DLQ handler. A missing or malformed required variable fails startup
//! with a descriptive [`ConfigError`] rather than surfacing deep inside a
//! worker.

use std::env;
use std::time::Duration;

/// Top-level configuration tree.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub adapters: AdaptersConfig,
    pub retry: RetryConfig,
    pub dlq: DlqConfig,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from the environment, applying documented
    /// defaults for every value that isn't required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            broker: BrokerConfig::from_env()?,
            adapters: AdaptersConfig::from_env()?,
            retry: RetryConfig::from_env()?,
            dlq: DlqConfig::from_env()?,
            rate_limit: RateLimitConfig::from_env()?,
        })
    }
}

/// HTTP server ports.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub webhook_port: u16,
    pub health_port: u16,
}

impl ServerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            webhook_port: parse_opt("WEBHOOK_SERVER_PORT", 8080)?,
            health_port: parse_opt("HEALTH_PORT", 8081)?,
        })
    }
}

/// Kafka-shaped broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub group_id: String,
    pub ssl: bool,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
}

impl BrokerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let brokers = env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
        Ok(Self {
            brokers: brokers.split(',').map(|s| s.trim().to_string()).collect(),
            client_id: env::var("KAFKA_CLIENT_ID").unwrap_or_else(|_| "lifecycle-bus".to_string()),
            group_id: env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "lifecycle-bus".to_string()),
            ssl: parse_opt("KAFKA_SSL", false)?,
            sasl_mechanism: env::var("KAFKA_SASL_MECHANISM").ok(),
            sasl_username: env::var("KAFKA_SASL_USERNAME").ok(),
            sasl_password: env::var("KAFKA_SASL_PASSWORD").ok(),
        })
    }
}

/// Per-source HRMS adapter credentials and tunables.
#[derive(Debug, Clone, Default)]
pub struct AdaptersConfig {
    pub workday: Option<HrmsCredentials>,
    pub successfactors: Option<HrmsCredentials>,
    pub bamboohr: Option<HrmsCredentials>,
    pub poll_interval: Duration,
}

/// Credentials and tenant endpoint for one HRMS source.
#[derive(Debug, Clone)]
pub struct HrmsCredentials {
    pub tenant_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub webhook_secret: Option<String>,
    /// The tenant this adapter polls/receives webhooks for, stamped onto
    /// every normalized event (§3/§8 partition-key contract).
    pub organization_id: String,
}

impl AdaptersConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            workday: hrms_credentials_from_env("WORKDAY")?,
            successfactors: hrms_credentials_from_env("SUCCESSFACTORS")?,
            bamboohr: hrms_credentials_from_env("BAMBOOHR")?,
            poll_interval: Duration::from_millis(parse_opt("ADAPTER_POLL_INTERVAL_MS", 60_000)?),
        })
    }
}

fn hrms_credentials_from_env(prefix: &str) -> Result<Option<HrmsCredentials>, ConfigError> {
    let tenant_url_var = format!("{prefix}_TENANT_URL");
    let Some(tenant_url) = env::var(&tenant_url_var).ok() else {
        return Ok(None);
    };
    let client_id = env::var(format!("{prefix}_CLIENT_ID"))
        .map_err(|_| ConfigError::MissingRequired(format!("{prefix}_CLIENT_ID")))?;
    let client_secret = env::var(format!("{prefix}_CLIENT_SECRET"))
        .map_err(|_| ConfigError::MissingRequired(format!("{prefix}_CLIENT_SECRET")))?;
    let webhook_secret = env::var(format!("{prefix}_WEBHOOK_SECRET")).ok();
    let organization_id = env::var(format!("{prefix}_ORGANIZATION_ID"))
        .map_err(|_| ConfigError::MissingRequired(format!("{prefix}_ORGANIZATION_ID")))?;
    let _ = &tenant_url_var;
    Ok(Some(HrmsCredentials {
        tenant_url,
        client_id,
        client_secret,
        webhook_secret,
        organization_id,
    }))
}

/// Consumer in-process retry tunables (§4.4 defaults).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            max_attempts: parse_opt("RETRY_MAX_ATTEMPTS", 3)?,
            initial_backoff: Duration::from_millis(parse_opt("RETRY_INITIAL_BACKOFF_MS", 1_000)?),
            max_backoff: Duration::from_millis(parse_opt("RETRY_MAX_BACKOFF_MS", 30_000)?),
            multiplier: parse_opt("RETRY_MULTIPLIER", 2.0)?,
        })
    }
}

/// DLQ triage tunables (§4.5 defaults).
#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub quarantine_after: u32,
    pub max_reprocess: u32,
    pub reprocess_delay: Duration,
}

impl DlqConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            quarantine_after: parse_opt("DLQ_QUARANTINE_AFTER", 5)?,
            max_reprocess: parse_opt("DLQ_MAX_REPROCESS", 3)?,
            reprocess_delay: Duration::from_millis(parse_opt("DLQ_REPROCESS_DELAY_MS", 60_000)?),
        })
    }
}

/// Ingress rate-limit tunables.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            requests_per_window: parse_opt("RATE_LIMIT_REQUESTS_PER_WINDOW", 100)?,
            window: Duration::from_millis(parse_opt("RATE_LIMIT_WINDOW_MS", 60_000)?),
        })
    }
}

fn parse_opt<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Errors loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable: {0}")]
    MissingRequired(String),
    /// An environment variable was set but failed to parse.
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}
