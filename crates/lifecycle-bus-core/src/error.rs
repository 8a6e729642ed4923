//! Error taxonomy: one `thiserror`-derived enum per component boundary,
//! each classified `is_retryable()`, composing into a crate-level
//! [`CoreError`] for code that must cross boundaries (§4.8, §7).

use crate::config::ConfigError;

/// Errors surfaced at the webhook ingress boundary.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("malformed JSON body")]
    MalformedBody,
    #[error("request body exceeds the 10 MB limit")]
    BodyTooLarge,
    #[error("unrecognized source or organization")]
    UnrecognizedTarget,
    #[error("missing or invalid webhook signature")]
    SignatureInvalid,
    #[error("normalization failed for {failed} of {total} events")]
    PartialNormalization { failed: usize, total: usize },
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IngressError {
    /// Whether the caller should retry this request as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngressError::RateLimited { .. } | IngressError::Internal(_))
    }

    /// The HTTP status code this error maps to (§7).
    pub fn status_code(&self) -> u16 {
        match self {
            IngressError::MalformedBody | IngressError::BodyTooLarge => 400,
            IngressError::UnrecognizedTarget => 400,
            IngressError::SignatureInvalid => 401,
            IngressError::PartialNormalization { .. } => 422,
            IngressError::RateLimited { .. } => 429,
            IngressError::Adapter(e) if !e.is_retryable() => 422,
            IngressError::Adapter(_) | IngressError::Bus(_) | IngressError::Internal(_) => 500,
        }
    }
}

/// Errors surfaced by HRMS adapters (auth, parsing, upstream HTTP).
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("authentication failed for source {source}")]
    Authentication { source: String },
    #[error("permission denied for source {source}")]
    Permission { source: String },
    #[error("upstream rate limit for source {source}, retry after {retry_after_secs:?}s")]
    RateLimited {
        source: String,
        retry_after_secs: Option<u64>,
    },
    #[error("network error talking to {source}: {message}")]
    Network { source: String, message: String },
    #[error("unrecognized adapter source: {0}")]
    UnknownSource(String),
    #[error("adapter {source} is disabled or its poll interval hasn't elapsed")]
    PollSkipped { source: String },
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("source record failed to parse: {0}")]
    Parse(String),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::RateLimited { .. } | AdapterError::Network { .. }
        )
    }
}

/// Errors surfaced by the broker client (producer/consumer).
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    #[error("topic not registered: {0}")]
    UnknownTopic(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

impl BusError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Unreachable(_) | BusError::PublishFailed(_))
    }
}

/// Errors surfaced by the DLQ handler.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("DLQ record missing required field: {0}")]
    MalformedRecord(String),
}

impl DlqError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DlqError::Bus(e) => e.is_retryable(),
            DlqError::MalformedRecord(_) => false,
        }
    }
}

/// Crate-level aggregate error for code that must cross component
/// boundaries (e.g. the producer surfacing a broker error up through the
/// ingress handler as a 500).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ingress(#[from] IngressError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Dlq(#[from] DlqError),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Config(_) => false,
            CoreError::Ingress(e) => e.is_retryable(),
            CoreError::Adapter(e) => e.is_retryable(),
            CoreError::Bus(e) => e.is_retryable(),
            CoreError::Dlq(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_status_codes() {
        assert_eq!(IngressError::MalformedBody.status_code(), 400);
        assert_eq!(IngressError::SignatureInvalid.status_code(), 401);
        assert_eq!(
            IngressError::PartialNormalization { failed: 1, total: 2 }.status_code(),
            422
        );
        assert_eq!(
            IngressError::RateLimited { retry_after_secs: 30 }.status_code(),
            429
        );
    }

    #[test]
    fn adapter_retryability() {
        assert!(AdapterError::Network {
            source: "workday".into(),
            message: "timeout".into()
        }
        .is_retryable());
        assert!(!AdapterError::Authentication {
            source: "workday".into()
        }
        .is_retryable());
    }

    #[test]
    fn core_error_delegates_retryability() {
        let err = CoreError::from(BusError::Unreachable("down".into()));
        assert!(err.is_retryable());
    }
}
