//! HRMS adapters: source-specific parsing, incremental polling, and
//! signature verification (§4.2).

pub mod bamboohr;
pub mod generic;
pub mod successfactors;
pub mod workday;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::HrmsCredentials;
use crate::envelope::NormalizedLifecycleEvent;
use crate::error::AdapterError;
use crate::health::types::DependencyStatus;

/// The canonical source-event → canonical-type mapping table (§4.2),
/// shared scaffolding each adapter's `normalize` draws on.
pub fn canonical_type(source_event_type: &str) -> Option<crate::envelope::LifecycleEventType> {
    use crate::envelope::LifecycleEventType::*;
    match source_event_type {
        "worker.hire" | "worker.onboard" | "employee.hired" | "employee.new" | "onboard" | "hire" => {
            Some(Onboard)
        }
        "worker.terminate" | "employee.terminated" | "exit" | "terminate" => Some(Exit),
        "worker.transfer" | "employee.transferred" | "transfer" => Some(Transfer),
        "worker.update" | "worker.change" | "employee.updated" | "update" => Some(Update),
        _ => None,
    }
}

/// Per-adapter incremental polling cursor and enable/interval state
/// (§4.2's `DISABLED -> IDLE -> POLLING -> PUBLISHING -> IDLE` machine is
/// driven by the caller; this struct only holds the data the state
/// transitions read and write).
#[derive(Debug, Clone)]
pub struct PollCursor {
    pub is_enabled: bool,
    pub interval: std::time::Duration,
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Source-specific high-water mark: an event id (Workday) or a
    /// timestamp string (SuccessFactors/BambooHR).
    pub cursor_value: Option<String>,
}

impl PollCursor {
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            is_enabled: true,
            interval,
            last_polled_at: None,
            cursor_value: None,
        }
    }

    /// Whether polling should be skipped: disabled, or the interval hasn't
    /// elapsed since the last poll.
    pub fn should_skip(&self, now: DateTime<Utc>) -> bool {
        if !self.is_enabled {
            return true;
        }
        match self.last_polled_at {
            Some(last) => {
                (now - last).to_std().unwrap_or_default() < self.interval
            }
            None => false,
        }
    }

    /// Advance the cursor after the whole batch was successfully handed to
    /// the producer. Never advances on error.
    pub fn advance(&mut self, polled_at: DateTime<Utc>, new_cursor_value: Option<String>) {
        self.last_polled_at = Some(polled_at);
        if new_cursor_value.is_some() {
            self.cursor_value = new_cursor_value;
        }
    }
}

/// Polymorphic over `{poll, processWebhook, validateSignature,
/// healthCheck}`. A factory (see [`for_source`]) selects by source name.
#[async_trait]
pub trait HrmsAdapter: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Poll for changed records since the cursor's high-water mark,
    /// returning normalized events and the cursor's next value. Must not
    /// mutate `cursor` itself; the caller advances it only after the batch
    /// is successfully published.
    async fn poll(
        &self,
        cursor: &PollCursor,
    ) -> Result<(Vec<NormalizedLifecycleEvent>, Option<String>), AdapterError>;

    /// Parse one already-authenticated webhook payload into normalized
    /// events. Unrecognized event types are dropped (empty result), not
    /// errored.
    fn process_webhook(
        &self,
        raw_body: &[u8],
        organization_id: &str,
    ) -> Result<Vec<NormalizedLifecycleEvent>, AdapterError>;

    /// Verify `signature` against `raw_body` using `secret`, per this
    /// source's algorithm and header convention.
    fn validate_signature(&self, raw_body: &[u8], signature: &str, secret: &str) -> Result<(), AdapterError>;

    async fn health_check(&self) -> DependencyStatus;
}

/// Construct the adapter for `source`, given its credentials.
pub fn for_source(
    source: &str,
    credentials: HrmsCredentials,
) -> Result<Box<dyn HrmsAdapter>, AdapterError> {
    match source {
        "workday" => Ok(Box::new(workday::WorkdayAdapter::new(credentials))),
        "successfactors" => Ok(Box::new(successfactors::SuccessFactorsAdapter::new(credentials))),
        "bamboohr" => Ok(Box::new(bamboohr::BambooHrAdapter::new(credentials))),
        "generic" => Ok(Box::new(generic::GenericAdapter::new(credentials))),
        other => Err(AdapterError::UnknownSource(other.to_string())),
    }
}

/// Constant-time HMAC-SHA256 verification shared by every adapter's
/// `validate_signature`. Signatures are hex-encoded, optionally prefixed
/// `sha256=` (GitHub-style headers).
pub fn verify_hmac_sha256(raw_body: &[u8], signature: &str, secret: &str) -> Result<(), AdapterError> {
    let hex_signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(hex_signature).map_err(|_| AdapterError::SignatureInvalid)?;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| AdapterError::SignatureInvalid)?;
    mac.update(raw_body);
    mac.verify_slice(&expected).map_err(|_| AdapterError::SignatureInvalid)
}

/// Parse a bad-or-missing date string into `None` rather than erroring
/// (§4.2: bad values become null).
pub fn parse_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
