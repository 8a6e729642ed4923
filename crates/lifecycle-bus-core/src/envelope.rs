//! The transport-level message and its canonical payload.
//!
//! Modeled as a tagged variant over `type` rather than a bag of
//! `serde_json::Value` (§9): known payload shapes get their own variant,
//! and anything we don't recognize is preserved verbatim in [`Payload::Unhandled`]
//! so it can still be routed, DLQ'd, and re-serialized without loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unit transported over the bus. Immutable once produced; `id` is
/// never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub metadata: Metadata,
    pub payload: Payload,
}

impl Envelope {
    /// The partition key: `organizationId` when present, else `id`.
    pub fn partition_key(&self) -> &str {
        self.metadata
            .organization_id
            .as_deref()
            .unwrap_or(&self.id)
    }

    /// Header view of the metadata, for cheap broker-side filtering.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("correlation-id", self.metadata.correlation_id.clone()),
            ("message-type", self.event_type.clone()),
            ("source", self.metadata.source.clone()),
            ("version", self.metadata.version.clone()),
        ];
        if let Some(org) = &self.metadata.organization_id {
            headers.push(("organization-id", org.clone()));
        }
        if let Some(emp) = &self.metadata.employee_id {
            headers.push(("employee-id", emp.clone()));
        }
        headers
    }
}

/// Envelope metadata. `correlationId` is never rewritten in transit; only
/// new child contexts are spawned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
}

impl Metadata {
    /// Build metadata for a newly produced envelope, generating a fresh
    /// correlation id when one isn't supplied.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source: source.into(),
            version: "1.0".to_string(),
            organization_id: None,
            employee_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_organization_id(mut self, organization_id: Option<String>) -> Self {
        self.organization_id = organization_id;
        self
    }

    pub fn with_employee_id(mut self, employee_id: Option<String>) -> Self {
        self.employee_id = employee_id;
        self
    }
}

/// The envelope payload: either a known canonical shape, or raw bytes for
/// a type we don't recognize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    LifecycleEvent(NormalizedLifecycleEvent),
    Dlq(Box<crate::dlq::DlqMessage>),
    Unhandled(serde_json::Value),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Unhandled(serde_json::Value::Null)
    }
}

/// Canonical employee-lifecycle event type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEventType {
    Onboard,
    Exit,
    Transfer,
    Update,
}

/// The canonical employee-lifecycle payload produced by every adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedLifecycleEvent {
    #[serde(rename = "type")]
    pub event_type: LifecycleEventType,
    pub organization_id: String,
    pub employee_id: String,
    pub employee: Employee,
    pub metadata: LifecycleEventMetadata,
}

/// Employee fields carried by a [`NormalizedLifecycleEvent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Employee {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_type: Option<String>,
    pub status: EmployeeStatus,
}

/// Normalized employee status. Unknown source statuses default to `Active`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmployeeStatus {
    #[default]
    Active,
    Inactive,
    Terminated,
}

impl EmployeeStatus {
    /// Map a lowercased source-specific status string (§4.2).
    pub fn from_source_str(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "active" | "employed" | "current" => EmployeeStatus::Active,
            "inactive" | "suspended" | "leave" => EmployeeStatus::Inactive,
            "terminated" | "ended" | "exit" | "quit" => EmployeeStatus::Terminated,
            _ => EmployeeStatus::Active,
        }
    }
}

/// Provenance metadata attached to a [`NormalizedLifecycleEvent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEventMetadata {
    pub source: String,
    pub source_event_id: String,
    pub source_event_type: String,
    pub processed_at: DateTime<Utc>,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_key_prefers_organization_id() {
        let mut metadata = Metadata::new("test");
        metadata.organization_id = Some("org-1".to_string());
        let envelope = Envelope {
            id: "env-1".to_string(),
            event_type: "employee.onboard".to_string(),
            metadata,
            payload: Payload::Unhandled(serde_json::json!({})),
        };
        assert_eq!(envelope.partition_key(), "org-1");
    }

    #[test]
    fn partition_key_falls_back_to_id() {
        let metadata = Metadata::new("test");
        let envelope = Envelope {
            id: "env-2".to_string(),
            event_type: "employee.onboard".to_string(),
            metadata,
            payload: Payload::Unhandled(serde_json::json!({})),
        };
        assert_eq!(envelope.partition_key(), "env-2");
    }

    #[test]
    fn status_mapping_defaults_to_active() {
        assert_eq!(EmployeeStatus::from_source_str("weird"), EmployeeStatus::Active);
        assert_eq!(EmployeeStatus::from_source_str("Terminated"), EmployeeStatus::Terminated);
        assert_eq!(EmployeeStatus::from_source_str("LEAVE"), EmployeeStatus::Inactive);
    }

    #[test]
    fn headers_mirror_metadata() {
        let mut metadata = Metadata::new("ingress");
        metadata.organization_id = Some("org-9".to_string());
        let envelope = Envelope {
            id: "env-3".to_string(),
            event_type: "employee.update".to_string(),
            metadata,
            payload: Payload::Unhandled(serde_json::json!({})),
        };
        let headers = envelope.headers();
        assert!(headers.contains(&("organization-id", "org-9".to_string())));
        assert!(headers.contains(&("message-type", "employee.update".to_string())));
    }
}
