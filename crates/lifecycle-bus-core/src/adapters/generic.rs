//! Generic HRMS adapter for sources without a dedicated integration: a
//! thin passthrough over a simpler normalization table (§4.2).

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::HrmsCredentials;
use crate::domain::resilience::{policies, ResiliencePolicy, ResilientService};
use crate::envelope::{Employee, EmployeeStatus, LifecycleEventMetadata, LifecycleEventType, NormalizedLifecycleEvent};
use crate::error::AdapterError;
use crate::health::types::DependencyStatus;

use super::{parse_date, verify_hmac_sha256, HrmsAdapter, PollCursor};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenericEvent {
    event_id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    employee_id: String,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    department: Option<String>,
    job_title: Option<String>,
    manager_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    location: Option<String>,
    employee_type: Option<String>,
    status: Option<String>,
}

fn generic_canonical_type(raw: &str) -> Option<LifecycleEventType> {
    match raw {
        "onboard" | "hire" => Some(LifecycleEventType::Onboard),
        "exit" | "terminate" => Some(LifecycleEventType::Exit),
        "transfer" => Some(LifecycleEventType::Transfer),
        "update" => Some(LifecycleEventType::Update),
        _ => None,
    }
}

pub struct GenericAdapter {
    credentials: HrmsCredentials,
    client: reqwest::Client,
}

impl GenericAdapter {
    pub fn new(credentials: HrmsCredentials) -> Self {
        Self {
            credentials,
            client: reqwest::Client::new(),
        }
    }

    fn normalize(&self, organization_id: &str, event: GenericEvent) -> Option<NormalizedLifecycleEvent> {
        let event_type = generic_canonical_type(&event.event_type)?;
        Some(NormalizedLifecycleEvent {
            event_type,
            organization_id: organization_id.to_string(),
            employee_id: event.employee_id.clone(),
            employee: Employee {
                id: event.employee_id,
                email: event.email,
                first_name: event.first_name,
                last_name: event.last_name,
                department: event.department,
                job_title: event.job_title,
                manager_id: event.manager_id,
                start_date: parse_date(event.start_date.as_deref()),
                end_date: parse_date(event.end_date.as_deref()),
                location: event.location,
                employee_type: event.employee_type,
                status: event
                    .status
                    .as_deref()
                    .map(EmployeeStatus::from_source_str)
                    .unwrap_or_default(),
            },
            metadata: LifecycleEventMetadata {
                source: "generic".to_string(),
                source_event_id: event.event_id.unwrap_or_default(),
                source_event_type: event.event_type,
                processed_at: chrono::Utc::now(),
                version: "1.0".to_string(),
            },
        })
    }
}

#[async_trait]
impl HrmsAdapter for GenericAdapter {
    fn source_name(&self) -> &'static str {
        "generic"
    }

    /// Generic sources have no standard polling protocol; this adapter is
    /// webhook-only and always reports nothing to poll.
    async fn poll(
        &self,
        _cursor: &PollCursor,
    ) -> Result<(Vec<NormalizedLifecycleEvent>, Option<String>), AdapterError> {
        Ok((Vec::new(), None))
    }

    fn process_webhook(
        &self,
        raw_body: &[u8],
        organization_id: &str,
    ) -> Result<Vec<NormalizedLifecycleEvent>, AdapterError> {
        let event: GenericEvent =
            serde_json::from_slice(raw_body).map_err(|e| AdapterError::Parse(e.to_string()))?;
        Ok(self.normalize(organization_id, event).into_iter().collect())
    }

    fn validate_signature(&self, raw_body: &[u8], signature: &str, secret: &str) -> Result<(), AdapterError> {
        verify_hmac_sha256(raw_body, signature, secret)
    }

    async fn health_check(&self) -> DependencyStatus {
        match self.client.head(&self.credentials.tenant_url).send().await {
            Ok(resp) if resp.status().is_success() => DependencyStatus::Healthy,
            Ok(resp) => DependencyStatus::Degraded(format!("upstream returned {}", resp.status())),
            Err(e) => DependencyStatus::Unhealthy(e.to_string()),
        }
    }
}

impl ResilientService for GenericAdapter {
    fn default_resilience_policy(&self) -> ResiliencePolicy {
        policies::combine(vec![policies::retry(3), policies::circuit_breaker(5, 30)])
    }

    fn service_id(&self) -> &str {
        "generic-adapter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> HrmsCredentials {
        HrmsCredentials {
            tenant_url: "https://example.com".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            webhook_secret: Some("whsec".to_string()),
            organization_id: "org-1".to_string(),
        }
    }

    #[test]
    fn webhook_normalizes_onboard() {
        let adapter = GenericAdapter::new(credentials());
        let body = serde_json::json!({
            "type": "hire",
            "employeeId": "e1",
            "status": "active"
        });
        let events = adapter.process_webhook(body.to_string().as_bytes(), "org-1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, LifecycleEventType::Onboard);
    }

    #[test]
    fn unknown_type_produces_no_events() {
        let adapter = GenericAdapter::new(credentials());
        let body = serde_json::json!({ "type": "promotion", "employeeId": "e1" });
        let events = adapter.process_webhook(body.to_string().as_bytes(), "org-1").unwrap();
        assert!(events.is_empty());
    }
}
