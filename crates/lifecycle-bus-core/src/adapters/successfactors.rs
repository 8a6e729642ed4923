//! SuccessFactors adapter: timestamp cursor, OData filter `timestamp gt
//! lastEventTimestamp`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::HrmsCredentials;
use crate::domain::resilience::{policies, ResiliencePolicy, ResilientService};
use crate::envelope::{Employee, EmployeeStatus, LifecycleEventMetadata, NormalizedLifecycleEvent};
use crate::error::AdapterError;
use crate::health::types::DependencyStatus;

use super::{canonical_type, parse_date, verify_hmac_sha256, HrmsAdapter, PollCursor};

const MAX_EVENTS_PER_POLL: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ODataResponse {
    #[serde(rename = "d")]
    results: ODataResults,
}

#[derive(Debug, Deserialize)]
struct ODataResults {
    results: Vec<SuccessFactorsEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuccessFactorsEvent {
    event_id: String,
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
    timestamp: String,
}

pub struct SuccessFactorsAdapter {
    credentials: HrmsCredentials,
    client: reqwest::Client,
}

impl SuccessFactorsAdapter {
    pub fn new(credentials: HrmsCredentials) -> Self {
        Self {
            credentials,
            client: reqwest::Client::new(),
        }
    }

    fn normalize(&self, organization_id: &str, event: SuccessFactorsEvent) -> Option<NormalizedLifecycleEvent> {
        let event_type = canonical_type(&event.event_type)?;
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
                source: "successfactors".to_string(),
                source_event_id: event.event_id,
                source_event_type: event.event_type,
                processed_at: chrono::Utc::now(),
                version: "1.0".to_string(),
            },
        })
    }
}

#[async_trait]
impl HrmsAdapter for SuccessFactorsAdapter {
    fn source_name(&self) -> &'static str {
        "successfactors"
    }

    async fn poll(
        &self,
        cursor: &PollCursor,
    ) -> Result<(Vec<NormalizedLifecycleEvent>, Option<String>), AdapterError> {
        let last_event_timestamp = cursor
            .cursor_value
            .clone()
            .or_else(|| cursor.last_polled_at.map(|t| t.to_rfc3339()))
            .unwrap_or_default();

        let url = format!("{}/odata/v2/EventLog", self.credentials.tenant_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.credentials.client_secret)
            .query(&[("$filter", format!("timestamp gt {last_event_timestamp}"))])
            .send()
            .await
            .map_err(classify_reqwest_error)?
            .error_for_status()
            .map_err(classify_reqwest_error)?;

        let parsed: ODataResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?;

        let organization_id = self.credentials.organization_id.as_str();
        let mut events = Vec::new();
        let mut latest_timestamp = cursor.cursor_value.clone();

        for event in parsed.results.results.into_iter().take(MAX_EVENTS_PER_POLL) {
            latest_timestamp = Some(event.timestamp.clone());
            if let Some(normalized) = self.normalize(organization_id, event) {
                events.push(normalized);
            }
        }

        Ok((events, latest_timestamp))
    }

    fn process_webhook(
        &self,
        _raw_body: &[u8],
        _organization_id: &str,
    ) -> Result<Vec<NormalizedLifecycleEvent>, AdapterError> {
        // SuccessFactors is poll-only in this integration; webhooks aren't
        // registered for this source.
        Ok(Vec::new())
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

impl ResilientService for SuccessFactorsAdapter {
    fn default_resilience_policy(&self) -> ResiliencePolicy {
        policies::combine(vec![policies::retry(3), policies::circuit_breaker(5, 30)])
    }

    fn service_id(&self) -> &str {
        "successfactors-adapter"
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> AdapterError {
    let source = "successfactors".to_string();
    if let Some(status) = error.status() {
        return match status.as_u16() {
            401 => AdapterError::Authentication { source },
            403 => AdapterError::Permission { source },
            429 => AdapterError::RateLimited { source, retry_after_secs: None },
            _ => AdapterError::Network { source, message: error.to_string() },
        };
    }
    AdapterError::Network { source, message: error.to_string() }
}
