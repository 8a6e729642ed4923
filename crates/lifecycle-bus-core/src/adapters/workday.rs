//! Workday adapter: event-id cursor, paged via `hasMore`/`nextCursor`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::HrmsCredentials;
use crate::domain::resilience::{policies, ResiliencePolicy, ResilientService};
use crate::envelope::{Employee, EmployeeStatus, LifecycleEventMetadata, NormalizedLifecycleEvent};
use crate::error::AdapterError;
use crate::health::types::DependencyStatus;

use super::{canonical_type, parse_date, verify_hmac_sha256, HrmsAdapter, PollCursor};

/// Events per poll is bounded at 1000 to avoid unbounded batches (§4.2).
const MAX_EVENTS_PER_POLL: usize = 1000;
/// Upstream pages 100 events at a time.
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkdayPage {
    events: Vec<WorkdayEvent>,
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkdayEvent {
    #[serde(default = "uuid_default")]
    event_id: String,
    event_type: String,
    worker: WorkdayWorker,
}

fn uuid_default() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkdayWorker {
    worker_id: Option<String>,
    id: Option<String>,
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

/// Webhook body shape for a single Workday event (§8 scenario 2).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkdayWebhookBody {
    pub event_type: String,
    pub worker: WorkdayWorker,
}

pub struct WorkdayAdapter {
    credentials: HrmsCredentials,
    client: reqwest::Client,
}

impl WorkdayAdapter {
    pub fn new(credentials: HrmsCredentials) -> Self {
        Self {
            credentials,
            client: reqwest::Client::new(),
        }
    }

    fn normalize(&self, organization_id: &str, event: WorkdayEvent) -> Option<NormalizedLifecycleEvent> {
        let event_type = canonical_type(&event.event_type)?;
        let worker = event.worker;
        let employee_id = worker
            .worker_id
            .or(worker.id)
            .unwrap_or_default();

        Some(NormalizedLifecycleEvent {
            event_type,
            organization_id: organization_id.to_string(),
            employee_id: employee_id.clone(),
            employee: Employee {
                id: employee_id,
                email: worker.email,
                first_name: worker.first_name,
                last_name: worker.last_name,
                department: worker.department,
                job_title: worker.job_title,
                manager_id: worker.manager_id,
                start_date: parse_date(worker.start_date.as_deref()),
                end_date: parse_date(worker.end_date.as_deref()),
                location: worker.location,
                employee_type: worker.employee_type,
                status: worker
                    .status
                    .as_deref()
                    .map(EmployeeStatus::from_source_str)
                    .unwrap_or_default(),
            },
            metadata: LifecycleEventMetadata {
                source: "workday".to_string(),
                source_event_id: event.event_id,
                source_event_type: event.event_type,
                processed_at: chrono::Utc::now(),
                version: "1.0".to_string(),
            },
        })
    }
}

#[async_trait]
impl HrmsAdapter for WorkdayAdapter {
    fn source_name(&self) -> &'static str {
        "workday"
    }

    /// Pages through `hasMore`/`nextCursor` until exhausted or the
    /// 1000-event safety cap is hit. If `hasMore` is still true at the
    /// cap, the poll stops and persists the cursor at the last
    /// successfully-paged event so the next poll resumes from there (§9).
    async fn poll(
        &self,
        cursor: &PollCursor,
    ) -> Result<(Vec<NormalizedLifecycleEvent>, Option<String>), AdapterError> {
        let mut events = Vec::new();
        let mut next_cursor = cursor.cursor_value.clone();
        let organization_id = self.credentials.organization_id.as_str();

        loop {
            let url = format!("{}/events", self.credentials.tenant_url);
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.credentials.client_secret)
                .query(&[
                    ("since", cursor.last_polled_at.map(|t| t.to_rfc3339()).unwrap_or_default()),
                    ("cursor", next_cursor.clone().unwrap_or_default()),
                    ("pageSize", PAGE_SIZE.to_string()),
                ])
                .send()
                .await
                .map_err(|e| classify_reqwest_error("workday", e))?
                .error_for_status()
                .map_err(|e| classify_reqwest_error("workday", e))?;

            let page: WorkdayPage = response
                .json()
                .await
                .map_err(|e| AdapterError::Parse(e.to_string()))?;

            for event in page.events {
                if let Some(normalized) = self.normalize(organization_id, event) {
                    events.push(normalized);
                }
                if events.len() >= MAX_EVENTS_PER_POLL {
                    return Ok((events, next_cursor));
                }
            }

            next_cursor = page.next_cursor;
            if !page.has_more || next_cursor.is_none() {
                break;
            }
        }

        Ok((events, next_cursor))
    }

    fn process_webhook(
        &self,
        raw_body: &[u8],
        organization_id: &str,
    ) -> Result<Vec<NormalizedLifecycleEvent>, AdapterError> {
        let body: WorkdayWebhookBody =
            serde_json::from_slice(raw_body).map_err(|e| AdapterError::Parse(e.to_string()))?;

        let event = WorkdayEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: body.event_type,
            worker: body.worker,
        };

        Ok(self.normalize(organization_id, event).into_iter().collect())
    }

    fn validate_signature(&self, raw_body: &[u8], signature: &str, secret: &str) -> Result<(), AdapterError> {
        verify_hmac_sha256(raw_body, signature, secret)
    }

    async fn health_check(&self) -> DependencyStatus {
        match self
            .client
            .head(&self.credentials.tenant_url)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => DependencyStatus::Healthy,
            Ok(resp) => DependencyStatus::Degraded(format!("upstream returned {}", resp.status())),
            Err(e) => DependencyStatus::Unhealthy(e.to_string()),
        }
    }
}

impl ResilientService for WorkdayAdapter {
    fn default_resilience_policy(&self) -> ResiliencePolicy {
        policies::combine(vec![
            policies::retry(3),
            policies::circuit_breaker(5, 30),
        ])
    }

    fn service_id(&self) -> &str {
        "workday-adapter"
    }
}

fn classify_reqwest_error(source: &str, error: reqwest::Error) -> AdapterError {
    if let Some(status) = error.status() {
        return match status.as_u16() {
            401 => AdapterError::Authentication { source: source.to_string() },
            403 => AdapterError::Permission { source: source.to_string() },
            429 => AdapterError::RateLimited {
                source: source.to_string(),
                retry_after_secs: None,
            },
            _ => AdapterError::Network {
                source: source.to_string(),
                message: error.to_string(),
            },
        };
    }
    AdapterError::Network {
        source: source.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> HrmsCredentials {
        HrmsCredentials {
            tenant_url: "https://example.workday.com".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            webhook_secret: Some("webhook-secret".to_string()),
            organization_id: "org-1".to_string(),
        }
    }

    #[test]
    fn terminate_webhook_normalizes_to_exit() {
        let adapter = WorkdayAdapter::new(credentials());
        let body = serde_json::json!({
            "eventType": "worker.terminate",
            "worker": {
                "workerId": "w1",
                "email": "u@x.io",
                "status": "terminated"
            }
        });
        let events = adapter
            .process_webhook(body.to_string().as_bytes(), "org-1")
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, crate::envelope::LifecycleEventType::Exit);
        assert_eq!(events[0].employee.status, EmployeeStatus::Terminated);
    }

    #[test]
    fn unknown_event_type_produces_no_events() {
        let adapter = WorkdayAdapter::new(credentials());
        let body = serde_json::json!({
            "eventType": "worker.promoted",
            "worker": { "workerId": "w2" }
        });
        let events = adapter
            .process_webhook(body.to_string().as_bytes(), "org-1")
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn poll_single_page_normalizes_events_and_stops() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "events": [{
                    "eventId": "evt-1",
                    "eventType": "worker.hire",
                    "worker": { "workerId": "w9", "email": "w9@x.io", "status": "active" }
                }],
                "hasMore": false,
                "nextCursor": null
            })))
            .mount(&server)
            .await;

        let mut creds = credentials();
        creds.tenant_url = server.uri();
        let adapter = WorkdayAdapter::new(creds);
        let cursor = PollCursor::new(std::time::Duration::from_secs(60));

        let (events, next_cursor) = adapter.poll(&cursor).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, crate::envelope::LifecycleEventType::Onboard);
        assert!(next_cursor.is_none());
    }

    #[tokio::test]
    async fn poll_classifies_401_as_authentication_error() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut creds = credentials();
        creds.tenant_url = server.uri();
        let adapter = WorkdayAdapter::new(creds);
        let cursor = PollCursor::new(std::time::Duration::from_secs(60));

        let err = adapter.poll(&cursor).await.unwrap_err();
        assert!(matches!(err, AdapterError::Authentication { .. }));
    }
}
