//! BambooHR adapter: no native event API, so the poll diffs the directory
//! against `lastPolledAt` and synthesizes events from changed records.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::HrmsCredentials;
use crate::domain::resilience::{policies, ResiliencePolicy, ResilientService};
use crate::envelope::{
    Employee, EmployeeStatus, LifecycleEventMetadata, LifecycleEventType, NormalizedLifecycleEvent,
};
use crate::error::AdapterError;
use crate::health::types::DependencyStatus;

use super::{parse_date, verify_hmac_sha256, HrmsAdapter, PollCursor};

#[derive(Debug, Deserialize)]
struct Directory {
    employees: Vec<DirectoryRecord>,
}

/// One directory record (§8 scenario 1's literal shape).
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRecord {
    pub id: String,
    #[serde(default)]
    pub work_email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub manager_id: Option<String>,
    pub hire_date: Option<String>,
    pub termination_date: Option<String>,
    pub status: String,
    pub last_changed: String,
}

pub struct BambooHrAdapter {
    credentials: HrmsCredentials,
    client: reqwest::Client,
}

impl BambooHrAdapter {
    pub fn new(credentials: HrmsCredentials) -> Self {
        Self {
            credentials,
            client: reqwest::Client::new(),
        }
    }

    /// `hireDate within 7 days & status=Active -> onboard`;
    /// `terminationDate set & status=Inactive -> exit`; else `update`.
    fn derive_event_type(record: &DirectoryRecord, now: DateTime<Utc>) -> LifecycleEventType {
        let is_active = record.status.eq_ignore_ascii_case("active");
        if is_active {
            if let Some(hire_date) = parse_date(record.hire_date.as_deref()) {
                if (now - hire_date).num_days().abs() <= 7 {
                    return LifecycleEventType::Onboard;
                }
            }
        }
        if record.termination_date.is_some() && record.status.eq_ignore_ascii_case("inactive") {
            return LifecycleEventType::Exit;
        }
        LifecycleEventType::Update
    }

    fn normalize(
        &self,
        organization_id: &str,
        record: DirectoryRecord,
        event_type: LifecycleEventType,
    ) -> NormalizedLifecycleEvent {
        NormalizedLifecycleEvent {
            event_type,
            organization_id: organization_id.to_string(),
            employee_id: record.id.clone(),
            employee: Employee {
                id: record.id.clone(),
                email: record.work_email.clone(),
                first_name: record.first_name.clone(),
                last_name: record.last_name.clone(),
                department: record.department.clone(),
                job_title: record.job_title.clone(),
                manager_id: record.manager_id.clone(),
                start_date: parse_date(record.hire_date.as_deref()),
                end_date: parse_date(record.termination_date.as_deref()),
                location: None,
                employee_type: None,
                status: EmployeeStatus::from_source_str(&record.status),
            },
            metadata: LifecycleEventMetadata {
                source: "bamboohr".to_string(),
                source_event_id: format!("{}-{}", record.id, record.last_changed),
                source_event_type: "employee.new".to_string(),
                processed_at: chrono::Utc::now(),
                version: "1.0".to_string(),
            },
        }
    }
}

#[async_trait]
impl HrmsAdapter for BambooHrAdapter {
    fn source_name(&self) -> &'static str {
        "bamboohr"
    }

    async fn poll(
        &self,
        cursor: &PollCursor,
    ) -> Result<(Vec<NormalizedLifecycleEvent>, Option<String>), AdapterError> {
        let url = format!("{}/v1/employees/directory", self.credentials.tenant_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .send()
            .await
            .map_err(classify_reqwest_error)?
            .error_for_status()
            .map_err(classify_reqwest_error)?;

        let directory: Directory = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?;

        let last_polled_at = cursor.last_polled_at;
        let now = chrono::Utc::now();
        // §9: deduplicated by (employeeId, derivedEventType) within this
        // polling window so a record whose lastChanged updates twice in
        // the same window still synthesizes at most one event per type.
        let mut seen = HashSet::new();
        let mut events = Vec::new();

        for record in directory.employees {
            let Some(last_changed) = parse_date(Some(&record.last_changed)) else {
                continue;
            };
            let changed_since_last_poll = last_polled_at
                .map(|last_polled| last_changed > last_polled)
                .unwrap_or(true);
            if !changed_since_last_poll {
                continue;
            }

            let event_type = Self::derive_event_type(&record, now);
            let dedup_key = (record.id.clone(), event_type);
            if !seen.insert(dedup_key) {
                continue;
            }

            events.push(self.normalize(&self.credentials.organization_id, record, event_type));
        }

        Ok((events, Some(now.to_rfc3339())))
    }

    fn process_webhook(
        &self,
        _raw_body: &[u8],
        _organization_id: &str,
    ) -> Result<Vec<NormalizedLifecycleEvent>, AdapterError> {
        // BambooHR has no native event webhook; it's poll-only (§4.2).
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

impl ResilientService for BambooHrAdapter {
    fn default_resilience_policy(&self) -> ResiliencePolicy {
        policies::combine(vec![policies::retry(3), policies::circuit_breaker(5, 30)])
    }

    fn service_id(&self) -> &str {
        "bamboohr-adapter"
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> AdapterError {
    let source = "bamboohr".to_string();
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

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: &str, hire_date: Option<&str>, last_changed: &str) -> DirectoryRecord {
        DirectoryRecord {
            id: id.to_string(),
            work_email: Some("a@x.io".to_string()),
            first_name: Some("A".to_string()),
            last_name: Some("B".to_string()),
            department: None,
            job_title: None,
            manager_id: None,
            hire_date: hire_date.map(|s| s.to_string()),
            termination_date: None,
            status: status.to_string(),
            last_changed: last_changed.to_string(),
        }
    }

    #[test]
    fn onboard_synthesis_for_recent_hire() {
        let now = Utc::now();
        let hire_date = now.to_rfc3339();
        let rec = record("42", "Active", Some(&hire_date), &now.to_rfc3339());
        let derived = BambooHrAdapter::derive_event_type(&rec, now);
        assert_eq!(derived, LifecycleEventType::Onboard);
    }

    #[test]
    fn update_for_unrelated_change() {
        let now = Utc::now();
        let rec = record("42", "Active", None, &now.to_rfc3339());
        let derived = BambooHrAdapter::derive_event_type(&rec, now);
        assert_eq!(derived, LifecycleEventType::Update);
    }

    #[test]
    fn exit_for_inactive_with_termination_date() {
        let now = Utc::now();
        let mut rec = record("42", "Inactive", None, &now.to_rfc3339());
        rec.termination_date = Some(now.to_rfc3339());
        let derived = BambooHrAdapter::derive_event_type(&rec, now);
        assert_eq!(derived, LifecycleEventType::Exit);
    }
}
