//! Dead-letter triage (§4.5): reprocess transient failures, quarantine
//! exhausted ones, or route to manual review.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DlqConfig;
use crate::envelope::Envelope;
use crate::error::DlqError;
use crate::producer::{ErrorDetail, OutgoingMessage, TypedProducer};
use crate::topics::dlq_topic;

const TRANSIENT_TOKENS: &[&str] = &[
    "NETWORK_EXCEPTION",
    "REQUEST_TIMED_OUT",
    "CONNECTION_ERROR",
    "ECONNRESET",
    "ENOTFOUND",
];

/// A dead-lettered envelope, stored in `dlq.<originalTopic>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DlqMessage {
    pub original_topic: String,
    pub original_envelope: Envelope,
    pub error: ErrorDetail,
    pub attempt_count: u32,
    pub dlq_timestamp: DateTime<Utc>,
}

impl PartialEq for ErrorDetail {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.message == other.message
    }
}

/// The triage decision for one DLQ record (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageDecision {
    /// Terminal: `attemptCount >= quarantineAfter`.
    Quarantine,
    /// Sleep `reprocessDelay`, then republish to the original topic.
    Reprocess,
    /// Terminal, preserves the full record with a review reason.
    ManualReview { reason: String },
}

/// Whether the DLQ record's error looks transient (§4.5 token set).
fn is_transient(error: &ErrorDetail) -> bool {
    TRANSIENT_TOKENS
        .iter()
        .any(|token| error.name.contains(token) || error.message.contains(token))
}

/// Decide the triage outcome for a DLQ record (pure; same inputs, same
/// decision — §8 idempotence property).
pub fn triage(record: &DlqMessage, config: &DlqConfig, manual_review_enabled: bool) -> TriageDecision {
    if record.attempt_count >= config.quarantine_after {
        return TriageDecision::Quarantine;
    }
    if is_transient(&record.error) && record.attempt_count <= config.max_reprocess {
        return TriageDecision::Reprocess;
    }
    if manual_review_enabled {
        return TriageDecision::ManualReview {
            reason: format!(
                "attemptCount={} exceeds reprocess budget without a transient error",
                record.attempt_count
            ),
        };
    }
    TriageDecision::Quarantine
}

/// A dedicated consumer on the `dlq-handler` group, subscribed to all
/// `dlq.*` topics.
pub struct DlqHandler {
    producer: Arc<TypedProducer>,
    config: DlqConfig,
    manual_review_enabled: bool,
}

impl DlqHandler {
    pub fn new(producer: Arc<TypedProducer>, config: DlqConfig, manual_review_enabled: bool) -> Self {
        Self {
            producer,
            config,
            manual_review_enabled,
        }
    }

    /// Process one DLQ record: decide, sleep if reprocessing, and route.
    pub async fn handle(&self, record: DlqMessage) -> Result<TriageDecision, DlqError> {
        let decision = triage(&record, &self.config, self.manual_review_enabled);

        match &decision {
            TriageDecision::Reprocess => {
                tokio::time::sleep(self.config.reprocess_delay).await;
                let mut envelope = record.original_envelope.clone();
                envelope.metadata.source = "dlq-reprocessor".to_string();
                self.producer
                    .send_one(
                        &record.original_topic,
                        OutgoingMessage {
                            id: Some(envelope.id.clone()),
                            event_type: envelope.event_type.clone(),
                            correlation_id: Some(envelope.metadata.correlation_id.clone()),
                            organization_id: envelope.metadata.organization_id.clone(),
                            employee_id: envelope.metadata.employee_id.clone(),
                            partition_key: Some(envelope.partition_key().to_string()),
                            payload: envelope.payload.clone(),
                        },
                    )
                    .await?;
            }
            TriageDecision::Quarantine => {
                self.producer
                    .send_one(
                        "quarantine.queue",
                        OutgoingMessage {
                            id: Some(record.original_envelope.id.clone()),
                            event_type: record.original_envelope.event_type.clone(),
                            correlation_id: Some(
                                record.original_envelope.metadata.correlation_id.clone(),
                            ),
                            organization_id: record
                                .original_envelope
                                .metadata
                                .organization_id
                                .clone(),
                            employee_id: record.original_envelope.metadata.employee_id.clone(),
                            partition_key: None,
                            payload: crate::envelope::Payload::Dlq(Box::new(record.clone())),
                        },
                    )
                    .await?;
            }
            TriageDecision::ManualReview { .. } => {
                self.producer
                    .send_one(
                        "manual.review.queue",
                        OutgoingMessage {
                            id: Some(record.original_envelope.id.clone()),
                            event_type: record.original_envelope.event_type.clone(),
                            correlation_id: Some(
                                record.original_envelope.metadata.correlation_id.clone(),
                            ),
                            organization_id: record
                                .original_envelope
                                .metadata
                                .organization_id
                                .clone(),
                            employee_id: record.original_envelope.metadata.employee_id.clone(),
                            partition_key: None,
                            payload: crate::envelope::Payload::Dlq(Box::new(record.clone())),
                        },
                    )
                    .await?;
            }
        }

        Ok(decision)
    }

    /// Administrative re-injection hook: enqueue a republish of a
    /// quarantined or manually-reviewed record. No behavior beyond
    /// enqueueing is specified (§4.5).
    pub async fn manual_reprocess(
        &self,
        original_envelope: Envelope,
        original_topic: &str,
    ) -> Result<(), DlqError> {
        self.producer
            .send_one(
                original_topic,
                OutgoingMessage {
                    id: Some(original_envelope.id.clone()),
                    event_type: original_envelope.event_type.clone(),
                    correlation_id: Some(original_envelope.metadata.correlation_id.clone()),
                    organization_id: original_envelope.metadata.organization_id.clone(),
                    employee_id: original_envelope.metadata.employee_id.clone(),
                    partition_key: Some(original_envelope.partition_key().to_string()),
                    payload: original_envelope.payload.clone(),
                },
            )
            .await?;
        Ok(())
    }
}

/// The dlq.* subscription pattern the DLQ handler's consumer group uses.
pub fn subscription_pattern() -> String {
    dlq_topic("*")
}
