//! Envelope construction and the typed send operations (§4.3).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::MessageBroker;
use crate::envelope::{Envelope, Metadata, Payload};
use crate::error::BusError;
use crate::topics::{dlq_topic, tenant_topic};

/// One DLQ record's error detail, carried alongside the original envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

/// Fields needed to construct an outgoing envelope; everything else
/// (`id`, `correlationId`, `timestamp`, `source`, `version`) is filled in
/// by the producer.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub id: Option<String>,
    pub event_type: String,
    pub correlation_id: Option<String>,
    pub organization_id: Option<String>,
    pub employee_id: Option<String>,
    pub partition_key: Option<String>,
    pub payload: Payload,
}

/// Wraps a [`MessageBroker`] client with envelope construction, header
/// propagation, and the DLQ helper. Safe for concurrent use from any
/// number of adapters and the DLQ handler (`Arc`-shared, internally
/// synchronized by the broker implementor).
pub struct TypedProducer {
    broker: Arc<dyn MessageBroker>,
    source: String,
}

impl TypedProducer {
    pub fn new(broker: Arc<dyn MessageBroker>, source: impl Into<String>) -> Self {
        Self {
            broker,
            source: source.into(),
        }
    }

    /// The underlying broker connection, for connectivity checks (§4.9).
    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    fn build_envelope(&self, message: OutgoingMessage) -> Envelope {
        let mut metadata = Metadata::new(self.source.clone());
        if let Some(correlation_id) = message.correlation_id {
            metadata = metadata.with_correlation_id(correlation_id);
        }
        metadata = metadata
            .with_organization_id(message.organization_id)
            .with_employee_id(message.employee_id);

        Envelope {
            id: message.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            event_type: message.event_type,
            metadata,
            payload: message.payload,
        }
    }

    /// Explicit key > `organizationId` > `id` (§4.3).
    fn partition_key<'a>(explicit: Option<&'a str>, envelope: &'a Envelope) -> &'a str {
        explicit.unwrap_or_else(|| envelope.partition_key())
    }

    /// Send one message to `topic`.
    pub async fn send_one(
        &self,
        topic: &str,
        message: OutgoingMessage,
    ) -> Result<crate::broker::Ack, BusError> {
        let key = message.partition_key.clone();
        let envelope = self.build_envelope(message);
        let key = Self::partition_key(key.as_deref(), &envelope);
        self.broker.send(topic, key, &envelope).await
    }

    /// Send a batch of messages to `topic`, returning one ack per message
    /// in order.
    pub async fn send_batch(
        &self,
        topic: &str,
        messages: Vec<OutgoingMessage>,
    ) -> Result<Vec<crate::broker::Ack>, BusError> {
        let mut acks = Vec::with_capacity(messages.len());
        for message in messages {
            acks.push(self.send_one(topic, message).await?);
        }
        Ok(acks)
    }

    /// Route to `{baseName}.{organizationId}`.
    pub async fn send_to_organization_topic(
        &self,
        base_name: &str,
        organization_id: &str,
        mut message: OutgoingMessage,
    ) -> Result<crate::broker::Ack, BusError> {
        message.organization_id = Some(organization_id.to_string());
        let topic = tenant_topic(base_name, organization_id);
        self.send_one(&topic, message).await
    }

    /// Route to `dlq.<originalTopic>`, stamping `attempt_count` per the
    /// resolved increment rule in §9 (the producer increments once, at
    /// DLQ-send time; the DLQ handler never re-increments).
    pub async fn send_to_dlq(
        &self,
        original_topic: &str,
        original_envelope: Envelope,
        error: ErrorDetail,
        attempt_count: u32,
    ) -> Result<crate::broker::Ack, BusError> {
        let dlq_record = crate::dlq::DlqMessage {
            original_topic: original_topic.to_string(),
            original_envelope: original_envelope.clone(),
            error,
            attempt_count: attempt_count + 1,
            dlq_timestamp: chrono::Utc::now(),
        };

        let message = OutgoingMessage {
            id: Some(original_envelope.id.clone()),
            event_type: original_envelope.event_type.clone(),
            correlation_id: Some(original_envelope.metadata.correlation_id.clone()),
            organization_id: original_envelope.metadata.organization_id.clone(),
            employee_id: original_envelope.metadata.employee_id.clone(),
            partition_key: Some(original_envelope.partition_key().to_string()),
            payload: Payload::Dlq(Box::new(dlq_record)),
        };

        self.send_one(&dlq_topic(original_topic), message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryMessageBroker;

    fn message(event_type: &str) -> OutgoingMessage {
        OutgoingMessage {
            event_type: event_type.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn send_one_fills_in_metadata() {
        let broker = InMemoryMessageBroker::new();
        let producer = TypedProducer::new(broker.clone(), "test-producer");
        producer
            .send_one("employee.onboard", message("employee.onboard"))
            .await
            .unwrap();
        assert_eq!(broker.topic_len("employee.onboard"), 1);
    }

    #[tokio::test]
    async fn send_to_organization_topic_routes_by_tenant() {
        let broker = InMemoryMessageBroker::new();
        let producer = TypedProducer::new(broker.clone(), "test-producer");
        producer
            .send_to_organization_topic("employee.onboard", "org-7", message("employee.onboard"))
            .await
            .unwrap();
        assert_eq!(broker.topic_len("employee.onboard.org-7"), 1);
    }

    #[tokio::test]
    async fn send_to_dlq_increments_attempt_count_once() {
        let broker = InMemoryMessageBroker::new();
        let producer = TypedProducer::new(broker.clone(), "test-consumer");
        let envelope = producer.build_envelope(message("employee.onboard"));

        producer
            .send_to_dlq(
                "employee.onboard",
                envelope,
                ErrorDetail {
                    name: "NETWORK_EXCEPTION".to_string(),
                    message: "connect".to_string(),
                    stack: None,
                },
                0,
            )
            .await
            .unwrap();

        assert_eq!(broker.topic_len("dlq.employee.onboard"), 1);
    }

    #[tokio::test]
    async fn partition_key_prefers_organization_id() {
        let broker = InMemoryMessageBroker::new();
        let producer = TypedProducer::new(broker.clone(), "test-producer");
        let mut msg = message("employee.onboard");
        msg.organization_id = Some("org-1".to_string());
        let envelope = producer.build_envelope(msg);
        assert_eq!(envelope.partition_key(), "org-1");
    }
}
