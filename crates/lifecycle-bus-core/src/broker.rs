//! The `MessageBroker` seam: production binaries wire a Kafka-shaped
//! client, tests wire an in-memory fake (§4.3, §8).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::envelope::Envelope;
use crate::error::BusError;

/// Where a message landed after a successful send.
#[derive(Debug, Clone)]
pub struct Ack {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// A message pulled off a topic partition, paired with the coordinates the
/// consumer needs to commit it.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

/// Abstraction over the event bus. The production implementor talks to a
/// real Kafka cluster via `rdkafka`; tests use [`InMemoryMessageBroker`].
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish one envelope, partitioned by `key`. Idempotent brokers must
    /// enforce exactly-once-per-partition on retry.
    async fn send(&self, topic: &str, key: &str, envelope: &Envelope) -> Result<Ack, BusError>;

    /// Poll the next available message for `group_id` across `topics`.
    /// Returns `None` when nothing is currently available.
    async fn poll(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> Result<Option<BrokerMessage>, BusError>;

    /// Commit an offset for `(topic, partition)` under `group_id`.
    async fn commit(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), BusError>;

    /// Move the next-read position for `(topic, partition)` under
    /// `group_id` to `offset`.
    async fn seek(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), BusError>;

    /// Whether the broker connection is currently healthy.
    async fn is_connected(&self) -> bool;
}

/// Production `MessageBroker` backed by `rdkafka`. One `StreamConsumer` is
/// created and cached per `group_id` on first `poll`/`commit`/`seek`.
pub struct KafkaMessageBroker {
    producer: rdkafka::producer::FutureProducer,
    brokers: String,
    consumers: DashMap<String, Arc<rdkafka::consumer::StreamConsumer>>,
}

/// Translate a `topics.rs`-style subscription pattern (`"dlq.*"`,
/// `"employee.onboard.*"`) into the `^`-prefixed regex librdkafka treats a
/// subscribed topic name as when it starts with `^`. Literal topic names
/// pass through unchanged.
fn to_rdkafka_subscription(pattern: &str) -> String {
    match pattern.strip_suffix('*') {
        Some(prefix) => format!("^{}", prefix.replace('.', "\\.")),
        None => pattern.to_string(),
    }
}

impl KafkaMessageBroker {
    /// Connect (lazily, idempotently) to the given broker list with the
    /// producer configured for `maxInFlightRequests=1` so partition order
    /// is preserved across retries.
    pub fn connect(brokers: &[String], client_id: &str) -> Result<Self, BusError> {
        use rdkafka::config::ClientConfig;
        use rdkafka::producer::FutureProducer;

        let broker_list = brokers.join(",");
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &broker_list)
            .set("client.id", client_id)
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "1")
            .create()
            .map_err(|e| BusError::Unreachable(e.to_string()))?;

        Ok(Self {
            producer,
            brokers: broker_list,
            consumers: DashMap::new(),
        })
    }

    /// The cached consumer for `group_id`, subscribing to `topics` the
    /// first time this group is polled.
    fn consumer_for(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> Result<Arc<rdkafka::consumer::StreamConsumer>, BusError> {
        use rdkafka::config::ClientConfig;
        use rdkafka::consumer::Consumer;

        if let Some(consumer) = self.consumers.get(group_id) {
            return Ok(consumer.clone());
        }

        let consumer: rdkafka::consumer::StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BusError::Unreachable(e.to_string()))?;

        let subscriptions: Vec<String> = topics.iter().map(|t| to_rdkafka_subscription(t)).collect();
        let subscription_refs: Vec<&str> = subscriptions.iter().map(String::as_str).collect();
        consumer
            .subscribe(&subscription_refs)
            .map_err(|e| BusError::Unreachable(e.to_string()))?;

        let consumer = Arc::new(consumer);
        self.consumers.insert(group_id.to_string(), consumer.clone());
        Ok(consumer)
    }
}

#[async_trait]
impl MessageBroker for KafkaMessageBroker {
    async fn send(&self, topic: &str, key: &str, envelope: &Envelope) -> Result<Ack, BusError> {
        use rdkafka::message::{Header, OwnedHeaders};
        use rdkafka::producer::FutureRecord;
        use std::time::Duration;

        let payload = serde_json::to_vec(envelope)
            .map_err(|e| BusError::Serialization(e.to_string()))?;

        let mut headers = OwnedHeaders::new();
        for (name, value) in envelope.headers() {
            headers = headers.insert(Header {
                key: name,
                value: Some(value.as_bytes()),
            });
        }

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(&payload)
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(record, Duration::from_secs(30))
            .await
            .map_err(|(e, _)| BusError::PublishFailed(e.to_string()))?;

        Ok(Ack {
            topic: topic.to_string(),
            partition: partition as u32,
            offset: offset as u64,
        })
    }

    async fn poll(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> Result<Option<BrokerMessage>, BusError> {
        use rdkafka::message::Headers;
        use rdkafka::Message;

        let consumer = self.consumer_for(group_id, topics)?;
        match tokio::time::timeout(std::time::Duration::from_millis(200), consumer.recv()).await {
            Ok(Ok(message)) => {
                let headers = message
                    .headers()
                    .map(|headers| {
                        (0..headers.count())
                            .map(|i| {
                                let header = headers.get(i);
                                (
                                    header.key.to_string(),
                                    header
                                        .value
                                        .map(|v| String::from_utf8_lossy(v).into_owned())
                                        .unwrap_or_default(),
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let payload = message.payload().map(|p| p.to_vec()).unwrap_or_default();
                Ok(Some(BrokerMessage {
                    topic: message.topic().to_string(),
                    partition: message.partition() as u32,
                    offset: message.offset() as u64,
                    headers,
                    payload,
                }))
            }
            Ok(Err(e)) => Err(BusError::Unreachable(e.to_string())),
            Err(_timeout) => Ok(None),
        }
    }

    async fn commit(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), BusError> {
        use rdkafka::consumer::{CommitMode, Consumer};
        use rdkafka::{Offset, TopicPartitionList};

        let Some(consumer) = self.consumers.get(group_id) else {
            return Ok(());
        };
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition as i32, Offset::Offset(offset as i64))
            .map_err(|e| BusError::Unreachable(e.to_string()))?;
        consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| BusError::Unreachable(e.to_string()))
    }

    async fn seek(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), BusError> {
        use rdkafka::consumer::Consumer;
        use rdkafka::Offset;

        let Some(consumer) = self.consumers.get(group_id) else {
            return Ok(());
        };
        consumer
            .seek(topic, partition as i32, Offset::Offset(offset as i64), std::time::Duration::from_secs(5))
            .map_err(|e| BusError::Unreachable(e.to_string()))
    }

    async fn is_connected(&self) -> bool {
        self.producer
            .client()
            .fetch_metadata(None, std::time::Duration::from_secs(5))
            .is_ok()
    }
}

impl std::fmt::Debug for KafkaMessageBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaMessageBroker")
            .field("brokers", &self.brokers)
            .finish()
    }
}

/// A `DashMap`-backed in-memory topic log, for tests (§8).
#[derive(Default)]
pub struct InMemoryMessageBroker {
    topics: DashMap<String, Vec<(u32, Vec<(String, String)>, Vec<u8>)>>,
    next_offset: DashMap<String, AtomicU64>,
    committed: DashMap<(String, String, u32), u64>,
    cursor: DashMap<(String, String), u64>,
    connected: std::sync::atomic::AtomicBool,
}

impl InMemoryMessageBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: std::sync::atomic::AtomicBool::new(true),
            ..Default::default()
        })
    }

    /// Test helper: the number of messages published to `topic`.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|v| v.len()).unwrap_or(0)
    }

    /// Test helper: disconnect the fake to exercise broker-unreachable paths.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBroker for InMemoryMessageBroker {
    async fn send(&self, topic: &str, key: &str, envelope: &Envelope) -> Result<Ack, BusError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BusError::Unreachable("in-memory broker disconnected".to_string()));
        }
        let payload =
            serde_json::to_vec(envelope).map_err(|e| BusError::Serialization(e.to_string()))?;
        let headers = envelope
            .headers()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let partition = crc32_partition(key, 12);
        let mut entry = self.topics.entry(topic.to_string()).or_default();
        let offset = entry.len() as u64;
        entry.push((partition, headers, payload));

        Ok(Ack {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn poll(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> Result<Option<BrokerMessage>, BusError> {
        let matching_topics: Vec<String> = self
            .topics
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|existing| topics.iter().any(|pattern| topic_matches(pattern, existing)))
            .collect();

        for topic in matching_topics {
            let Some(entries) = self.topics.get(&topic) else {
                continue;
            };
            let cursor_key = (group_id.to_string(), topic.clone());
            let next = self.cursor.get(&cursor_key).map(|c| *c).unwrap_or(0);
            if let Some((partition, headers, payload)) = entries.get(next as usize) {
                drop(entries);
                self.cursor.insert(cursor_key, next + 1);
                return Ok(Some(BrokerMessage {
                    topic: topic.clone(),
                    partition: *partition,
                    offset: next,
                    headers: headers.clone(),
                    payload: payload.clone(),
                }));
            }
        }
        Ok(None)
    }

    async fn commit(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<(), BusError> {
        self.committed
            .insert((group_id.to_string(), topic.to_string(), partition), offset);
        Ok(())
    }

    async fn seek(
        &self,
        group_id: &str,
        topic: &str,
        _partition: u32,
        offset: u64,
    ) -> Result<(), BusError> {
        self.cursor
            .insert((group_id.to_string(), topic.to_string()), offset);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Whether `topic` satisfies a subscription `pattern` (§4.4 allows glob
/// patterns like `"employee.onboard.*"`). A trailing `*` matches any topic
/// with that prefix; otherwise the match is exact.
fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

/// Deterministic partition assignment for the in-memory fake. Real Kafka
/// clients hash the key the same way across producer and consumer; this
/// mirrors that contract without pulling in a CRC dependency.
fn crc32_partition(key: &str, partitions: u32) -> u32 {
    let hash = key.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    hash % partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Metadata, Payload};

    fn sample_envelope(org: Option<&str>) -> Envelope {
        let mut metadata = Metadata::new("test");
        metadata.organization_id = org.map(|s| s.to_string());
        Envelope {
            id: "env-1".to_string(),
            event_type: "employee.onboard".to_string(),
            metadata,
            payload: Payload::Unhandled(serde_json::json!({})),
        }
    }

    #[tokio::test]
    async fn send_then_poll_round_trips() {
        let broker = InMemoryMessageBroker::new();
        let envelope = sample_envelope(Some("org-1"));
        broker
            .send("employee.onboard", envelope.partition_key(), &envelope)
            .await
            .unwrap();

        let msg = broker
            .poll("workflow-engine", &["employee.onboard".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.topic, "employee.onboard");

        let decoded: Envelope = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(decoded.id, envelope.id);
    }

    #[tokio::test]
    async fn poll_advances_cursor_per_group() {
        let broker = InMemoryMessageBroker::new();
        let envelope = sample_envelope(None);
        broker
            .send("employee.onboard", envelope.partition_key(), &envelope)
            .await
            .unwrap();

        let first = broker
            .poll("group-a", &["employee.onboard".to_string()])
            .await
            .unwrap();
        assert!(first.is_some());
        let second = broker
            .poll("group-a", &["employee.onboard".to_string()])
            .await
            .unwrap();
        assert!(second.is_none());

        let other_group = broker
            .poll("group-b", &["employee.onboard".to_string()])
            .await
            .unwrap();
        assert!(other_group.is_some());
    }

    #[tokio::test]
    async fn disconnected_broker_errors_on_send() {
        let broker = InMemoryMessageBroker::new();
        broker.disconnect();
        let envelope = sample_envelope(None);
        let result = broker
            .send("employee.onboard", envelope.partition_key(), &envelope)
            .await;
        assert!(result.is_err());
    }
}
