//! Subscription, handler dispatch, in-process retry, and DLQ emission
//! (§4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::MessageBroker;
use crate::config::RetryConfig;
use crate::envelope::Envelope;
use crate::error::BusError;
use crate::producer::{ErrorDetail, TypedProducer};

/// Coordinates passed to a handler alongside the decoded envelope.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub headers: Vec<(String, String)>,
    pub correlation_id: String,
    pub attempt: u32,
}

/// A handler error. `name`/`message` are matched against the retry token
/// set to decide whether the consumer should retry in-process.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub name: String,
    pub message: String,
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for HandlerError {}

/// A handler registered for one `envelope.type`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope, ctx: &MessageContext) -> Result<(), HandlerError>;
}

/// Builds the handler registry before the consumer starts; registration is
/// closed once [`TypedConsumer::run`] begins (§9), keeping the mapping
/// immutable for the run loop.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }
}

/// Default retryable error tokens (§4.4).
const DEFAULT_RETRYABLE_TOKENS: &[&str] = &["NETWORK_EXCEPTION", "REQUEST_TIMED_OUT"];

fn is_retryable_error(error: &HandlerError, tokens: &[&str]) -> bool {
    tokens
        .iter()
        .any(|token| error.name.contains(token) || error.message.contains(token))
}

/// `min(initialDelay * backoff^attempt, maxDelay)` (§4.4).
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let scaled = config.initial_backoff.as_millis() as f64 * config.multiplier.powi(attempt as i32);
    let capped = scaled.min(config.max_backoff.as_millis() as f64);
    Duration::from_millis(capped as u64)
}

/// A topic/partition coordinate, for pause/resume/seek operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

/// Subscribes to a set of topics under a consumer group, dispatching to
/// registered handlers with in-process retry and DLQ emission on
/// exhaustion.
pub struct TypedConsumer {
    broker: Arc<dyn MessageBroker>,
    producer: Arc<TypedProducer>,
    group_id: String,
    topics: Vec<String>,
    handlers: HandlerRegistry,
    retry: RetryConfig,
    paused: std::sync::Mutex<std::collections::HashSet<TopicPartition>>,
}

impl TypedConsumer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        producer: Arc<TypedProducer>,
        group_id: impl Into<String>,
        topics: Vec<String>,
        handlers: HandlerRegistry,
        retry: RetryConfig,
    ) -> Self {
        Self {
            broker,
            producer,
            group_id: group_id.into(),
            topics,
            handlers,
            retry,
            paused: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Pause consumption on the given topic/partitions.
    pub fn pause(&self, topic_partitions: &[TopicPartition]) {
        let mut paused = self.paused.lock().unwrap();
        paused.extend(topic_partitions.iter().cloned());
    }

    /// Resume consumption on the given topic/partitions.
    pub fn resume(&self, topic_partitions: &[TopicPartition]) {
        let mut paused = self.paused.lock().unwrap();
        for tp in topic_partitions {
            paused.remove(tp);
        }
    }

    /// Explicitly commit a list of offsets.
    pub async fn commit_offsets(
        &self,
        commits: &[(String, u32, u64)],
    ) -> Result<(), BusError> {
        for (topic, partition, offset) in commits {
            self.broker.commit(&self.group_id, topic, *partition, *offset).await?;
        }
        Ok(())
    }

    /// Move the next-read position for `(topic, partition)` to `offset`.
    pub async fn seek(&self, topic: &str, partition: u32, offset: u64) -> Result<(), BusError> {
        self.broker.seek(&self.group_id, topic, partition, offset).await
    }

    /// Process messages until `token` signals cancellation. Each poll is
    /// cancellation-aware: suspended reads and retry sleeps all race
    /// against the shutdown token.
    pub async fn run(&self, token: &mut crate::shutdown::ShutdownToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                message = self.broker.poll(&self.group_id, &self.topics) => {
                    match message {
                        Ok(Some(message)) => {
                            if self.is_paused(&message.topic, message.partition) {
                                continue;
                            }
                            self.process_one(message, token).await;
                        }
                        Ok(None) => {
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                                _ = token.cancelled() => break,
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, group = %self.group_id, "poll failed");
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                                _ = token.cancelled() => break,
                            }
                        }
                    }
                }
            }
        }
    }

    fn is_paused(&self, topic: &str, partition: u32) -> bool {
        self.paused.lock().unwrap().contains(&TopicPartition {
            topic: topic.to_string(),
            partition,
        })
    }

    #[tracing::instrument(skip(self, message, token), fields(topic = %message.topic, group = %self.group_id))]
    async fn process_one(
        &self,
        message: crate::broker::BrokerMessage,
        token: &mut crate::shutdown::ShutdownToken,
    ) {
        let envelope: Envelope = match serde_json::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode envelope, skipping");
                let _ = self
                    .broker
                    .commit(&self.group_id, &message.topic, message.partition, message.offset + 1)
                    .await;
                return;
            }
        };

        let Some(handler) = self.handlers.get(&envelope.event_type) else {
            tracing::warn!(event_type = %envelope.event_type, "no handler registered, skipping");
            let _ = self
                .broker
                .commit(&self.group_id, &message.topic, message.partition, message.offset + 1)
                .await;
            return;
        };

        let ctx = MessageContext {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            timestamp: chrono::Utc::now(),
            headers: message.headers.clone(),
            correlation_id: envelope.metadata.correlation_id.clone(),
            attempt: 0,
        };

        // `local_attempt` counts in-process invocations of this handler for
        // this one delivery (0-based); `ctx.attempt` is the outer,
        // header-carried attempt count used when this envelope has already
        // been through the DLQ once before (§9: the DLQ attemptCount is
        // incremented once, at send time, not per in-process retry).
        let mut local_attempt = 0u32;
        loop {
            let mut attempt_ctx = ctx.clone();
            attempt_ctx.attempt = local_attempt;

            match handler.handle(&envelope, &attempt_ctx).await {
                Ok(()) => break,
                Err(err) => {
                    let retryable = is_retryable_error(&err, DEFAULT_RETRYABLE_TOKENS);
                    let attempts_remaining = local_attempt + 1 < self.retry.max_attempts;
                    if retryable && attempts_remaining {
                        let delay = backoff_delay(&self.retry, local_attempt);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = token.cancelled() => return,
                        }
                        local_attempt += 1;
                        continue;
                    }

                    let _ = self
                        .producer
                        .send_to_dlq(
                            &message.topic,
                            envelope.clone(),
                            ErrorDetail {
                                name: err.name.clone(),
                                message: err.message.clone(),
                                stack: None,
                            },
                            ctx.attempt,
                        )
                        .await;
                    break;
                }
            }
        }

        let _ = self
            .broker
            .commit(&self.group_id, &message.topic, message.partition, message.offset + 1)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryMessageBroker;
    use crate::envelope::{Metadata, Payload};
    use crate::producer::OutgoingMessage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFails {
        name: &'static str,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl EventHandler for AlwaysFails {
        async fn handle(&self, _envelope: &Envelope, _ctx: &MessageContext) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError {
                name: self.name.to_string(),
                message: "connect".to_string(),
            })
        }
    }

    struct AlwaysSucceeds {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl EventHandler for AlwaysSucceeds {
        async fn handle(&self, _envelope: &Envelope, _ctx: &MessageContext) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn retry_then_dlq_after_max_attempts() {
        let broker = InMemoryMessageBroker::new();
        let producer = Arc::new(TypedProducer::new(broker.clone(), "consumer"));
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Arc::new(AlwaysFails {
            name: "NETWORK_EXCEPTION",
            calls: calls.clone(),
        });
        let registry = HandlerRegistry::new().register("employee.onboard", handler);
        let consumer = TypedConsumer::new(
            broker.clone(),
            producer,
            "workflow-engine",
            vec!["employee.onboard".to_string()],
            registry,
            retry_config(),
        );

        let envelope = Envelope {
            id: "env-1".to_string(),
            event_type: "employee.onboard".to_string(),
            metadata: Metadata::new("test"),
            payload: Payload::Unhandled(serde_json::json!({})),
        };
        let produce_producer = TypedProducer::new(broker.clone(), "test");
        produce_producer
            .send_one(
                "employee.onboard",
                OutgoingMessage {
                    id: Some(envelope.id.clone()),
                    event_type: envelope.event_type.clone(),
                    payload: envelope.payload.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let message = broker
            .poll("workflow-engine", &["employee.onboard".to_string()])
            .await
            .unwrap()
            .unwrap();
        let shutdown = crate::shutdown::GracefulShutdown::new();
        let mut token = shutdown.token();
        consumer.process_one(message, &mut token).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(broker.topic_len("dlq.employee.onboard"), 1);
    }

    #[tokio::test]
    async fn successful_handler_does_not_dlq() {
        let broker = InMemoryMessageBroker::new();
        let producer = Arc::new(TypedProducer::new(broker.clone(), "consumer"));
        let calls = Arc::new(AtomicU32::new(0));
        let handler = Arc::new(AlwaysSucceeds { calls: calls.clone() });
        let registry = HandlerRegistry::new().register("employee.onboard", handler);
        let consumer = TypedConsumer::new(
            broker.clone(),
            producer,
            "workflow-engine",
            vec!["employee.onboard".to_string()],
            registry,
            retry_config(),
        );

        let produce_producer = TypedProducer::new(broker.clone(), "test");
        produce_producer
            .send_one(
                "employee.onboard",
                OutgoingMessage {
                    event_type: "employee.onboard".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let message = broker
            .poll("workflow-engine", &["employee.onboard".to_string()])
            .await
            .unwrap()
            .unwrap();
        let shutdown = crate::shutdown::GracefulShutdown::new();
        let mut token = shutdown.token();
        consumer.process_one(message, &mut token).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.topic_len("dlq.employee.onboard"), 0);
    }

    #[test]
    fn backoff_delay_caps_at_max() {
        let config = retry_config();
        let delay = backoff_delay(&config, 10);
        assert_eq!(delay, config.max_backoff);
    }
}
