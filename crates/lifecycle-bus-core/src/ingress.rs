//! Webhook ingress HTTP surface (§4.1, §6): a raw `hyper::server::conn::http1`
//! listener — the same pattern the ambient health server uses — routing on
//! `(Method, path)` with `{source}`/`{organizationId}` path segments
//! extracted manually.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;

use crate::adapters::{HrmsAdapter, PollCursor};
use crate::error::IngressError;
use crate::producer::{OutgoingMessage, TypedProducer};
use crate::resilience::KeyedRateLimiter;
use crate::shutdown::ShutdownToken;
use crate::topics::lifecycle_event_topic;

/// Request body cap (§4.1): 10 MB.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const SIGNATURE_HEADERS: &[&str] = &["x-signature", "x-hub-signature", "x-webhook-signature"];

/// An admin-registered webhook binding for `(organizationId, source)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRegistration {
    pub organization_id: String,
    pub source: String,
    pub endpoint: Option<String>,
    pub secret_key: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub retry_policy: Option<serde_json::Value>,
    #[serde(default)]
    pub transformation_rules: Option<serde_json::Value>,
}

struct AdapterEntry {
    adapter: Box<dyn HrmsAdapter>,
    cursor: AsyncMutex<PollCursor>,
}

/// The webhook ingress server: owns the adapter registry, the webhook
/// registration table, and the per-key rate limiter, and hands normalized
/// events to the shared [`TypedProducer`].
pub struct WebhookIngress {
    addr: SocketAddr,
    producer: Arc<TypedProducer>,
    adapters: Arc<DashMap<String, AdapterEntry>>,
    registrations: Arc<DashMap<(String, String), WebhookRegistration>>,
    rate_limiter: Arc<KeyedRateLimiter<String>>,
}

impl WebhookIngress {
    pub fn new(addr: impl Into<SocketAddr>, producer: Arc<TypedProducer>, requests_per_window: u32, burst: u32) -> Self {
        Self {
            addr: addr.into(),
            producer,
            adapters: Arc::new(DashMap::new()),
            registrations: Arc::new(DashMap::new()),
            rate_limiter: Arc::new(KeyedRateLimiter::new(requests_per_window, burst)),
        }
    }

    pub fn register_adapter(&self, source: &str, adapter: Box<dyn HrmsAdapter>, poll_interval: Duration) {
        self.adapters.insert(
            source.to_string(),
            AdapterEntry {
                adapter,
                cursor: AsyncMutex::new(PollCursor::new(poll_interval)),
            },
        );
    }

    /// Run the accept loop until `token` signals shutdown.
    pub async fn serve(self: Arc<Self>, mut token: ShutdownToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let io = TokioIo::new(stream);
                    let this = Arc::clone(&self);

                    tokio::spawn(async move {
                        let service = hyper::service::service_fn(move |req| {
                            let this = Arc::clone(&this);
                            async move { this.handle(req).await }
                        });
                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            if !e.is_incomplete_message() {
                                tracing::debug!(error = %e, "ingress connection error");
                            }
                        }
                    });
                }
            }
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Result<Response<String>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let signature = signature_header(&req);

        let response = match (&method, segments.as_slice()) {
            (&Method::POST, ["api", "webhook", source, organization_id]) => {
                let source = source.to_string();
                let organization_id = organization_id.to_string();
                match read_limited_body(req).await {
                    Ok(body) => self.handle_webhook(&source, &organization_id, signature, body).await,
                    Err(e) => Err(e),
                }
            }
            (&Method::GET, ["api", "health"]) => Ok(self.handle_health().await),
            (&Method::POST, ["api", "config", "webhook"]) => match read_limited_body(req).await {
                Ok(body) => self.handle_register(body),
                Err(e) => Err(e),
            },
            (&Method::DELETE, ["api", "config", "webhook", organization_id, source]) => {
                Ok(self.handle_unregister(organization_id, source))
            }
            (&Method::POST, ["api", "admin", "adapters", source, "poll"]) => {
                let source = source.to_string();
                self.handle_force_poll(&source).await
            }
            _ => Err(IngressError::UnrecognizedTarget),
        };

        Ok(response.unwrap_or_else(error_response))
    }

    /// Normalize and publish one already-read webhook body. Split out from
    /// [`Self::handle`] so it's exercisable without a live `hyper::body::Incoming`.
    async fn handle_webhook(
        &self,
        source: &str,
        organization_id: &str,
        signature: Option<String>,
        body: Bytes,
    ) -> Result<Response<String>, IngressError> {
        let rate_limit_key = organization_id.to_string();
        if let Err(e) = self.rate_limiter.check(&rate_limit_key) {
            return Err(IngressError::RateLimited {
                retry_after_secs: e.retry_after.as_secs(),
            });
        }

        let entry = self
            .adapters
            .get(source)
            .ok_or(IngressError::UnrecognizedTarget)?;

        let registration = self
            .registrations
            .get(&(organization_id.to_string(), source.to_string()))
            .map(|r| r.clone());

        if let Some(secret) = registration.as_ref().and_then(|r| r.secret_key.as_deref()) {
            let signature = signature.as_deref().ok_or(IngressError::SignatureInvalid)?;
            entry.adapter.validate_signature(&body, signature, secret)?;
        }

        let events = entry.adapter.process_webhook(&body, organization_id)?;

        let total = events.len();
        let mut failed = 0usize;
        for event in events {
            let topic = lifecycle_event_topic(event.event_type);
            let message = OutgoingMessage {
                organization_id: Some(organization_id.to_string()),
                employee_id: Some(event.employee_id.clone()),
                event_type: topic.to_string(),
                payload: crate::envelope::Payload::LifecycleEvent(event),
                ..Default::default()
            };
            if self
                .producer
                .send_to_organization_topic(topic, organization_id, message)
                .await
                .is_err()
            {
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(IngressError::PartialNormalization { failed, total });
        }

        Ok(json_response(
            StatusCode::OK,
            &serde_json::json!({ "success": true, "eventsProcessed": total }),
        ))
    }

    async fn handle_health(&self) -> Response<String> {
        let mut adapter_statuses = HashMap::new();
        let mut all_adapters_healthy = true;
        for entry in self.adapters.iter() {
            let status = entry.value().adapter.health_check().await;
            if !status.is_healthy() {
                all_adapters_healthy = false;
            }
            let last_polled_at = entry.value().cursor.lock().await.last_polled_at;
            adapter_statuses.insert(
                entry.key().clone(),
                serde_json::json!({
                    "status": format!("{:?}", status),
                    "lastPolledAt": last_polled_at.map(|t| t.to_rfc3339()),
                }),
            );
        }
        let broker_connected = self.producer.broker().is_connected().await;

        json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": if broker_connected && all_adapters_healthy { "healthy" } else { "unhealthy" },
                "details": {
                    "broker": if broker_connected { "connected" } else { "disconnected" },
                    "adapters": adapter_statuses,
                },
            }),
        )
    }

    fn handle_register(&self, body: Bytes) -> Result<Response<String>, IngressError> {
        let registration: WebhookRegistration =
            serde_json::from_slice(&body).map_err(|_| IngressError::MalformedBody)?;
        self.registrations.insert(
            (registration.organization_id.clone(), registration.source.clone()),
            registration,
        );
        Ok(json_response(StatusCode::OK, &serde_json::json!({ "success": true })))
    }

    fn handle_unregister(&self, organization_id: &str, source: &str) -> Response<String> {
        self.registrations
            .remove(&(organization_id.to_string(), source.to_string()));
        json_response(StatusCode::OK, &serde_json::json!({ "success": true }))
    }

    async fn handle_force_poll(&self, source: &str) -> Result<Response<String>, IngressError> {
        let total = self.poll_adapter_once(source).await?;
        Ok(json_response(
            StatusCode::ACCEPTED,
            &serde_json::json!({ "success": true, "eventsProcessed": total }),
        ))
    }

    /// Poll one registered adapter unconditionally (ignoring its cursor's
    /// `should_skip` interval) and publish whatever it returns. Shared by
    /// the force-poll admin endpoint and the periodic polling loop.
    async fn poll_adapter_once(&self, source: &str) -> Result<usize, IngressError> {
        let entry = self
            .adapters
            .get(source)
            .ok_or(IngressError::UnrecognizedTarget)?;
        let mut cursor = entry.cursor.lock().await;
        let (events, next_cursor) = entry.adapter.poll(&cursor).await?;
        let total = events.len();
        for event in events {
            let topic = lifecycle_event_topic(event.event_type);
            let organization_id = event.organization_id.clone();
            let message = OutgoingMessage {
                organization_id: Some(organization_id.clone()),
                employee_id: Some(event.employee_id.clone()),
                event_type: topic.to_string(),
                payload: crate::envelope::Payload::LifecycleEvent(event),
                ..Default::default()
            };
            self.producer
                .send_to_organization_topic(topic, &organization_id, message)
                .await?;
        }
        cursor.advance(chrono::Utc::now(), next_cursor);
        Ok(total)
    }

    /// Spawn one background polling loop per registered adapter, each
    /// respecting its own `pollInterval` (§4.2's `IDLE -> POLLING ->
    /// PUBLISHING -> IDLE` cycle), until `token` signals shutdown.
    pub fn spawn_poll_loops(self: &Arc<Self>, token: &ShutdownToken) -> Vec<tokio::task::JoinHandle<()>> {
        self.adapters
            .iter()
            .map(|entry| entry.key().clone())
            .map(|source| {
                let this = Arc::clone(self);
                let mut token = token.clone();
                tokio::spawn(async move {
                    loop {
                        let interval = {
                            let Some(entry) = this.adapters.get(&source) else { break };
                            entry.cursor.lock().await.interval
                        };
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                        if let Err(e) = this.poll_adapter_once(&source).await {
                            tracing::warn!(source = %source, error = %e, "scheduled adapter poll failed");
                        }
                    }
                })
            })
            .collect()
    }
}

fn signature_header(req: &Request<Incoming>) -> Option<String> {
    SIGNATURE_HEADERS.iter().find_map(|name| {
        req.headers()
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    })
}

async fn read_limited_body(req: Request<Incoming>) -> Result<Bytes, IngressError> {
    let limited = Limited::new(req.into_body(), MAX_BODY_BYTES);
    limited
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|_| IngressError::BodyTooLarge)
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<String> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .unwrap()
}

fn error_response(error: IngressError) -> Response<String> {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &serde_json::json!({ "success": false, "error": error.to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryMessageBroker;
    use crate::config::HrmsCredentials;

    fn producer() -> Arc<TypedProducer> {
        let broker = InMemoryMessageBroker::new();
        Arc::new(TypedProducer::new(broker, "webhook-ingress"))
    }

    fn workday_ingress() -> WebhookIngress {
        let ingress = WebhookIngress::new(([127, 0, 0, 1], 0), producer(), 100, 10);
        ingress.register_adapter(
            "workday",
            Box::new(crate::adapters::workday::WorkdayAdapter::new(HrmsCredentials {
                tenant_url: "https://example.workday.com".to_string(),
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                webhook_secret: Some("whsec".to_string()),
                organization_id: "org-1".to_string(),
            })),
            Duration::from_secs(60),
        );
        ingress.registrations.insert(
            ("org-1".to_string(), "workday".to_string()),
            WebhookRegistration {
                organization_id: "org-1".to_string(),
                source: "workday".to_string(),
                endpoint: None,
                secret_key: Some("whsec".to_string()),
                is_active: true,
                retry_policy: None,
                transformation_rules: None,
            },
        );
        ingress
    }

    fn terminate_body() -> Bytes {
        Bytes::from(
            serde_json::json!({
                "eventType": "worker.terminate",
                "worker": { "workerId": "w1", "status": "terminated" }
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn signature_rejection_returns_401_and_publishes_nothing() {
        let ingress = workday_ingress();
        let result = ingress
            .handle_webhook(
                "workday",
                "org-1",
                Some("sha256=deadbeef".to_string()),
                terminate_body(),
            )
            .await;
        assert!(matches!(result, Err(IngressError::SignatureInvalid)));
    }

    #[tokio::test]
    async fn missing_secret_registration_skips_signature_check() {
        let ingress = WebhookIngress::new(([127, 0, 0, 1], 0), producer(), 100, 10);
        ingress.register_adapter(
            "workday",
            Box::new(crate::adapters::workday::WorkdayAdapter::new(HrmsCredentials {
                tenant_url: "https://example.workday.com".to_string(),
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                webhook_secret: None,
                organization_id: "org-1".to_string(),
            })),
            Duration::from_secs(60),
        );
        let response = ingress
            .handle_webhook("workday", "org-1", None, terminate_body())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn register_then_unregister_round_trips() {
        let ingress = WebhookIngress::new(([127, 0, 0, 1], 0), producer(), 100, 10);
        let body = Bytes::from(
            serde_json::json!({
                "organizationId": "org-1",
                "source": "workday",
                "endpoint": null,
                "secretKey": "whsec",
                "isActive": true
            })
            .to_string(),
        );
        ingress.handle_register(body).unwrap();
        assert!(ingress
            .registrations
            .contains_key(&("org-1".to_string(), "workday".to_string())));

        ingress.handle_unregister("org-1", "workday");
        assert!(!ingress
            .registrations
            .contains_key(&("org-1".to_string(), "workday".to_string())));
    }

    #[test]
    fn error_response_maps_signature_invalid_to_401() {
        let response = error_response(IngressError::SignatureInvalid);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
