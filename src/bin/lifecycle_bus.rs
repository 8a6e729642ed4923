//! Process entrypoint: wires the webhook ingress, HRMS adapters, the typed
//! producer, the DLQ handler, the correlation store, and a liveness/
//! readiness surface into one running process, then awaits shutdown.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use lifecycle_bus_core::prelude::*;

struct BrokerDependency {
    broker: Arc<dyn MessageBroker>,
}

impl lifecycle_bus_core::health::Dependency for BrokerDependency {
    fn name(&self) -> &str {
        "broker"
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = DependencyStatus> + Send + '_>> {
        Box::pin(async move {
            if self.broker.is_connected().await {
                DependencyStatus::Healthy
            } else {
                DependencyStatus::Unhealthy("broker not connected".to_string())
            }
        })
    }

    fn is_critical(&self) -> bool {
        true
    }
}

/// Poll the `dlq-handler` consumer group and triage every record that
/// arrives, until shutdown is signaled.
async fn run_dlq_loop(
    broker: Arc<dyn MessageBroker>,
    dlq_handler: Arc<DlqHandler>,
    mut token: ShutdownToken,
) {
    let topics = vec![lifecycle_bus_core::dlq::subscription_pattern()];
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            message = broker.poll("dlq-handler", &topics) => {
                match message {
                    Ok(Some(message)) => {
                        match serde_json::from_slice::<DlqMessage>(&message.payload) {
                            Ok(record) => {
                                if let Err(e) = dlq_handler.handle(record).await {
                                    tracing::error!(error = %e, "dlq triage failed");
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "failed to decode DLQ record, skipping"),
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                            _ = token.cancelled() => break,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dlq poll failed");
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

/// Run `make_task` to completion; if it panics, log and restart it with
/// exponential backoff (capped at 30s) until `token` signals shutdown (§5).
async fn supervise<F, Fut>(name: &'static str, mut token: ShutdownToken, mut make_task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut backoff = Duration::from_secs(1);
    loop {
        let mut handle = tokio::spawn(make_task());
        tokio::select! {
            result = &mut handle => {
                match result {
                    Ok(()) => break,
                    Err(e) => {
                        tracing::error!(task = name, error = %e, backoff_secs = backoff.as_secs(), "worker task panicked, restarting");
                    }
                }
            }
            _ = token.cancelled() => {
                handle.abort();
                break;
            }
        }
        if token.is_shutdown() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = token.cancelled() => break,
        }
        backoff = (backoff * 2).min(Duration::from_secs(30));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let _observability_guard = Observability::builder("lifecycle-bus")
        .service_version(env!("CARGO_PKG_VERSION"))
        .environment_from_env()
        .log_level_from_env()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to initialize observability: {e}"))?;

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    tracing::info!(
        webhook_port = config.server.webhook_port,
        health_port = config.server.health_port,
        "starting lifecycle-bus"
    );

    let shutdown = GracefulShutdown::new();

    let broker: Arc<dyn MessageBroker> = Arc::new(
        lifecycle_bus_core::broker::KafkaMessageBroker::connect(
            &config.broker.brokers,
            &config.broker.client_id,
        )
        .map_err(|e| anyhow::anyhow!("failed to connect to broker: {e}"))?,
    );

    let producer = Arc::new(TypedProducer::new(broker.clone(), "lifecycle-bus"));

    let correlation_store = Arc::new(CorrelationStore::new());
    let _pruner = CorrelationStore::spawn_pruner(
        correlation_store.clone(),
        Duration::from_secs(3600),
        Duration::from_secs(24 * 3600),
    );

    let ingress = Arc::new(WebhookIngress::new(
        ([0, 0, 0, 0], config.server.webhook_port),
        producer.clone(),
        config.rate_limit.requests_per_window,
        config.rate_limit.requests_per_window,
    ));

    for (source, credentials) in [
        ("workday", &config.adapters.workday),
        ("successfactors", &config.adapters.successfactors),
        ("bamboohr", &config.adapters.bamboohr),
    ] {
        if let Some(credentials) = credentials {
            let adapter = for_source(source, credentials.clone())
                .map_err(|e| anyhow::anyhow!("failed to build {source} adapter: {e}"))?;
            ingress.register_adapter(source, adapter, config.adapters.poll_interval);
            tracing::info!(source, "registered HRMS adapter");
        }
    }

    let dlq_handler = Arc::new(DlqHandler::new(producer.clone(), config.dlq.clone(), true));

    let health_check = lifecycle_bus_core::health::SimpleHealthCheck::new()
        .add_dependency(BrokerDependency { broker: broker.clone() });
    let health_server = HealthServer::new(health_check).port(config.server.health_port);

    let ingress_task = tokio::spawn({
        let ingress = ingress.clone();
        let supervisor_token = shutdown.token();
        let serve_token = shutdown.token();
        supervise("webhook-ingress", supervisor_token, move || {
            let ingress = ingress.clone();
            let serve_token = serve_token.clone();
            async move {
                if let Err(e) = ingress.serve(serve_token).await {
                    tracing::error!(error = %e, "webhook ingress exited");
                }
            }
        })
    });

    let mut health_shutdown_token = shutdown.token();
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server
            .serve_with_shutdown(async move {
                health_shutdown_token.cancelled().await;
            })
            .await
        {
            tracing::error!(error = %e, "health server exited");
        }
    });

    let poll_tasks = ingress.spawn_poll_loops(&shutdown.token());

    let dlq_task = tokio::spawn({
        let supervisor_token = shutdown.token();
        let loop_token = shutdown.token();
        let broker = broker.clone();
        supervise("dlq-handler", supervisor_token, move || {
            run_dlq_loop(broker.clone(), dlq_handler.clone(), loop_token.clone())
        })
    });

    let signal = shutdown.wait().await;
    tracing::info!(%signal, "shutdown signal received, draining workers");

    let _ = tokio::join!(ingress_task, health_task, dlq_task);
    for task in poll_tasks {
        let _ = task.await;
    }

    drop(producer);
    tracing::info!("lifecycle-bus stopped");
    Ok(())
}
