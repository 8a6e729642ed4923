//! Structured logging and trace-export setup.
//!
//! A fluent builder over `tracing-subscriber` (+ optional OTLP export via
//! `opentelemetry`) so the binary entrypoint has one place to wire up
//! logging instead of hand-rolling subscriber registration.
//!
//! ```rust,no_run
//! use lifecycle_bus_core::observability::Observability;
//!
//! let _guard = Observability::builder("lifecycle-bus")
//!     .service_version(env!("CARGO_PKG_VERSION"))
//!     .environment_from_env()
//!     .log_level_from_env()
//!     .build()
//!     .expect("failed to initialize logging");
//! ```

use std::env;

/// Builder for configuring logging (and, with `otel-otlp`, trace export).
pub struct ObservabilityBuilder {
    service_name: String,
    service_version: Option<String>,
    environment: Option<String>,
    otlp_endpoint: Option<String>,
    json_logging: bool,
    log_level: String,
}

impl ObservabilityBuilder {
    /// Start a builder for the given service name.
    pub fn builder(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: None,
            environment: None,
            otlp_endpoint: None,
            json_logging: false,
            log_level: "info".to_string(),
        }
    }

    /// Set the service version reported in trace resource attributes.
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Set the deployment environment explicitly.
    pub fn environment(mut self, env: impl Into<String>) -> Self {
        self.environment = Some(env.into());
        self
    }

    /// Read the deployment environment from `ENVIRONMENT` or `ENV`.
    pub fn environment_from_env(mut self) -> Self {
        self.environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("ENV"))
            .ok();
        self
    }

    /// Set the OTLP endpoint traces are exported to.
    pub fn otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Read the OTLP endpoint from `OTEL_EXPORTER_OTLP_ENDPOINT`.
    pub fn otlp_endpoint_from_env(mut self) -> Self {
        self.otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
        self
    }

    /// Emit JSON-formatted log lines instead of the human-readable format.
    pub fn json_logging(mut self) -> Self {
        self.json_logging = true;
        self
    }

    /// Set the `tracing` filter directive.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Read the filter directive from `RUST_LOG`, falling back to `info`.
    pub fn log_level_from_env(mut self) -> Self {
        if let Ok(level) = env::var("RUST_LOG") {
            self.log_level = level;
        }
        self
    }

    /// Initialize the global `tracing` subscriber (and OTLP exporter, with
    /// `otel-otlp`). The returned guard must be held for the process
    /// lifetime; dropping it flushes pending spans.
    #[cfg(feature = "otel-otlp")]
    pub fn build(self) -> Result<ObservabilityGuard, ObservabilityError> {
        use opentelemetry::trace::TracerProvider as _;
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::trace::TracerProvider;
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        use tracing_subscriber::EnvFilter;

        let mut resource_attrs = vec![opentelemetry::KeyValue::new(
            "service.name",
            self.service_name.clone(),
        )];
        if let Some(version) = &self.service_version {
            resource_attrs.push(opentelemetry::KeyValue::new(
                "service.version",
                version.clone(),
            ));
        }
        if let Some(env) = &self.environment {
            resource_attrs.push(opentelemetry::KeyValue::new(
                "deployment.environment",
                env.clone(),
            ));
        }
        let resource = opentelemetry_sdk::Resource::new(resource_attrs);

        let tracer_provider = if let Some(endpoint) = &self.otlp_endpoint {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()
                .map_err(|e| ObservabilityError::ExporterInit(e.to_string()))?;

            TracerProvider::builder()
                .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                .with_resource(resource)
                .build()
        } else {
            TracerProvider::builder().with_resource(resource).build()
        };

        let tracer = tracer_provider.tracer(self.service_name.clone());
        let env_filter =
            EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        if self.json_logging {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(telemetry_layer)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| ObservabilityError::SubscriberInit(e.to_string()))?;
        } else {
            let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(telemetry_layer)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| ObservabilityError::SubscriberInit(e.to_string()))?;
        }

        Ok(ObservabilityGuard {
            _tracer_provider: Some(tracer_provider),
        })
    }

    /// Initialize the global `tracing` subscriber without OTLP export.
    #[cfg(not(feature = "otel-otlp"))]
    pub fn build(self) -> Result<ObservabilityGuard, ObservabilityError> {
        use tracing_subscriber::EnvFilter;

        let env_filter =
            EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init()
            .map_err(|e| ObservabilityError::SubscriberInit(e.to_string()))?;

        Ok(ObservabilityGuard {})
    }
}

/// Keeps the observability stack alive; flushes spans on drop.
pub struct ObservabilityGuard {
    #[cfg(feature = "otel-otlp")]
    _tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel-otlp")]
        if let Some(provider) = self._tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("error shutting down tracer provider: {e:?}");
            }
        }
    }
}

/// Errors from observability setup.
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    /// The span exporter failed to initialize.
    #[error("failed to initialize exporter: {0}")]
    ExporterInit(String),
    /// The `tracing` subscriber failed to install globally.
    #[error("failed to initialize subscriber: {0}")]
    SubscriberInit(String),
}

/// Entry point: `Observability::builder("my-service")...`.
pub type Observability = ObservabilityBuilder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let builder = ObservabilityBuilder::builder("test-service");
        assert_eq!(builder.service_name, "test-service");
        assert_eq!(builder.log_level, "info");
        assert!(!builder.json_logging);
    }

    #[test]
    fn builder_fluent_api() {
        let builder = ObservabilityBuilder::builder("test-service")
            .service_version("1.0.0")
            .environment("production")
            .json_logging()
            .log_level("debug");

        assert_eq!(builder.service_version, Some("1.0.0".to_string()));
        assert_eq!(builder.environment, Some("production".to_string()));
        assert!(builder.json_logging);
        assert_eq!(builder.log_level, "debug");
    }
}
