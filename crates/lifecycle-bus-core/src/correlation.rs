//! Correlation and trace propagation (§4.6).
//!
//! Exposed as an injected `Arc<CorrelationStore>` rather than a global
//! singleton (§9), backed by a concurrent map keyed by `correlationId`. A
//! background pruning task calls [`CorrelationStore::cleanup`] on an
//! interval so the store doesn't grow unbounded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A causal context: a correlation id, its optional parent, and the trace
/// it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationContext {
    pub correlation_id: String,
    pub parent_id: Option<String>,
    pub trace_id: String,
    pub span_id: String,
    pub organization_id: Option<String>,
    pub employee_id: Option<String>,
    pub workflow_id: Option<String>,
    pub events: Vec<TraceEvent>,
}

/// Options for creating a new or child [`CorrelationContext`].
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub parent_id: Option<String>,
    pub organization_id: Option<String>,
    pub employee_id: Option<String>,
    pub workflow_id: Option<String>,
}

/// One recorded lifecycle event within a correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub operation: String,
    pub status: TraceStatus,
    pub duration: Option<Duration>,
    pub metadata: serde_json::Value,
}

/// The lifecycle status of a [`TraceEvent`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Started,
    Completed,
    Failed,
}

/// Process-wide, dependency-injected correlation/trace store.
pub struct CorrelationStore {
    contexts: DashMap<String, CorrelationContext>,
    span_counter: AtomicU64,
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
            span_counter: AtomicU64::new(0),
        }
    }

    fn next_span_id(&self) -> String {
        let n = self.span_counter.fetch_add(1, Ordering::Relaxed);
        format!("span-{n:016x}")
    }

    /// Create a fresh context. `trace_id` is inherited from `opts.parent_id`
    /// if that parent exists, else a new trace is started.
    pub fn create_context(&self, opts: ContextOptions) -> CorrelationContext {
        let trace_id = opts
            .parent_id
            .as_ref()
            .and_then(|parent_id| self.contexts.get(parent_id).map(|c| c.trace_id.clone()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let context = CorrelationContext {
            correlation_id: Uuid::new_v4().to_string(),
            parent_id: opts.parent_id,
            trace_id,
            span_id: self.next_span_id(),
            organization_id: opts.organization_id,
            employee_id: opts.employee_id,
            workflow_id: opts.workflow_id,
            events: Vec::new(),
        };
        self.contexts
            .insert(context.correlation_id.clone(), context.clone());
        context
    }

    /// Create a context inheriting tenant/employee/workflow scoping from
    /// its parent unless overridden.
    pub fn create_child_context(
        &self,
        parent_correlation_id: &str,
        mut opts: ContextOptions,
    ) -> Option<CorrelationContext> {
        let parent = self.contexts.get(parent_correlation_id)?;
        opts.parent_id = Some(parent_correlation_id.to_string());
        opts.organization_id = opts.organization_id.or_else(|| parent.organization_id.clone());
        opts.employee_id = opts.employee_id.or_else(|| parent.employee_id.clone());
        opts.workflow_id = opts.workflow_id.or_else(|| parent.workflow_id.clone());
        drop(parent);
        Some(self.create_context(opts))
    }

    /// Append a [`TraceEvent`]; for `completed`/`failed`, backfills
    /// `duration` against the most recent matching `started` event on the
    /// same `(service, operation)`.
    pub fn record_event(
        &self,
        correlation_id: &str,
        service: impl Into<String>,
        operation: impl Into<String>,
        status: TraceStatus,
        metadata: serde_json::Value,
    ) {
        let service = service.into();
        let operation = operation.into();
        let now = Utc::now();

        if let Some(mut context) = self.contexts.get_mut(correlation_id) {
            let duration = if matches!(status, TraceStatus::Completed | TraceStatus::Failed) {
                context
                    .events
                    .iter()
                    .rev()
                    .find(|e| {
                        e.service == service
                            && e.operation == operation
                            && e.status == TraceStatus::Started
                    })
                    .map(|started| (now - started.timestamp).to_std().unwrap_or_default())
            } else {
                None
            };

            context.events.push(TraceEvent {
                timestamp: now,
                service,
                operation,
                status,
                duration,
                metadata,
            });
        }
    }

    /// The context, its events, and all direct children (one hop).
    pub fn get_full_trace(&self, correlation_id: &str) -> Option<FullTrace> {
        let context = self.contexts.get(correlation_id)?.clone();
        let children: Vec<CorrelationContext> = self
            .contexts
            .iter()
            .filter(|entry| entry.parent_id.as_deref() == Some(correlation_id))
            .map(|entry| entry.clone())
            .collect();
        Some(FullTrace { context, children })
    }

    /// OpenTelemetry-shaped spans for a correlation: one per context in its
    /// tree, parent-linked via `span_id`, timestamps from first/last event.
    pub fn export_trace(&self, correlation_id: &str) -> Option<Vec<ExportedSpan>> {
        let trace = self.get_full_trace(correlation_id)?;
        let mut spans = vec![self.exported_span(&trace.context)];
        spans.extend(trace.children.iter().map(|child| self.exported_span(child)));
        Some(spans)
    }

    /// Build the exported span for `context`, resolving `parent_span_id`
    /// from the parent context's current `span_id` when one exists.
    fn exported_span(&self, context: &CorrelationContext) -> ExportedSpan {
        let parent_span_id = context
            .parent_id
            .as_ref()
            .and_then(|parent_id| self.contexts.get(parent_id))
            .map(|parent| parent.span_id.clone());

        ExportedSpan {
            trace_id: context.trace_id.clone(),
            span_id: context.span_id.clone(),
            parent_span_id,
            start: context.events.first().map(|e| e.timestamp),
            end: context.events.last().map(|e| e.timestamp),
        }
    }

    /// Prune contexts whose latest event is older than `max_age` (default
    /// 24h). Contexts with no events are pruned by their absence of recent
    /// activity as well.
    pub fn cleanup(&self, max_age: Duration) {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        self.contexts.retain(|_, context| {
            context
                .events
                .last()
                .map(|e| e.timestamp > cutoff)
                .unwrap_or(false)
        });
    }

    /// Spawn a background task that calls [`Self::cleanup`] on `interval`.
    pub fn spawn_pruner(
        store: std::sync::Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.cleanup(max_age);
            }
        })
    }
}

/// The result of [`CorrelationStore::get_full_trace`].
#[derive(Debug, Clone)]
pub struct FullTrace {
    pub context: CorrelationContext,
    pub children: Vec<CorrelationContext>,
}

/// One OpenTelemetry-shaped span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedSpan {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_context_generates_new_trace() {
        let store = CorrelationStore::new();
        let a = store.create_context(ContextOptions::default());
        assert!(a.parent_id.is_none());
    }

    #[test]
    fn child_context_inherits_trace_id() {
        let store = CorrelationStore::new();
        let a = store.create_context(ContextOptions::default());
        let b = store
            .create_child_context(&a.correlation_id, ContextOptions::default())
            .unwrap();
        assert_eq!(b.trace_id, a.trace_id);
        assert_eq!(b.parent_id.as_deref(), Some(a.correlation_id.as_str()));
        assert_ne!(b.span_id, a.span_id);
    }

    #[test]
    fn record_event_computes_duration() {
        let store = CorrelationStore::new();
        let ctx = store.create_context(ContextOptions::default());
        store.record_event(
            &ctx.correlation_id,
            "producer",
            "send",
            TraceStatus::Started,
            serde_json::json!({}),
        );
        store.record_event(
            &ctx.correlation_id,
            "producer",
            "send",
            TraceStatus::Completed,
            serde_json::json!({}),
        );
        let trace = store.get_full_trace(&ctx.correlation_id).unwrap();
        let completed = trace
            .context
            .events
            .iter()
            .find(|e| e.status == TraceStatus::Completed)
            .unwrap();
        assert!(completed.duration.is_some());
    }

    #[test]
    fn cleanup_prunes_stale_contexts() {
        let store = CorrelationStore::new();
        let ctx = store.create_context(ContextOptions::default());
        store.record_event(
            &ctx.correlation_id,
            "svc",
            "op",
            TraceStatus::Started,
            serde_json::json!({}),
        );
        store.cleanup(Duration::from_secs(0));
        assert!(store.get_full_trace(&ctx.correlation_id).is_none());
    }

    #[test]
    fn get_full_trace_includes_direct_children() {
        let store = CorrelationStore::new();
        let a = store.create_context(ContextOptions::default());
        let _b = store
            .create_child_context(&a.correlation_id, ContextOptions::default())
            .unwrap();
        let trace = store.get_full_trace(&a.correlation_id).unwrap();
        assert_eq!(trace.children.len(), 1);
    }

    #[test]
    fn exported_child_span_links_to_parent_span_id() {
        let store = CorrelationStore::new();
        let a = store.create_context(ContextOptions::default());
        let b = store
            .create_child_context(&a.correlation_id, ContextOptions::default())
            .unwrap();
        let spans = store.export_trace(&a.correlation_id).unwrap();

        let root_span = spans.iter().find(|s| s.span_id == a.span_id).unwrap();
        assert!(root_span.parent_span_id.is_none());

        let child_span = spans.iter().find(|s| s.span_id == b.span_id).unwrap();
        assert_eq!(child_span.parent_span_id.as_deref(), Some(a.span_id.as_str()));
    }
}
