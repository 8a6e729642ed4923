//! Static bus topology: the authoritative topic and consumer-group registry.

use std::time::Duration;

/// Compression codec used for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Snappy,
    Gzip,
}

/// Static configuration for one topic.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    pub name: &'static str,
    pub partitions: u32,
    pub replication_factor: u32,
    pub retention: Duration,
    pub compression: Compression,
    pub min_insync_replicas: u32,
}

const DAY: u64 = 24 * 60 * 60;

/// The authoritative static topic registry (§6).
pub fn registry() -> Vec<TopicConfig> {
    let snappy = Compression::Snappy;
    let gzip = Compression::Gzip;
    vec![
        topic("employee.onboard", 12, 7 * DAY, snappy),
        topic("employee.exit", 12, 30 * DAY, snappy),
        topic("employee.transfer", 12, 7 * DAY, snappy),
        topic("employee.update", 12, 3 * DAY, snappy),
        topic("workflow.run.request", 24, DAY, snappy),
        topic("workflow.run.pause", 12, DAY, snappy),
        topic("workflow.run.resume", 12, DAY, snappy),
        topic("workflow.run.cancel", 12, DAY, snappy),
        topic("node.execute.request", 24, DAY, snappy),
        topic("node.execute.result", 24, 3 * DAY, snappy),
        topic("node.execute.retry", 12, DAY, snappy),
        topic("identity.provision.request", 12, DAY, snappy),
        topic("identity.provision.result", 12, 7 * DAY, snappy),
        topic("email.send.request", 12, DAY, snappy),
        topic("email.send.result", 12, 3 * DAY, snappy),
        topic("calendar.schedule.request", 12, DAY, snappy),
        topic("calendar.schedule.result", 12, 3 * DAY, snappy),
        topic("audit.events", 12, 90 * DAY, gzip),
        topic("metrics.events", 6, 7 * DAY, snappy),
    ]
}

fn topic(name: &'static str, partitions: u32, retention_secs: u64, compression: Compression) -> TopicConfig {
    TopicConfig {
        name,
        partitions,
        replication_factor: 3,
        retention: Duration::from_secs(retention_secs),
        compression,
        min_insync_replicas: 2,
    }
}

/// Configuration for a `dlq.<originalTopic>` topic. Partition count scales
/// with the DLQ fan-in (3-6 per §6); replication and retention are fixed.
pub fn dlq_topic_config(original_topic: &str, partitions: u32) -> TopicConfig {
    TopicConfig {
        name: Box::leak(format!("dlq.{original_topic}").into_boxed_str()),
        partitions: partitions.clamp(3, 6),
        replication_factor: 3,
        retention: Duration::from_secs(30 * DAY),
        compression: Compression::Gzip,
        min_insync_replicas: 2,
    }
}

/// The base topic a normalized lifecycle event publishes to, before the
/// tenant suffix is applied.
pub fn lifecycle_event_topic(event_type: crate::envelope::LifecycleEventType) -> &'static str {
    use crate::envelope::LifecycleEventType::*;
    match event_type {
        Onboard => "employee.onboard",
        Exit => "employee.exit",
        Transfer => "employee.transfer",
        Update => "employee.update",
    }
}

/// Derive the tenant-scoped topic name `{base}.{organizationId}`.
pub fn tenant_topic(base: &str, organization_id: &str) -> String {
    format!("{base}.{organization_id}")
}

/// The dead-letter topic name for a given original topic.
pub fn dlq_topic(original_topic: &str) -> String {
    format!("dlq.{original_topic}")
}

/// The authoritative consumer group names (§6), one per downstream service.
pub const CONSUMER_GROUPS: &[&str] = &[
    "workflow-engine",
    "identity-service",
    "email-service",
    "calendar-service",
    "slack-service",
    "document-service",
    "ai-service",
    "audit-service",
    "webhook-gateway",
    "scheduler-service",
    "dlq-handler",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_min_insync_replicas_two() {
        for topic in registry() {
            assert_eq!(topic.min_insync_replicas, 2);
        }
    }

    #[test]
    fn employee_exit_has_compliance_retention() {
        let topic = registry()
            .into_iter()
            .find(|t| t.name == "employee.exit")
            .unwrap();
        assert_eq!(topic.retention, Duration::from_secs(30 * DAY));
    }

    #[test]
    fn dlq_topic_name_is_prefixed() {
        assert_eq!(dlq_topic("employee.onboard"), "dlq.employee.onboard");
    }

    #[test]
    fn tenant_topic_suffix() {
        assert_eq!(
            tenant_topic("employee.onboard", "org-1"),
            "employee.onboard.org-1"
        );
    }

    #[test]
    fn lifecycle_event_topic_maps_onboard() {
        assert_eq!(
            lifecycle_event_topic(crate::envelope::LifecycleEventType::Onboard),
            "employee.onboard"
        );
    }

    #[test]
    fn dlq_partitions_clamped() {
        let cfg = dlq_topic_config("employee.onboard", 1);
        assert_eq!(cfg.partitions, 3);
        let cfg = dlq_topic_config("employee.onboard", 10);
        assert_eq!(cfg.partitions, 6);
    }
}
