//! Bus subscribers feeding the scheduling loop.
//!
//! `StatusIngestor` consumes controller reports from the status topic;
//! `MutationSignalHandler` watches the mutation fan-out and pokes the
//! reactive trigger for every committed change.
//!
//! Poison handling: a message that cannot decode is acked after logging so
//! the broker does not redeliver it forever. Transient store failures nack,
//! and the broker redelivers with backoff.

use async_trait::async_trait;

use crate::bus::{Delivery, MessageHandler, Verdict};
use crate::error::Error;
use crate::events::{ClusterEvent, EventPayload};
use crate::metrics;
use crate::reactive::ReactiveTrigger;
use crate::service::ClusterService;

pub struct StatusIngestor {
    service: ClusterService,
}

impl StatusIngestor {
    pub fn new(service: ClusterService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for StatusIngestor {
    async fn handle(&self, delivery: Delivery) -> Verdict {
        let event = match ClusterEvent::decode(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(topic = %delivery.topic, error = ?e,
                    "undecodable status message, dropping");
                metrics::status_report_rejected("decode");
                return Verdict::Ack;
            }
        };

        let report = match event.event_data {
            EventPayload::Status { report } => report,
            other => {
                tracing::warn!(topic = %delivery.topic, payload = ?other,
                    "unexpected payload on status topic, dropping");
                metrics::status_report_rejected("payload");
                return Verdict::Ack;
            }
        };

        let cluster_id = report.cluster_id;
        let controller = report.controller_name.clone();
        match self.service.record_status(report).await {
            Ok(()) => {
                tracing::debug!(%cluster_id, controller = %controller, "status report applied");
                Verdict::Ack
            }
            // Malformed or impossible reports will not get better on
            // redelivery.
            Err(Error::Validation(e)) => {
                tracing::warn!(%cluster_id, controller = %controller, reason = %e,
                    "invalid status report, dropping");
                metrics::status_report_rejected("validation");
                Verdict::Ack
            }
            Err(Error::Conflict(e)) => {
                tracing::warn!(%cluster_id, controller = %controller, reason = %e,
                    "stale status report, dropping");
                metrics::status_report_rejected("stale");
                Verdict::Ack
            }
            Err(Error::NotFound(_)) => {
                tracing::warn!(%cluster_id, controller = %controller,
                    "status report for unknown cluster, dropping");
                metrics::status_report_rejected("unknown_cluster");
                Verdict::Ack
            }
            Err(e) => {
                tracing::error!(%cluster_id, controller = %controller, error = ?e,
                    "failed to persist status report, will redeliver");
                Verdict::Nack
            }
        }
    }
}

/// Turns every committed mutation event into a reactive signal.
pub struct MutationSignalHandler {
    trigger: ReactiveTrigger,
}

impl MutationSignalHandler {
    pub fn new(trigger: ReactiveTrigger) -> Self {
        Self { trigger }
    }
}

#[async_trait]
impl MessageHandler for MutationSignalHandler {
    async fn handle(&self, delivery: Delivery) -> Verdict {
        match ClusterEvent::decode(&delivery.payload) {
            Ok(event) => self.trigger.signal(event.cluster_id),
            Err(e) => {
                tracing::warn!(topic = %delivery.topic, error = ?e,
                    "undecodable mutation event, ignoring");
            }
        }
        // Never worth redelivering; the periodic cycle covers any miss.
        Verdict::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use uuid::Uuid;

    use crate::events::subjects;
    use crate::models::{Cluster, ClusterStatus, phase};

    fn delivery(payload: Bytes) -> Delivery {
        Delivery {
            topic: subjects::CLUSTER_EVENTS.to_string(),
            payload,
            attempt: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_events_signal_the_trigger() {
        let trigger =
            ReactiveTrigger::with_settings(true, Duration::from_secs(2), 60);
        let handler = MutationSignalHandler::new(trigger.clone());

        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: "c1".into(),
            owner: "u@x.dev".into(),
            target_project: String::new(),
            generation: 2,
            resource_version: Uuid::new_v4().to_string(),
            spec: serde_json::json!({}),
            status: Some(ClusterStatus {
                phase: phase::PENDING.into(),
                conditions: vec![],
            }),
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        };
        let event = ClusterEvent::updated(cluster);
        let verdict = handler.handle(delivery(event.encode().unwrap())).await;
        assert_eq!(verdict, Verdict::Ack);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(trigger.fired_count(), 1);
    }

    #[tokio::test]
    async fn garbage_on_the_wire_is_acked_not_requeued() {
        let trigger =
            ReactiveTrigger::with_settings(true, Duration::from_secs(2), 60);
        let handler = MutationSignalHandler::new(trigger);
        let verdict = handler
            .handle(delivery(Bytes::from_static(b"not json")))
            .await;
        assert_eq!(verdict, Verdict::Ack);
    }
}
