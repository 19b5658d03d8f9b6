//! Wire events exchanged over the bus.
//!
//! Every message is a `ClusterEvent` envelope with a tagged payload; nothing
//! crosses the bus as a bare JSON map.

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Cluster, StatusReport};

pub mod subjects {
    /// Mutation fan-out to controllers and internal subscribers.
    pub const CLUSTER_EVENTS: &str = "bosun.clusters.events";

    /// Controller → backend status reports.
    pub const STATUS_UPDATES: &str = "bosun.clusters.status";

    /// Backend → controller reconcile requests.
    pub const RECONCILE: &str = "bosun.clusters.reconcile";

    pub fn all() -> Vec<String> {
        vec![
            CLUSTER_EVENTS.to_string(),
            STATUS_UPDATES.to_string(),
            RECONCILE.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    ClusterCreated,
    ClusterUpdated,
    ClusterDeleted,
    StatusUpdate,
    ReconcileRequested,
}

/// Tagged event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Cluster { cluster: Cluster },
    Status { report: StatusReport },
    Reconcile { cluster_id: Uuid, generation: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub id: Uuid,
    pub cluster_id: Uuid,
    #[serde(default)]
    pub controller_name: Option<String>,
    pub event_type: EventType,
    pub event_data: EventPayload,
    /// Unix epoch timestamp in milliseconds.
    pub published_at: i64,
}

impl ClusterEvent {
    fn envelope(cluster_id: Uuid, event_type: EventType, event_data: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster_id,
            controller_name: None,
            event_type,
            event_data,
            published_at: bosun_common::now_ms(),
        }
    }

    pub fn created(cluster: Cluster) -> Self {
        Self::envelope(
            cluster.id,
            EventType::ClusterCreated,
            EventPayload::Cluster { cluster },
        )
    }

    pub fn updated(cluster: Cluster) -> Self {
        Self::envelope(
            cluster.id,
            EventType::ClusterUpdated,
            EventPayload::Cluster { cluster },
        )
    }

    pub fn deleted(cluster: Cluster) -> Self {
        Self::envelope(
            cluster.id,
            EventType::ClusterDeleted,
            EventPayload::Cluster { cluster },
        )
    }

    pub fn status_update(report: StatusReport) -> Self {
        let mut event = Self::envelope(
            report.cluster_id,
            EventType::StatusUpdate,
            EventPayload::Status {
                report: report.clone(),
            },
        );
        event.controller_name = Some(report.controller_name);
        event
    }

    pub fn reconcile_requested(cluster_id: Uuid, generation: i64) -> Self {
        Self::envelope(
            cluster_id,
            EventType::ReconcileRequested,
            EventPayload::Reconcile {
                cluster_id,
                generation,
            },
        )
    }

    pub fn encode(&self) -> Result<Bytes> {
        let bytes = serde_json::to_vec(self).context("failed to serialize event")?;
        Ok(bytes.into())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("failed to deserialize event")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::phase;

    fn sample_cluster() -> Cluster {
        Cluster {
            id: Uuid::new_v4(),
            name: "c1".into(),
            owner: "u@x.dev".into(),
            target_project: "proj-1".into(),
            generation: 1,
            resource_version: Uuid::new_v4().to_string(),
            spec: serde_json::json!({"platform": {"type": "gcp"}}),
            status: Some(crate::models::ClusterStatus {
                phase: phase::PENDING.into(),
                conditions: vec![],
            }),
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
            deleted_at: None,
        }
    }

    #[test]
    fn envelope_round_trips() {
        let cluster = sample_cluster();
        let event = ClusterEvent::updated(cluster.clone());
        let decoded = ClusterEvent::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded.event_type, EventType::ClusterUpdated);
        assert_eq!(decoded.cluster_id, cluster.id);
        match decoded.event_data {
            EventPayload::Cluster { cluster: c } => {
                assert_eq!(c.generation, 1);
                assert_eq!(c.spec["platform"]["type"], "gcp");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn status_event_carries_controller_identity() {
        let report = StatusReport {
            cluster_id: Uuid::new_v4(),
            controller_name: "capi".into(),
            observed_generation: 3,
            conditions: vec![],
            metadata: None,
        };
        let event = ClusterEvent::status_update(report);
        assert_eq!(event.controller_name.as_deref(), Some("capi"));
        assert_eq!(event.event_type, EventType::StatusUpdate);
    }

    #[test]
    fn reconcile_payload_is_tagged() {
        let id = Uuid::new_v4();
        let event = ClusterEvent::reconcile_requested(id, 7);
        let json: serde_json::Value =
            serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(json["event_data"]["kind"], "reconcile");
        assert_eq!(json["event_data"]["generation"], 7);
    }
}
