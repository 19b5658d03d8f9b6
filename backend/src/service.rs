//! Mutation coordinator.
//!
//! Every write is a three-phase operation: transactional read-modify-write
//! with owner isolation, outbox append under the same commit, then a
//! post-commit publish. The publish is best-effort; a failure leaves the
//! row for the flusher, so delivery is at-least-once either way.

use std::sync::Arc;

use bytes::Bytes;
use deadpool_postgres::Pool;
use uuid::Uuid;

use bosun_common::now_ms;

use crate::bus::EventBus;
use crate::db;
use crate::error::{Error, Result};
use crate::events::{ClusterEvent, subjects};
use crate::metrics;
use crate::models::{
    AggregateStatusResponse, Cluster, ClusterStatus, CreateClusterRequest, ListClustersRequest,
    ListClustersResponse, StatusReport, UpdateClusterRequest, phase,
};
use crate::reactive::ReactiveTrigger;
use crate::status_db;

const MAX_NAME_LENGTH: usize = 253;
const MAX_LIST_LIMIT: i64 = 1000;

struct ServiceInner {
    pool: Pool,
    bus: Arc<dyn EventBus>,
    trigger: ReactiveTrigger,
}

#[derive(Clone)]
pub struct ClusterService {
    inner: Arc<ServiceInner>,
}

impl ClusterService {
    pub fn new(pool: Pool, bus: Arc<dyn EventBus>, trigger: ReactiveTrigger) -> Self {
        Self {
            inner: Arc::new(ServiceInner { pool, bus, trigger }),
        }
    }

    pub async fn create_cluster(&self, owner: &str, req: CreateClusterRequest) -> Result<Cluster> {
        let name = validate_name(&req.name)?;
        validate_spec(&req.spec)?;

        // Friendly conflict before the unique index gets a say; the index
        // still backs this up under races.
        match db::get_cluster_by_name(&self.inner.pool, &name, owner).await {
            Ok(_) => {
                return Err(Error::conflict(format!("cluster {} already exists", name)));
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let now = now_ms();
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name,
            owner: owner.to_string(),
            target_project: req.target_project.unwrap_or_default(),
            generation: 1,
            resource_version: Uuid::new_v4().to_string(),
            spec: req.spec,
            status: Some(ClusterStatus {
                phase: phase::PENDING.to_string(),
                conditions: vec![],
            }),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let event = ClusterEvent::created(cluster.clone());
        let payload = event.encode()?;
        let outbox_id =
            db::create_cluster(&self.inner.pool, &cluster, subjects::CLUSTER_EVENTS, &payload)
                .await?;

        metrics::cluster_created();
        tracing::info!(cluster_id = %cluster.id, name = %cluster.name, "cluster created");
        self.publish_committed(outbox_id, subjects::CLUSTER_EVENTS, payload)
            .await;
        Ok(cluster)
    }

    pub async fn get_cluster(&self, owner: &str, id: Uuid) -> Result<Cluster> {
        db::get_cluster(&self.inner.pool, id, owner).await
    }

    pub async fn list_clusters(
        &self,
        owner: &str,
        mut req: ListClustersRequest,
    ) -> Result<ListClustersResponse> {
        if req.limit <= 0 {
            return Err(Error::validation("limit must be positive"));
        }
        if req.offset < 0 {
            return Err(Error::validation("offset must be non-negative"));
        }
        req.limit = req.limit.min(MAX_LIST_LIMIT);

        let response = db::list_clusters(&self.inner.pool, owner, &req).await?;
        metrics::clusters_listed(response.items.len());
        Ok(response)
    }

    /// Replace the spec whole. Generation bumps and the update event commits
    /// atomically with the row.
    pub async fn update_cluster(
        &self,
        owner: &str,
        id: Uuid,
        req: UpdateClusterRequest,
    ) -> Result<Cluster> {
        validate_spec(&req.spec)?;

        let (cluster, outbox_id, payload) =
            db::update_cluster(&self.inner.pool, id, owner, &req.spec, |updated| {
                let event = ClusterEvent::updated(updated.clone());
                Ok((subjects::CLUSTER_EVENTS.to_string(), event.encode()?))
            })
            .await?;

        metrics::cluster_updated();
        tracing::info!(
            cluster_id = %cluster.id,
            generation = cluster.generation,
            "cluster spec updated"
        );
        self.publish_committed(outbox_id, subjects::CLUSTER_EVENTS, payload)
            .await;
        Ok(cluster)
    }

    /// Soft-delete. Running clusters refuse unless `force`; deleting an
    /// already-deleted cluster succeeds without emitting anything.
    pub async fn delete_cluster(&self, owner: &str, id: Uuid, force: bool) -> Result<()> {
        match db::get_cluster(&self.inner.pool, id, owner).await {
            Ok(cluster) => {
                if !force && !deletion_allowed(cluster.status.as_ref()) {
                    let phase = cluster
                        .status
                        .map(|s| s.phase)
                        .unwrap_or_default();
                    return Err(Error::conflict(format!(
                        "cluster {} is in phase {:?}; pass force=true to delete anyway",
                        id, phase
                    )));
                }
            }
            // Fall through: soft_delete distinguishes "already deleted"
            // (idempotent success) from "never existed".
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let deleted = db::soft_delete_cluster(&self.inner.pool, id, owner, |cluster| {
            let event = ClusterEvent::deleted(cluster.clone());
            Ok((subjects::CLUSTER_EVENTS.to_string(), event.encode()?))
        })
        .await?;

        if let Some((cluster, outbox_id, payload)) = deleted {
            metrics::cluster_deleted();
            tracing::info!(cluster_id = %cluster.id, name = %cluster.name, "cluster deleted");
            self.publish_committed(outbox_id, subjects::CLUSTER_EVENTS, payload)
                .await;
        }
        Ok(())
    }

    /// Aggregate status for one cluster, recomputed from what controllers
    /// have reported.
    pub async fn aggregate_status(&self, owner: &str, id: Uuid) -> Result<AggregateStatusResponse> {
        let cluster = db::get_cluster(&self.inner.pool, id, owner).await?;
        let controllers = status_db::list_controller_statuses(&self.inner.pool, id).await?;
        Ok(AggregateStatusResponse {
            cluster_id: id,
            generation: cluster.generation,
            status: cluster.status,
            controllers,
        })
    }

    /// Apply one controller report and poke the reactive path. Shared by the
    /// HTTP surface and the bus ingestor.
    pub async fn record_status(&self, report: StatusReport) -> Result<()> {
        if report.controller_name.trim().is_empty() {
            return Err(Error::validation("controller_name is required"));
        }
        if report.observed_generation < 0 {
            return Err(Error::validation("observed_generation must be non-negative"));
        }

        status_db::upsert_controller_status(&self.inner.pool, &report).await?;
        metrics::status_report_applied(&report.controller_name);
        self.inner.trigger.signal(report.cluster_id);
        Ok(())
    }

    /// Post-commit fast path: try to push the event out now and clear the
    /// outbox row on ack. Any failure is only logged; the flusher owns
    /// delivery from here.
    async fn publish_committed(&self, outbox_id: i64, topic: &str, payload: Bytes) {
        match self.inner.bus.publish(topic, payload).await {
            Ok(handle) => match handle.acked().await {
                Ok(()) => {
                    metrics::event_published_inline();
                    if let Err(e) = db::mark_published(&self.inner.pool, &[outbox_id]).await {
                        tracing::warn!(outbox_id, error = ?e, "failed to clear outbox row");
                    }
                }
                Err(e) => {
                    tracing::warn!(outbox_id, error = ?e, "publish not acked; flusher will retry");
                }
            },
            Err(e) => {
                tracing::warn!(outbox_id, error = ?e, "publish failed; flusher will retry");
            }
        }
    }

}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name is required"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::validation(format!(
            "name exceeds {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

fn validate_spec(spec: &serde_json::Value) -> Result<()> {
    if !spec.is_object() {
        return Err(Error::validation("spec must be a JSON object"));
    }
    Ok(())
}

/// Deletion precondition: only clusters that never ran, or already failed,
/// go quietly. Everything else needs force.
fn deletion_allowed(status: Option<&ClusterStatus>) -> bool {
    match status {
        None => true,
        Some(s) => matches!(s.phase.as_str(), "" | phase::PENDING | phase::FAILED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(phase: &str) -> ClusterStatus {
        ClusterStatus {
            phase: phase.to_string(),
            conditions: vec![],
        }
    }

    #[test]
    fn deletion_gate_allows_idle_phases() {
        assert!(deletion_allowed(None));
        assert!(deletion_allowed(Some(&status(""))));
        assert!(deletion_allowed(Some(&status(phase::PENDING))));
        assert!(deletion_allowed(Some(&status(phase::FAILED))));
    }

    #[test]
    fn deletion_gate_blocks_active_phases() {
        assert!(!deletion_allowed(Some(&status(phase::RUNNING))));
        assert!(!deletion_allowed(Some(&status(phase::ERROR))));
        assert!(!deletion_allowed(Some(&status(phase::UNKNOWN))));
    }

    #[test]
    fn name_validation_trims_and_bounds() {
        assert_eq!(validate_name("  c1  ").unwrap(), "c1");
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn spec_must_be_object() {
        assert!(validate_spec(&serde_json::json!({"platform": {"type": "gcp"}})).is_ok());
        assert!(validate_spec(&serde_json::json!([1, 2])).is_err());
        assert!(validate_spec(&serde_json::json!("nope")).is_err());
    }
}
