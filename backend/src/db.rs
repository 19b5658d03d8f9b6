//! Typed, transactional access to cluster state.
//!
//! Mutations run inside explicit transactions that also append the matching
//! event to the outbox, so a committed state change and its event are
//! inseparable. Publishing happens after commit (see `service` and `outbox`).
//!
//! Driver errors are translated at this boundary: unique violations become
//! `Conflict`, zero-rows-where-one-expected becomes `NotFound`, everything
//! else is `Internal`.

use anyhow::Context;
use bytes::Bytes;
use deadpool_postgres::Pool;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Row, Transaction};
use uuid::Uuid;

use bosun_common::now_ms;

use crate::error::{Error, Result};
use crate::models::{
    Cluster, ClusterListItem, ClusterStatus, DueCluster, HealthView, ListClustersRequest,
    ListClustersResponse, OutboxRecord,
};

/// Schedule assigned to a freshly created cluster: first look in one minute.
pub const DEFAULT_RECONCILE_INTERVAL_MS: i64 = 60_000;

const CLUSTER_COLUMNS: &str = "id, name, owner, target_project, generation, resource_version, \
     spec, status, created_at, updated_at, deleted_at";

/// Initialize the database schema, creating tables if they don't exist.
pub async fn init_schema(pool: &Pool) -> anyhow::Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                owner TEXT NOT NULL,
                target_project TEXT NOT NULL DEFAULT '',
                generation BIGINT NOT NULL DEFAULT 1,
                resource_version TEXT NOT NULL,
                spec JSONB NOT NULL,
                status JSONB,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                deleted_at BIGINT
            )
            "#,
            &[],
        )
        .await
        .context("failed to create clusters table")?;

    // Name uniqueness only applies among live rows; a soft-deleted cluster
    // frees its name for reuse.
    client
        .execute(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_clusters_live_name_owner
            ON clusters (name, owner) WHERE deleted_at IS NULL
            "#,
            &[],
        )
        .await
        .context("failed to create name/owner index")?;

    client
        .execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_clusters_owner ON clusters (owner)
            "#,
            &[],
        )
        .await
        .context("failed to create owner index")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS controller_statuses (
                cluster_id UUID NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
                controller_name TEXT NOT NULL,
                observed_generation BIGINT NOT NULL,
                conditions JSONB NOT NULL DEFAULT '[]',
                metadata JSONB,
                updated_at BIGINT NOT NULL,
                PRIMARY KEY (cluster_id, controller_name)
            )
            "#,
            &[],
        )
        .await
        .context("failed to create controller_statuses table")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS reconciliation_schedules (
                cluster_id UUID PRIMARY KEY REFERENCES clusters(id) ON DELETE CASCADE,
                last_reconciled_at BIGINT,
                next_reconcile_at BIGINT,
                reconcile_interval_ms BIGINT NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
            &[],
        )
        .await
        .context("failed to create reconciliation_schedules table")?;

    client
        .execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_schedules_next
            ON reconciliation_schedules (next_reconcile_at) WHERE enabled
            "#,
            &[],
        )
        .await
        .context("failed to create schedule index")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                id BIGSERIAL PRIMARY KEY,
                topic TEXT NOT NULL,
                payload BYTEA NOT NULL,
                cluster_id UUID,
                created_at BIGINT NOT NULL,
                published_at BIGINT
            )
            "#,
            &[],
        )
        .await
        .context("failed to create outbox table")?;

    client
        .execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_unpublished
            ON outbox (id) WHERE published_at IS NULL
            "#,
            &[],
        )
        .await
        .context("failed to create outbox index")?;

    tracing::info!("database schema initialized");
    Ok(())
}

fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

fn row_to_cluster(row: &Row) -> Result<Cluster> {
    let status: Option<serde_json::Value> = row.get("status");
    let status: Option<ClusterStatus> = match status {
        Some(v) => {
            Some(serde_json::from_value(v).context("malformed status column")?)
        }
        None => None,
    };
    Ok(Cluster {
        id: row.get("id"),
        name: row.get("name"),
        owner: row.get("owner"),
        target_project: row.get("target_project"),
        generation: row.get("generation"),
        resource_version: row.get("resource_version"),
        spec: row.get("spec"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    })
}

pub(crate) async fn insert_outbox(
    tx: &Transaction<'_>,
    topic: &str,
    payload: &[u8],
    cluster_id: Option<Uuid>,
) -> Result<i64> {
    let row = tx
        .query_one(
            r#"
            INSERT INTO outbox (topic, payload, cluster_id, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
            &[&topic, &payload, &cluster_id, &now_ms()],
        )
        .await
        .context("failed to append outbox record")?;
    Ok(row.get("id"))
}

/// Insert a cluster, its default schedule row, and the creation event in one
/// transaction. A live `(name, owner)` collision is a `Conflict`.
pub async fn create_cluster(
    pool: &Pool,
    cluster: &Cluster,
    event_topic: &str,
    event_payload: &Bytes,
) -> Result<i64> {
    let mut client = pool.get().await.context("failed to get db connection")?;
    let tx = client
        .transaction()
        .await
        .context("failed to start transaction")?;

    let status = cluster
        .status
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .context("failed to serialize status")?;

    let inserted = tx
        .execute(
            r#"
            INSERT INTO clusters
                (id, name, owner, target_project, generation, resource_version,
                 spec, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
            &[
                &cluster.id,
                &cluster.name,
                &cluster.owner,
                &cluster.target_project,
                &cluster.generation,
                &cluster.resource_version,
                &cluster.spec,
                &status,
                &cluster.created_at,
                &cluster.updated_at,
            ],
        )
        .await;
    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            return Err(Error::conflict(format!(
                "cluster {} already exists",
                cluster.name
            )));
        }
        return Err(anyhow::Error::new(e)
            .context("failed to insert cluster")
            .into());
    }

    tx.execute(
        r#"
        INSERT INTO reconciliation_schedules
            (cluster_id, next_reconcile_at, reconcile_interval_ms, enabled)
        VALUES ($1, $2, $3, TRUE)
        "#,
        &[
            &cluster.id,
            &(cluster.created_at + DEFAULT_RECONCILE_INTERVAL_MS),
            &DEFAULT_RECONCILE_INTERVAL_MS,
        ],
    )
    .await
    .context("failed to insert schedule row")?;

    let outbox_id = insert_outbox(&tx, event_topic, event_payload, Some(cluster.id)).await?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(outbox_id)
}

/// Get a live cluster by ID, scoped to its owner. A wrong owner is
/// indistinguishable from a missing row.
pub async fn get_cluster(pool: &Pool, id: Uuid, owner: &str) -> Result<Cluster> {
    let client = pool.get().await.context("failed to get db connection")?;

    let row = client
        .query_opt(
            &format!(
                "SELECT {CLUSTER_COLUMNS} FROM clusters \
                 WHERE id = $1 AND owner = $2 AND deleted_at IS NULL"
            ),
            &[&id, &owner],
        )
        .await
        .context("failed to query cluster")?;

    match row {
        Some(r) => row_to_cluster(&r),
        None => Err(Error::not_found(format!("cluster {} not found", id))),
    }
}

/// Get a live cluster by name, scoped to its owner.
pub async fn get_cluster_by_name(pool: &Pool, name: &str, owner: &str) -> Result<Cluster> {
    let client = pool.get().await.context("failed to get db connection")?;

    let row = client
        .query_opt(
            &format!(
                "SELECT {CLUSTER_COLUMNS} FROM clusters \
                 WHERE name = $1 AND owner = $2 AND deleted_at IS NULL"
            ),
            &[&name, &owner],
        )
        .await
        .context("failed to query cluster by name")?;

    match row {
        Some(r) => row_to_cluster(&r),
        None => Err(Error::not_found(format!("cluster {} not found", name))),
    }
}

/// List an owner's live clusters with pagination and optional filters.
/// Uses a window function for efficient full count retrieval.
pub async fn list_clusters(
    pool: &Pool,
    owner: &str,
    req: &ListClustersRequest,
) -> Result<ListClustersResponse> {
    let client = pool.get().await.context("failed to get db connection")?;

    let mut conditions = vec![
        "owner = $1".to_string(),
        "deleted_at IS NULL".to_string(),
    ];
    let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&owner];
    let mut param_idx = 2;

    if let Some(ref platform) = req.platform {
        conditions.push(format!("spec #>> '{{platform,type}}' = ${}", param_idx));
        params.push(platform);
        param_idx += 1;
    }
    if let Some(ref status) = req.status {
        conditions.push(format!("status ->> 'phase' = ${}", param_idx));
        params.push(status);
        param_idx += 1;
    }

    let query = format!(
        r#"
        SELECT
            id,
            name,
            target_project,
            generation,
            status ->> 'phase' AS phase,
            created_at,
            updated_at,
            COUNT(*) OVER() AS full_count
        FROM clusters
        WHERE {}
        ORDER BY name ASC, id ASC
        LIMIT ${} OFFSET ${}
        "#,
        conditions.join(" AND "),
        param_idx,
        param_idx + 1,
    );
    params.push(&req.limit);
    params.push(&req.offset);

    let rows = client
        .query(&query, &params)
        .await
        .context("failed to list clusters")?;

    let total: i64 = rows.first().map(|r| r.get("full_count")).unwrap_or(0);

    let items: Vec<ClusterListItem> = rows
        .iter()
        .map(|r| ClusterListItem {
            id: r.get("id"),
            name: r.get("name"),
            target_project: r.get("target_project"),
            generation: r.get("generation"),
            phase: r.get("phase"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        })
        .collect();

    Ok(ListClustersResponse {
        offset: req.offset,
        limit: req.limit,
        total,
        items,
    })
}

/// Count an owner's live clusters.
#[allow(dead_code)]
pub async fn count_clusters(pool: &Pool, owner: &str) -> Result<i64> {
    let client = pool.get().await.context("failed to get db connection")?;

    let row = client
        .query_one(
            "SELECT COUNT(*) AS n FROM clusters WHERE owner = $1 AND deleted_at IS NULL",
            &[&owner],
        )
        .await
        .context("failed to count clusters")?;

    Ok(row.get("n"))
}

/// Replace a cluster's spec: generation increments, resource_version rotates,
/// and the matching event lands in the outbox under the same commit.
///
/// `build_event` sees the post-update row and returns the `(topic, payload)`
/// to append.
pub async fn update_cluster<F>(
    pool: &Pool,
    id: Uuid,
    owner: &str,
    spec: &serde_json::Value,
    build_event: F,
) -> Result<(Cluster, i64, Bytes)>
where
    F: FnOnce(&Cluster) -> anyhow::Result<(String, Bytes)>,
{
    let mut client = pool.get().await.context("failed to get db connection")?;
    let tx = client
        .transaction()
        .await
        .context("failed to start transaction")?;

    let current = tx
        .query_opt(
            "SELECT id FROM clusters \
             WHERE id = $1 AND owner = $2 AND deleted_at IS NULL FOR UPDATE",
            &[&id, &owner],
        )
        .await
        .context("failed to lock cluster row")?;
    if current.is_none() {
        return Err(Error::not_found(format!("cluster {} not found", id)));
    }

    let resource_version = Uuid::new_v4().to_string();
    let row = tx
        .query_one(
            &format!(
                "UPDATE clusters \
                 SET spec = $3, generation = generation + 1, resource_version = $4, \
                     updated_at = $5 \
                 WHERE id = $1 AND owner = $2 \
                 RETURNING {CLUSTER_COLUMNS}"
            ),
            &[&id, &owner, &spec, &resource_version, &now_ms()],
        )
        .await
        .context("failed to update cluster")?;
    let cluster = row_to_cluster(&row)?;

    let (topic, payload) = build_event(&cluster).context("failed to build event")?;
    let outbox_id = insert_outbox(&tx, &topic, &payload, Some(cluster.id)).await?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok((cluster, outbox_id, payload))
}

/// Soft-delete a cluster. Idempotent: deleting an already-deleted cluster is
/// a no-op and emits nothing. Returns `None` in that case.
pub async fn soft_delete_cluster<F>(
    pool: &Pool,
    id: Uuid,
    owner: &str,
    build_event: F,
) -> Result<Option<(Cluster, i64, Bytes)>>
where
    F: FnOnce(&Cluster) -> anyhow::Result<(String, Bytes)>,
{
    let mut client = pool.get().await.context("failed to get db connection")?;
    let tx = client
        .transaction()
        .await
        .context("failed to start transaction")?;

    let current = tx
        .query_opt(
            "SELECT deleted_at FROM clusters \
             WHERE id = $1 AND owner = $2 FOR UPDATE",
            &[&id, &owner],
        )
        .await
        .context("failed to lock cluster row")?;
    let Some(current) = current else {
        return Err(Error::not_found(format!("cluster {} not found", id)));
    };
    let deleted_at: Option<i64> = current.get("deleted_at");
    if deleted_at.is_some() {
        return Ok(None);
    }

    let now = now_ms();
    let row = tx
        .query_one(
            &format!(
                "UPDATE clusters \
                 SET deleted_at = $3, updated_at = $3, resource_version = $4 \
                 WHERE id = $1 AND owner = $2 \
                 RETURNING {CLUSTER_COLUMNS}"
            ),
            &[&id, &owner, &now, &Uuid::new_v4().to_string()],
        )
        .await
        .context("failed to soft-delete cluster")?;
    let cluster = row_to_cluster(&row)?;

    tx.execute(
        "UPDATE reconciliation_schedules SET enabled = FALSE WHERE cluster_id = $1",
        &[&id],
    )
    .await
    .context("failed to disable schedule")?;

    let (topic, payload) = build_event(&cluster).context("failed to build event")?;
    let outbox_id = insert_outbox(&tx, &topic, &payload, Some(cluster.id)).await?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(Some((cluster, outbox_id, payload)))
}

/// Select up to `limit` clusters due for reconciliation: schedule elapsed,
/// or no controller has caught up with the current generation yet. Clusters
/// needing attention come first, then the longest-overdue.
pub async fn find_due(pool: &Pool, now: i64, limit: i64) -> Result<Vec<DueCluster>> {
    let client = pool.get().await.context("failed to get db connection")?;

    let rows = client
        .query(
            r#"
            SELECT
                c.id,
                c.generation,
                (c.generation > COALESCE(MAX(s.observed_generation), 0)) AS needs_attention
            FROM clusters c
            JOIN reconciliation_schedules r ON r.cluster_id = c.id
            LEFT JOIN controller_statuses s ON s.cluster_id = c.id
            WHERE c.deleted_at IS NULL AND r.enabled
            GROUP BY c.id, c.generation, r.next_reconcile_at
            HAVING COALESCE(r.next_reconcile_at <= $1, TRUE)
                OR c.generation > COALESCE(MAX(s.observed_generation), 0)
            ORDER BY needs_attention DESC, r.next_reconcile_at ASC NULLS FIRST
            LIMIT $2
            "#,
            &[&now, &limit],
        )
        .await
        .context("failed to query due clusters")?;

    Ok(rows
        .iter()
        .map(|r| DueCluster {
            cluster_id: r.get("id"),
            generation: r.get("generation"),
            needs_attention: r.get("needs_attention"),
        })
        .collect())
}

/// Advance a cluster's schedule after a successful dispatch.
pub async fn update_schedule(pool: &Pool, cluster_id: Uuid, interval: Duration) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;

    let now = now_ms();
    let interval_ms = interval.as_millis() as i64;
    client
        .execute(
            r#"
            UPDATE reconciliation_schedules
            SET last_reconciled_at = $2,
                next_reconcile_at = $2 + $3,
                reconcile_interval_ms = $3
            WHERE cluster_id = $1
            "#,
            &[&cluster_id, &now, &interval_ms],
        )
        .await
        .context("failed to update schedule")?;
    Ok(())
}

/// Read-only projection for the health evaluator.
pub async fn health_view(pool: &Pool, cluster_id: Uuid) -> Result<HealthView> {
    let client = pool.get().await.context("failed to get db connection")?;

    let row = client
        .query_opt(
            r#"
            SELECT
                c.created_at,
                c.generation,
                c.status ->> 'phase' AS phase,
                MAX(s.observed_generation) AS max_observed_generation
            FROM clusters c
            LEFT JOIN controller_statuses s ON s.cluster_id = c.id
            WHERE c.id = $1 AND c.deleted_at IS NULL
            GROUP BY c.id
            "#,
            &[&cluster_id],
        )
        .await
        .context("failed to query health view")?;

    match row {
        Some(r) => Ok(HealthView {
            created_at: r.get("created_at"),
            generation: r.get("generation"),
            phase: r.get("phase"),
            max_observed_generation: r.get("max_observed_generation"),
        }),
        None => Err(Error::not_found(format!(
            "cluster {} not found",
            cluster_id
        ))),
    }
}

/// Fetch unpublished outbox rows in insertion order.
pub async fn drain_outbox(pool: &Pool, limit: i64) -> Result<Vec<OutboxRecord>> {
    let client = pool.get().await.context("failed to get db connection")?;

    let rows = client
        .query(
            r#"
            SELECT id, topic, payload, cluster_id, created_at
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
            &[&limit],
        )
        .await
        .context("failed to drain outbox")?;

    Ok(rows
        .iter()
        .map(|r| OutboxRecord {
            id: r.get("id"),
            topic: r.get("topic"),
            payload: r.get("payload"),
            cluster_id: r.get("cluster_id"),
            created_at: r.get("created_at"),
        })
        .collect())
}

/// Remove outbox rows whose events the broker has acknowledged. Published
/// rows have no further use, so marking is deletion.
pub async fn mark_published(pool: &Pool, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let client = pool.get().await.context("failed to get db connection")?;

    let ids: Vec<i64> = ids.to_vec();
    client
        .execute("DELETE FROM outbox WHERE id = ANY($1)", &[&ids])
        .await
        .context("failed to mark outbox records published")?;
    Ok(())
}
