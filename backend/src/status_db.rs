//! Controller status persistence.
//!
//! Each upsert also recomputes the owning cluster's aggregate status and
//! rotates its resource_version, all under one commit. The batch aggregation
//! worker this replaces only ever recomputed the same derivation later.

use anyhow::Context;
use deadpool_postgres::Pool;
use uuid::Uuid;

use bosun_common::now_ms;

use crate::error::{Error, Result};
use crate::health;
use crate::models::{ControllerStatus, StatusReport};

/// Upsert one controller's report for a cluster.
///
/// Rejects reports claiming to have observed a generation the cluster has
/// not reached. Reports older than the stored one are still written; the
/// scheduler only ever compares against the max across controllers.
pub async fn upsert_controller_status(pool: &Pool, report: &StatusReport) -> Result<()> {
    let mut client = pool.get().await.context("failed to get db connection")?;
    let tx = client
        .transaction()
        .await
        .context("failed to start transaction")?;

    let row = tx
        .query_opt(
            "SELECT generation FROM clusters \
             WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
            &[&report.cluster_id],
        )
        .await
        .context("failed to lock cluster row")?;
    let Some(row) = row else {
        return Err(Error::not_found(format!(
            "cluster {} not found",
            report.cluster_id
        )));
    };
    let generation: i64 = row.get("generation");

    if report.observed_generation > generation {
        return Err(Error::conflict(format!(
            "stale report: controller {} claims generation {} but cluster is at {}",
            report.controller_name, report.observed_generation, generation
        )));
    }

    let now = now_ms();
    let conditions =
        serde_json::to_value(&report.conditions).context("failed to serialize conditions")?;
    tx.execute(
        r#"
        INSERT INTO controller_statuses
            (cluster_id, controller_name, observed_generation, conditions, metadata, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (cluster_id, controller_name) DO UPDATE
        SET observed_generation = EXCLUDED.observed_generation,
            conditions = EXCLUDED.conditions,
            metadata = EXCLUDED.metadata,
            updated_at = EXCLUDED.updated_at
        "#,
        &[
            &report.cluster_id,
            &report.controller_name,
            &report.observed_generation,
            &conditions,
            &report.metadata,
            &now,
        ],
    )
    .await
    .context("failed to upsert controller status")?;

    // Recompute the aggregate from every controller's latest report and fold
    // it back onto the cluster row. Status writes rotate resource_version but
    // never touch generation.
    let reports = controller_rows(&tx, report.cluster_id).await?;
    let aggregate = health::aggregate_status(&reports);
    let aggregate_json =
        serde_json::to_value(&aggregate).context("failed to serialize aggregate status")?;
    tx.execute(
        "UPDATE clusters SET status = $2, resource_version = $3, updated_at = $4 WHERE id = $1",
        &[
            &report.cluster_id,
            &aggregate_json,
            &Uuid::new_v4().to_string(),
            &now,
        ],
    )
    .await
    .context("failed to update aggregate status")?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(())
}

async fn controller_rows(
    tx: &tokio_postgres::Transaction<'_>,
    cluster_id: Uuid,
) -> Result<Vec<ControllerStatus>> {
    let rows = tx
        .query(
            r#"
            SELECT cluster_id, controller_name, observed_generation, conditions, metadata, updated_at
            FROM controller_statuses
            WHERE cluster_id = $1
            ORDER BY controller_name ASC
            "#,
            &[&cluster_id],
        )
        .await
        .context("failed to query controller statuses")?;

    rows.iter().map(row_to_status).collect()
}

fn row_to_status(row: &tokio_postgres::Row) -> Result<ControllerStatus> {
    let conditions: serde_json::Value = row.get("conditions");
    let conditions =
        serde_json::from_value(conditions).context("malformed conditions column")?;
    Ok(ControllerStatus {
        cluster_id: row.get("cluster_id"),
        controller_name: row.get("controller_name"),
        observed_generation: row.get("observed_generation"),
        conditions,
        metadata: row.get("metadata"),
        updated_at: row.get("updated_at"),
    })
}

/// List every controller's latest report for a cluster.
pub async fn list_controller_statuses(
    pool: &Pool,
    cluster_id: Uuid,
) -> Result<Vec<ControllerStatus>> {
    let client = pool.get().await.context("failed to get db connection")?;

    let rows = client
        .query(
            r#"
            SELECT cluster_id, controller_name, observed_generation, conditions, metadata, updated_at
            FROM controller_statuses
            WHERE cluster_id = $1
            ORDER BY controller_name ASC
            "#,
            &[&cluster_id],
        )
        .await
        .context("failed to list controller statuses")?;

    rows.iter().map(row_to_status).collect()
}
