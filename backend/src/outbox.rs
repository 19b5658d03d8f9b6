//! Outbox flusher.
//!
//! A single serial task that drains not-yet-published event rows in
//! insertion order, publishes each and waits for the broker ack before
//! advancing, which preserves per-cluster FIFO. Publish failures retry
//! indefinitely; durability already happened at commit time, so the only
//! job left is delivery.

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::Pool;
use tokio_util::sync::CancellationToken;

use bosun_common::retry::RetryPolicy;

use crate::bus::EventBus;
use crate::db;
use crate::metrics;
use crate::models::OutboxRecord;

const IDLE_POLL: Duration = Duration::from_secs(1);

pub struct OutboxFlusher {
    pool: Pool,
    bus: Arc<dyn EventBus>,
    batch_size: i64,
    retry: RetryPolicy,
}

impl OutboxFlusher {
    pub fn new(pool: Pool, bus: Arc<dyn EventBus>, batch_size: i64) -> Self {
        Self {
            pool,
            bus,
            batch_size,
            retry: RetryPolicy::default(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(batch_size = self.batch_size, "outbox flusher started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let records = match db::drain_outbox(&self.pool, self.batch_size).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(error = ?e, "failed to drain outbox");
                    if sleep_or_cancel(&cancel, IDLE_POLL).await {
                        break;
                    }
                    continue;
                }
            };

            if records.is_empty() {
                if sleep_or_cancel(&cancel, IDLE_POLL).await {
                    break;
                }
                continue;
            }

            metrics::outbox_drained(records.len());
            'records: for record in records {
                tracing::debug!(
                    id = record.id,
                    topic = %record.topic,
                    cluster_id = ?record.cluster_id,
                    age_ms = bosun_common::now_ms() - record.created_at,
                    "flushing outbox record"
                );
                let mut attempt: u32 = 0;
                loop {
                    if cancel.is_cancelled() {
                        break 'records;
                    }
                    match self.publish_one(&record).await {
                        Ok(()) => {
                            if let Err(e) = db::mark_published(&self.pool, &[record.id]).await {
                                // The event will go out again next pass;
                                // at-least-once allows it.
                                tracing::warn!(id = record.id, error = ?e,
                                    "published but failed to mark outbox record");
                            }
                            metrics::outbox_published();
                            break;
                        }
                        Err(e) => {
                            attempt += 1;
                            tracing::warn!(
                                id = record.id,
                                topic = %record.topic,
                                attempt,
                                error = ?e,
                                "outbox publish failed, will retry"
                            );
                            metrics::outbox_publish_failed();
                            let delay = self.retry.delay_for(attempt.saturating_sub(1));
                            if sleep_or_cancel(&cancel, delay).await {
                                break 'records;
                            }
                        }
                    }
                }
            }
        }
        tracing::info!("outbox flusher stopped");
    }

    async fn publish_one(&self, record: &OutboxRecord) -> anyhow::Result<()> {
        let handle = self
            .bus
            .publish(&record.topic, record.payload.clone().into())
            .await?;
        handle.acked().await
    }
}

/// Returns true when the token fired before the sleep elapsed.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}
