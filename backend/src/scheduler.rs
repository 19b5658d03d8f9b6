//! Periodic reconciliation driver.
//!
//! A single loop wakes on a timer and on reactive triggers, selects due
//! clusters, and dispatches `ReconcileRequested` events under a global
//! in-flight bound. Cycles never overlap: the loop is its own cycle token,
//! and a cycle that outlives its budget leaves stragglers running detached
//! with their semaphore permits, so the bound holds across cycles.
//!
//! A dispatch only advances the cluster's schedule after the broker acks
//! the publish; failures leave `next_reconcile_at` untouched and the
//! cluster shows up again next cycle.

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::Pool;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use bosun_common::args::ReconcilerArgs;
use bosun_common::now_ms;

use crate::bus::EventBus;
use crate::db;
use crate::events::{ClusterEvent, subjects};
use crate::health::{self, ReconcileIntervals};
use crate::metrics;
use crate::models::DueCluster;
use crate::reactive::ReactiveTrigger;

struct SchedulerInner {
    pool: Pool,
    bus: Arc<dyn EventBus>,
    trigger: ReactiveTrigger,
    intervals: ReconcileIntervals,
}

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    args: ReconcilerArgs,
}

impl Scheduler {
    pub fn new(
        pool: Pool,
        bus: Arc<dyn EventBus>,
        trigger: ReactiveTrigger,
        args: ReconcilerArgs,
    ) -> Self {
        let intervals = ReconcileIntervals {
            attention: Duration::from_secs(args.attention_interval_secs),
            stable: Duration::from_secs(args.stable_interval_secs),
        };
        Self {
            inner: Arc::new(SchedulerInner {
                pool,
                bus,
                trigger,
                intervals,
            }),
            args,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        if !self.args.reconcile_enabled {
            tracing::info!("reconciliation disabled by configuration");
            return;
        }

        let max_concurrent = self.args.max_concurrent;
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let wake = self.inner.trigger.wakeup();
        let check_interval = Duration::from_secs(self.args.check_interval_secs);

        let mut tick = tokio::time::interval(check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            check_interval_secs = self.args.check_interval_secs,
            max_concurrent,
            "scheduler started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = tick.tick() => {}
                () = wake.notified() => {
                    tracing::debug!("reactive wakeup");
                }
            }
            self.run_cycle(&semaphore, check_interval, &cancel).await;
        }

        // Grace drain: a full semaphore means every dispatch task finished.
        let grace = Duration::from_secs(self.args.shutdown_grace_secs);
        match tokio::time::timeout(
            grace,
            semaphore.clone().acquire_many_owned(max_concurrent as u32),
        )
        .await
        {
            Ok(_) => tracing::info!("scheduler stopped, all dispatches drained"),
            Err(_) => {
                tracing::warn!(grace_secs = self.args.shutdown_grace_secs,
                    "scheduler stopped with dispatches still in flight")
            }
        }
    }

    async fn run_cycle(
        &self,
        semaphore: &Arc<Semaphore>,
        cycle_budget: Duration,
        cancel: &CancellationToken,
    ) {
        let now = now_ms();
        let due = match db::find_due(&self.inner.pool, now, self.args.max_concurrent as i64).await
        {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = ?e, "failed to query due clusters");
                metrics::db_error("find_due");
                return;
            }
        };
        metrics::reconcile_cycle(due.len());
        if due.is_empty() {
            return;
        }
        let needing_attention = due.iter().filter(|d| d.needs_attention).count();
        tracing::debug!(
            candidates = due.len(),
            needing_attention,
            "reconcile cycle"
        );

        let total = due.len();
        let mut handles = Vec::with_capacity(total);
        for (admitted, candidate) in due.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                let deferred = total - admitted;
                metrics::reconcile_deferred(deferred);
                tracing::debug!(deferred, "in-flight bound reached, deferring to next cycle");
                break;
            };
            self.inner.trigger.dispatch_started(candidate.cluster_id);
            let inner = self.inner.clone();
            handles.push(tokio::spawn(async move {
                inner.dispatch(candidate, permit).await;
            }));
        }

        // Wait out the cycle budget; stragglers keep running detached.
        tokio::select! {
            () = cancel.cancelled() => {}
            _ = tokio::time::timeout(cycle_budget, futures::future::join_all(handles)) => {}
        }
    }
}

impl SchedulerInner {
    async fn dispatch(&self, candidate: DueCluster, _permit: OwnedSemaphorePermit) {
        let cluster_id = candidate.cluster_id;
        if let Err(e) = self.dispatch_inner(&candidate).await {
            metrics::reconcile_dispatch_failed();
            tracing::warn!(
                %cluster_id,
                error = ?e,
                "dispatch failed, schedule untouched; cluster retries next cycle"
            );
        }
        self.trigger.dispatch_finished(cluster_id);
    }

    async fn dispatch_inner(&self, candidate: &DueCluster) -> anyhow::Result<()> {
        let event =
            ClusterEvent::reconcile_requested(candidate.cluster_id, candidate.generation);
        let handle = self.bus.publish(subjects::RECONCILE, event.encode()?).await?;
        handle.acked().await?;
        metrics::reconcile_dispatched();

        // Only an acked publish earns a new next_reconcile_at.
        let view = db::health_view(&self.pool, candidate.cluster_id).await?;
        let class = health::classify(now_ms(), &view);
        let interval = health::interval_for(class, &self.intervals);
        db::update_schedule(&self.pool, candidate.cluster_id, interval).await?;
        tracing::debug!(
            cluster_id = %candidate.cluster_id,
            generation = candidate.generation,
            ?class,
            ?interval,
            "reconcile dispatched"
        );
        Ok(())
    }
}
