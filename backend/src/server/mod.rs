//! Server assembly.
//!
//! Wires the pool, bus, trigger, scheduler, ingestor, outbox flusher, and
//! the HTTP API together, and tears them down in order on shutdown.

pub mod api;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use bosun_common::auth::AuthSettings;
use bosun_common::retry::RetryPolicy;
use bosun_common::shutdown::shutdown_signal;

use crate::args::{BusKind, ServerArgs};
use crate::bus::{BusLimits, EventBus, memory::MemoryEventBus, nats::NatsEventBus};
use crate::db;
use crate::events::subjects;
use crate::ingest::{MutationSignalHandler, StatusIngestor};
use crate::outbox::OutboxFlusher;
use crate::reactive::ReactiveTrigger;
use crate::scheduler::Scheduler;
use crate::service::ClusterService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: ClusterService,
}

pub async fn run_server(args: ServerArgs) -> Result<()> {
    args.reconciler.validate().context("invalid reconciler config")?;
    args.reactive.validate().context("invalid reactive config")?;
    args.pubsub.validate().context("invalid pubsub config")?;

    let pool = bosun_common::postgres::create_pool(args.postgres.clone());
    // Startup store connectivity is fatal when exhausted.
    bosun_common::postgres::wait_for_pool(&pool, args.postgres.postgres_startup_attempts)
        .await
        .context("postgres unreachable at startup")?;
    tracing::info!("connected to Postgres");
    db::init_schema(&pool).await?;

    let limits = BusLimits::from(&args.pubsub);
    let redelivery = RetryPolicy {
        max_attempts: args.aggregation.max_attempts,
        initial_delay: Duration::from_millis(args.aggregation.initial_backoff_ms),
        ..Default::default()
    };
    let bus: Arc<dyn EventBus> = match args.bus {
        BusKind::Nats => {
            let client = args.nats.connect().await?;
            tracing::info!(url = %args.nats.nats_url, "connected to NATS");
            Arc::new(
                NatsEventBus::connect(
                    client,
                    &args.stream_name,
                    subjects::all(),
                    limits,
                    redelivery,
                )
                .await?,
            )
        }
        BusKind::Memory => {
            tracing::warn!("using in-memory bus; events do not leave this process");
            Arc::new(MemoryEventBus::with_redelivery(limits, redelivery))
        }
    };

    let trigger = ReactiveTrigger::new(&args.reactive);
    let service = ClusterService::new(pool.clone(), bus.clone(), trigger.clone());

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    bosun_common::metrics::maybe_spawn_metrics_server();

    bus.subscribe(
        subjects::STATUS_UPDATES,
        Arc::new(StatusIngestor::new(service.clone())),
    )
    .await
    .context("failed to subscribe status ingestor")?;
    bus.subscribe(
        subjects::CLUSTER_EVENTS,
        Arc::new(MutationSignalHandler::new(trigger.clone())),
    )
    .await
    .context("failed to subscribe mutation handler")?;

    let flusher = OutboxFlusher::new(pool.clone(), bus.clone(), args.aggregation.batch_size);
    let flusher_task = tokio::spawn(flusher.run(cancel.clone()));

    let scheduler = Scheduler::new(
        pool.clone(),
        bus.clone(),
        trigger.clone(),
        args.reconciler.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    bosun_common::signal_ready();

    let state = AppState { service };
    api::run_server(
        cancel.clone(),
        args.port,
        state,
        AuthSettings {
            enabled: args.auth.auth_enabled,
        },
    )
    .await?;

    // The HTTP server has drained; stop the background components.
    cancel.cancel();
    let _ = scheduler_task.await;
    let _ = flusher_task.await;
    bus.close().await?;
    tracing::info!("backend stopped gracefully");
    Ok(())
}
