use anyhow::{Context, Result, bail};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DATABASE", default_value = "postgres")]
    pub postgres_database: String,

    #[arg(long, env = "POSTGRES_USERNAME", default_value = "postgres")]
    pub postgres_username: String,

    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,

    #[arg(long, env = "POSTGRES_CA_CERT")]
    pub postgres_ca_cert: Option<String>,

    /// Attempts to reach Postgres before the process gives up and exits.
    #[arg(long, env = "POSTGRES_STARTUP_ATTEMPTS", default_value_t = 10)]
    pub postgres_startup_attempts: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222")]
    pub nats_url: String,

    #[arg(long, env = "NATS_USER", default_value = "app")]
    pub nats_user: String,

    #[arg(long, env = "NATS_PASSWORD", default_value = "devpass")]
    pub nats_password: String,
}

impl NatsArgs {
    pub async fn connect(&self) -> Result<async_nats::Client> {
        async_nats::ConnectOptions::new()
            .user_and_password(self.nats_user.clone(), self.nats_password.clone())
            .connect(&self.nats_url)
            .await
            .context("failed to connect to NATS")
    }
}

/// Periodic reconciliation driver settings.
#[derive(Parser, Debug, Clone)]
pub struct ReconcilerArgs {
    /// Master on/off switch for the scheduler.
    #[arg(
        long,
        env = "RECONCILE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub reconcile_enabled: bool,

    /// Scheduler wake period in seconds.
    #[arg(long, env = "RECONCILE_CHECK_INTERVAL_SECS", default_value_t = 60)]
    pub check_interval_secs: u64,

    /// Upper bound on simultaneously in-flight reconcile dispatches.
    #[arg(long, env = "RECONCILE_MAX_CONCURRENT", default_value_t = 50)]
    pub max_concurrent: usize,

    /// Reconcile interval for stable clusters, in seconds.
    #[arg(long, env = "RECONCILE_STABLE_INTERVAL_SECS", default_value_t = 300)]
    pub stable_interval_secs: u64,

    /// Reconcile interval for clusters needing attention, in seconds.
    #[arg(long, env = "RECONCILE_ATTENTION_INTERVAL_SECS", default_value_t = 30)]
    pub attention_interval_secs: u64,

    /// Grace period for in-flight dispatches on shutdown, in seconds.
    #[arg(long, env = "RECONCILE_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

impl ReconcilerArgs {
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            bail!("RECONCILE_CHECK_INTERVAL_SECS must be positive");
        }
        if self.max_concurrent == 0 {
            bail!("RECONCILE_MAX_CONCURRENT must be positive");
        }
        if self.stable_interval_secs == 0 || self.attention_interval_secs == 0 {
            bail!("reconcile intervals must be positive");
        }
        Ok(())
    }
}

/// Event-driven scheduler wakeup settings.
#[derive(Parser, Debug, Clone)]
pub struct ReactiveArgs {
    #[arg(
        long,
        env = "REACTIVE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub reactive_enabled: bool,

    /// Coalescing window for signals against the same cluster, in milliseconds.
    #[arg(long, env = "REACTIVE_DEBOUNCE_MS", default_value_t = 2000)]
    pub reactive_debounce_ms: u64,

    /// Global cap on reactive wakeups; excess signals are dropped and the
    /// periodic cycle picks the cluster up instead.
    #[arg(long, env = "REACTIVE_MAX_EVENTS_PER_MINUTE", default_value_t = 60)]
    pub reactive_max_events_per_minute: u32,
}

impl ReactiveArgs {
    pub fn validate(&self) -> Result<()> {
        if self.reactive_debounce_ms == 0 {
            bail!("REACTIVE_DEBOUNCE_MS must be positive");
        }
        if self.reactive_max_events_per_minute == 0 {
            bail!("REACTIVE_MAX_EVENTS_PER_MINUTE must be positive");
        }
        Ok(())
    }
}

/// Status ingestion retry settings.
#[derive(Parser, Debug, Clone)]
pub struct AggregationArgs {
    /// Rows drained from the outbox per flusher pass.
    #[arg(long, env = "AGGREGATION_BATCH_SIZE", default_value_t = 64)]
    pub batch_size: i64,

    #[arg(long, env = "AGGREGATION_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    #[arg(long, env = "AGGREGATION_INITIAL_BACKOFF_MS", default_value_t = 500)]
    pub initial_backoff_ms: u64,
}

/// Subscription-side backpressure settings.
#[derive(Parser, Debug, Clone)]
pub struct PubSubArgs {
    /// Worker pool size per subscription.
    #[arg(long, env = "PUBSUB_MAX_CONCURRENT_HANDLERS", default_value_t = 8)]
    pub max_concurrent_handlers: usize,

    /// Messages buffered per subscription before the feed blocks.
    #[arg(long, env = "PUBSUB_MAX_OUTSTANDING_MESSAGES", default_value_t = 256)]
    pub max_outstanding_messages: usize,
}

impl PubSubArgs {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_handlers == 0 {
            bail!("PUBSUB_MAX_CONCURRENT_HANDLERS must be positive");
        }
        if self.max_outstanding_messages == 0 {
            bail!("PUBSUB_MAX_OUTSTANDING_MESSAGES must be positive");
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct AuthArgs {
    /// When disabled, requests without an identity header fall back to a
    /// development identity instead of 401.
    #[arg(
        long,
        env = "AUTH_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub auth_enabled: bool,
}
