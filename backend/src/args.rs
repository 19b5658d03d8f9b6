use clap::{Parser, Subcommand, ValueEnum};

use bosun_common::args::{
    AggregationArgs, AuthArgs, NatsArgs, PostgresArgs, PubSubArgs, ReactiveArgs, ReconcilerArgs,
};

#[derive(Parser, Debug)]
#[command(name = "bosun-backend")]
#[command(about = "Cluster control-plane backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the backend server
    Server(ServerArgs),

    /// Create a cluster
    Create(CreateArgs),

    /// Get a cluster by ID
    Get(GetArgs),

    /// List clusters
    List(ListArgs),

    /// Delete a cluster
    Delete(DeleteArgs),

    /// Show a cluster's aggregate status
    Status(StatusArgs),

    /// Check service health
    Health(HealthArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BusKind {
    /// JetStream-backed bus.
    Nats,
    /// In-process bus for single-node development.
    Memory,
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port the API server listens on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Which bus implementation to run against
    #[arg(long, env = "BUS", value_enum, default_value = "nats")]
    pub bus: BusKind,

    /// JetStream stream holding all event subjects
    #[arg(long, env = "STREAM_NAME", default_value = "BOSUN_EVENTS")]
    pub stream_name: String,

    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub nats: NatsArgs,

    #[clap(flatten)]
    pub reconciler: ReconcilerArgs,

    #[clap(flatten)]
    pub reactive: ReactiveArgs,

    #[clap(flatten)]
    pub pubsub: PubSubArgs,

    #[clap(flatten)]
    pub aggregation: AggregationArgs,

    #[clap(flatten)]
    pub auth: AuthArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct EndpointArgs {
    /// Backend endpoint
    #[arg(long, env = "BOSUN_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Identity to act as (sent as the gateway identity header)
    #[arg(long, env = "BOSUN_USER", default_value = "dev@localhost")]
    pub user: String,
}

#[derive(Parser, Debug, Clone)]
pub struct CreateArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    /// Cluster name, unique per owner
    #[arg(long)]
    pub name: String,

    /// Target project the cluster deploys into
    #[arg(long)]
    pub target_project: Option<String>,

    /// Cluster spec as a JSON object
    #[arg(long)]
    pub spec: serde_json::Value,
}

#[derive(Parser, Debug, Clone)]
pub struct GetArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    /// Cluster UUID
    #[arg(long)]
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    /// Offset for pagination
    #[arg(long, default_value_t = 0)]
    pub offset: i64,

    /// Maximum number of clusters to return
    #[arg(long, default_value_t = 100)]
    pub limit: i64,
}

#[derive(Parser, Debug, Clone)]
pub struct DeleteArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    /// Cluster UUID
    #[arg(long)]
    pub id: String,

    /// Delete even when the cluster is active
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct StatusArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    /// Cluster UUID
    #[arg(long)]
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,
}
