use anyhow::Result;
use clap::Parser;

mod args;
mod bus;
mod cli;
mod client;
mod db;
mod error;
mod events;
mod health;
mod ingest;
mod metrics;
mod models;
mod outbox;
mod reactive;
mod scheduler;
mod server;
mod service;
mod status_db;

use args::{Cli, Commands};
use server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    bosun_common::init();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Create(args) => cli::run_create(args).await,
        Commands::Get(args) => cli::run_get(args).await,
        Commands::List(args) => cli::run_list(args).await,
        Commands::Delete(args) => cli::run_delete(args).await,
        Commands::Status(args) => cli::run_status(args).await,
        Commands::Health(args) => cli::run_health(args).await,
    }
}
