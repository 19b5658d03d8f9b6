use anyhow::Result;
use uuid::Uuid;

use crate::args::{CreateArgs, DeleteArgs, EndpointArgs, GetArgs, HealthArgs, ListArgs, StatusArgs};
use crate::client::BackendClient;
use crate::models::CreateClusterRequest;

fn client_for(args: &EndpointArgs) -> BackendClient {
    let endpoint = args
        .endpoint
        .clone()
        .unwrap_or_else(|| bosun_common::DEFAULT_ENDPOINT.to_string());
    BackendClient::new(&endpoint, &args.user)
}

/// Run the create cluster CLI command.
pub async fn run_create(args: CreateArgs) -> Result<()> {
    let client = client_for(&args.endpoint);

    let cluster = client
        .create_cluster(&CreateClusterRequest {
            name: args.name,
            target_project: args.target_project,
            spec: args.spec,
        })
        .await?;

    println!("Created cluster:");
    println!("  ID:         {}", cluster.id);
    println!("  Name:       {}", cluster.name);
    println!("  Generation: {}", cluster.generation);
    println!(
        "  Spec:       {}",
        serde_json::to_string(&cluster.spec).unwrap_or_default()
    );
    Ok(())
}

/// Run the get cluster CLI command.
pub async fn run_get(args: GetArgs) -> Result<()> {
    let client = client_for(&args.endpoint);

    let id: Uuid = args.id.parse()?;
    match client.get_cluster(id).await? {
        Some(cluster) => {
            println!("{}", serde_json::to_string_pretty(&cluster)?);
        }
        None => {
            println!("Cluster {} not found", id);
        }
    }
    Ok(())
}

/// Run the list clusters CLI command.
pub async fn run_list(args: ListArgs) -> Result<()> {
    let client = client_for(&args.endpoint);

    let response = client.list_clusters(args.offset, args.limit).await?;
    println!(
        "Clusters (showing {} of {}):",
        response.items.len(),
        response.total
    );
    for item in response.items {
        println!(
            "  {}  {}  gen={}  phase={}",
            item.id,
            item.name,
            item.generation,
            item.phase.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

/// Run the delete cluster CLI command.
pub async fn run_delete(args: DeleteArgs) -> Result<()> {
    let client = client_for(&args.endpoint);

    let id: Uuid = args.id.parse()?;
    client.delete_cluster(id, args.force).await?;
    println!("Deleted cluster {}", id);
    Ok(())
}

/// Run the cluster status CLI command.
pub async fn run_status(args: StatusArgs) -> Result<()> {
    let client = client_for(&args.endpoint);

    let id: Uuid = args.id.parse()?;
    let status = client.cluster_status(id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Run the health check CLI command.
pub async fn run_health(args: HealthArgs) -> Result<()> {
    let client = client_for(&args.endpoint);
    client.health().await?;
    println!("OK");
    Ok(())
}
