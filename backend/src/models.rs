use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known phase values. The phase itself is an open string; these are the
/// ones the backend assigns or gives meaning to.
pub mod phase {
    pub const PENDING: &str = "Pending";
    pub const RUNNING: &str = "Running";
    pub const FAILED: &str = "Failed";
    pub const ERROR: &str = "Error";
    pub const UNKNOWN: &str = "Unknown";
}

/// Condition status reported by controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single typed condition, Kubernetes-style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Unix epoch timestamp in milliseconds.
    #[serde(default)]
    pub last_transition_time: Option<i64>,
}

/// Aggregate status derived from controller reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub phase: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A user-declared cluster specification and its observed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    /// Owning user email. All reads and writes are scoped to it.
    pub owner: String,
    pub target_project: String,
    /// Bumped on every spec mutation, never on status writes.
    pub generation: i64,
    /// Opaque token rotated on every write, spec or status.
    pub resource_version: String,
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: Option<ClusterStatus>,
    /// Unix epoch timestamp in milliseconds.
    pub created_at: i64,
    /// Unix epoch timestamp in milliseconds.
    pub updated_at: i64,
    /// Unix epoch timestamp in milliseconds. NULL means not deleted.
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

/// One controller's latest report for a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub cluster_id: Uuid,
    pub controller_name: String,
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Unix epoch timestamp in milliseconds.
    pub updated_at: i64,
}

/// Status report pushed by a controller, over the bus or the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub cluster_id: Uuid,
    pub controller_name: String,
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Request to create a new cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    #[serde(default)]
    pub target_project: Option<String>,
    pub spec: serde_json::Value,
}

/// Request to replace a cluster's spec. The spec is replaced whole; there is
/// no merge semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateClusterRequest {
    pub spec: serde_json::Value,
}

/// Query parameters for listing clusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListClustersRequest {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
    /// Filter on `spec.platform.type`.
    #[serde(default)]
    pub platform: Option<String>,
    /// Filter on `status.phase`.
    #[serde(default)]
    pub status: Option<String>,
}

fn default_list_limit() -> i64 {
    100
}

/// Cluster item for list responses (without the full spec for efficiency).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterListItem {
    pub id: Uuid,
    pub name: String,
    pub target_project: String,
    pub generation: i64,
    #[serde(default)]
    pub phase: Option<String>,
    /// Unix epoch timestamp in milliseconds.
    pub created_at: i64,
    /// Unix epoch timestamp in milliseconds.
    pub updated_at: i64,
}

/// Response containing a paginated list of clusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListClustersResponse {
    pub offset: i64,
    pub limit: i64,
    pub total: i64,
    pub items: Vec<ClusterListItem>,
}

/// Aggregate status response for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateStatusResponse {
    pub cluster_id: Uuid,
    pub generation: i64,
    #[serde(default)]
    pub status: Option<ClusterStatus>,
    pub controllers: Vec<ControllerStatus>,
}

/// Read-only projection the health evaluator classifies.
#[derive(Debug, Clone)]
pub struct HealthView {
    /// Unix epoch timestamp in milliseconds.
    pub created_at: i64,
    pub generation: i64,
    pub phase: Option<String>,
    /// Highest generation any controller has reported, None when no
    /// controller has ever reported.
    pub max_observed_generation: Option<i64>,
}

/// A cluster selected for reconciliation by the due-query.
#[derive(Debug, Clone)]
pub struct DueCluster {
    pub cluster_id: Uuid,
    pub generation: i64,
    pub needs_attention: bool,
}

/// A not-yet-published event row.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub id: i64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub cluster_id: Option<Uuid>,
    /// Unix epoch timestamp in milliseconds.
    pub created_at: i64,
}
