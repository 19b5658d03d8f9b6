use anyhow::{Context, Result, bail};
use reqwest::Client;
use uuid::Uuid;

use bosun_common::auth::USER_EMAIL_HEADER;

use crate::models::{
    AggregateStatusResponse, Cluster, CreateClusterRequest, ListClustersResponse,
    UpdateClusterRequest,
};

/// Client for the backend HTTP API. Sends the identity header the gateway
/// would normally inject, which is how operators poke a dev instance.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    user: String,
}

impl BackendClient {
    pub fn new(base_url: &str, user: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
        }
    }

    /// Check if the service is healthy.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to send health request")?;

        if resp.status().is_success() {
            Ok(())
        } else {
            bail!("health check failed with status: {}", resp.status())
        }
    }

    /// Create a new cluster.
    pub async fn create_cluster(&self, req: &CreateClusterRequest) -> Result<Cluster> {
        let url = format!("{}/api/v1/clusters", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header(USER_EMAIL_HEADER, &self.user)
            .json(req)
            .send()
            .await
            .context("failed to send create cluster request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("create cluster failed with status {}: {}", status, body);
        }

        resp.json::<Cluster>()
            .await
            .context("failed to parse create cluster response")
    }

    /// Get a cluster by ID.
    pub async fn get_cluster(&self, id: Uuid) -> Result<Option<Cluster>> {
        let url = format!("{}/api/v1/clusters/{}", self.base_url, id);
        let resp = self
            .client
            .get(&url)
            .header(USER_EMAIL_HEADER, &self.user)
            .send()
            .await
            .context("failed to send get cluster request")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("get cluster failed with status {}: {}", status, body);
        }

        let cluster = resp
            .json::<Cluster>()
            .await
            .context("failed to parse get cluster response")?;
        Ok(Some(cluster))
    }

    /// Replace a cluster's spec.
    pub async fn update_cluster(&self, id: Uuid, spec: serde_json::Value) -> Result<Cluster> {
        let url = format!("{}/api/v1/clusters/{}", self.base_url, id);
        let resp = self
            .client
            .put(&url)
            .header(USER_EMAIL_HEADER, &self.user)
            .json(&UpdateClusterRequest { spec })
            .send()
            .await
            .context("failed to send update cluster request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("update cluster failed with status {}: {}", status, body);
        }

        resp.json::<Cluster>()
            .await
            .context("failed to parse update cluster response")
    }

    /// List clusters with pagination.
    pub async fn list_clusters(&self, offset: i64, limit: i64) -> Result<ListClustersResponse> {
        let url = format!(
            "{}/api/v1/clusters?offset={}&limit={}",
            self.base_url, offset, limit
        );
        let resp = self
            .client
            .get(&url)
            .header(USER_EMAIL_HEADER, &self.user)
            .send()
            .await
            .context("failed to send list clusters request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("list clusters failed with status {}: {}", status, body);
        }

        resp.json::<ListClustersResponse>()
            .await
            .context("failed to parse list clusters response")
    }

    /// Soft-delete a cluster.
    pub async fn delete_cluster(&self, id: Uuid, force: bool) -> Result<()> {
        let url = format!("{}/api/v1/clusters/{}?force={}", self.base_url, id, force);
        let resp = self
            .client
            .delete(&url)
            .header(USER_EMAIL_HEADER, &self.user)
            .send()
            .await
            .context("failed to send delete cluster request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("delete cluster failed with status {}: {}", status, body);
        }
        Ok(())
    }

    /// Aggregate status for a cluster.
    pub async fn cluster_status(&self, id: Uuid) -> Result<AggregateStatusResponse> {
        let url = format!("{}/api/v1/clusters/{}/status", self.base_url, id);
        let resp = self
            .client
            .get(&url)
            .header(USER_EMAIL_HEADER, &self.user)
            .send()
            .await
            .context("failed to send cluster status request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("cluster status failed with status {}: {}", status, body);
        }

        resp.json::<AggregateStatusResponse>()
            .await
            .context("failed to parse cluster status response")
    }
}
