use anyhow::{Context, Result, anyhow};
use common::{
    Health, HealthStatus, NodeStatusResponse, NodeSummary, PurgeReport, ReportAck, StatusSample,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

/// Typed HTTP client for a badnode server.
#[derive(Clone)]
pub struct StatusClient {
    http: Client,
    server_base_url: String,
}

impl StatusClient {
    pub fn new(server_base_url: impl Into<String>) -> Self {
        Self::with_http(Client::new(), server_base_url)
    }

    pub fn with_http(http: Client, server_base_url: impl Into<String>) -> Self {
        Self {
            http,
            server_base_url: server_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn server_base_url(&self) -> &str {
        &self.server_base_url
    }

    pub async fn report(&self, node_id: &str, sample: &StatusSample) -> Result<ReportAck> {
        let url = self.node_status_url(node_id);

        let response = self
            .http
            .post(url)
            .json(sample)
            .send()
            .await
            .with_context(|| format!("failed to report status for node={node_id}"))?;

        decode(response)
            .await
            .with_context(|| format!("server rejected status report for node={node_id}"))
    }

    pub async fn query(&self, node_id: &str) -> Result<NodeStatusResponse> {
        let url = self.node_status_url(node_id);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to query status for node={node_id}"))?;

        decode(response)
            .await
            .with_context(|| format!("status query failed for node={node_id}"))
    }

    pub async fn list(&self, filter: Option<Health>) -> Result<Vec<NodeSummary>> {
        let mut request = self.http.get(format!("{}/nodes", self.server_base_url));
        if let Some(health) = filter {
            request = request.query(&[("health", health.as_str())]);
        }

        let response = request.send().await.context("failed to list nodes")?;
        decode(response).await.context("node listing failed")
    }

    pub async fn purge_unseen_for(&self, unseen_for_secs: u64) -> Result<PurgeReport> {
        self.purge(&[("unseen_for_secs", unseen_for_secs)]).await
    }

    pub async fn purge_older_than(&self, older_than_unix: u64) -> Result<PurgeReport> {
        self.purge(&[("older_than_unix", older_than_unix)]).await
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self
            .http
            .get(format!("{}/health", self.server_base_url))
            .send()
            .await
            .context("failed to contact server")?;
        decode(response).await.context("health check failed")
    }

    async fn purge(&self, query: &[(&str, u64)]) -> Result<PurgeReport> {
        let response = self
            .http
            .post(format!("{}/admin/purge", self.server_base_url))
            .query(query)
            .send()
            .await
            .context("failed to request purge")?;
        decode(response).await.context("purge request failed")
    }

    fn node_status_url(&self, node_id: &str) -> String {
        format!("{}/nodes/{}/status", self.server_base_url, node_id.trim())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| value.get("error")?.as_str().map(ToString::to_string))
            .unwrap_or(body);
        return Err(anyhow!("server returned {status}: {message}"));
    }

    response
        .json::<T>()
        .await
        .context("failed to decode server response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slashes_are_trimmed() {
        let client = StatusClient::new("http://127.0.0.1:9000//");
        assert_eq!(client.server_base_url(), "http://127.0.0.1:9000");
        assert_eq!(
            client.node_status_url(" node-A "),
            "http://127.0.0.1:9000/nodes/node-A/status"
        );
    }

    #[tokio::test]
    async fn unreachable_server_reports_context() {
        let client = StatusClient::new("http://127.0.0.1:9");
        let err = client.query("node-A").await.unwrap_err();
        assert!(format!("{err:#}").contains("node=node-A"));
    }
}
