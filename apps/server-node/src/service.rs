use std::sync::Arc;

use common::{
    Health, InvalidNodeId, NodeId, NodeStatusResponse, NodeSummary, PurgeReport, ReportAck,
    StatusSample, UnknownHealth,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::registry::{RegistryCounts, StatusRegistry};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid node id: {0}")]
    InvalidNodeId(#[from] InvalidNodeId),
    #[error(transparent)]
    InvalidFilter(#[from] UnknownHealth),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Request-facing adapter over the registry. Validates input, drives the
/// registry and logs one line per call.
pub struct NodeStatusService {
    registry: Arc<StatusRegistry>,
}

impl NodeStatusService {
    pub fn new(registry: Arc<StatusRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    pub fn report(&self, raw_node_id: &str, sample: StatusSample) -> Result<ReportAck, ServiceError> {
        let node_id = parse_node_id("report", raw_node_id)?;
        let status = sample.status;
        let timestamp_unix = sample.timestamp_unix;

        let outcome = self.registry.observe(&node_id, sample);
        info!(
            node_id = %node_id,
            op = "report",
            outcome = "accepted",
            %status,
            timestamp_unix,
            created = outcome.created,
            out_of_order = outcome.out_of_order,
            evicted = outcome.evicted,
            "status reported"
        );
        if outcome.out_of_order {
            warn!(node_id = %node_id, timestamp_unix, "sample arrived out of order");
        }

        Ok(ReportAck {
            node_id,
            created: outcome.created,
            out_of_order: outcome.out_of_order,
            evicted: outcome.evicted,
        })
    }

    pub fn query(&self, raw_node_id: &str) -> Result<NodeStatusResponse, ServiceError> {
        let node_id = parse_node_id("query", raw_node_id)?;

        let window = self.registry.get(&node_id);
        match &window {
            Some(window) => info!(
                node_id = %node_id,
                op = "query",
                outcome = "found",
                health = %window.health,
                samples = window.samples.len(),
                "status queried"
            ),
            None => info!(node_id = %node_id, op = "query", outcome = "unknown", "status queried"),
        }

        Ok(NodeStatusResponse {
            node_id,
            known: window.is_some(),
            window,
        })
    }

    pub fn list(&self, raw_filter: Option<&str>) -> Result<Vec<NodeSummary>, ServiceError> {
        let filter = match raw_filter.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => match raw.parse::<Health>() {
                Ok(health) => Some(health),
                Err(err) => {
                    warn!(op = "list", outcome = "rejected", error = %err, "invalid list filter");
                    return Err(err.into());
                }
            },
            None => None,
        };

        let nodes: Vec<_> = self.registry.list(filter).collect();
        info!(
            op = "list",
            outcome = "ok",
            filter = filter.map(Health::as_str).unwrap_or("all"),
            count = nodes.len(),
            "nodes listed"
        );
        Ok(nodes)
    }

    pub fn purge(&self, older_than_unix: u64) -> PurgeReport {
        let removed = self.registry.purge(older_than_unix);
        info!(
            op = "purge",
            outcome = "ok",
            older_than_unix,
            removed,
            remaining = self.registry.len(),
            "purged unseen nodes"
        );
        PurgeReport {
            older_than_unix,
            removed,
        }
    }

    pub fn purge_unseen_for(&self, unseen_for_secs: u64) -> PurgeReport {
        let cutoff = self.registry.now_unix().saturating_sub(unseen_for_secs);
        self.purge(cutoff)
    }

    pub fn counts(&self) -> RegistryCounts {
        self.registry.counts()
    }

    /// Logs a request refused before it reached the registry.
    pub fn reject(
        &self,
        op: &'static str,
        raw_node_id: Option<&str>,
        reason: impl Into<String>,
    ) -> ServiceError {
        let reason = reason.into();
        warn!(
            node_id = raw_node_id.unwrap_or("-"),
            op,
            outcome = "rejected",
            error = %reason,
            "request rejected"
        );
        ServiceError::InvalidRequest(reason)
    }

    pub fn shutdown(&self) {
        let dropped = self.registry.close();
        info!(op = "shutdown", outcome = "ok", dropped, "status registry closed");
    }
}

fn parse_node_id(op: &'static str, raw_node_id: &str) -> Result<NodeId, ServiceError> {
    NodeId::parse(raw_node_id).map_err(|err| {
        warn!(node_id = %raw_node_id, op, outcome = "rejected", error = %err, "invalid node id");
        ServiceError::from(err)
    })
}
