use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod chain;

pub const MAX_NODE_ID_LEN: usize = 128;

/// Stable key naming a monitored EVM node: an address, hostname or chain-node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNodeId {
    #[error("node id must not be empty")]
    Empty,
    #[error("node id is {len} bytes long, limit is {max}", max = MAX_NODE_ID_LEN)]
    TooLong { len: usize },
    #[error("node id contains unsupported character {ch:?}")]
    UnsupportedChar { ch: char },
}

impl NodeId {
    pub fn parse(raw: &str) -> Result<Self, InvalidNodeId> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidNodeId::Empty);
        }
        if trimmed.len() > MAX_NODE_ID_LEN {
            return Err(InvalidNodeId::TooLong { len: trimmed.len() });
        }
        if let Some(ch) = trimmed
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || "-_.:@".contains(*ch)))
        {
            return Err(InvalidNodeId::UnsupportedChar { ch });
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = InvalidNodeId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = InvalidNodeId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// Status kind reported by a single observation of a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Syncing,
    #[serde(alias = "ok")]
    Listening,
    #[serde(alias = "down")]
    Stopped,
    Unreachable,
}

impl ClientStatus {
    /// A node that does not listen for peers is stopped, whatever its sync state.
    pub fn from_flags(listening: bool, syncing: bool) -> Self {
        match (listening, syncing) {
            (false, _) => Self::Stopped,
            (true, true) => Self::Syncing,
            (true, false) => Self::Listening,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Stopped | Self::Unreachable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syncing => "syncing",
            Self::Listening => "listening",
            Self::Stopped => "stopped",
            Self::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown client status {0:?} (expected syncing, listening, stopped or unreachable)")]
pub struct UnknownClientStatus(pub String);

impl FromStr for ClientStatus {
    type Err = UnknownClientStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "syncing" => Ok(Self::Syncing),
            "listening" | "ok" => Ok(Self::Listening),
            "stopped" | "down" => Ok(Self::Stopped),
            "unreachable" => Ok(Self::Unreachable),
            _ => Err(UnknownClientStatus(s.to_string())),
        }
    }
}

/// Health label derived from a node's window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Bad,
}

impl Health {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Bad => "bad",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown health filter {0:?} (expected healthy or bad)")]
pub struct UnknownHealth(pub String);

impl FromStr for Health {
    type Err = UnknownHealth;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(Self::Healthy),
            "bad" => Ok(Self::Bad),
            _ => Err(UnknownHealth(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSample {
    pub timestamp_unix: u64,
    pub status: ClientStatus,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

impl StatusSample {
    pub fn new(timestamp_unix: u64, status: ClientStatus) -> Self {
        Self {
            timestamp_unix,
            status,
            detail: String::new(),
            chain_id: None,
            client_version: None,
            block_number: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// A sample as stored in a node's window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedSample {
    #[serde(flatten)]
    pub sample: StatusSample,
    pub received_at_unix: u64,
    pub out_of_order: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeWindow {
    pub node_id: NodeId,
    pub samples: Vec<ObservedSample>,
    pub first_seen_unix: u64,
    pub last_seen_unix: u64,
    pub health: Health,
    pub stale: bool,
    pub chain: Option<String>,
    pub client: Option<String>,
}

impl NodeWindow {
    pub fn latest(&self) -> Option<&ObservedSample> {
        self.samples.last()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub health: Health,
    pub latest_status: ClientStatus,
    pub last_seen_unix: u64,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportAck {
    pub node_id: NodeId,
    pub created: bool,
    pub out_of_order: bool,
    pub evicted: usize,
}

/// Answer to a status query; `known == false` means the node was never observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStatusResponse {
    pub node_id: NodeId,
    pub known: bool,
    pub window: Option<NodeWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurgeReport {
    pub older_than_unix: u64,
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub role: String,
    pub online: bool,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub bad_nodes: usize,
}
