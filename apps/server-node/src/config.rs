use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use common::NodeId;

use crate::registry::WindowPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub node_id: NodeId,
    pub rpc_url: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub website_dir: PathBuf,
    pub window: WindowPolicy,
    pub retention_ceiling_secs: u64,
    pub purge_interval_secs: u64,
    pub poll_targets: Vec<PollTarget>,
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = WindowPolicy::default();

        let bind_addr = lookup("BADNODE_SERVER_BIND")
            .unwrap_or_else(|| "0.0.0.0:9000".to_string())
            .parse::<SocketAddr>()
            .context("invalid BADNODE_SERVER_BIND")?;

        let window = WindowPolicy {
            max_samples: parse_or(&lookup, "BADNODE_WINDOW_MAX_SAMPLES", defaults.max_samples)?,
            max_age_secs: parse_or(&lookup, "BADNODE_WINDOW_MAX_AGE_SECS", defaults.max_age_secs)?,
            clock_skew_secs: parse_or(&lookup, "BADNODE_CLOCK_SKEW_SECS", defaults.clock_skew_secs)?,
            liveness_timeout_secs: parse_or(
                &lookup,
                "BADNODE_LIVENESS_TIMEOUT_SECS",
                defaults.liveness_timeout_secs,
            )?,
        };
        if window.max_samples == 0 {
            bail!("BADNODE_WINDOW_MAX_SAMPLES must be at least 1");
        }

        let poll_targets = match lookup("BADNODE_POLL_TARGETS") {
            Some(raw) => parse_poll_targets(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            bind_addr,
            website_dir: lookup("BADNODE_WEBSITE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./website")),
            window,
            retention_ceiling_secs: parse_or(&lookup, "BADNODE_RETENTION_CEILING_SECS", 86_400)?,
            purge_interval_secs: parse_or(&lookup, "BADNODE_PURGE_INTERVAL_SECS", 300)?.max(1),
            poll_targets,
            poll_interval_secs: parse_or(&lookup, "BADNODE_POLL_INTERVAL_SECS", 15)?.max(1),
            poll_timeout_secs: parse_or(&lookup, "BADNODE_POLL_TIMEOUT_SECS", 5)?.max(1),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid {key}={raw}")),
        _ => Ok(default),
    }
}

/// Parses `node-id=url,node-id=url` into poll targets.
pub fn parse_poll_targets(raw: &str) -> Result<Vec<PollTarget>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let Some((node_id, rpc_url)) = entry.split_once('=') else {
            bail!("poll target '{entry}' must look like node-id=url");
        };
        let node_id = NodeId::parse(node_id)
            .with_context(|| format!("invalid node id in poll target '{entry}'"))?;
        let rpc_url = rpc_url.trim();
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            bail!("poll target '{entry}' needs an http(s) url");
        }
        if !seen.insert(node_id.clone()) {
            bail!("duplicate poll target for node {node_id}");
        }

        targets.push(PollTarget {
            node_id,
            rpc_url: rpc_url.to_string(),
        });
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.website_dir, PathBuf::from("./website"));
        assert_eq!(config.window, WindowPolicy::default());
        assert_eq!(config.retention_ceiling_secs, 86_400);
        assert!(config.poll_targets.is_empty());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("BADNODE_SERVER_BIND", "127.0.0.1:19000"),
            ("BADNODE_WINDOW_MAX_SAMPLES", "2"),
            ("BADNODE_LIVENESS_TIMEOUT_SECS", " 45 "),
            ("BADNODE_POLL_TARGETS", "geth-1=http://10.0.0.1:8545"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 19000);
        assert_eq!(config.window.max_samples, 2);
        assert_eq!(config.window.liveness_timeout_secs, 45);
        assert_eq!(config.poll_targets.len(), 1);
    }

    #[test]
    fn malformed_values_fail_startup() {
        assert!(config_from(&[("BADNODE_SERVER_BIND", "nowhere")]).is_err());
        assert!(config_from(&[("BADNODE_CLOCK_SKEW_SECS", "-3")]).is_err());
        assert!(config_from(&[("BADNODE_WINDOW_MAX_SAMPLES", "0")]).is_err());
    }

    #[test]
    fn poll_targets_parse_multiple_entries() {
        let targets =
            parse_poll_targets("geth-1=http://10.0.0.1:8545, erigon-2=https://rpc.example.org ,")
                .unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].node_id.as_str(), "erigon-2");
        assert_eq!(targets[1].rpc_url, "https://rpc.example.org");
    }

    #[test]
    fn poll_targets_reject_duplicates_and_bad_entries() {
        assert!(parse_poll_targets("a=http://x,a=http://y").is_err());
        assert!(parse_poll_targets("no-separator").is_err());
        assert!(parse_poll_targets("a=ftp://x").is_err());
        assert!(parse_poll_targets("=http://x").is_err());
    }
}
