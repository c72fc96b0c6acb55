//! Pulls status samples from EVM nodes over JSON-RPC and reports them
//! through the service, like any pushed observation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use common::{ClientStatus, StatusSample};
use futures::future::join_all;
use reqwest::Client;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollTarget;
use crate::registry::unix_ts;
use crate::service::NodeStatusService;

pub(crate) async fn run_poller(
    service: Arc<NodeStatusService>,
    targets: Vec<PollTarget>,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) {
    if targets.is_empty() {
        debug!("no poll targets configured; poller idle");
        return;
    }

    let http = match Client::builder().timeout(timeout).build() {
        Ok(http) => http,
        Err(err) => {
            warn!(error = %err, "failed to build poller http client; poller disabled");
            return;
        }
    };

    info!(
        targets = targets.len(),
        interval_secs = interval.as_secs(),
        "node poller started"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let polls = targets.iter().map(|target| {
            let http = http.clone();
            async move { (target, poll_once(&http, &target.rpc_url).await) }
        });

        for (target, sample) in join_all(polls).await {
            if let Err(err) = service.report(target.node_id.as_str(), sample) {
                warn!(node_id = %target.node_id, error = %err, "poller report rejected");
            }
        }
    }

    info!("node poller stopped");
}

/// Takes one sample from a node. Unreachable nodes still yield a sample, so a
/// node that stops answering turns bad instead of silently aging out.
pub(crate) async fn poll_once(http: &Client, rpc_url: &str) -> StatusSample {
    let timestamp_unix = unix_ts();

    let listening = match rpc_call(http, rpc_url, "net_listening")
        .await
        .and_then(|value| value.as_bool().context("net_listening did not return a bool"))
    {
        Ok(listening) => listening,
        Err(err) => {
            return StatusSample::new(timestamp_unix, ClientStatus::Unreachable)
                .with_detail(format!("{err:#}"));
        }
    };

    let syncing = match rpc_call(http, rpc_url, "eth_syncing").await {
        Ok(value) => syncing_from_result(&value),
        Err(err) => {
            debug!(rpc_url, error = %err, "eth_syncing failed; assuming not syncing");
            false
        }
    };

    let mut sample = StatusSample::new(timestamp_unix, ClientStatus::from_flags(listening, syncing));
    sample.chain_id = rpc_call(http, rpc_url, "eth_chainId")
        .await
        .ok()
        .and_then(|value| parse_quantity(&value));
    sample.block_number = rpc_call(http, rpc_url, "eth_blockNumber")
        .await
        .ok()
        .and_then(|value| parse_quantity(&value));
    sample.client_version = rpc_call(http, rpc_url, "web3_clientVersion")
        .await
        .ok()
        .and_then(|value| value.as_str().map(ToString::to_string));
    sample.detail = format!("listening={listening} syncing={syncing}");
    sample
}

async fn rpc_call(http: &Client, rpc_url: &str, method: &str) -> Result<Value> {
    let response = http
        .post(rpc_url)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": [],
        }))
        .send()
        .await
        .with_context(|| format!("failed to call {method} on {rpc_url}"))?
        .error_for_status()
        .with_context(|| format!("{method} rejected by {rpc_url}"))?
        .json::<Value>()
        .await
        .with_context(|| format!("failed to decode {method} response"))?;

    rpc_result(method, response)
}

fn rpc_result(method: &str, mut response: Value) -> Result<Value> {
    if let Some(error) = response.get("error").filter(|error| !error.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("{method} returned error: {message}");
    }

    response
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| anyhow!("{method} response has no result"))
}

/// `eth_syncing` answers `false` when idle and a progress object while syncing.
fn syncing_from_result(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Object(_) => true,
        _ => false,
    }
}

fn parse_quantity(value: &Value) -> Option<u64> {
    let raw = value.as_str()?;
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}
