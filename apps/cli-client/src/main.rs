use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use client_sdk::StatusClient;
use common::{ClientStatus, Health, StatusSample};

#[derive(Debug, Parser)]
#[command(name = "badnode")]
#[command(about = "CLI client for the badnode EVM node status service")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:9000")]
    server_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Report one status sample for a node
    Report {
        node_id: String,
        /// syncing, listening (ok), stopped (down) or unreachable
        status: ClientStatus,
        #[arg(long, default_value = "")]
        detail: String,
        /// Observation time in unix seconds; defaults to now
        #[arg(long)]
        timestamp: Option<u64>,
        #[arg(long)]
        chain_id: Option<u64>,
        #[arg(long)]
        client_version: Option<String>,
        #[arg(long)]
        block_number: Option<u64>,
    },
    /// Show the status window of a node
    Get { node_id: String },
    /// List nodes, optionally only healthy or bad ones
    List {
        #[arg(long)]
        health: Option<Health>,
    },
    /// Remove nodes that have not been seen for a while
    Purge {
        #[arg(long, conflicts_with = "older_than_unix")]
        unseen_for_secs: Option<u64>,
        #[arg(long)]
        older_than_unix: Option<u64>,
    },
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = StatusClient::new(&cli.server_url);

    match cli.command {
        Commands::Report {
            node_id,
            status,
            detail,
            timestamp,
            chain_id,
            client_version,
            block_number,
        } => {
            let mut sample = StatusSample::new(timestamp.unwrap_or_else(unix_ts), status)
                .with_detail(detail);
            sample.chain_id = chain_id;
            sample.client_version = client_version;
            sample.block_number = block_number;

            let ack = client.report(&node_id, &sample).await?;
            println!(
                "reported {} for '{}' (new node: {}, out of order: {}, evicted: {})",
                status, ack.node_id, ack.created, ack.out_of_order, ack.evicted
            );
        }
        Commands::Get { node_id } => {
            let response = client.query(&node_id).await?;
            match response.window {
                Some(window) => println!("{}", serde_json::to_string_pretty(&window)?),
                None => println!("node '{}' has never been observed", response.node_id),
            }
        }
        Commands::List { health } => {
            let nodes = client.list(health).await?;
            if nodes.is_empty() {
                println!("no nodes");
            }
            for node in nodes {
                println!(
                    "{}\t{}\t{}\tlast_seen={}{}",
                    node.node_id,
                    node.health,
                    node.latest_status,
                    node.last_seen_unix,
                    if node.stale { "\tstale" } else { "" }
                );
            }
        }
        Commands::Purge {
            unseen_for_secs,
            older_than_unix,
        } => {
            let report = match (unseen_for_secs, older_than_unix) {
                (Some(secs), None) => client.purge_unseen_for(secs).await?,
                (None, Some(cutoff)) => client.purge_older_than(cutoff).await?,
                _ => bail!("pass --unseen-for-secs or --older-than-unix"),
            };
            println!(
                "removed {} node(s) last seen before {}",
                report.removed, report.older_than_unix
            );
        }
        Commands::Health => {
            let health = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }

    Ok(())
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
