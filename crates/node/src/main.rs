// Path: crates/node/src/main.rs
#![forbid(unsafe_code)]

//! Entry point for the `patchwork-node` binary.

use anyhow::Result;
use clap::Parser;
use patchwork_node::{start, telemetry, NodeConfig};
use patchwork_sync::SyncConfig;
use std::{path::PathBuf, time::Duration};

#[derive(Parser, Debug)]
#[clap(
    name = "patchwork-node",
    version,
    about = "One replica of a shared JSON document: owns a single top-level slot and pulls the rest from its peers."
)]
struct Opts {
    /// Address to listen on.
    #[clap(short = 'p', long = "listen", default_value = "localhost:8080")]
    listen: String,

    /// This node's source nickname (its top-level slot key).
    #[clap(short = 'n', long = "nickname", default_value = "Contramund")]
    nickname: String,

    /// Directory the node's log file is written to.
    #[clap(long, default_value = ".")]
    log_dir: PathBuf,

    /// Replication poll interval in milliseconds.
    #[clap(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Additional back-off after a failed poll cycle, in milliseconds.
    #[clap(long, default_value_t = 3000)]
    backoff_ms: u64,

    /// Peer host:port addresses to replicate from.
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    let _guard = telemetry::init_tracing(&opts.log_dir, &opts.listen, &opts.nickname)?;

    let node = start(NodeConfig {
        listen_addr: opts.listen,
        nickname: opts.nickname,
        peers: opts.peers,
        sync: SyncConfig {
            poll_interval: Duration::from_millis(opts.poll_interval_ms),
            backoff: Duration::from_millis(opts.backoff_ms),
        },
    })
    .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!(target: "node", "terminating on interrupt");
    node.shutdown().await
}
