// Path: crates/node/src/lib.rs
#![forbid(unsafe_code)]

//! # Patchwork Node
//!
//! Supervisor wiring for a single node: one Transaction Manager applier, one
//! HTTP/websocket gateway, one replication worker per configured peer, all
//! sharing a single bounded input queue and a watch-channel shutdown signal.
//!
//! The in-process [`start`] / [`RunningNode::shutdown`] API is what the
//! binary uses, and doubles as the launch harness for end-to-end tests.

/// Tracing initialization and per-node log-file wiring.
pub mod telemetry;

use anyhow::{bail, Context, Result};
use patchwork_gateway::{run_server, GatewayState};
use patchwork_sync::{run_peer_sync, SyncConfig};
use patchwork_tm::TransactionManager;
use patchwork_types::{Submission, TM_QUEUE_DEPTH};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    task::JoinHandle,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything needed to bring a node up.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to listen on; `host:0` picks an ephemeral port.
    pub listen_addr: String,
    /// This node's source nickname, which is also its slot key.
    pub nickname: String,
    /// Peer `host:port` addresses to replicate from.
    pub peers: Vec<String>,
    /// Poll cadence for the replication workers.
    pub sync: SyncConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "localhost:8080".to_owned(),
            nickname: "Contramund".to_owned(),
            peers: Vec::new(),
            sync: SyncConfig::default(),
        }
    }
}

/// A started node. Dropping it abandons the tasks; call
/// [`RunningNode::shutdown`] for an orderly exit.
pub struct RunningNode {
    local_addr: SocketAddr,
    submit: mpsc::Sender<Submission>,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
    applier: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl RunningNode {
    /// The address the gateway is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flips the shutdown signal, drains the HTTP server within a fixed
    /// grace period, stops the replication workers, then closes the input
    /// queue so the applier can finish whatever is still enqueued.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);

        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.server)
            .await
            .is_err()
        {
            tracing::warn!(target: "node", "server did not drain in time, aborting");
            self.server.abort();
        }
        for worker in self.workers {
            worker.await.ok();
        }

        // All other senders are gone once the server and workers have
        // stopped; dropping ours closes the queue.
        drop(self.submit);
        self.applier.await.context("applier task panicked")?;
        Ok(())
    }
}

/// Binds the listener, wires the components together and spawns their tasks.
pub async fn start(config: NodeConfig) -> Result<RunningNode> {
    if config.nickname.is_empty() {
        bail!("nickname must be non-empty");
    }

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("cannot listen on {}", config.listen_addr))?;
    let local_addr = listener.local_addr()?;

    let tm = Arc::new(TransactionManager::new(config.nickname.clone()));
    let (submit, queue) = mpsc::channel(TM_QUEUE_DEPTH);
    let (shutdown, _) = watch::channel(false);

    let applier = tokio::spawn({
        let tm = tm.clone();
        async move { tm.run(queue).await }
    });

    let workers = config
        .peers
        .iter()
        .map(|peer| {
            tokio::spawn(run_peer_sync(
                peer.clone(),
                tm.clone(),
                submit.clone(),
                config.sync.clone(),
                shutdown.subscribe(),
            ))
        })
        .collect();

    let state = Arc::new(GatewayState {
        tm: tm.clone(),
        submit: submit.clone(),
    });
    let server = tokio::spawn({
        let shutdown_rx = shutdown.subscribe();
        async move {
            if let Err(error) = run_server(listener, state, shutdown_rx).await {
                tracing::error!(target: "node", %error, "gateway exited with error");
            }
        }
    });

    tracing::info!(
        target: "node",
        addr = %local_addr,
        nickname = %config.nickname,
        peers = config.peers.len(),
        "node started"
    );

    Ok(RunningNode {
        local_addr,
        submit,
        shutdown,
        server,
        applier,
        workers,
    })
}
