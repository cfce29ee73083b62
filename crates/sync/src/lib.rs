// Path: crates/sync/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # Patchwork Sync
//!
//! One long-lived worker per configured peer. Each poll cycle the worker
//! dials the peer's websocket endpoint with this node's version vector in a
//! `VClock` header, reads back one frame of missing transactions and funnels
//! them into the local Transaction Manager's input queue. There is no
//! per-transaction acknowledgment: the next cycle's vclock is the implicit
//! ack, and any failure self-heals on a later poll.

use futures::StreamExt;
use patchwork_tm::TransactionManager;
use patchwork_types::{Submission, Transaction};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};

/// An error type for sync operations.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Poll cadence of a replication worker.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay between successful poll cycles.
    pub poll_interval: Duration,
    /// Additional delay after a failed cycle.
    pub backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            backoff: Duration::from_secs(3),
        }
    }
}

/// Runs the poll loop against one peer until `shutdown` flips.
pub async fn run_peer_sync(
    peer: String,
    tm: Arc<TransactionManager>,
    submit: mpsc::Sender<Submission>,
    config: SyncConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(target: "sync", %peer, "replication worker started");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
        match poll_once(&peer, &tm, &submit).await {
            Ok(received) => {
                if received > 0 {
                    tracing::debug!(target: "sync", %peer, received, "pulled transactions");
                }
            }
            Err(SyncError::Internal(reason)) => {
                // The queue only closes on shutdown; nothing left to poll for.
                tracing::debug!(target: "sync", %peer, %reason, "stopping worker");
                break;
            }
            Err(error) => {
                tracing::warn!(target: "sync", %peer, %error, "poll cycle failed");
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(config.backoff) => {}
                }
            }
        }
    }
    tracing::info!(target: "sync", %peer, "replication worker stopped");
}

/// One poll cycle: advertise the local vclock, read one frame, enqueue every
/// transaction it carries.
async fn poll_once(
    peer: &str,
    tm: &TransactionManager,
    submit: &mpsc::Sender<Submission>,
) -> Result<usize, SyncError> {
    let clock = serde_json::to_string(&tm.vclock())
        .map_err(|e| SyncError::Internal(e.to_string()))?;

    let mut request = format!("ws://{peer}/ws")
        .into_client_request()
        .map_err(|e| SyncError::Network(e.to_string()))?;
    request.headers_mut().insert(
        "VClock",
        HeaderValue::from_str(&clock).map_err(|e| SyncError::Network(e.to_string()))?,
    );

    let (mut socket, _response) = connect_async(request)
        .await
        .map_err(|e| SyncError::Network(e.to_string()))?;

    let frame = loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => {
                return Err(SyncError::Decode(format!(
                    "unexpected websocket message: {other:?}"
                )))
            }
            Some(Err(e)) => return Err(SyncError::Network(e.to_string())),
            None => {
                return Err(SyncError::Network(
                    "connection closed before the update frame".to_owned(),
                ))
            }
        }
    };

    let updates: Vec<Transaction> =
        serde_json::from_str(&frame).map_err(|e| SyncError::Decode(e.to_string()))?;
    let received = updates.len();
    for tx in updates {
        submit
            .send(Submission::Replicated(tx))
            .await
            .map_err(|_| SyncError::Internal("transaction queue closed".to_owned()))?;
    }
    socket.close(None).await.ok();
    Ok(received)
}
