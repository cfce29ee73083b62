// Path: crates/node/tests/cluster_e2e.rs

//! End-to-end tests running real nodes on ephemeral ports: local writes,
//! admission rejection, two-node convergence and late join.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use patchwork_node::{start, NodeConfig, RunningNode};
use patchwork_sync::SyncConfig;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};

fn fast_sync() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_millis(50),
        backoff: Duration::from_millis(100),
    }
}

async fn launch(nickname: &str, listen_addr: &str, peers: Vec<String>) -> Result<RunningNode> {
    start(NodeConfig {
        listen_addr: listen_addr.to_owned(),
        nickname: nickname.to_owned(),
        peers,
        sync: fast_sync(),
    })
    .await
}

/// Reserves an ephemeral port so two nodes can be configured as each other's
/// peer before either is up.
fn reserve_addr() -> Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.to_string())
}

async fn get_json(addr: SocketAddr, path: &str) -> Result<Value> {
    let value = reqwest::get(format!("http://{addr}{path}"))
        .await?
        .json()
        .await?;
    Ok(value)
}

async fn post_replace(addr: SocketAddr, body: &str) -> Result<reqwest::StatusCode> {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/replace"))
        .body(body.to_owned())
        .send()
        .await?;
    Ok(resp.status())
}

async fn wait_for_json(addr: SocketAddr, path: &str, expected: &Value) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(value) = get_json(addr, path).await {
            if &value == expected {
                return Ok(());
            }
        }
        if tokio::time::Instant::now() > deadline {
            bail!("timed out waiting for {path} to become {expected}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Reads one update frame from a node's websocket endpoint, optionally
/// advertising a `VClock` header.
async fn fetch_updates(addr: SocketAddr, vclock: Option<&str>) -> Result<Vec<Value>> {
    let mut request = format!("ws://{addr}/ws").into_client_request()?;
    if let Some(raw) = vclock {
        request
            .headers_mut()
            .insert("VClock", HeaderValue::from_str(raw)?);
    }
    let (mut socket, _) = connect_async(request).await?;
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).context("frame is not a transaction list")
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => bail!("websocket read failed: {e}"),
            None => bail!("connection closed before the update frame"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn single_node_write_roundtrip() -> Result<()> {
    let node = launch("A", "127.0.0.1:0", vec![]).await?;
    let addr = node.local_addr();

    let status = post_replace(addr, r#"[{"op":"add","path":"/A","value":""}]"#).await?;
    assert_eq!(status, reqwest::StatusCode::OK);

    wait_for_json(addr, "/vclock", &json!({"A": 1})).await?;
    assert_eq!(get_json(addr, "/get").await?, json!({"A": ""}));

    node.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn cross_slot_write_is_rejected() -> Result<()> {
    let node = launch("A", "127.0.0.1:0", vec![]).await?;
    let addr = node.local_addr();

    let status = post_replace(addr, r#"[{"op":"add","path":"/B","value":"x"}]"#).await?;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    let status = post_replace(addr, "not a patch").await?;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    assert_eq!(get_json(addr, "/get").await?, json!({}));
    assert_eq!(get_json(addr, "/vclock").await?, json!({}));

    node.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn two_peered_nodes_converge() -> Result<()> {
    let addr_a = reserve_addr()?;
    let addr_b = reserve_addr()?;
    let node_a = launch("A", &addr_a, vec![addr_b.clone()]).await?;
    let node_b = launch("B", &addr_b, vec![addr_a.clone()]).await?;

    let status = post_replace(
        node_a.local_addr(),
        r#"[{"op":"add","path":"/A","value":"hello"}]"#,
    )
    .await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    let status = post_replace(
        node_b.local_addr(),
        r#"[{"op":"add","path":"/B","value":"world"}]"#,
    )
    .await?;
    assert_eq!(status, reqwest::StatusCode::OK);

    let converged = json!({"A": "hello", "B": "world"});
    let clocks = json!({"A": 1, "B": 1});
    for node in [&node_a, &node_b] {
        wait_for_json(node.local_addr(), "/get", &converged).await?;
        wait_for_json(node.local_addr(), "/vclock", &clocks).await?;
    }

    node_a.shutdown().await?;
    node_b.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn late_joiner_gets_collapsed_history() -> Result<()> {
    let node_a = launch("A", "127.0.0.1:0", vec![]).await?;
    let addr_a = node_a.local_addr();

    // Five successive edits of A's slot; the first one exercises the
    // first-contact prelude because it is a bare replace.
    for n in 1..=5 {
        let body = format!(r#"[{{"op":"replace","path":"/A","value":"v{n}"}}]"#);
        let status = post_replace(addr_a, &body).await?;
        assert_eq!(status, reqwest::StatusCode::OK);
    }
    wait_for_json(addr_a, "/vclock", &json!({"A": 5})).await?;

    let node_c = launch("C", "127.0.0.1:0", vec![addr_a.to_string()]).await?;
    let addr_c = node_c.local_addr();
    wait_for_json(addr_c, "/get", &json!({"A": "v5"})).await?;
    wait_for_json(addr_c, "/vclock", &json!({"A": 5})).await?;

    // The joiner received A's history as a single materializing add, not
    // five transactions.
    let journal = fetch_updates(addr_c, None).await?;
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0]["Source"], json!("A"));
    assert_eq!(journal[0]["Id"], json!(5));

    node_c.shutdown().await?;
    node_a.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_vclock_header_returns_full_journal() -> Result<()> {
    let node = launch("A", "127.0.0.1:0", vec![]).await?;
    let addr = node.local_addr();

    for n in 1..=3 {
        let body = format!(r#"[{{"op":"replace","path":"/A","value":{n}}}]"#);
        post_replace(addr, &body).await?;
    }
    wait_for_json(addr, "/vclock", &json!({"A": 3})).await?;

    // No header and an explicitly empty header both mean "everything".
    for header in [None, Some("")] {
        let journal = fetch_updates(addr, header).await?;
        let ids: Vec<_> = journal.iter().map(|t| t["Id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    // A caught-up caller gets an empty frame.
    let updates = fetch_updates(addr, Some(r#"{"A":3}"#)).await?;
    assert!(updates.is_empty());

    // A stale caller gets exactly the missing suffix.
    let updates = fetch_updates(addr, Some(r#"{"A":1}"#)).await?;
    let ids: Vec<_> = updates.iter().map(|t| t["Id"].clone()).collect();
    assert_eq!(ids, vec![json!(2), json!(3)]);

    node.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_vclock_header_is_rejected() -> Result<()> {
    let node = launch("A", "127.0.0.1:0", vec![]).await?;
    let addr = node.local_addr();

    let mut request = format!("ws://{addr}/ws").into_client_request()?;
    request
        .headers_mut()
        .insert("VClock", HeaderValue::from_static("not json"));
    assert!(connect_async(request).await.is_err());

    node.shutdown().await
}

#[tokio::test(flavor = "multi_thread")]
async fn demo_page_is_served() -> Result<()> {
    let node = launch("A", "127.0.0.1:0", vec![]).await?;
    let resp = reqwest::get(format!("http://{}/test", node.local_addr())).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html")));
    assert!(resp.text().await?.contains("patchwork"));

    node.shutdown().await
}
