// Path: crates/gateway/src/lib.rs
#![forbid(unsafe_code)]

//! # Patchwork Gateway
//!
//! The HTTP/websocket surface of a node. Read endpoints serve copies taken
//! under the Transaction Manager's shared lock; the write endpoint validates
//! slot confinement and enqueues into the TM's input queue; the websocket
//! endpoint answers a peer's advertised version vector with one frame of
//! missing transactions.

use anyhow::Result;
use axum::{
    error_handling::HandleErrorLayer,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use json_patch::Patch;
use patchwork_tm::TransactionManager;
use patchwork_types::{first_escape, AdmissionError, ErrorCode, Submission, VClock};
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
};
use tower::{timeout::TimeoutLayer, BoxError, ServiceBuilder};
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

static TEST_PAGE: &str = include_str!("../static/index.html");

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BODY_BYTES: usize = 1024 * 1024;

// --- Error Handling ---

/// Error type shared by all handlers; renders as a
/// `{"error":{"code","message"}}` body.
pub enum AppError {
    /// The write admission path rejected the request.
    Admission(AdmissionError),
    /// Any other malformed input.
    BadRequest(String),
    /// An unexpected internal failure.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg, code) = match self {
            AppError::Admission(e) => (StatusCode::BAD_REQUEST, e.to_string(), e.code()),
            AppError::BadRequest(s) => (StatusCode::BAD_REQUEST, s, "INVALID_REQUEST"),
            AppError::Internal(e) => {
                tracing::error!(target: "gateway", "Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };
        (
            status,
            Json(serde_json::json!({ "error": {"code": code, "message": msg} })),
        )
            .into_response()
    }
}

// --- Shared State ---

/// Handles the route handlers share: the TM for reads, its input queue for
/// writes.
pub struct GatewayState {
    /// The node's Transaction Manager.
    pub tm: Arc<TransactionManager>,
    /// Sender half of the TM input queue.
    pub submit: mpsc::Sender<Submission>,
}

// --- Handlers ---

async fn snapshot_handler(State(state): State<Arc<GatewayState>>) -> Result<Response, AppError> {
    let body = state
        .tm
        .snapshot_bytes()
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

async fn vclock_handler(State(state): State<Arc<GatewayState>>) -> Json<VClock> {
    Json(state.tm.vclock())
}

async fn replace_handler(
    State(state): State<Arc<GatewayState>>,
    body: String,
) -> Result<StatusCode, AppError> {
    let patch: Patch = serde_json::from_str(&body)
        .map_err(|e| AppError::Admission(AdmissionError::MalformedPatch(e.to_string())))?;
    let nickname = state.tm.local_source();
    if let Some(path) = first_escape(&patch, nickname) {
        return Err(AppError::Admission(AdmissionError::ForeignSlot {
            path,
            slot: nickname.to_owned(),
        }));
    }
    // Acceptance means "queued": the applier stamps the id and applies.
    // Clients observe application through /vclock or /get.
    state
        .submit
        .send(Submission::Local { payload: body })
        .await
        .map_err(|_| AppError::Internal(anyhow::anyhow!("transaction queue closed")))?;
    Ok(StatusCode::OK)
}

async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    // The header must be validated here: after the upgrade there is no HTTP
    // status left to send.
    let advertised = match headers.get("VClock").map(|v| v.to_str()) {
        None => None,
        Some(Err(_)) => {
            return Err(AppError::BadRequest(
                "VClock header is not valid UTF-8".to_owned(),
            ))
        }
        Some(Ok("")) => None,
        Some(Ok(raw)) => Some(
            serde_json::from_str::<VClock>(raw)
                .map_err(|e| AppError::BadRequest(format!("cannot parse VClock header: {e}")))?,
        ),
    };
    Ok(ws.on_upgrade(move |socket| send_updates(socket, state, advertised)))
}

/// Writes one TEXT frame with the transactions the peer is missing, then
/// closes. An absent vclock means "send the full journal" (the demo page's
/// mode). The diff is copied out of the shared lock before any network I/O.
async fn send_updates(mut socket: WebSocket, state: Arc<GatewayState>, advertised: Option<VClock>) {
    let updates = match &advertised {
        Some(clock) => match state.tm.diff(clock) {
            Ok(updates) => updates,
            Err(error) => {
                // Fatal for this poll; the peer retries on its next cycle.
                tracing::error!(target: "gateway", %error, "cannot compute diff");
                return;
            }
        },
        None => state.tm.journal(),
    };
    let frame = match serde_json::to_string(&updates) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::error!(target: "gateway", %error, "cannot encode update frame");
            return;
        }
    };
    let count = updates.len();
    if let Err(error) = socket.send(Message::Text(frame)).await {
        tracing::debug!(target: "gateway", %error, "peer went away before the frame was written");
        return;
    }
    tracing::trace!(target: "gateway", transactions = count, "served update frame");
    let _ = socket.send(Message::Close(None)).await;
}

async fn test_page_handler() -> Html<&'static str> {
    Html(TEST_PAGE)
}

// Small helper used by HandleErrorLayer to produce structured responses.
async fn map_middleware_error(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(serde_json::json!({
                "error": { "code": "TIMEOUT", "message": "request timed out" }
            })),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": { "code": "OVERLOADED", "message": err.to_string() }
            })),
        )
    }
}

// --- Server ---

/// Builds the node's full route table.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/get", get(snapshot_handler))
        .route("/vclock", get(vclock_handler))
        .route("/replace", post(replace_handler))
        .route("/ws", get(ws_handler))
        .route("/test", get(test_page_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(map_middleware_error))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        // Intra-cluster protocol plus a local demo page; no origin policy.
        .layer(CorsLayer::permissive())
}

/// Serves the gateway on an already-bound listener until `shutdown_rx`
/// flips, then drains in-flight requests.
pub async fn run_server(
    listener: TcpListener,
    state: Arc<GatewayState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(target: "gateway", %addr, "listening");

    let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        shutdown_rx.changed().await.ok();
        tracing::info!(target: "gateway", "shutting down gracefully");
    });

    if let Err(e) = server.await {
        tracing::error!(target: "gateway", error = %e, "server error");
    }

    Ok(())
}
