use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use gpunet_common::api::{
    CODE_DEADLINE_EXCEEDED, CODE_DEVICE_QUERY_FAILED, CODE_INTERNAL, CODE_INVALID_REQUEST,
    CODE_PROBE_TIMEOUT, CODE_UNBOUND, CODE_UNKNOWN_PEER, DEADLINE_HEADER,
};
use gpunet_common::{
    AcquireRequest, Ack, CommandOutput, DeviceInfo, DeviceStatus, ErrorBody, PeerHeartbeat,
    PeerSnapshot, RunRequest, TargetsQuery,
};
use gpunet_peers::PeerError;

use crate::front::FrontError;
use crate::metrics::{metrics_handler, track_requests};
use crate::state::AppState;

/// JSON error response carrying a stable `code`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::new(code, message),
        }
    }
}

impl From<FrontError> for ApiError {
    fn from(e: FrontError) -> Self {
        match &e {
            FrontError::Unbound { .. } => ApiError::new(StatusCode::FORBIDDEN, CODE_UNBOUND, e.to_string()),
            FrontError::Lease(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, CODE_INVALID_REQUEST, e.to_string())
            }
            _ if e.is_timeout() => {
                tracing::warn!(error=%e, "device tooling timed out");
                ApiError::new(StatusCode::GATEWAY_TIMEOUT, CODE_PROBE_TIMEOUT, e.to_string())
            }
            _ => {
                tracing::warn!(error=%e, "device tooling failed");
                ApiError::new(StatusCode::BAD_GATEWAY, CODE_DEVICE_QUERY_FAILED, e.to_string())
            }
        }
    }
}

impl From<PeerError> for ApiError {
    fn from(e: PeerError) -> Self {
        match &e {
            PeerError::UnknownPeer(_) => {
                ApiError::new(StatusCode::NOT_FOUND, CODE_UNKNOWN_PEER, e.to_string())
            }
            _ => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL, e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Builds the HTTP surface of one front.
pub fn routes(st: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/v1/devices", get(list_devices))
        .route("/v1/devices/:uuid/status", get(get_status))
        .route("/v1/devices/:uuid/acquire", post(acquire))
        .route("/v1/devices/:uuid/release", post(release))
        .route("/v1/devices/:uuid/run", post(run_command))
        .route("/v1/peers", get(list_peers))
        .route("/v1/peers/targets", get(peer_targets))
        .route("/v1/peers/heartbeat", post(peer_heartbeat))
        .route("/v1/peers/snapshot/:address", get(peer_snapshot))
        .route("/v1/local", get(local_snapshot))
        .layer(middleware::from_fn_with_state(st.clone(), enforce_deadline))
        .layer(middleware::from_fn_with_state(st.clone(), track_requests))
        .with_state(st)
}

/// Fails the request with 504 once the caller's `x-deadline-ms` budget is
/// spent. Dropping the handler future also kills any child process it spawned.
pub async fn enforce_deadline(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let budget = req
        .headers()
        .get(DEADLINE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let Some(ms) = budget else {
        return next.run(req).await;
    };

    match tokio::time::timeout(Duration::from_millis(ms), next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => {
            st.metrics.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(node = st.front.node_id(), deadline_ms = ms, "deadline exceeded");
            ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                CODE_DEADLINE_EXCEEDED,
                format!("deadline of {ms}ms exceeded"),
            )
            .into_response()
        }
    }
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn count_unbound(st: &AppState, r: &Result<impl Sized, FrontError>) {
    if matches!(r, Err(FrontError::Unbound { .. })) {
        st.metrics.unbound_rejections.fetch_add(1, Ordering::Relaxed);
    }
}

pub async fn list_devices(State(st): State<AppState>) -> Result<Json<Vec<DeviceInfo>>, ApiError> {
    Ok(Json(st.front.list_devices().await?))
}

pub async fn get_status(
    State(st): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<DeviceStatus>, ApiError> {
    let r = st.front.get_status(&uuid).await;
    count_unbound(&st, &r);
    Ok(Json(r?))
}

/// An empty body means no ttl was given; anything else must parse.
fn parse_acquire_body(body: &[u8]) -> Result<AcquireRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(AcquireRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            CODE_INVALID_REQUEST,
            format!("invalid acquire body: {e}"),
        )
    })
}

pub async fn acquire(
    State(st): State<AppState>,
    Path(uuid): Path<String>,
    body: Bytes,
) -> Result<Json<Ack>, ApiError> {
    let ttl = parse_acquire_body(&body)?.ttl_ms.map(Duration::from_millis);
    let r = st.front.acquire(&uuid, ttl);
    count_unbound(&st, &r);
    Ok(Json(r?))
}

pub async fn release(State(st): State<AppState>, Path(uuid): Path<String>) -> Json<Ack> {
    Json(st.front.release(&uuid))
}

pub async fn run_command(
    State(st): State<AppState>,
    Path(uuid): Path<String>,
    Json(req): Json<RunRequest>,
) -> Result<Json<CommandOutput>, ApiError> {
    let r = st.front.run_command(&uuid, &req.command).await;
    count_unbound(&st, &r);
    Ok(Json(r?))
}

pub async fn list_peers(State(st): State<AppState>) -> Json<Vec<PeerSnapshot>> {
    Json(st.registry.snapshots())
}

pub async fn peer_targets(State(st): State<AppState>, Query(q): Query<TargetsQuery>) -> String {
    st.registry.ranked_dial_targets(q.port)
}

pub async fn peer_heartbeat(
    State(st): State<AppState>,
    Json(hb): Json<PeerHeartbeat>,
) -> StatusCode {
    st.metrics.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    if hb.snapshot.address == st.local.address() {
        return StatusCode::NO_CONTENT;
    }
    st.registry.observe(hb);
    StatusCode::NO_CONTENT
}

pub async fn peer_snapshot(
    State(st): State<AppState>,
    Path(address): Path<String>,
) -> Result<Response, ApiError> {
    let body = st.registry.snapshot(&address)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

pub async fn local_snapshot(State(st): State<AppState>) -> Json<PeerSnapshot> {
    Json(st.local.snapshot())
}
