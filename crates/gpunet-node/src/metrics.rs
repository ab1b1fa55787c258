use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_inflight: AtomicU64,
    pub status_2xx: AtomicU64,
    pub status_4xx: AtomicU64,
    pub status_5xx: AtomicU64,
    pub unbound_rejections: AtomicU64,
    pub deadline_exceeded: AtomicU64,
    pub heartbeats_received: AtomicU64,
}

pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    let node = st.front.node_id();
    let body = format!(
        "gpunet_node_requests_total {}\n\
         gpunet_node_requests_inflight {}\n\
         gpunet_node_responses_2xx {}\n\
         gpunet_node_responses_4xx {}\n\
         gpunet_node_responses_5xx {}\n\
         gpunet_node_unbound_rejections_total {}\n\
         gpunet_node_deadline_exceeded_total {}\n\
         gpunet_node_heartbeats_received_total {}\n\
         gpunet_node_bound_devices{{numa_node=\"{node}\"}} {}\n\
         gpunet_node_active_leases {}\n\
         gpunet_node_known_peers {}\n\
         gpunet_node_local_bandwidth_mbps {}\n",
        st.metrics.requests_total.load(Ordering::Relaxed),
        st.metrics.requests_inflight.load(Ordering::Relaxed),
        st.metrics.status_2xx.load(Ordering::Relaxed),
        st.metrics.status_4xx.load(Ordering::Relaxed),
        st.metrics.status_5xx.load(Ordering::Relaxed),
        st.metrics.unbound_rejections.load(Ordering::Relaxed),
        st.metrics.deadline_exceeded.load(Ordering::Relaxed),
        st.metrics.heartbeats_received.load(Ordering::Relaxed),
        st.front.bound().len(),
        st.front.scheduler().active_leases().len(),
        st.registry.len(),
        st.local.bandwidth_mbps(),
    );
    (axum::http::StatusCode::OK, body)
}

pub async fn track_requests(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible> {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req_{}", uuid::Uuid::new_v4()));
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    st.metrics.requests_inflight.fetch_add(1, Ordering::Relaxed);
    let mut resp = next.run(req).await;
    st.metrics.requests_inflight.fetch_sub(1, Ordering::Relaxed);
    st.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let status = resp.status().as_u16();
    if status >= 500 {
        st.metrics.status_5xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 400 {
        st.metrics.status_4xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 200 {
        st.metrics.status_2xx.fetch_add(1, Ordering::Relaxed);
    }

    tracing::debug!(
        request_id=%request_id,
        node = st.front.node_id(),
        %method,
        path=%path,
        status,
        "request"
    );
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert("x-request-id", v);
    }
    Ok(resp)
}
