use std::sync::Arc;

use gpunet_peers::{PeerRecord, PeerRegistry};

use crate::front::ServiceFront;
use crate::metrics::Metrics;

/// Per-front axum state. Registry, local record and metrics are shared
/// across every front on the host.
#[derive(Clone)]
pub struct AppState {
    pub front: Arc<ServiceFront>,
    pub registry: Arc<PeerRegistry>,
    pub local: Arc<PeerRecord>,
    pub metrics: Arc<Metrics>,
}
