use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use gpunet_common::{PeerDeviceStatus, PeerHeartbeat};
use gpunet_peers::bandwidth::BandwidthProbe;
use gpunet_peers::PeerRecord;

use crate::device::{DeviceError, DeviceQuery};

/// Refreshes the local record from the device query, one index at a time.
pub async fn refresh_local_record(
    local: &PeerRecord,
    devices: &dyn DeviceQuery,
) -> Result<(), DeviceError> {
    let statuses = devices.device_statuses().await?;
    if local.device_count() != statuses.len() {
        local.resize_devices(statuses.len());
    }
    for (index, st) in statuses.into_iter().enumerate() {
        let status = PeerDeviceStatus {
            id: st.uuid,
            utilization_pct: st.utilization,
            memory_used_mb: st.used_memory_mb,
        };
        if let Err(e) = local.update_device_status(index, status) {
            tracing::warn!(error=%e, index, "failed to update local device status");
        }
    }
    local.touch();
    Ok(())
}

pub fn build_heartbeat(local: &PeerRecord) -> PeerHeartbeat {
    PeerHeartbeat {
        snapshot: local.snapshot(),
        bandwidth_mbps: local.bandwidth_mbps(),
    }
}

async fn send_heartbeat(http: &reqwest::Client, peer: &str, hb: &PeerHeartbeat) {
    let url = format!("http://{peer}/v1/peers/heartbeat");
    match http.post(&url).json(hb).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::debug!(peer=%peer, "heartbeat delivered");
        }
        Ok(resp) => {
            tracing::warn!(peer=%peer, status=%resp.status(), "heartbeat rejected");
        }
        Err(e) => {
            tracing::warn!(peer=%peer, error=%e, "heartbeat failed");
        }
    }
}

/// Periodically refreshes the local record and pushes it to every peer.
/// A failed refresh still sends the previous device list.
pub async fn heartbeat_loop(
    local: Arc<PeerRecord>,
    devices: Arc<dyn DeviceQuery>,
    peers: Vec<String>,
    interval: Duration,
) {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .unwrap_or_default();

    loop {
        if let Err(e) = refresh_local_record(&local, devices.as_ref()).await {
            tracing::warn!(error=%e, "device refresh failed");
        }

        let hb = build_heartbeat(&local);
        join_all(peers.iter().map(|peer| send_heartbeat(&http, peer, &hb))).await;

        tokio::time::sleep(interval).await;
    }
}

/// Periodically measures local link speed. Failures keep the last value.
pub async fn bandwidth_loop(probe: BandwidthProbe, local: Arc<PeerRecord>, interval: Duration) {
    loop {
        match probe.refresh(&local).await {
            Ok(mbps) => tracing::debug!(interface=%probe.interface(), mbps, "link speed"),
            Err(e) => tracing::warn!(interface=%probe.interface(), error=%e, "bandwidth probe failed"),
        }
        tokio::time::sleep(interval).await;
    }
}
