use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerDeviceStatus {
    pub id: String,
    #[serde(rename = "utilization")]
    pub utilization_pct: u32,
    #[serde(rename = "memory_used")]
    pub memory_used_mb: u64,
}

/// Canonical serialized form of a peer record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub address: String,
    #[serde(default)]
    pub devices: Vec<PeerDeviceStatus>,
}

/// Heartbeat a node sends to its peers: its snapshot plus the measured link speed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerHeartbeat {
    #[serde(flatten)]
    pub snapshot: PeerSnapshot,
    #[serde(default)]
    pub bandwidth_mbps: u64,
}
