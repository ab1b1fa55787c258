use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gpunet_common::util::now_ms;
use gpunet_common::{PeerDeviceStatus, PeerHeartbeat, PeerSnapshot};

pub mod bandwidth;
pub mod record;

pub use record::PeerRecord;

/// A peer whose last heartbeat is older than this is left out of dial ranking.
pub const FRESHNESS_WINDOW_MS: u64 = 15_000;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("device index {index} out of range (peer has {len} devices)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("malformed peer record: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug)]
struct Slot {
    /// Discovery order, used to break bandwidth ties.
    seq: u64,
    record: Arc<PeerRecord>,
}

/// Known peers keyed by address.
///
/// The map is sharded (`DashMap`) and each record carries its own lock, so
/// updates to one peer never wait on another. Stale peers are kept; freshness
/// only matters at ranking time.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, Slot>,
    next_seq: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, address: &str) -> Option<Arc<PeerRecord>> {
        self.peers.get(address).map(|slot| slot.record.clone())
    }

    /// Registers `record`, replacing any record under the same address but
    /// keeping that address's discovery position.
    pub fn insert(&self, record: PeerRecord) -> Arc<PeerRecord> {
        let record = Arc::new(record);
        let address = record.address().to_string();
        self.peers
            .entry(address.clone())
            .and_modify(|slot| slot.record = record.clone())
            .or_insert_with(|| {
                tracing::info!(peer=%address, "peer discovered");
                Slot {
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    record: record.clone(),
                }
            });
        record
    }

    /// Returns the record for `address`, registering an empty one first if needed.
    pub fn discover(&self, address: &str) -> Arc<PeerRecord> {
        if let Some(record) = self.get(address) {
            return record;
        }
        self.peers
            .entry(address.to_string())
            .or_insert_with(|| {
                tracing::info!(peer=%address, "peer discovered");
                Slot {
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    record: Arc::new(PeerRecord::new(address, 0)),
                }
            })
            .record
            .clone()
    }

    /// Applies a heartbeat: refreshes devices and bandwidth and marks the peer seen now.
    pub fn observe(&self, heartbeat: PeerHeartbeat) -> Arc<PeerRecord> {
        let record = self.discover(&heartbeat.snapshot.address);
        record.replace_devices(heartbeat.snapshot.devices);
        record.set_bandwidth_mbps(heartbeat.bandwidth_mbps);
        record.touch();
        tracing::debug!(
            peer=%record.address(),
            bandwidth_mbps = heartbeat.bandwidth_mbps,
            "peer heartbeat"
        );
        record
    }

    pub fn update_device_status(
        &self,
        address: &str,
        index: usize,
        status: PeerDeviceStatus,
    ) -> Result<(), PeerError> {
        self.get(address)
            .ok_or_else(|| PeerError::UnknownPeer(address.to_string()))?
            .update_device_status(index, status)
    }

    pub fn snapshot(&self, address: &str) -> Result<String, PeerError> {
        self.get(address)
            .ok_or_else(|| PeerError::UnknownPeer(address.to_string()))?
            .to_json()
    }

    /// Parses a serialized record and registers it as seen now.
    pub fn load_snapshot(&self, data: &str) -> Result<Arc<PeerRecord>, PeerError> {
        let record = PeerRecord::from_json(data)?;
        Ok(self.insert(record))
    }

    pub fn snapshots(&self) -> Vec<PeerSnapshot> {
        let mut slots: Vec<(u64, Arc<PeerRecord>)> = self
            .peers
            .iter()
            .map(|slot| (slot.seq, slot.record.clone()))
            .collect();
        slots.sort_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, rec)| rec.snapshot()).collect()
    }

    /// Fresh peers, highest bandwidth first; equal bandwidth keeps discovery order.
    pub fn ranked_peers_at(&self, now_ms: u64) -> Vec<Arc<PeerRecord>> {
        let mut active: Vec<(u64, u64, Arc<PeerRecord>)> = self
            .peers
            .iter()
            .filter(|slot| slot.record.is_active_at(now_ms))
            .map(|slot| (slot.seq, slot.record.bandwidth_mbps(), slot.record.clone()))
            .collect();

        active.sort_by_key(|(seq, _, _)| *seq);
        active.sort_by(|a, b| b.1.cmp(&a.1));
        active.into_iter().map(|(_, _, rec)| rec).collect()
    }

    pub fn ranked_dial_targets(&self, port: u16) -> String {
        self.ranked_dial_targets_at(port, now_ms())
    }

    /// Comma-joined `address:port` list of fresh peers in rank order.
    pub fn ranked_dial_targets_at(&self, port: u16, now_ms: u64) -> String {
        self.ranked_peers_at(now_ms)
            .iter()
            .map(|rec| format!("{}:{}", rec.address(), port))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_000_000;

    fn peer(reg: &PeerRegistry, address: &str, bandwidth: u64, age_ms: u64) {
        let rec = reg.discover(address);
        rec.set_bandwidth_mbps(bandwidth);
        rec.touch_at(NOW - age_ms);
    }

    #[test]
    fn test_ranking_filters_stale_and_sorts_by_bandwidth() {
        let reg = PeerRegistry::default();
        peer(&reg, "Z", 2000, 20_000);
        peer(&reg, "Y", 500, 5_000);
        peer(&reg, "X", 1000, 5_000);

        assert_eq!(reg.ranked_dial_targets_at(9000, NOW), "X:9000,Y:9000");
    }

    #[test]
    fn test_ranking_ties_keep_discovery_order() {
        let reg = PeerRegistry::default();
        peer(&reg, "c", 100, 0);
        peer(&reg, "a", 100, 0);
        peer(&reg, "b", 900, 0);
        peer(&reg, "d", 100, 0);

        assert_eq!(
            reg.ranked_dial_targets_at(50051, NOW),
            "b:50051,c:50051,a:50051,d:50051"
        );
    }

    #[test]
    fn test_ranking_empty() {
        let reg = PeerRegistry::default();
        assert_eq!(reg.ranked_dial_targets_at(9000, NOW), "");
        peer(&reg, "old", 10_000, FRESHNESS_WINDOW_MS + 1);
        assert_eq!(reg.ranked_dial_targets_at(9000, NOW), "");
    }

    #[test]
    fn test_stale_peer_is_kept() {
        let reg = PeerRegistry::default();
        peer(&reg, "old", 10, 60_000);
        assert_eq!(reg.len(), 1);
        assert!(reg.snapshot("old").is_ok());
    }

    #[test]
    fn test_observe_heartbeat() {
        let reg = PeerRegistry::default();
        peer(&reg, "10.0.0.2", 0, 60_000);

        reg.observe(PeerHeartbeat {
            snapshot: PeerSnapshot {
                address: "10.0.0.2".to_string(),
                devices: vec![PeerDeviceStatus {
                    id: "GPU-0".to_string(),
                    utilization_pct: 12,
                    memory_used_mb: 300,
                }],
            },
            bandwidth_mbps: 25_000,
        });

        let rec = reg.get("10.0.0.2").unwrap();
        assert_eq!(rec.bandwidth_mbps(), 25_000);
        assert_eq!(rec.device_count(), 1);
        assert!(rec.is_active_at(now_ms()));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_update_unknown_peer() {
        let reg = PeerRegistry::default();
        let err = reg
            .update_device_status("nope", 0, PeerDeviceStatus::default())
            .unwrap_err();
        assert!(matches!(err, PeerError::UnknownPeer(addr) if addr == "nope"));
    }

    #[test]
    fn test_snapshot_load_roundtrip_registers_peer() {
        let src = PeerRegistry::default();
        src.insert(PeerRecord::new("10.0.0.3", 2));
        src.update_device_status(
            "10.0.0.3",
            1,
            PeerDeviceStatus {
                id: "GPU-1".to_string(),
                utilization_pct: 90,
                memory_used_mb: 4000,
            },
        )
        .unwrap();
        let data = src.snapshot("10.0.0.3").unwrap();

        let dst = PeerRegistry::default();
        let rec = dst.load_snapshot(&data).unwrap();
        assert_eq!(rec.snapshot(), src.get("10.0.0.3").unwrap().snapshot());
        assert!(dst.get("10.0.0.3").is_some());
    }

    #[test]
    fn test_insert_keeps_discovery_position() {
        let reg = PeerRegistry::default();
        peer(&reg, "first", 100, 0);
        peer(&reg, "second", 100, 0);

        let replaced = reg.insert(PeerRecord::new("first", 1));
        replaced.set_bandwidth_mbps(100);
        replaced.touch_at(NOW);

        assert_eq!(reg.ranked_dial_targets_at(1, NOW), "first:1,second:1");
    }

    #[test]
    fn test_concurrent_updates_on_distinct_peers() {
        let reg = Arc::new(PeerRegistry::default());
        for i in 0..4 {
            reg.insert(PeerRecord::new(format!("10.0.0.{i}"), 8));
        }

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    let addr = format!("10.0.0.{i}");
                    for idx in 0..8 {
                        reg.update_device_status(
                            &addr,
                            idx,
                            PeerDeviceStatus {
                                id: format!("GPU-{idx}"),
                                utilization_pct: i,
                                memory_used_mb: idx as u64,
                            },
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for i in 0..4u32 {
            let snap = reg.get(&format!("10.0.0.{i}")).unwrap().snapshot();
            assert!(snap.devices.iter().all(|d| d.utilization_pct == i));
        }
    }
}
