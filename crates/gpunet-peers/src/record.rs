use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use gpunet_common::util::now_ms;
use gpunet_common::{PeerDeviceStatus, PeerSnapshot};

use crate::{PeerError, FRESHNESS_WINDOW_MS};

/// Liveness, link speed and device load of one remote host.
///
/// The device list sits behind the record's own lock, so writers to one peer
/// never contend with readers or writers of another.
#[derive(Debug)]
pub struct PeerRecord {
    address: String,
    last_seen_ms: AtomicU64,
    bandwidth_mbps: AtomicU64,
    devices: RwLock<Vec<PeerDeviceStatus>>,
}

impl PeerRecord {
    pub fn new(address: impl Into<String>, device_count: usize) -> Self {
        Self::with_devices(address, vec![PeerDeviceStatus::default(); device_count])
    }

    pub fn with_devices(address: impl Into<String>, devices: Vec<PeerDeviceStatus>) -> Self {
        Self {
            address: address.into(),
            last_seen_ms: AtomicU64::new(now_ms()),
            bandwidth_mbps: AtomicU64::new(0),
            devices: RwLock::new(devices),
        }
    }

    pub fn from_snapshot(snapshot: PeerSnapshot) -> Self {
        Self::with_devices(snapshot.address, snapshot.devices)
    }

    /// Parses the canonical JSON produced by [`PeerRecord::to_json`].
    pub fn from_json(data: &str) -> Result<Self, PeerError> {
        let snapshot: PeerSnapshot = serde_json::from_str(data)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn read_devices(&self) -> RwLockReadGuard<'_, Vec<PeerDeviceStatus>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_devices(&self) -> RwLockWriteGuard<'_, Vec<PeerDeviceStatus>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_device_status(
        &self,
        index: usize,
        status: PeerDeviceStatus,
    ) -> Result<(), PeerError> {
        let mut devices = self.write_devices();
        let len = devices.len();
        let slot = devices
            .get_mut(index)
            .ok_or(PeerError::IndexOutOfRange { index, len })?;
        *slot = status;
        Ok(())
    }

    pub fn device_status(&self, index: usize) -> Result<PeerDeviceStatus, PeerError> {
        let devices = self.read_devices();
        devices
            .get(index)
            .cloned()
            .ok_or(PeerError::IndexOutOfRange {
                index,
                len: devices.len(),
            })
    }

    pub fn device_count(&self) -> usize {
        self.read_devices().len()
    }

    /// Replaces the whole device list at once, e.g. from a heartbeat.
    pub fn replace_devices(&self, devices: Vec<PeerDeviceStatus>) {
        *self.write_devices() = devices;
    }

    /// Resizes the device list, keeping existing entries and padding with defaults.
    pub fn resize_devices(&self, device_count: usize) {
        self.write_devices()
            .resize(device_count, PeerDeviceStatus::default());
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            address: self.address.clone(),
            devices: self.read_devices().clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, PeerError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    pub fn touch(&self) {
        self.touch_at(now_ms());
    }

    pub fn touch_at(&self, ts_ms: u64) {
        self.last_seen_ms.store(ts_ms, Ordering::Relaxed);
    }

    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms.load(Ordering::Relaxed)
    }

    pub fn bandwidth_mbps(&self) -> u64 {
        self.bandwidth_mbps.load(Ordering::Relaxed)
    }

    pub fn set_bandwidth_mbps(&self, mbps: u64) {
        self.bandwidth_mbps.store(mbps, Ordering::Relaxed);
    }

    pub fn is_active_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms()) <= FRESHNESS_WINDOW_MS
    }
}
