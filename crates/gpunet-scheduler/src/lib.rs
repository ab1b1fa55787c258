//! Lease-based mutual exclusion over accelerator devices.
//!
//! A device is either free or held by exactly one lease. Every lease carries a
//! ttl and an epoch; when the ttl elapses a background task releases the lease,
//! but only if the lease it was scheduled for is still the live one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("device {uuid} is already leased")]
    AlreadyLeased { uuid: String },
    #[error("lease ttl must be positive")]
    InvalidTtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Free,
    Leased,
}

/// Returned by a successful acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGrant {
    pub device_uuid: String,
    pub epoch: u64,
    pub ttl: Duration,
}

/// Read-only view of a live lease.
#[derive(Debug, Clone)]
pub struct LeaseInfo {
    pub device_uuid: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
    pub remaining: Duration,
    pub epoch: u64,
}

#[derive(Debug)]
struct Lease {
    acquired_at: Instant,
    acquired_wall: DateTime<Utc>,
    ttl: Duration,
    epoch: u64,
    expiry: AbortHandle,
}

impl Lease {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.acquired_at) < self.ttl
    }

    fn info(&self, uuid: &str, now: Instant) -> LeaseInfo {
        let elapsed = now.saturating_duration_since(self.acquired_at);
        LeaseInfo {
            device_uuid: uuid.to_string(),
            acquired_at: self.acquired_wall,
            ttl: self.ttl,
            remaining: self.ttl.saturating_sub(elapsed),
            epoch: self.epoch,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Only leased devices have an entry; absence means free.
    leases: HashMap<String, Lease>,
    next_epoch: u64,
}

/// Process-wide lease table. Cloning yields another handle to the same table.
///
/// `acquire` spawns the expiry task on the current Tokio runtime and must be
/// called from within one.
#[derive(Debug, Clone, Default)]
pub struct LeaseScheduler {
    inner: Arc<Mutex<Inner>>,
}

impl LeaseScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leases `uuid` for `ttl`. A zero ttl is refused since the lease would be
    /// dead on arrival.
    pub fn acquire(&self, uuid: &str, ttl: Duration) -> Result<LeaseGrant, LeaseError> {
        if ttl.is_zero() {
            return Err(LeaseError::InvalidTtl);
        }
        let now = Instant::now();
        let mut inner = self.lock();

        if let Some(current) = inner.leases.get(uuid) {
            if current.is_live(now) {
                return Err(LeaseError::AlreadyLeased {
                    uuid: uuid.to_string(),
                });
            }
        }

        // An expired lease whose task has not fired yet is replaced here.
        if let Some(expired) = inner.leases.remove(uuid) {
            expired.expiry.abort();
        }

        inner.next_epoch += 1;
        let epoch = inner.next_epoch;
        let expiry = schedule_expiry(Arc::downgrade(&self.inner), uuid.to_string(), epoch, ttl);
        inner.leases.insert(
            uuid.to_string(),
            Lease {
                acquired_at: now,
                acquired_wall: Utc::now(),
                ttl,
                epoch,
                expiry,
            },
        );
        drop(inner);

        tracing::info!(%uuid, epoch, ttl_ms = ttl.as_millis() as u64, "device leased");
        Ok(LeaseGrant {
            device_uuid: uuid.to_string(),
            epoch,
            ttl,
        })
    }

    /// Frees the device. Returns whether a live lease was released; releasing a
    /// free device is a no-op.
    pub fn release(&self, uuid: &str) -> bool {
        let now = Instant::now();
        let removed = self.lock().leases.remove(uuid);
        match removed {
            Some(lease) => {
                lease.expiry.abort();
                let was_live = lease.is_live(now);
                tracing::info!(%uuid, epoch = lease.epoch, "device released");
                was_live
            }
            None => false,
        }
    }

    pub fn state(&self, uuid: &str) -> LeaseState {
        let now = Instant::now();
        match self.lock().leases.get(uuid) {
            Some(lease) if lease.is_live(now) => LeaseState::Leased,
            _ => LeaseState::Free,
        }
    }

    pub fn is_leased(&self, uuid: &str) -> bool {
        self.state(uuid) == LeaseState::Leased
    }

    pub fn lease(&self, uuid: &str) -> Option<LeaseInfo> {
        let now = Instant::now();
        self.lock()
            .leases
            .get(uuid)
            .filter(|lease| lease.is_live(now))
            .map(|lease| lease.info(uuid, now))
    }

    pub fn active_leases(&self) -> Vec<LeaseInfo> {
        let now = Instant::now();
        let mut out: Vec<LeaseInfo> = self
            .lock()
            .leases
            .iter()
            .filter(|(_, lease)| lease.is_live(now))
            .map(|(uuid, lease)| lease.info(uuid, now))
            .collect();
        out.sort_by(|a, b| a.device_uuid.cmp(&b.device_uuid));
        out
    }

    fn expire(&self, uuid: &str, epoch: u64) {
        let mut inner = self.lock();
        match inner.leases.get(uuid) {
            Some(lease) if lease.epoch == epoch => {
                inner.leases.remove(uuid);
                drop(inner);
                tracing::info!(%uuid, epoch, "lease expired");
            }
            _ => {
                tracing::debug!(%uuid, epoch, "stale lease timer ignored");
            }
        }
    }
}

fn schedule_expiry(inner: Weak<Mutex<Inner>>, uuid: String, epoch: u64, ttl: Duration) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        if let Some(inner) = inner.upgrade() {
            LeaseScheduler { inner }.expire(&uuid, epoch);
        }
    })
    .abort_handle()
}
