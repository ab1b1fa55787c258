use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use gpunet_common::{Ack, CommandOutput, DeviceInfo, DeviceStatus};
use gpunet_scheduler::{LeaseError, LeaseScheduler};

use crate::device::{DeviceError, DeviceQuery};
use crate::exec::{CommandRunner, ExecError};

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum FrontError {
    #[error("device {uuid} is not bound to NUMA node {node_id}")]
    Unbound { uuid: String, node_id: u32 },
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl FrontError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrontError::Device(DeviceError::Timeout(_)) | FrontError::Exec(ExecError::Timeout(_))
        )
    }
}

/// State shared by every front on the host. One scheduler backs all fronts.
#[derive(Clone)]
pub struct FrontContext {
    pub scheduler: LeaseScheduler,
    pub devices: Arc<dyn DeviceQuery>,
    pub runner: Arc<dyn CommandRunner>,
    pub default_ttl: Duration,
}

/// Device service for one NUMA group.
///
/// Every operation except release is scoped to the group's bound UUIDs;
/// anything else is refused with [`FrontError::Unbound`] before touching the
/// scheduler or the vendor tooling.
pub struct ServiceFront {
    node_id: u32,
    port: u16,
    bound: BTreeSet<String>,
    ctx: FrontContext,
}

impl ServiceFront {
    pub fn new(node_id: u32, port: u16, bound: BTreeSet<String>, ctx: FrontContext) -> Self {
        Self {
            node_id,
            port,
            bound,
            ctx,
        }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn bound(&self) -> &BTreeSet<String> {
        &self.bound
    }

    pub fn scheduler(&self) -> &LeaseScheduler {
        &self.ctx.scheduler
    }

    pub fn is_bound(&self, uuid: &str) -> bool {
        self.bound.contains(uuid)
    }

    fn check_bound(&self, uuid: &str) -> Result<(), FrontError> {
        if self.is_bound(uuid) {
            return Ok(());
        }
        tracing::debug!(node = self.node_id, device=%uuid, "request for unbound device");
        Err(FrontError::Unbound {
            uuid: uuid.to_string(),
            node_id: self.node_id,
        })
    }

    /// Devices of this group, in the order the query tool reports them.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, FrontError> {
        let all = self.ctx.devices.list_devices().await?;
        Ok(all.into_iter().filter(|d| self.is_bound(&d.uuid)).collect())
    }

    pub async fn get_status(&self, uuid: &str) -> Result<DeviceStatus, FrontError> {
        self.check_bound(uuid)?;
        Ok(self.ctx.devices.device_status(uuid).await?)
    }

    /// Leases `uuid` for `ttl`, or the front's default when none is given.
    /// A device already held yields a rejected ack, not an error; a zero ttl is
    /// an error.
    pub fn acquire(&self, uuid: &str, ttl: Option<Duration>) -> Result<Ack, FrontError> {
        self.check_bound(uuid)?;
        let ttl = ttl.unwrap_or(self.ctx.default_ttl);
        match self.ctx.scheduler.acquire(uuid, ttl) {
            Ok(grant) => {
                tracing::info!(
                    node = self.node_id,
                    device=%uuid,
                    epoch = grant.epoch,
                    ttl_ms = ttl.as_millis() as u64,
                    "device acquired"
                );
                Ok(Ack::ok(format!(
                    "device {uuid} acquired for {}ms (epoch {})",
                    ttl.as_millis(),
                    grant.epoch
                )))
            }
            Err(e @ LeaseError::AlreadyLeased { .. }) => {
                tracing::info!(node = self.node_id, device=%uuid, "acquire rejected: {e}");
                Ok(Ack::rejected(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Not scoped to the bound set: a release is never refused. Releasing a
    /// free device is a no-op that still succeeds.
    pub fn release(&self, uuid: &str) -> Ack {
        if self.ctx.scheduler.release(uuid) {
            tracing::info!(node = self.node_id, device=%uuid, "device released");
            Ack::ok(format!("device {uuid} released"))
        } else {
            Ack::ok(format!("device {uuid} was not leased"))
        }
    }

    pub async fn run_command(&self, uuid: &str, command: &str) -> Result<CommandOutput, FrontError> {
        self.check_bound(uuid)?;
        let out = self.ctx.runner.run(uuid, command).await?;
        tracing::info!(
            node = self.node_id,
            device=%uuid,
            exit_status = out.exit_status,
            "command finished"
        );
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::device::testing::FakeDevices;
    use crate::exec::testing::EchoRunner;

    pub const HOST_DEVICES: [&str; 4] = ["GPU-a", "GPU-b", "GPU-c", "GPU-d"];

    pub fn context(exec_delay: Duration) -> FrontContext {
        FrontContext {
            scheduler: LeaseScheduler::new(),
            devices: Arc::new(FakeDevices::with_uuids(&HOST_DEVICES)),
            runner: Arc::new(EchoRunner { delay: exec_delay }),
            default_ttl: DEFAULT_LEASE_TTL,
        }
    }

    /// Node 0 owns GPU-a and GPU-b, node 1 owns GPU-c and GPU-d.
    pub fn two_fronts(ctx: FrontContext) -> (ServiceFront, ServiceFront) {
        let bound0 = BTreeSet::from(["GPU-a".to_string(), "GPU-b".to_string()]);
        let bound1 = BTreeSet::from(["GPU-c".to_string(), "GPU-d".to_string()]);
        (
            ServiceFront::new(0, 50051, bound0, ctx.clone()),
            ServiceFront::new(1, 50052, bound1, ctx),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_list_devices_is_scoped() {
        let (f0, f1) = two_fronts(context(Duration::ZERO));
        let uuids = |v: Vec<DeviceInfo>| v.into_iter().map(|d| d.uuid).collect::<Vec<_>>();

        assert_eq!(uuids(f0.list_devices().await.unwrap()), ["GPU-a", "GPU-b"]);
        assert_eq!(uuids(f1.list_devices().await.unwrap()), ["GPU-c", "GPU-d"]);
    }

    #[tokio::test]
    async fn test_unbound_device_refused_everywhere() {
        let (f0, _f1) = two_fronts(context(Duration::ZERO));

        assert!(matches!(
            f0.get_status("GPU-c").await,
            Err(FrontError::Unbound { node_id: 0, .. })
        ));
        assert!(matches!(f0.acquire("GPU-c", None), Err(FrontError::Unbound { .. })));
        assert!(matches!(
            f0.run_command("GPU-c", "true").await,
            Err(FrontError::Unbound { .. })
        ));
        assert!(!f0.scheduler().is_leased("GPU-c"));
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let (f0, _f1) = two_fronts(context(Duration::ZERO));

        assert!(f0.acquire("GPU-a", None).unwrap().ok);
        let second = f0.acquire("GPU-a", None).unwrap();
        assert!(!second.ok);
        assert!(second.msg.contains("already leased"));

        assert!(f0.release("GPU-a").ok);
        assert!(f0.release("GPU-a").ok);
        assert!(f0.acquire("GPU-a", None).unwrap().ok);
    }

    #[tokio::test]
    async fn test_fronts_share_one_scheduler() {
        let (f0, f1) = two_fronts(context(Duration::ZERO));
        assert!(f0.acquire("GPU-b", Some(Duration::from_secs(5))).unwrap().ok);
        assert!(f1.scheduler().is_leased("GPU-b"));
        assert!(f1.acquire("GPU-d", None).unwrap().ok);
        assert_eq!(f0.scheduler().active_leases().len(), 2);
    }

    #[tokio::test]
    async fn test_release_is_not_scoped() {
        let (f0, f1) = two_fronts(context(Duration::ZERO));
        assert!(f1.acquire("GPU-c", None).unwrap().ok);

        let ack = f0.release("GPU-c");
        assert!(ack.ok);
        assert!(!f1.scheduler().is_leased("GPU-c"));
        assert!(f0.release("GPU-z").ok);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_granted() {
        let (f0, _f1) = two_fronts(context(Duration::ZERO));
        for _ in 0..2 {
            assert!(matches!(
                f0.acquire("GPU-a", Some(Duration::ZERO)),
                Err(FrontError::Lease(LeaseError::InvalidTtl))
            ));
        }
        assert!(!f0.scheduler().is_leased("GPU-a"));
        assert!(f0.acquire("GPU-a", None).unwrap().ok);
        assert!(!f0.acquire("GPU-a", None).unwrap().ok);
    }

    #[tokio::test]
    async fn test_caller_ttl_expires_lease() {
        let (f0, _f1) = two_fronts(context(Duration::ZERO));
        assert!(f0.acquire("GPU-a", Some(Duration::from_millis(100))).unwrap().ok);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!f0.scheduler().is_leased("GPU-a"));
        assert!(f0.acquire("GPU-a", None).unwrap().ok);
    }

    #[tokio::test]
    async fn test_status_and_run_on_bound_device() {
        let (_f0, f1) = two_fronts(context(Duration::ZERO));
        let status = f1.get_status("GPU-c").await.unwrap();
        assert_eq!(status.uuid, "GPU-c");
        assert_eq!(status.utilization, 30);

        let out = f1.run_command("GPU-d", "nvidia-smi -L").await.unwrap();
        assert_eq!(out.output, "GPU-d: nvidia-smi -L");
        assert_eq!(out.exit_status, 0);
    }
}
