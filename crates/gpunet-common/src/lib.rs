pub mod api;
pub mod device;
pub mod netif;
pub mod peer;
pub mod topology;
pub mod util;

pub use api::{AcquireRequest, Ack, ErrorBody, RunRequest, TargetsQuery};
pub use device::{CommandOutput, DeviceInfo, DeviceStatus};
pub use peer::{PeerDeviceStatus, PeerHeartbeat, PeerSnapshot};
pub use topology::NumaGroup;

pub mod telemetry;
