pub mod device;
pub mod exec;
pub mod front;
pub mod handlers;
pub mod heartbeat;
pub mod metrics;
pub mod state;
pub mod topology;

pub use front::{FrontContext, FrontError, ServiceFront};
pub use state::AppState;
