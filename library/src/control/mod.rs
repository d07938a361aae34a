pub mod bridges;
pub mod error_slot;
pub mod override_router;

pub use bridges::{BridgeAction, BridgeRoute, LiveBridges, Placement};
pub use error_slot::{DeployError, ErrorClass, ErrorSlot};
pub use override_router::{HostSource, OverrideHost, OverrideRouter, lookup_hosts};
