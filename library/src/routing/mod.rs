//! Command routing: from deploy roots to concrete client ids.

pub mod audience;
pub mod resolver;
pub mod selector;

pub use audience::{Audience, ClientInfo};
pub use resolver::{DeploymentPlan, ResolveOptions, resolve_targets};
pub use selector::{SelectionMode, select_clients, stable_hash};
