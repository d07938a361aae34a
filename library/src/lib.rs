pub mod config;
pub mod control;
pub mod deploy;
pub mod driver;
pub mod error;
pub mod executor;
pub mod manager;
pub mod model;
pub mod plugin;
pub mod protocol;
pub mod routing;
pub mod runtime;
pub mod scheduler;
pub mod transport;
pub mod util;

pub use config::{AppConfig, BypassPolicy, ExecutorConfig, ManagerConfig};
pub use driver::{ManagerCommand, Session, run};
pub use error::LibraryError;
pub use executor::{ClientExecutor, ExecutorState};
pub use manager::{Manager, ManagerTask};
pub use model::{Connection, Graph, NodeInstance, PortRef, PropertyValue};
pub use plugin::{NodeDefinition, NodeRegistry, SharedRegistry};
pub use protocol::{ControlMessage, DeployPayload, StatusEvent, StatusKind};
pub use runtime::{DataflowRuntime, OverrideKey, OverrideKind};
