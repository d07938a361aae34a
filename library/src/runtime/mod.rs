pub mod context;
pub mod engine;
pub mod overrides;
pub mod watchdog;

pub use engine::{BYPASS_KEY, DataflowRuntime, TickReport};
pub use overrides::{OverrideKey, OverrideKind, OverrideStore};
pub use watchdog::{TickWatchdog, WatchdogVerdict};
