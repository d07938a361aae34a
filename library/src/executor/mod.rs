pub mod capabilities;
pub mod client;
pub mod sinks;

pub use capabilities::{CapabilityProbe, StaticCapabilities};
pub use client::{ClientExecutor, ExecutorState};
pub use sinks::{ChannelStatus, NoopReleaser, RecordingStatus, ResourceReleaser, StatusSink};
