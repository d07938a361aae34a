pub mod controller;
pub mod status;
pub mod visual;

pub use controller::{Manager, ManagerTask};
pub use status::{ExecutorStatus, StatusTable};
pub use visual::{NodeVisualState, NullVisualSink, RecordingVisualSink, VisualStateSink};
