pub mod node_definitions;
pub mod node_types;
pub mod registry;

pub use node_types::{ConfigField, NodeCategory, NodeDefinition, NodeProcessor, NodeRole};
pub use registry::{NodeRegistry, SharedRegistry};
