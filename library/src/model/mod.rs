pub mod connection;
pub mod graph;
pub mod graph_analysis;
pub mod node;
pub mod property;

pub use connection::{Connection, PortRef, PortSpec, PortType};
pub use graph::Graph;
pub use node::NodeInstance;
pub use property::{Color, PropertyMap, PropertyValue};
