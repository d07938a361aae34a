//! Connection model for the data-flow graph.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::property::PropertyValue;

/// Semantic type of a port.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    /// Floating point scalar (f64)
    Scalar,
    /// Integer value (i64)
    Integer,
    Boolean,
    String,
    /// RGBA color
    Color,
    /// Audio signal handle
    Audio,
    /// Image/texture handle
    Image,
    /// Deploy intent flowing from a deploy root toward its targets
    Command,
    /// Concrete client addressing
    Client,
    /// Accepts any non-routing type
    Any,
}

impl PortType {
    /// Routing types never mix with data types, not even through `Any`.
    pub fn is_routing(self) -> bool {
        matches!(self, PortType::Command | PortType::Client)
    }

    pub fn compatible_with(self, other: PortType) -> bool {
        if self == other {
            return true;
        }
        if self.is_routing() || other.is_routing() {
            return false;
        }
        self == PortType::Any || other == PortType::Any
    }
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PortType::Scalar => "scalar",
            PortType::Integer => "integer",
            PortType::Boolean => "boolean",
            PortType::String => "string",
            PortType::Color => "color",
            PortType::Audio => "audio",
            PortType::Image => "image",
            PortType::Command => "command",
            PortType::Client => "client",
            PortType::Any => "any",
        };
        write!(f, "{}", s)
    }
}

/// Declared port on a node type.
#[derive(Clone, Debug, PartialEq)]
pub struct PortSpec {
    /// Internal name used for connections (e.g. "in", "volume")
    pub id: String,
    pub display_name: String,
    pub port_type: PortType,
    /// Value used when nothing else feeds the port (inputs only)
    pub default_value: Option<PropertyValue>,
    /// Consumed by a side effect rather than by downstream nodes
    pub sink: bool,
}

impl PortSpec {
    pub fn new(id: &str, display_name: &str, port_type: PortType) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            port_type,
            default_value: None,
            sink: false,
        }
    }

    pub fn with_default(mut self, value: impl Into<PropertyValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn as_sink(mut self) -> Self {
        self.sink = true;
        self
    }
}

/// Identifies a specific port on a specific node.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct PortRef {
    pub node_id: String,
    pub port_id: String,
}

impl PortRef {
    pub fn new(node_id: &str, port_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            port_id: port_id.to_string(),
        }
    }
}

fn new_connection_id() -> String {
    Uuid::new_v4().to_string()
}

/// An edge in the data-flow graph: output port -> input port.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Connection {
    #[serde(default = "new_connection_id")]
    pub id: String,
    pub source: PortRef,
    pub target: PortRef,
}

impl Connection {
    pub fn new(source: PortRef, target: PortRef) -> Self {
        Self {
            id: new_connection_id(),
            source,
            target,
        }
    }

    /// Shorthand for `(node, port) -> (node, port)`.
    pub fn between(from: (&str, &str), to: (&str, &str)) -> Self {
        Self::new(PortRef::new(from.0, from.1), PortRef::new(to.0, to.1))
    }
}
