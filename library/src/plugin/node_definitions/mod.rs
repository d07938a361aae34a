//! Built-in node type definitions.
//!
//! Bodies are deliberately small: real generators and media loaders live
//! outside this crate and register through the same `NodeRegistry`.

mod audio;
mod control;
mod data;
mod logic;
mod math;
mod media;
mod routing;

use log::warn;

use crate::model::connection::{PortSpec, PortType};
use crate::model::property::{PropertyMap, PropertyValue};
use crate::plugin::node_types::{NodeCategory, NodeDefinition};
use crate::plugin::registry::NodeRegistry;

/// Register all built-in node type definitions.
pub(crate) fn register_all_node_types(registry: &NodeRegistry) {
    for def in all_node_definitions() {
        if let Err(e) = registry.register(def) {
            warn!("Skipping built-in node type: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Port helpers
// ---------------------------------------------------------------------------

fn inp(id: &str, display: &str, pt: PortType) -> PortSpec {
    PortSpec::new(id, display, pt)
}

fn out(id: &str, display: &str, pt: PortType) -> PortSpec {
    PortSpec::new(id, display, pt)
}

fn node(type_id: &str, name: &str, cat: NodeCategory) -> NodeDefinition {
    NodeDefinition::new(type_id, name, cat)
}

// ---------------------------------------------------------------------------
// Value helpers for processors
// ---------------------------------------------------------------------------

fn scalar(map: &PropertyMap, key: &str, default: f64) -> f64 {
    map.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

fn single(key: &str, value: impl Into<PropertyValue>) -> PropertyMap {
    let mut outputs = PropertyMap::new();
    outputs.insert(key.to_string(), value.into());
    outputs
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

fn all_node_definitions() -> Vec<NodeDefinition> {
    [
        data::data_nodes(),
        math::math_nodes(),
        logic::logic_nodes(),
        audio::audio_nodes(),
        media::media_nodes(),
        routing::routing_nodes(),
        control::control_nodes(),
    ]
    .concat()
}
