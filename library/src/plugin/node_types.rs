//! Node type definitions for the data-flow graph.

use std::sync::Arc;

use crate::model::connection::{PortSpec, PortType};
use crate::model::property::{PropertyMap, PropertyValue};
use crate::runtime::context::ProcessContext;

/// Category of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    /// Constants and conversions
    Data,
    /// Arithmetic on scalars
    Math,
    /// Pass-through and flow helpers
    Logic,
    /// Audio generators, processors and outputs
    Audio,
    /// Visual outputs
    Visual,
    /// File/stream backed media (video, samples)
    Media,
    /// Command routing: aggregators, client selectors, display sinks
    Routing,
    /// Live controllers sampled on the manager (MIDI, sliders)
    Control,
    /// Plugin-defined custom category
    Custom,
}

impl std::fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeCategory::Data => "Data",
            NodeCategory::Math => "Math",
            NodeCategory::Logic => "Logic",
            NodeCategory::Audio => "Audio",
            NodeCategory::Visual => "Visual",
            NodeCategory::Media => "Media",
            NodeCategory::Routing => "Routing",
            NodeCategory::Control => "Control",
            NodeCategory::Custom => "Custom",
        };
        write!(f, "{}", s)
    }
}

/// How target resolution treats a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Processor,
    /// Expands to concrete client ids.
    ClientSelector,
    /// Resolves to the local display session and display-class clients.
    DisplaySink,
    /// Manager-side value source bridged into deployed graphs.
    LiveSource,
}

/// Declared config field of a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigField {
    pub id: String,
    pub field_type: PortType,
    pub default_value: PropertyValue,
}

impl ConfigField {
    pub fn new(id: &str, field_type: PortType, default_value: impl Into<PropertyValue>) -> Self {
        Self {
            id: id.to_string(),
            field_type,
            default_value: default_value.into(),
        }
    }
}

/// Behavior of a node type.
///
/// `process` maps effective inputs and config to outputs. Hooks are optional.
pub trait NodeProcessor: Send + Sync {
    fn process(
        &self,
        inputs: &PropertyMap,
        config: &PropertyMap,
        ctx: &mut ProcessContext<'_>,
    ) -> PropertyMap;

    /// Called after `process` for sink nodes.
    fn on_sink(&self, _node_id: &str, _inputs: &PropertyMap, _config: &PropertyMap) {}

    /// Called when the node leaves the graph or is disabled; must release
    /// anything held in `state`.
    fn on_disable(&self, _node_id: &str, _state: &mut PropertyMap) {}
}

impl<F> NodeProcessor for F
where
    F: Fn(&PropertyMap, &PropertyMap, &mut ProcessContext<'_>) -> PropertyMap + Send + Sync,
{
    fn process(
        &self,
        inputs: &PropertyMap,
        config: &PropertyMap,
        ctx: &mut ProcessContext<'_>,
    ) -> PropertyMap {
        self(inputs, config, ctx)
    }
}

fn no_outputs(_: &PropertyMap, _: &PropertyMap, _: &mut ProcessContext<'_>) -> PropertyMap {
    PropertyMap::new()
}

/// Definition of a node type, registered in the `NodeRegistry`.
///
/// Node instances are `NodeInstance` structs whose `type_id` references one
/// of these. Immutable once registered.
#[derive(Clone)]
pub struct NodeDefinition {
    /// Unique type identifier (e.g. "audio.out", "math.add")
    pub type_id: String,
    pub display_name: String,
    pub category: NodeCategory,
    pub description: String,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    pub config_schema: Vec<ConfigField>,
    pub role: NodeRole,
    pub sink: bool,
    /// Holds prior-tick state; incoming edges do not constrain ordering.
    pub feedback: bool,
    /// Pure: outputs depend only on inputs and config.
    pub cacheable: bool,
    /// Media that only display-class clients can play.
    pub local_only: bool,
    pub capabilities: Vec<String>,
    pub processor: Arc<dyn NodeProcessor>,
}

impl std::fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("type_id", &self.type_id)
            .field("category", &self.category)
            .field("role", &self.role)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl NodeDefinition {
    pub fn new(type_id: &str, display_name: &str, category: NodeCategory) -> Self {
        Self {
            type_id: type_id.to_string(),
            display_name: display_name.to_string(),
            category,
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            config_schema: Vec::new(),
            role: NodeRole::Processor,
            sink: false,
            feedback: false,
            cacheable: false,
            local_only: false,
            capabilities: Vec::new(),
            processor: Arc::new(no_outputs),
        }
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<PortSpec>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<PortSpec>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_config(mut self, fields: Vec<ConfigField>) -> Self {
        self.config_schema = fields;
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_capabilities(mut self, caps: &[&str]) -> Self {
        self.capabilities = caps.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_processor(mut self, processor: impl NodeProcessor + 'static) -> Self {
        self.processor = Arc::new(processor);
        self
    }

    pub fn as_sink(mut self) -> Self {
        self.sink = true;
        self
    }

    pub fn as_feedback(mut self) -> Self {
        self.feedback = true;
        self
    }

    pub fn as_cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    pub fn as_local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    pub fn input(&self, port_id: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.id == port_id)
    }

    pub fn output(&self, port_id: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.id == port_id)
    }

    pub fn command_outputs(&self) -> impl Iterator<Item = &PortSpec> {
        self.outputs
            .iter()
            .filter(|p| p.port_type == PortType::Command)
    }

    pub fn has_command_output(&self) -> bool {
        self.command_outputs().next().is_some()
    }

    /// Sink exposing a command output: an entry point for target resolution.
    pub fn is_deploy_root(&self) -> bool {
        self.sink && self.has_command_output()
    }

    /// Default of a config field from the schema.
    pub fn config_default(&self, field: &str) -> Option<&PropertyValue> {
        self.config_schema
            .iter()
            .find(|f| f.id == field)
            .map(|f| &f.default_value)
    }
}
