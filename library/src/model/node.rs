//! Node instances placed in a graph.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::property::{PropertyMap, PropertyValue};

fn enabled_by_default() -> bool {
    true
}

/// A node in the data-flow graph.
///
/// All node types share this structure; `type_id` references a
/// `NodeDefinition` in the registry which supplies ports and behavior.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub type_id: String,
    #[serde(default)]
    pub config: PropertyMap,
    /// Values typed in by hand on unconnected inputs.
    #[serde(default, rename = "inputValues")]
    pub inputs: PropertyMap,
    /// Last computed outputs.
    #[serde(default, rename = "outputValues", skip_serializing_if = "PropertyMap::is_empty")]
    pub outputs: PropertyMap,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl NodeInstance {
    pub fn new(type_id: &str) -> Self {
        Self::new_with_id(&Uuid::new_v4().to_string(), type_id)
    }

    pub fn new_with_id(id: &str, type_id: &str) -> Self {
        Self {
            id: id.to_string(),
            type_id: type_id.to_string(),
            config: PropertyMap::new(),
            inputs: PropertyMap::new(),
            outputs: PropertyMap::new(),
            enabled: true,
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    pub fn with_input(mut self, port: &str, value: impl Into<PropertyValue>) -> Self {
        self.inputs.insert(port.to_string(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
