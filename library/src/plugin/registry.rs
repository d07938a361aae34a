//! Catalog of node definitions, keyed by type id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use crate::error::LibraryError;
use crate::plugin::node_definitions::register_all_node_types;
use crate::plugin::node_types::NodeDefinition;

pub type SharedRegistry = Arc<NodeRegistry>;

/// Registry of node types.
///
/// Shared between the manager (resolution, export) and every client
/// runtime. Definitions are immutable once registered.
pub struct NodeRegistry {
    inner: RwLock<HashMap<String, Arc<NodeDefinition>>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with the built-in node types.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_all_node_types(&registry);
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<NodeDefinition>>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<NodeDefinition>>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, def: NodeDefinition) -> Result<(), LibraryError> {
        let mut inner = self.write();
        if inner.contains_key(&def.type_id) {
            return Err(LibraryError::graph(format!(
                "Node type '{}' is already registered",
                def.type_id
            )));
        }
        debug!("NodeRegistry: registered '{}'", def.type_id);
        inner.insert(def.type_id.clone(), Arc::new(def));
        Ok(())
    }

    pub fn get(&self, type_id: &str) -> Option<Arc<NodeDefinition>> {
        self.read().get(type_id).cloned()
    }

    pub fn require(&self, type_id: &str) -> Result<Arc<NodeDefinition>, LibraryError> {
        self.get(type_id)
            .ok_or_else(|| LibraryError::UnknownNodeType(type_id.to_string()))
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.read().contains_key(type_id)
    }

    /// Registered type ids, sorted.
    pub fn type_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::node_types::NodeCategory;

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = NodeRegistry::new();
        registry
            .register(NodeDefinition::new("x.one", "One", NodeCategory::Custom))
            .unwrap();
        let err = registry
            .register(NodeDefinition::new("x.one", "Other", NodeCategory::Custom))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.require("x.one").unwrap().display_name, "One");
    }

    #[test]
    fn builtins_include_routing_types() {
        let registry = NodeRegistry::with_builtins();
        assert!(registry.require("audio.out").unwrap().is_deploy_root());
        assert!(registry.contains("route.clients"));
        assert!(matches!(
            registry.require("nope"),
            Err(LibraryError::UnknownNodeType(_))
        ));
    }
}
