//! Graph container: node instances plus connections.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::connection::{Connection, PortRef};
use crate::model::node::NodeInstance;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Graph {
    pub nodes: Vec<NodeInstance>,
    pub connections: Vec<Connection>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn get_node_mut(&mut self, id: &str) -> Option<&mut NodeInstance> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get_node(id).is_some()
    }

    /// Adds or replaces a node by id.
    pub fn add_node(&mut self, node: NodeInstance) {
        match self.get_node_mut(&node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    /// Removes a node and every connection touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<NodeInstance> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        self.connections
            .retain(|c| c.source.node_id != id && c.target.node_id != id);
        Some(self.nodes.remove(index))
    }

    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    pub fn remove_connection(&mut self, connection_id: &str) -> Option<Connection> {
        let index = self.connections.iter().position(|c| c.id == connection_id)?;
        Some(self.connections.remove(index))
    }

    /// The connection feeding an input port, if any.
    pub fn input_connection(&self, target: &PortRef) -> Option<&Connection> {
        self.connections.iter().find(|c| &c.target == target)
    }

    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.source.node_id == node_id)
    }

    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.target.node_id == node_id)
    }

    pub fn node_ids(&self) -> BTreeSet<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Copy holding only `keep` nodes and the connections between them.
    pub fn subgraph(&self, keep: &BTreeSet<String>) -> Graph {
        Graph {
            nodes: self
                .nodes
                .iter()
                .filter(|n| keep.contains(&n.id))
                .cloned()
                .collect(),
            connections: self
                .connections
                .iter()
                .filter(|c| keep.contains(&c.source.node_id) && keep.contains(&c.target.node_id))
                .cloned()
                .collect(),
        }
    }
}
