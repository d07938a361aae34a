//! Order-independent topology signatures.

use sha2::{Digest, Sha256};

use crate::model::graph::Graph;

/// Hex SHA-256 over sorted `(node id, type)` pairs and sorted edges.
///
/// Config values, manual inputs and enabled flags are not part of the
/// signature: changing them never forces a redeploy.
pub fn topology_signature(graph: &Graph) -> String {
    let mut nodes: Vec<(&str, &str)> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.type_id.as_str()))
        .collect();
    nodes.sort_unstable();

    let mut edges: Vec<(&str, &str, &str, &str)> = graph
        .connections
        .iter()
        .map(|c| {
            (
                c.source.node_id.as_str(),
                c.source.port_id.as_str(),
                c.target.node_id.as_str(),
                c.target.port_id.as_str(),
            )
        })
        .collect();
    edges.sort_unstable();

    let mut hasher = Sha256::new();
    for (id, type_id) in nodes {
        hasher.update(format!("n:{}:{}\n", id, type_id));
    }
    for (src, src_port, dst, dst_port) in edges {
        hasher.update(format!("e:{}.{}>{}.{}\n", src, src_port, dst, dst_port));
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::connection::Connection;
    use crate::model::node::NodeInstance;

    #[test]
    fn authoring_order_does_not_matter() {
        let mut a = Graph::new();
        a.add_node(NodeInstance::new_with_id("osc", "audio.oscillator"));
        a.add_node(NodeInstance::new_with_id("out", "audio.out"));
        a.add_connection(Connection::between(("osc", "out"), ("out", "in")));

        let mut b = Graph::new();
        b.add_node(NodeInstance::new_with_id("out", "audio.out").with_input("volume", 0.2));
        b.add_node(NodeInstance::new_with_id("osc", "audio.oscillator"));
        b.add_connection(Connection::between(("osc", "out"), ("out", "in")));

        assert_eq!(topology_signature(&a), topology_signature(&b));
    }

    #[test]
    fn type_change_changes_signature() {
        let mut a = Graph::new();
        a.add_node(NodeInstance::new_with_id("x", "audio.gain"));
        let mut b = Graph::new();
        b.add_node(NodeInstance::new_with_id("x", "audio.delay"));
        assert_ne!(topology_signature(&a), topology_signature(&b));
    }
}
