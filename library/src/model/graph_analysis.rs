//! Graph analysis utilities: validation, evaluation order and reachability.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::LibraryError;
use crate::model::connection::Connection;
use crate::model::graph::Graph;
use crate::plugin::node_types::NodeDefinition;
use crate::plugin::registry::NodeRegistry;

pub type DefinitionMap = HashMap<String, Arc<NodeDefinition>>;

/// Looks up the definition of every node, failing on the first unknown type.
pub fn resolve_definitions(
    graph: &Graph,
    registry: &NodeRegistry,
) -> Result<DefinitionMap, LibraryError> {
    let mut defs = DefinitionMap::new();
    for node in &graph.nodes {
        if defs.contains_key(&node.id) {
            return Err(LibraryError::graph(format!("Duplicate node id {}", node.id)));
        }
        defs.insert(node.id.clone(), registry.require(&node.type_id)?);
    }
    Ok(defs)
}

/// Checks one connection against port declarations.
///
/// Checks:
/// - Both nodes exist and declare the ports
/// - No self-connections
/// - Semantic types match (command/client only with themselves)
fn check_connection(conn: &Connection, defs: &DefinitionMap) -> Result<(), LibraryError> {
    let source_def = defs
        .get(&conn.source.node_id)
        .ok_or_else(|| LibraryError::graph(format!("Source node {} not found", conn.source.node_id)))?;
    let target_def = defs
        .get(&conn.target.node_id)
        .ok_or_else(|| LibraryError::graph(format!("Target node {} not found", conn.target.node_id)))?;

    if conn.source.node_id == conn.target.node_id {
        return Err(LibraryError::graph("Cannot connect a node to itself"));
    }

    let source_port = source_def.output(&conn.source.port_id).ok_or_else(|| {
        LibraryError::graph(format!(
            "{} has no output port '{}'",
            source_def.type_id, conn.source.port_id
        ))
    })?;
    let target_port = target_def.input(&conn.target.port_id).ok_or_else(|| {
        LibraryError::graph(format!(
            "{} has no input port '{}'",
            target_def.type_id, conn.target.port_id
        ))
    })?;

    if !source_port.port_type.compatible_with(target_port.port_type) {
        return Err(LibraryError::graph(format!(
            "Type mismatch {}.{} ({}) -> {}.{} ({})",
            conn.source.node_id,
            conn.source.port_id,
            source_port.port_type,
            conn.target.node_id,
            conn.target.port_id,
            target_port.port_type
        )));
    }
    Ok(())
}

/// Validates every connection and the one-connection-per-input rule.
pub fn validate_graph(graph: &Graph, defs: &DefinitionMap) -> Result<(), LibraryError> {
    let mut fed = HashSet::new();
    for conn in &graph.connections {
        check_connection(conn, defs)?;
        if !fed.insert(&conn.target) {
            return Err(LibraryError::graph(format!(
                "Input port {}.{} already has a connection",
                conn.target.node_id, conn.target.port_id
            )));
        }
    }
    Ok(())
}

/// Validate a connection before adding it to an authored graph.
pub fn validate_connection(
    graph: &Graph,
    registry: &NodeRegistry,
    conn: &Connection,
) -> Result<(), LibraryError> {
    let defs = resolve_definitions(graph, registry)?;
    check_connection(conn, &defs)?;

    if graph
        .connections
        .iter()
        .any(|c| c.target == conn.target && c.id != conn.id)
    {
        return Err(LibraryError::graph(format!(
            "Input port {}.{} already has a connection",
            conn.target.node_id, conn.target.port_id
        )));
    }

    let target_is_feedback = defs
        .get(&conn.target.node_id)
        .is_some_and(|d| d.feedback);
    if !target_is_feedback
        && would_create_cycle(graph, &defs, &conn.source.node_id, &conn.target.node_id)
    {
        return Err(LibraryError::graph("Connection would create a cycle"));
    }
    Ok(())
}

/// True if `to_node` already reaches `from_node` along ordering edges.
fn would_create_cycle(graph: &Graph, defs: &DefinitionMap, from_node: &str, to_node: &str) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(to_node.to_string());

    while let Some(current) = queue.pop_front() {
        if current == from_node {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        for conn in graph.outgoing(&current) {
            if !is_feedback_edge(conn, defs) {
                queue.push_back(conn.target.node_id.clone());
            }
        }
    }
    false
}

/// Edges into feedback nodes read last tick's value and do not order evaluation.
fn is_feedback_edge(conn: &Connection, defs: &DefinitionMap) -> bool {
    defs.get(&conn.target.node_id).is_some_and(|d| d.feedback)
}

/// Evaluation order (sources first, sinks last), stable with respect to the
/// node array order. Returns Err on a cycle not broken by a feedback node.
pub fn topological_order(graph: &Graph, defs: &DefinitionMap) -> Result<Vec<String>, LibraryError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();

    for node in &graph.nodes {
        in_degree.insert(&node.id, 0);
        adj.insert(&node.id, Vec::new());
    }

    for conn in &graph.connections {
        if is_feedback_edge(conn, defs) {
            continue;
        }
        let (from, to) = (conn.source.node_id.as_str(), conn.target.node_id.as_str());
        if let (Some(neighbors), Some(_)) = (adj.get_mut(from), in_degree.get(to)) {
            neighbors.push(to);
            if let Some(deg) = in_degree.get_mut(to) {
                *deg += 1;
            }
        }
    }

    // Kahn's algorithm
    let mut queue: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut sorted = Vec::with_capacity(graph.nodes.len());
    while let Some(node) = queue.pop_front() {
        sorted.push(node.to_string());
        if let Some(neighbors) = adj.get(node) {
            for &neighbor in neighbors {
                if let Some(deg) = in_degree.get_mut(neighbor) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
    }

    if sorted.len() != graph.nodes.len() {
        return Err(LibraryError::graph("Cycle detected in graph"));
    }
    Ok(sorted)
}

/// Every node that feeds `seeds`, directly or transitively, plus the seeds.
/// Connections for which `skip` returns true are not followed.
pub fn upstream_closure(
    graph: &Graph,
    seeds: impl IntoIterator<Item = String>,
    skip: impl Fn(&Connection) -> bool,
) -> BTreeSet<String> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<String> = seeds.into_iter().collect();

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current.clone()) {
            continue;
        }
        for conn in graph.incoming(&current) {
            if !skip(conn) && !visited.contains(&conn.source.node_id) {
                queue.push_back(conn.source.node_id.clone());
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::NodeInstance;

    fn registry() -> NodeRegistry {
        NodeRegistry::with_builtins()
    }

    fn graph_of(nodes: &[(&str, &str)], edges: &[((&str, &str), (&str, &str))]) -> Graph {
        let mut graph = Graph::new();
        for (id, ty) in nodes {
            graph.add_node(NodeInstance::new_with_id(id, ty));
        }
        for (from, to) in edges {
            graph.add_connection(Connection::between(*from, *to));
        }
        graph
    }

    #[test]
    fn test_topological_order_linear() {
        let graph = graph_of(
            &[("sum", "math.add"), ("n", "data.number")],
            &[(("n", "value"), ("sum", "a"))],
        );
        let defs = resolve_definitions(&graph, &registry()).unwrap();
        assert_eq!(topological_order(&graph, &defs).unwrap(), vec!["n", "sum"]);
    }

    #[test]
    fn test_feedback_node_breaks_cycle() {
        let graph = graph_of(
            &[("add", "math.add"), ("hold", "logic.hold")],
            &[
                (("add", "result"), ("hold", "in")),
                (("hold", "out"), ("add", "a")),
            ],
        );
        let defs = resolve_definitions(&graph, &registry()).unwrap();
        assert_eq!(topological_order(&graph, &defs).unwrap(), vec!["hold", "add"]);
    }

    #[test]
    fn test_cycle_detection() {
        let graph = graph_of(
            &[("a", "logic.passthrough"), ("b", "logic.passthrough")],
            &[(("a", "out"), ("b", "in"))],
        );
        let cyclic = Connection::between(("b", "out"), ("a", "in"));
        let err = validate_connection(&graph, &registry(), &cyclic).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_validate_connection_self_loop() {
        let graph = graph_of(&[("a", "logic.passthrough")], &[]);
        let conn = Connection::between(("a", "out"), ("a", "in"));
        let err = validate_connection(&graph, &registry(), &conn).unwrap_err();
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let graph = graph_of(
            &[("osc", "audio.oscillator"), ("sum", "math.add")],
            &[(("osc", "out"), ("sum", "a"))],
        );
        let defs = resolve_definitions(&graph, &registry()).unwrap();
        let err = validate_graph(&graph, &defs).unwrap_err();
        assert!(err.to_string().contains("Type mismatch"));
    }

    #[test]
    fn test_upstream_closure_follows_inputs() {
        let graph = graph_of(
            &[
                ("n", "data.number"),
                ("sum", "math.add"),
                ("other", "data.number"),
            ],
            &[(("n", "value"), ("sum", "a"))],
        );
        let reached = upstream_closure(&graph, ["sum".to_string()], |_| false);
        assert_eq!(
            reached.into_iter().collect::<Vec<_>>(),
            vec!["n".to_string(), "sum".to_string()]
        );
    }
}
