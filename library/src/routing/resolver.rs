//! Target resolution over command-typed connections.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use log::debug;
use sha2::{Digest, Sha256};

use crate::error::LibraryError;
use crate::model::connection::PortType;
use crate::model::graph::Graph;
use crate::model::property::PropertyMap;
use crate::plugin::node_types::NodeRole;
use crate::plugin::registry::NodeRegistry;
use crate::routing::audience::Audience;
use crate::routing::selector::select_clients;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions<'a> {
    /// Session id of the manager's own display.
    pub local_display: Option<&'a str>,
    /// Target for a sole deploy root that is not wired to anything.
    pub default_client: Option<&'a str>,
}

/// Client id -> contributing deploy-root ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub assignments: BTreeMap<String, BTreeSet<String>>,
    pub key: String,
}

impl DeploymentPlan {
    fn from_assignments(assignments: BTreeMap<String, BTreeSet<String>>) -> Self {
        let mut hasher = Sha256::new();
        for (client, roots) in &assignments {
            hasher.update(client.as_bytes());
            hasher.update(b"=");
            for root in roots {
                hasher.update(root.as_bytes());
                hasher.update(b",");
            }
            hasher.update(b";");
        }
        Self {
            key: hex::encode(hasher.finalize()),
            assignments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn clients(&self) -> impl Iterator<Item = &str> {
        self.assignments.keys().map(|c| c.as_str())
    }

    pub fn roots_for(&self, client_id: &str) -> Option<&BTreeSet<String>> {
        self.assignments.get(client_id)
    }

    /// Clients sharing an identical root set, keyed by that set.
    pub fn groups(&self) -> BTreeMap<BTreeSet<String>, Vec<String>> {
        let mut groups: BTreeMap<BTreeSet<String>, Vec<String>> = BTreeMap::new();
        for (client, roots) in &self.assignments {
            groups.entry(roots.clone()).or_default().push(client.clone());
        }
        groups
    }
}

/// Where one root's command wiring ends up.
#[derive(Default)]
struct RootTargets {
    wired: bool,
    clients: BTreeSet<String>,
}

/// Resolves every enabled deploy root to the clients it targets.
///
/// Roots with no command wiring are only deployed when they are the sole
/// root; several unwired roots are ambiguous.
pub fn resolve_targets(
    graph: &Graph,
    registry: &NodeRegistry,
    audience: &Audience,
    options: ResolveOptions<'_>,
) -> Result<DeploymentPlan, LibraryError> {
    let mut roots = Vec::new();
    for node in graph.nodes.iter().filter(|n| n.enabled) {
        if registry.require(&node.type_id)?.is_deploy_root() {
            roots.push(node.id.as_str());
        }
    }
    if roots.is_empty() {
        return Ok(DeploymentPlan::from_assignments(BTreeMap::new()));
    }

    let mut per_root = Vec::with_capacity(roots.len());
    for root in &roots {
        per_root.push((*root, walk_commands(graph, registry, audience, options, root)?));
    }

    let any_wired = per_root.iter().any(|(_, t)| t.wired);
    let mut assignments: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    if any_wired {
        for (root, targets) in per_root.iter().filter(|(_, t)| t.wired) {
            for client in &targets.clients {
                assignments
                    .entry(client.clone())
                    .or_default()
                    .insert(root.to_string());
            }
        }
        if assignments.is_empty() {
            return Err(LibraryError::NoTargets(
                "deploy roots are wired but no client matches".to_string(),
            ));
        }
    } else if let [(root, _)] = per_root.as_slice() {
        let client = options.default_client.ok_or_else(|| {
            LibraryError::NoTargets(format!("{} is not wired to any client", root))
        })?;
        assignments
            .entry(client.to_string())
            .or_default()
            .insert(root.to_string());
    } else {
        let mut ids: Vec<String> = roots.iter().map(|r| r.to_string()).collect();
        ids.sort();
        return Err(LibraryError::AmbiguousRoots(ids));
    }

    let plan = DeploymentPlan::from_assignments(assignments);
    debug!(
        "Resolved {} roots to {} clients (plan {})",
        roots.len(),
        plan.assignments.len(),
        &plan.key[..12]
    );
    Ok(plan)
}

/// Breadth-first over command outputs starting at `root`.
///
/// Visited (node, port) pairs bound the walk on cyclic wiring.
fn walk_commands(
    graph: &Graph,
    registry: &NodeRegistry,
    audience: &Audience,
    options: ResolveOptions<'_>,
    root: &str,
) -> Result<RootTargets, LibraryError> {
    let mut targets = RootTargets::default();
    let mut visited: HashSet<(String, String)> = HashSet::new();
    let mut queue: VecDeque<(String, String)> = VecDeque::new();

    let root_def = registry.require(
        &graph
            .get_node(root)
            .ok_or_else(|| LibraryError::graph(format!("Root {} not found", root)))?
            .type_id,
    )?;
    for port in root_def.command_outputs() {
        queue.push_back((root.to_string(), port.id.clone()));
    }

    while let Some((node_id, port_id)) = queue.pop_front() {
        if !visited.insert((node_id.clone(), port_id.clone())) {
            continue;
        }
        for conn in graph
            .outgoing(&node_id)
            .filter(|c| c.source.port_id == port_id)
        {
            let Some(target) = graph.get_node(&conn.target.node_id) else {
                continue;
            };
            if !target.enabled {
                continue;
            }
            let def = registry.require(&target.type_id)?;
            if def
                .input(&conn.target.port_id)
                .is_none_or(|p| p.port_type != PortType::Command)
            {
                continue;
            }
            targets.wired = true;
            match def.role {
                NodeRole::ClientSelector => {
                    let mut config: PropertyMap = def
                        .config_schema
                        .iter()
                        .map(|f| (f.id.clone(), f.default_value.clone()))
                        .collect();
                    config.extend(target.config.clone());
                    targets
                        .clients
                        .extend(select_clients(&target.id, &config, audience));
                }
                NodeRole::DisplaySink => {
                    targets.clients.extend(options.local_display.map(str::to_string));
                    targets.clients.extend(audience.display_ids());
                }
                _ => {
                    for port in def.command_outputs() {
                        queue.push_back((target.id.clone(), port.id.clone()));
                    }
                }
            }
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::connection::Connection;
    use crate::model::node::NodeInstance;
    use crate::routing::audience::ClientInfo;

    fn audience() -> Audience {
        Audience::from_clients([
            ClientInfo::new("c1"),
            ClientInfo::new("c2"),
            ClientInfo::display("wall"),
        ])
    }

    #[test]
    fn selector_expands_to_clients() {
        let mut graph = Graph::new();
        graph.add_node(NodeInstance::new_with_id("out", "audio.out"));
        graph.add_node(
            NodeInstance::new_with_id("sel", "route.clients")
                .with_config("mode", "range")
                .with_config("count", 2i64),
        );
        graph.add_connection(Connection::between(("out", "cmd"), ("sel", "cmd")));
        let plan = resolve_targets(
            &graph,
            &NodeRegistry::with_builtins(),
            &audience(),
            ResolveOptions::default(),
        )
        .unwrap();
        assert_eq!(plan.clients().collect::<Vec<_>>(), vec!["c1", "c2"]);
    }

    #[test]
    fn display_sink_includes_local_session() {
        let mut graph = Graph::new();
        graph.add_node(NodeInstance::new_with_id("scene", "scene.out"));
        graph.add_node(NodeInstance::new_with_id("disp", "display.out"));
        graph.add_connection(Connection::between(("scene", "cmd"), ("disp", "cmd")));
        let options = ResolveOptions {
            local_display: Some("local"),
            ..Default::default()
        };
        let plan =
            resolve_targets(&graph, &NodeRegistry::with_builtins(), &audience(), options).unwrap();
        assert_eq!(plan.clients().collect::<Vec<_>>(), vec!["local", "wall"]);
    }

    #[test]
    fn unwired_roots_are_ambiguous() {
        let mut graph = Graph::new();
        graph.add_node(NodeInstance::new_with_id("a", "audio.out"));
        graph.add_node(NodeInstance::new_with_id("b", "audio.out"));
        let err = resolve_targets(
            &graph,
            &NodeRegistry::with_builtins(),
            &audience(),
            ResolveOptions {
                default_client: Some("c1"),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, LibraryError::AmbiguousRoots(ids) if ids == vec!["a", "b"]));
    }

    #[test]
    fn sole_unwired_root_uses_default_client() {
        let mut graph = Graph::new();
        graph.add_node(NodeInstance::new_with_id("a", "audio.out"));
        let registry = NodeRegistry::with_builtins();
        let err = resolve_targets(&graph, &registry, &audience(), ResolveOptions::default())
            .unwrap_err();
        assert!(matches!(err, LibraryError::NoTargets(_)));

        let plan = resolve_targets(
            &graph,
            &registry,
            &audience(),
            ResolveOptions {
                default_client: Some("c2"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plan.roots_for("c2").map(|r| r.len()), Some(1));
    }

    #[test]
    fn cyclic_command_wiring_terminates() {
        let mut graph = Graph::new();
        graph.add_node(NodeInstance::new_with_id("out", "audio.out"));
        graph.add_node(NodeInstance::new_with_id("agg1", "route.aggregate"));
        graph.add_node(NodeInstance::new_with_id("agg2", "route.aggregate"));
        graph.add_node(NodeInstance::new_with_id("sel", "route.clients"));
        graph.add_connection(Connection::between(("out", "cmd"), ("agg1", "a")));
        graph.add_connection(Connection::between(("agg1", "cmd"), ("agg2", "a")));
        graph.add_connection(Connection::between(("agg2", "cmd"), ("agg1", "b")));
        graph.add_connection(Connection::between(("agg2", "cmd"), ("sel", "cmd")));
        let plan = resolve_targets(
            &graph,
            &NodeRegistry::with_builtins(),
            &audience(),
            ResolveOptions::default(),
        )
        .unwrap();
        assert_eq!(plan.clients().collect::<Vec<_>>(), vec!["c1"]);
    }
}
