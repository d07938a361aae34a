//! Exports the minimal deployable subgraph behind a set of deploy roots.

use std::collections::BTreeSet;

use log::debug;

use crate::config::{BypassPolicy, PROTOCOL_VERSION};
use crate::deploy::bypass::is_bypassable;
use crate::deploy::signature::topology_signature;
use crate::error::LibraryError;
use crate::model::connection::Connection;
use crate::model::graph::Graph;
use crate::model::graph_analysis;
use crate::model::property::PropertyValue;
use crate::plugin::node_types::NodeRole;
use crate::plugin::registry::NodeRegistry;
use crate::protocol::{DeployMeta, DeployPayload};
use crate::runtime::engine::BYPASS_KEY;
use crate::util::timing::ScopedTimer;

/// Prefix marking a config string as an asset reference.
pub const ASSET_PREFIX: &str = "asset:";

/// Turns asset references into locations clients can load.
pub trait AssetResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Option<String>;
}

/// Strips the prefix and keeps the rest as the location.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainAssets;

impl AssetResolver for PlainAssets {
    fn resolve(&self, reference: &str) -> Option<String> {
        reference
            .strip_prefix(ASSET_PREFIX)
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions<'a> {
    pub bypass: &'a BypassPolicy,
    pub tick_interval_ms: u64,
    /// Deploy id to use; derived from the signature when absent.
    pub deploy_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchExport {
    pub deploy_id: String,
    pub graph: Graph,
    pub meta: DeployMeta,
    pub signature: String,
    pub node_ids: BTreeSet<String>,
    /// Disabled nodes shipped in place with `__bypass` set in their config.
    pub bypassed: BTreeSet<String>,
    pub local_only: bool,
}

impl PatchExport {
    /// Payload for one client, with the identity binding set.
    pub fn payload_for(&self, client_id: &str) -> DeployPayload {
        let mut meta = self.meta.clone();
        meta.client_id = Some(client_id.to_string());
        DeployPayload {
            graph: self.graph.clone(),
            meta,
        }
    }
}

/// Collects everything upstream of `roots` along data edges.
///
/// Disabled nodes are never deployed as running nodes: bypassable ones are
/// kept in place with `__bypass` baked into their config, the rest are cut
/// out together with anything only they fed. Live sources stay on the
/// manager; their values reach the patch through bridges.
pub fn export_subgraph(
    graph: &Graph,
    registry: &NodeRegistry,
    roots: &BTreeSet<String>,
    assets: &dyn AssetResolver,
    options: ExportOptions<'_>,
) -> Result<PatchExport, LibraryError> {
    let _timer = ScopedTimer::debug_lazy(|| format!("export {:?}", roots));
    for root in roots {
        if !graph.contains(root) {
            return Err(LibraryError::export(format!("root {} is not in the graph", root)));
        }
    }

    let dropped: BTreeSet<String> = graph
        .nodes
        .iter()
        .filter(|n| !n.enabled)
        .filter(|n| {
            registry
                .get(&n.type_id)
                .is_none_or(|def| !is_bypassable(&def, options.bypass))
        })
        .map(|n| n.id.clone())
        .collect();

    let keep = graph_analysis::upstream_closure(graph, roots.iter().cloned(), |conn| {
        dropped.contains(&conn.source.node_id)
            || is_routing_edge(graph, registry, conn)
            || is_live_source_edge(graph, registry, conn)
    });

    let mut sub = graph.subgraph(&keep);
    let mut bypassed = BTreeSet::new();
    let mut capabilities = BTreeSet::new();
    let mut local_only = false;
    for node in &mut sub.nodes {
        let def = registry.require(&node.type_id)?;
        capabilities.extend(def.capabilities.iter().cloned());
        local_only |= def.local_only;
        if !node.enabled {
            bypassed.insert(node.id.clone());
            node.enabled = true;
            node.config.insert(BYPASS_KEY.to_string(), true.into());
        }
        node.outputs.clear();
        for (key, value) in node.config.iter_mut() {
            resolve_asset(&node.id, key, value, assets)?;
        }
    }
    let defs = graph_analysis::resolve_definitions(&sub, registry)?;
    graph_analysis::validate_graph(&sub, &defs)
        .map_err(|e| LibraryError::export(e.to_string()))?;

    let signature = topology_signature(&sub);
    let deploy_id = options
        .deploy_id
        .map(str::to_string)
        .unwrap_or_else(|| format!("patch-{}", &signature[..12]));
    debug!(
        "Exported {} ({} nodes, {} bypassed) for roots {:?}",
        deploy_id,
        sub.nodes.len(),
        bypassed.len(),
        roots
    );

    Ok(PatchExport {
        meta: DeployMeta {
            loop_id: deploy_id.clone(),
            required_capabilities: capabilities.into_iter().collect(),
            tick_interval_ms: Some(options.tick_interval_ms),
            protocol_version: Some(PROTOCOL_VERSION),
            executor_version: None,
            client_id: None,
        },
        deploy_id,
        node_ids: sub.node_ids(),
        graph: sub,
        signature,
        bypassed,
        local_only,
    })
}

/// Command/client edges carry deploy intent, not data. Unknown sources count
/// as routing so they are never followed.
fn is_routing_edge(graph: &Graph, registry: &NodeRegistry, conn: &Connection) -> bool {
    graph
        .get_node(&conn.source.node_id)
        .and_then(|n| registry.get(&n.type_id))
        .and_then(|def| {
            def.output(&conn.source.port_id)
                .map(|p| p.port_type.is_routing())
        })
        .unwrap_or(true)
}

fn is_live_source_edge(graph: &Graph, registry: &NodeRegistry, conn: &Connection) -> bool {
    graph
        .get_node(&conn.source.node_id)
        .and_then(|n| registry.get(&n.type_id))
        .is_some_and(|def| def.role == NodeRole::LiveSource)
}

fn resolve_asset(
    node_id: &str,
    key: &str,
    value: &mut PropertyValue,
    assets: &dyn AssetResolver,
) -> Result<(), LibraryError> {
    if let PropertyValue::String(s) = value {
        if s.starts_with(ASSET_PREFIX) {
            let resolved = assets.resolve(s).ok_or_else(|| {
                LibraryError::export(format!("{}.{}: unresolved asset {}", node_id, key, s))
            })?;
            *s = resolved;
        }
    }
    Ok(())
}
