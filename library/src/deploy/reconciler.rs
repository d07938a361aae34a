//! Patch reconciliation: desired per-client plan vs. what is deployed.
//!
//! A pass has two halves. `prepare` resolves targets and exports one
//! subgraph per client group; `apply` diffs the exports against the deployed
//! records and produces the commands. The manager checks in between that the
//! graph has not moved on, and discards the pass if it has.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::control::error_slot::{DeployError, ErrorClass};
use crate::deploy::bypass::bypass_messages;
use crate::deploy::export::{AssetResolver, ExportOptions, PatchExport, export_subgraph};
use crate::error::LibraryError;
use crate::manager::status::StatusTable;
use crate::model::graph::Graph;
use crate::model::graph_analysis;
use crate::plugin::registry::NodeRegistry;
use crate::protocol::ControlMessage;
use crate::routing::audience::Audience;
use crate::routing::resolver::{DeploymentPlan, ResolveOptions, resolve_targets};
use crate::util::timing::ScopedTimer;

/// What one client is running, as far as the manager knows.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployedRecord {
    pub patch_id: String,
    pub roots: BTreeSet<String>,
    pub node_ids: BTreeSet<String>,
    pub signature: String,
    pub deployed_at_ms: u64,
    /// Nodes deployed with `__bypass` in their config.
    pub baked: BTreeSet<String>,
    /// Nodes currently bypassed on the client, baked or by override.
    pub bypassed: BTreeSet<String>,
}

/// Inputs of one pass, borrowed from the manager.
pub struct ReconcileContext<'a> {
    pub graph: &'a Graph,
    pub registry: &'a NodeRegistry,
    pub audience: &'a Audience,
    pub config: &'a ManagerConfig,
    pub assets: &'a dyn AssetResolver,
    /// Nodes owned by loops; patches may not include them.
    pub claimed_nodes: &'a BTreeSet<String>,
    /// Clients hosting a loop; patches are not sent there.
    pub claimed_clients: &'a BTreeSet<String>,
}

#[derive(Debug)]
pub struct GroupExport {
    pub roots: BTreeSet<String>,
    pub clients: Vec<String>,
    pub result: Result<PatchExport, DeployError>,
}

#[derive(Debug)]
pub struct ReconcilePass {
    pub revision: u64,
    pub plan: Result<DeploymentPlan, DeployError>,
    pub groups: Vec<GroupExport>,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// In send order: per client, teardown always precedes deploy.
    pub commands: Vec<(String, ControlMessage)>,
    pub errors: Vec<DeployError>,
    /// Error classes this pass proved resolved.
    pub resolved: Vec<ErrorClass>,
    /// Node ids no longer deployed on some client.
    pub torn_down: BTreeSet<String>,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PatchReconciler {
    records: BTreeMap<String, DeployedRecord>,
    last_plan_key: Option<String>,
}

impl PatchReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &BTreeMap<String, DeployedRecord> {
        &self.records
    }

    pub fn record(&self, client_id: &str) -> Option<&DeployedRecord> {
        self.records.get(client_id)
    }

    pub fn last_plan_key(&self) -> Option<&str> {
        self.last_plan_key.as_deref()
    }

    /// Union of node ids over every deployed record.
    pub fn deployed_nodes(&self) -> BTreeSet<String> {
        self.records
            .values()
            .flat_map(|r| r.node_ids.iter().cloned())
            .collect()
    }

    /// Clients whose record contains `node_id`, with the patch id.
    pub fn hosts_of(&self, node_id: &str) -> Vec<(String, String)> {
        self.records
            .iter()
            .filter(|(_, r)| r.node_ids.contains(node_id))
            .map(|(c, r)| (c.clone(), r.patch_id.clone()))
            .collect()
    }

    /// Forgets a client that left the audience. Nothing is sent.
    pub fn drop_client(&mut self, client_id: &str) -> Option<DeployedRecord> {
        self.records.remove(client_id)
    }

    /// Stop and remove everything; clears all records.
    pub fn teardown_all(&mut self) -> Vec<(String, ControlMessage)> {
        let mut commands = Vec::new();
        for (client, record) in std::mem::take(&mut self.records) {
            commands.push((client.clone(), ControlMessage::stop(&record.patch_id)));
            commands.push((client, ControlMessage::remove(&record.patch_id)));
        }
        self.last_plan_key = None;
        commands
    }

    /// Resolves targets and exports one subgraph per group of clients that
    /// share a root set. Failures stay inside their group.
    pub fn prepare(&self, ctx: &ReconcileContext<'_>, revision: u64) -> ReconcilePass {
        let _timer = ScopedTimer::debug_lazy(|| format!("reconcile prepare r{}", revision));

        // Loop-owned roots do not take part in patch resolution.
        let mut resolution_graph = ctx.graph.clone();
        for node in &mut resolution_graph.nodes {
            if ctx.claimed_nodes.contains(&node.id) {
                node.enabled = false;
            }
        }
        let options = ResolveOptions {
            local_display: ctx.config.local_display.as_deref(),
            default_client: ctx.config.default_client.as_deref(),
        };
        let plan = match resolve_targets(&resolution_graph, ctx.registry, ctx.audience, options) {
            Ok(mut plan) => {
                plan.assignments.retain(|client, _| !ctx.claimed_clients.contains(client));
                plan
            }
            Err(e) => {
                return ReconcilePass {
                    revision,
                    plan: Err(e.into()),
                    groups: Vec::new(),
                };
            }
        };

        let mut assignments = plan.assignments.clone();
        for roots in assignments.values_mut() {
            drop_roots_with_disabled_nodes(ctx.graph, roots);
        }
        let mut grouped: BTreeMap<BTreeSet<String>, Vec<String>> = BTreeMap::new();
        for (client, roots) in assignments {
            grouped.entry(roots).or_default().push(client);
        }

        let groups = grouped
            .into_iter()
            .map(|(roots, clients)| export_group(ctx, roots, clients))
            .collect();
        ReconcilePass {
            revision,
            plan: Ok(plan),
            groups,
        }
    }

    /// Diffs a prepared pass against the records and updates them.
    pub fn apply(
        &mut self,
        pass: ReconcilePass,
        statuses: &StatusTable,
        now_ms: u64,
    ) -> Result<ReconcileOutcome, LibraryError> {
        let mut outcome = ReconcileOutcome::default();
        let plan = match pass.plan {
            Ok(plan) => plan,
            Err(e) => {
                outcome.errors.push(e);
                return Ok(outcome);
            }
        };
        outcome.resolved.push(ErrorClass::Resolution);

        let mut desired: BTreeMap<String, (BTreeSet<String>, PatchExport)> = BTreeMap::new();
        let mut kept: BTreeSet<String> = BTreeSet::new();
        let mut failed_classes = HashSet::new();
        for group in pass.groups {
            match group.result {
                Ok(export) => {
                    for client in group.clients {
                        desired.insert(client, (group.roots.clone(), export.clone()));
                    }
                }
                Err(e) => {
                    failed_classes.insert(e.class);
                    // Loop conflicts must not leave the patch running; other
                    // failures keep whatever the group had before.
                    if e.class != ErrorClass::LoopConflict {
                        kept.extend(group.clients);
                    }
                    outcome.errors.push(e);
                }
            }
        }
        for class in [ErrorClass::Export, ErrorClass::LocalOnlyMedia, ErrorClass::LoopConflict] {
            if !failed_classes.contains(&class) {
                outcome.resolved.push(class);
            }
        }

        let stale: Vec<String> = self
            .records
            .keys()
            .filter(|c| !desired.contains_key(*c) && !kept.contains(*c))
            .cloned()
            .collect();
        for client in stale {
            if let Some(record) = self.records.remove(&client) {
                info!("Tearing down {} on {}", record.patch_id, client);
                outcome.torn_down.extend(record.node_ids);
                outcome
                    .commands
                    .push((client.clone(), ControlMessage::stop(&record.patch_id)));
                outcome
                    .commands
                    .push((client, ControlMessage::remove(&record.patch_id)));
            }
        }

        for (client, (roots, export)) in desired {
            let status = statuses.get(&client);
            let need_deploy = match self.records.get(&client) {
                None => true,
                Some(record) => {
                    record.signature != export.signature
                        || record.patch_id != export.deploy_id
                        || status.is_some_and(|s| s.drifted_from(record, &export.deploy_id))
                }
            };

            if need_deploy {
                if let Some(old) = self.records.remove(&client) {
                    outcome
                        .torn_down
                        .extend(old.node_ids.difference(&export.node_ids).cloned());
                    outcome
                        .commands
                        .push((client.clone(), ControlMessage::stop(&old.patch_id)));
                    outcome
                        .commands
                        .push((client.clone(), ControlMessage::remove(&old.patch_id)));
                }
                info!(
                    "Deploying {} to {} ({} nodes)",
                    export.deploy_id,
                    client,
                    export.node_ids.len()
                );
                outcome.commands.push((
                    client.clone(),
                    ControlMessage::deploy(&export.payload_for(&client))?,
                ));
                outcome
                    .commands
                    .push((client.clone(), ControlMessage::start(&export.deploy_id)));
                self.records.insert(
                    client,
                    DeployedRecord {
                        patch_id: export.deploy_id,
                        roots,
                        node_ids: export.node_ids,
                        signature: export.signature,
                        deployed_at_ms: now_ms,
                        baked: export.bypassed.clone(),
                        bypassed: export.bypassed,
                    },
                );
                continue;
            }

            let Some(record) = self.records.get_mut(&client) else {
                continue;
            };
            if status.is_some_and(|s| s.needs_restart(&record.patch_id)) {
                debug!("{} reports {} stopped, restarting", client, record.patch_id);
                outcome
                    .commands
                    .push((client.clone(), ControlMessage::start(&record.patch_id)));
            }
            for msg in
                bypass_messages(&record.patch_id, &record.baked, &record.bypassed, &export.bypassed)?
            {
                outcome.commands.push((client.clone(), msg));
            }
            record.bypassed = export.bypassed;
            record.roots = roots;
        }

        if !outcome.commands.is_empty() {
            debug!("Reconcile issued {} commands", outcome.commands.len());
        }
        self.last_plan_key = Some(plan.key);
        Ok(outcome)
    }
}

/// When several roots target one client, roots whose subgraph contains a
/// disabled node are dropped, as long as at least one clean root remains.
fn drop_roots_with_disabled_nodes(graph: &Graph, roots: &mut BTreeSet<String>) {
    if roots.len() < 2 {
        return;
    }
    let clean: BTreeSet<String> = roots
        .iter()
        .filter(|root| {
            graph_analysis::upstream_closure(graph, [root.to_string()], |_| false)
                .iter()
                .all(|id| graph.get_node(id).is_none_or(|n| n.enabled))
        })
        .cloned()
        .collect();
    if !clean.is_empty() && clean.len() < roots.len() {
        debug!("Dropping roots with disabled nodes: {:?}", roots.difference(&clean));
        *roots = clean;
    }
}

fn export_group(
    ctx: &ReconcileContext<'_>,
    roots: BTreeSet<String>,
    clients: Vec<String>,
) -> GroupExport {
    let options = ExportOptions {
        bypass: &ctx.config.bypass,
        tick_interval_ms: ctx.config.default_tick_interval_ms,
        deploy_id: None,
    };
    let export = match export_subgraph(ctx.graph, ctx.registry, &roots, ctx.assets, options) {
        Ok(export) => export,
        Err(e) => {
            warn!("Export failed for roots {:?}: {}", roots, e);
            return GroupExport {
                roots,
                clients,
                result: Err(DeployError::new(ErrorClass::Export, e.to_string())),
            };
        }
    };

    if let Some(owned) = export.node_ids.intersection(ctx.claimed_nodes).next() {
        let error = DeployError::new(
            ErrorClass::LoopConflict,
            format!("node {} is owned by a loop", owned),
        );
        return GroupExport {
            roots,
            clients,
            result: Err(error),
        };
    }

    if export.local_only {
        let is_display = |c: &String| {
            ctx.audience.is_display(c) || ctx.config.local_display.as_deref() == Some(c.as_str())
        };
        let (display, other): (Vec<String>, Vec<String>) = clients.into_iter().partition(is_display);
        if !other.is_empty() {
            warn!(
                "Local-only media in {}; skipping non-display clients {:?}",
                export.deploy_id, other
            );
        }
        if display.is_empty() {
            let error = LibraryError::LocalOnlyMedia(format!(
                "{} needs a display client, targets were {:?}",
                export.deploy_id, other
            ));
            return GroupExport {
                roots,
                clients: other,
                result: Err(error.into()),
            };
        }
        return GroupExport {
            roots,
            clients: display,
            result: Ok(export),
        };
    }

    GroupExport {
        roots,
        clients,
        result: Ok(export),
    }
}
