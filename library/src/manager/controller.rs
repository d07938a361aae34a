//! Manager-side orchestration: one instance owns the editing graph, the
//! audience, every deployment record and every timer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info, warn};

use super::status::{ExecutorStatus, StatusTable};
use super::visual::{NullVisualSink, VisualState, VisualStateSink};
use crate::config::ManagerConfig;
use crate::control::bridges::{BridgeAction, LiveBridges, Placement};
use crate::control::error_slot::{DeployError, ErrorClass, ErrorSlot};
use crate::control::override_router::{OverrideHost, OverrideRouter, lookup_hosts};
use crate::deploy::export::{AssetResolver, ExportOptions, PlainAssets, export_subgraph};
use crate::deploy::loops::LoopDeployments;
use crate::deploy::reconciler::{PatchReconciler, ReconcileContext, ReconcileOutcome, ReconcilePass};
use crate::error::LibraryError;
use crate::model::connection::PortRef;
use crate::model::graph::Graph;
use crate::model::property::PropertyValue;
use crate::plugin::registry::SharedRegistry;
use crate::protocol::{ControlMessage, StatusEvent, StatusKind};
use crate::routing::audience::Audience;
use crate::runtime::overrides::{OverrideKey, OverrideKind};
use crate::scheduler::{TimerHandle, TimerQueue};
use crate::transport::Transport;
use crate::util::clock::SharedClock;

/// Work the manager schedules for itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerTask {
    /// Debounced pass after edits.
    Reconcile,
    /// Periodic replan while active.
    Poll,
    /// Durable commit of the latest value for one override key.
    CommitOverride(OverrideKey),
    BridgeSample,
}

pub struct Manager {
    config: ManagerConfig,
    registry: SharedRegistry,
    clock: SharedClock,
    transport: Arc<dyn Transport>,
    assets: Arc<dyn AssetResolver>,
    visual_sink: Arc<dyn VisualStateSink>,
    visual: VisualState,
    graph: Graph,
    /// Bumped on every change a prepared pass may depend on.
    revision: u64,
    audience: Audience,
    statuses: StatusTable,
    patches: PatchReconciler,
    loops: LoopDeployments,
    router: OverrideRouter,
    bridges: LiveBridges,
    errors: ErrorSlot,
    timers: TimerQueue<ManagerTask>,
    reconcile_timer: Option<TimerHandle>,
    poll_timer: Option<TimerHandle>,
    bridge_timer: Option<TimerHandle>,
    active: bool,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        registry: SharedRegistry,
        clock: SharedClock,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let router = OverrideRouter::new(&config);
        let bridges = LiveBridges::new(config.bridge_min_interval_ms, config.bridge_precision);
        Self {
            config,
            registry,
            clock,
            transport,
            assets: Arc::new(PlainAssets),
            visual_sink: Arc::new(NullVisualSink),
            visual: VisualState::default(),
            graph: Graph::new(),
            revision: 0,
            audience: Audience::new(),
            statuses: StatusTable::new(),
            patches: PatchReconciler::new(),
            loops: LoopDeployments::new(),
            router,
            bridges,
            errors: ErrorSlot::new(),
            timers: TimerQueue::new(),
            reconcile_timer: None,
            poll_timer: None,
            bridge_timer: None,
            active: false,
        }
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetResolver>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_visual_sink(mut self, sink: Arc<dyn VisualStateSink>) -> Self {
        self.visual_sink = sink;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    pub fn status(&self, client_id: &str) -> Option<&ExecutorStatus> {
        self.statuses.get(client_id)
    }

    pub fn patches(&self) -> &PatchReconciler {
        &self.patches
    }

    pub fn loops(&self) -> &LoopDeployments {
        &self.loops
    }

    pub fn last_error(&self) -> Option<&DeployError> {
        self.errors.current()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_reconcile_pending(&self) -> bool {
        self.reconcile_timer.is_some()
    }

    pub fn next_due(&self) -> Option<u64> {
        self.timers.next_due()
    }

    /// Clients currently hosting `node_id`, by the routing lookup chain.
    pub fn hosts_of(&self, node_id: &str) -> Vec<OverrideHost> {
        lookup_hosts(node_id, &self.loops, &self.patches, &self.statuses)
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// Starts deploying: an immediate pass, then periodic replans.
    pub fn start(&mut self) {
        if self.active {
            return;
        }
        info!("Manager active");
        self.active = true;
        self.schedule_reconcile(0);
        self.schedule_poll();
    }

    pub fn edit_graph(&mut self, edit: impl FnOnce(&mut Graph)) {
        edit(&mut self.graph);
        self.revision += 1;
        // An edit is the user action that lets a watchdog-stopped client run again.
        for status in self.statuses.values_mut() {
            status.watchdog_tripped = false;
        }
        self.errors.clear(ErrorClass::Watchdog);
        if self.active {
            self.schedule_reconcile(self.config.reconcile_debounce_ms);
        }
    }

    pub fn set_graph(&mut self, graph: Graph) {
        self.edit_graph(|g| *g = graph);
    }

    /// Replaces the audience. Records of clients that left are dropped
    /// without sending anything.
    pub fn set_audience(&mut self, audience: Audience) {
        let gone: Vec<String> = self
            .audience
            .ids()
            .into_iter()
            .filter(|id| !audience.contains(id))
            .collect();
        let mut released = BTreeSet::new();
        for client in &gone {
            if let Some(record) = self.patches.drop_client(client) {
                info!("Client {} left, forgetting {}", client, record.patch_id);
                released.extend(record.node_ids);
            }
            for lp in self.loops.drop_client(client) {
                info!("Client {} left, forgetting loop {}", client, lp.loop_id);
                released.extend(lp.node_ids);
            }
            self.statuses.remove(client);
        }
        self.audience = audience;
        self.revision += 1;
        self.cancel_commits(&released);
        if !gone.is_empty() {
            self.refresh_deployments();
        }
        if self.active {
            self.schedule_reconcile(0);
        }
    }

    pub fn on_status(&mut self, client_id: &str, event: StatusEvent) {
        let now = self.clock.now_ms();
        debug!("{} reports {:?} {:?}", client_id, event.event, event.loop_id);
        self.statuses
            .entry(client_id.to_string())
            .or_default()
            .apply(&event, now);

        match event.event {
            StatusKind::Rejected | StatusKind::Error => {
                let reason = event
                    .diagnostic("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unspecified");
                self.report_error(
                    DeployError::new(
                        ErrorClass::Rejected,
                        format!("{} refused {:?}: {}", client_id, event.loop_id, reason),
                    )
                    .with_client(client_id),
                );
            }
            StatusKind::Stopped if event.is_watchdog_stop() => {
                if let Some(loop_id) = event.loop_id.as_deref() {
                    self.loops.mark_stopped(loop_id);
                }
                self.report_error(DeployError::new(
                    ErrorClass::Watchdog,
                    format!("{} stopped {:?}: ticks over budget", client_id, event.loop_id),
                ));
            }
            StatusKind::Deployed | StatusKind::Started => {
                self.errors.clear_for_client(ErrorClass::Rejected, client_id);
            }
            _ => {}
        }
    }

    /// Stops and removes every patch and loop, and stops deploying.
    pub fn stop_all(&mut self) {
        info!("Stopping all deployments");
        self.active = false;
        for handle in [
            self.reconcile_timer.take(),
            self.poll_timer.take(),
            self.bridge_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.timers.cancel(handle);
        }
        self.router.cancel_all(&mut self.timers);
        let mut commands = self.patches.teardown_all();
        commands.extend(self.loops.teardown_all());
        self.send_all(commands);
        self.bridges.clear();
        self.revision += 1;
        self.refresh_deployments();
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    /// Deploys the subgraph behind `root_id` as loop `loop_id` on one
    /// client. The client stops hosting any patch.
    pub fn deploy_loop(
        &mut self,
        loop_id: &str,
        root_id: &str,
        client_id: &str,
    ) -> Result<(), LibraryError> {
        let is_root = self
            .graph
            .get_node(root_id)
            .and_then(|n| self.registry.get(&n.type_id))
            .is_some_and(|d| d.is_deploy_root());
        if !is_root {
            let e = LibraryError::Loop(format!("{} is not a deploy root", root_id));
            self.report_failure(&e);
            return Err(e);
        }
        if !self.audience.contains(client_id) {
            let e = LibraryError::Loop(format!("client {} is not connected", client_id));
            self.report_failure(&e);
            return Err(e);
        }

        let roots: BTreeSet<String> = [root_id.to_string()].into();
        let options = ExportOptions {
            bypass: &self.config.bypass,
            tick_interval_ms: self.config.default_tick_interval_ms,
            deploy_id: Some(loop_id),
        };
        let export = match export_subgraph(&self.graph, &self.registry, &roots, self.assets.as_ref(), options) {
            Ok(export) => export,
            Err(e) => {
                self.report_failure(&e);
                return Err(e);
            }
        };

        let now = self.clock.now_ms();
        let deployed = match self.loops.deploy(loop_id, client_id, root_id, export, now) {
            Ok(commands) => commands,
            Err(e) => {
                self.report_failure(&e);
                return Err(e);
            }
        };

        let mut commands = Vec::new();
        if let Some(record) = self.patches.drop_client(client_id) {
            commands.push((client_id.to_string(), ControlMessage::stop(&record.patch_id)));
            commands.push((client_id.to_string(), ControlMessage::remove(&record.patch_id)));
        }
        commands.extend(deployed);
        self.send_all(commands);
        self.errors.clear(ErrorClass::Loop);
        self.revision += 1;
        self.refresh_deployments();
        if self.active {
            self.schedule_reconcile(0);
        }
        Ok(())
    }

    pub fn stop_loop(&mut self, loop_id: &str) -> Result<(), LibraryError> {
        let commands = match self.loops.stop(loop_id) {
            Ok(commands) => commands,
            Err(e) => {
                self.report_failure(&e);
                return Err(e);
            }
        };
        self.send_all(commands);
        self.errors.clear(ErrorClass::Loop);
        Ok(())
    }

    /// Tears a loop down; its client and nodes become available to patches.
    pub fn remove_loop(&mut self, loop_id: &str) -> Result<(), LibraryError> {
        let (record, commands) = match self.loops.remove(loop_id) {
            Ok(removed) => removed,
            Err(e) => {
                self.report_failure(&e);
                return Err(e);
            }
        };
        self.send_all(commands);
        self.errors.clear(ErrorClass::Loop);
        self.cancel_commits(&record.node_ids);
        self.revision += 1;
        self.refresh_deployments();
        if self.active {
            self.schedule_reconcile(0);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Overrides
    // ------------------------------------------------------------------

    /// Sends a live edit to every client hosting the node. Returns how
    /// many were reached.
    pub fn send_node_override(
        &mut self,
        node_id: &str,
        kind: OverrideKind,
        port_id: &str,
        value: PropertyValue,
    ) -> Result<usize, LibraryError> {
        let hosts = self.hosts_of(node_id);
        let now = self.clock.now_ms();
        self.router.send(
            OverrideKey::new(node_id, kind, port_id),
            value,
            &hosts,
            self.transport.as_ref(),
            &mut self.timers,
            now,
        )
    }

    pub fn remove_node_override(
        &mut self,
        node_id: &str,
        kind: OverrideKind,
        port_id: &str,
    ) -> Result<usize, LibraryError> {
        let hosts = self.hosts_of(node_id);
        self.router.remove(
            &OverrideKey::new(node_id, kind, port_id),
            &hosts,
            self.transport.as_ref(),
            &mut self.timers,
        )
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// First half of a pass: resolves and exports against the current
    /// revision.
    pub fn begin_reconcile(&self) -> ReconcilePass {
        let claimed_nodes = self.loops.claimed_nodes();
        let claimed_clients = self.loops.claimed_clients();
        let ctx = ReconcileContext {
            graph: &self.graph,
            registry: &self.registry,
            audience: &self.audience,
            config: &self.config,
            assets: self.assets.as_ref(),
            claimed_nodes: &claimed_nodes,
            claimed_clients: &claimed_clients,
        };
        self.patches.prepare(&ctx, self.revision)
    }

    /// Second half: applies the pass unless the state it was prepared from
    /// has changed, in which case it is dropped and another pass scheduled.
    pub fn finish_reconcile(
        &mut self,
        pass: ReconcilePass,
    ) -> Result<Option<ReconcileOutcome>, LibraryError> {
        if pass.revision != self.revision {
            debug!(
                "Discarding reconcile pass r{} (now r{})",
                pass.revision, self.revision
            );
            self.schedule_reconcile(0);
            return Ok(None);
        }
        let now = self.clock.now_ms();
        let outcome = self.patches.apply(pass, &self.statuses, now)?;
        for class in &outcome.resolved {
            self.errors.clear(*class);
        }
        for error in &outcome.errors {
            self.report_error(error.clone());
        }
        self.cancel_commits(&outcome.torn_down);
        self.send_all(outcome.commands.clone());
        self.refresh_deployments();
        Ok(Some(outcome))
    }

    pub fn reconcile_now(&mut self) -> Result<ReconcileOutcome, LibraryError> {
        let pass = self.begin_reconcile();
        Ok(self.finish_reconcile(pass)?.unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Runs every due task. Returns when the next one is due.
    pub fn poll(&mut self) -> Option<u64> {
        let now = self.clock.now_ms();
        for task in self.timers.pop_due(now) {
            if let Err(e) = self.run_task(task, now) {
                warn!("Manager task failed: {}", e);
            }
        }
        self.timers.next_due()
    }

    fn run_task(&mut self, task: ManagerTask, now: u64) -> Result<(), LibraryError> {
        match task {
            ManagerTask::Reconcile => {
                self.reconcile_timer = None;
                if self.active {
                    self.reconcile_now()?;
                }
            }
            ManagerTask::Poll => {
                self.poll_timer = None;
                if self.active {
                    self.schedule_poll();
                    if self.reconcile_timer.is_none() {
                        self.reconcile_now()?;
                    }
                }
            }
            ManagerTask::CommitOverride(key) => {
                let hosts = self.hosts_of(&key.node_id);
                self.router.commit(&key, &hosts, self.transport.as_ref())?;
            }
            ManagerTask::BridgeSample => {
                self.bridge_timer = None;
                let actions = self.bridges.sample(&self.graph, &self.registry, now);
                self.apply_bridge_actions(actions);
                self.schedule_bridge_sample();
            }
        }
        Ok(())
    }

    fn schedule_reconcile(&mut self, delay_ms: u64) {
        if let Some(handle) = self.reconcile_timer.take() {
            self.timers.cancel(handle);
        }
        let now = self.clock.now_ms();
        self.reconcile_timer = Some(self.timers.schedule(ManagerTask::Reconcile, delay_ms, now));
    }

    fn schedule_poll(&mut self) {
        if self.poll_timer.is_none() {
            let now = self.clock.now_ms();
            self.poll_timer = Some(self.timers.schedule(
                ManagerTask::Poll,
                self.config.poll_interval_ms,
                now,
            ));
        }
    }

    fn schedule_bridge_sample(&mut self) {
        if self.bridge_timer.is_none() && self.bridges.has_routes() {
            let now = self.clock.now_ms();
            self.bridge_timer = Some(self.timers.schedule(
                ManagerTask::BridgeSample,
                self.config.bridge_min_interval_ms,
                now,
            ));
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn report_error(&mut self, error: DeployError) {
        if self.errors.current() != Some(&error) {
            self.errors.set(error);
        }
    }

    fn report_failure(&mut self, error: &LibraryError) {
        self.report_error(DeployError::new(ErrorClass::of(error), error.to_string()));
    }

    fn send_all(&self, commands: Vec<(String, ControlMessage)>) {
        for (client, message) in commands {
            let name = message.name();
            if let Err(e) = self.transport.send(&client, message) {
                warn!("Sending {} to {} failed: {}", name, client, e);
            }
        }
    }

    /// Node ids deployed anywhere, loops included.
    fn hosted_nodes(&self) -> BTreeSet<String> {
        let mut nodes = self.patches.deployed_nodes();
        nodes.extend(self.loops.claimed_nodes());
        nodes
    }

    /// Cancels pending commits for nodes no longer hosted anywhere.
    fn cancel_commits(&mut self, candidates: &BTreeSet<String>) {
        let hosted = self.hosted_nodes();
        let orphaned: BTreeSet<String> = candidates.difference(&hosted).cloned().collect();
        if !orphaned.is_empty() {
            self.router.cancel_nodes(&orphaned, &mut self.timers);
        }
    }

    /// Every deployed node with the deployments hosting it.
    fn placements(&self) -> BTreeMap<String, Placement> {
        let mut placements: BTreeMap<String, Placement> = BTreeMap::new();
        for (client, record) in self.patches.records() {
            for node_id in &record.node_ids {
                placements.entry(node_id.clone()).or_default().insert((
                    client.clone(),
                    record.patch_id.clone(),
                    record.deployed_at_ms,
                ));
            }
        }
        for lp in self.loops.iter() {
            for node_id in &lp.node_ids {
                placements.entry(node_id.clone()).or_default().insert((
                    lp.client_id.clone(),
                    lp.loop_id.clone(),
                    lp.deployed_at_ms,
                ));
            }
        }
        placements
    }

    /// Pushes visual membership changes and rebuilds bridge routes.
    fn refresh_deployments(&mut self) {
        let placements = self.placements();
        let deployed: BTreeSet<String> = placements.keys().cloned().collect();
        let in_loop = self.loops.claimed_nodes();
        let node_ids: Vec<String> = self.graph.nodes.iter().map(|n| n.id.clone()).collect();
        let changes = self.visual.update(&node_ids, &deployed, &in_loop);
        if !changes.is_empty() {
            self.visual_sink.patch(&changes);
        }

        let actions = self.bridges.rebuild(&self.graph, &self.registry, &placements);
        self.apply_bridge_actions(actions);
        if self.active {
            self.schedule_bridge_sample();
        }
    }

    fn apply_bridge_actions(&mut self, actions: Vec<BridgeAction>) {
        for action in actions {
            let result = match action {
                BridgeAction::Set(PortRef { node_id, port_id }, value) => {
                    let hosts = self.hosts_of(&node_id);
                    let key = OverrideKey::new(&node_id, OverrideKind::Input, &port_id);
                    self.router
                        .set_durable(&key, value, &hosts, self.transport.as_ref())
                }
                BridgeAction::Remove(PortRef { node_id, port_id }) => {
                    let hosts = self.hosts_of(&node_id);
                    let key = OverrideKey::new(&node_id, OverrideKind::Input, &port_id);
                    self.router
                        .remove(&key, &hosts, self.transport.as_ref(), &mut self.timers)
                }
            };
            if let Err(e) = result {
                warn!("Bridge update failed: {}", e);
            }
        }
    }
}
