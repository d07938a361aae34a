//! Client-side executor: receives control messages, runs one deployment.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use super::capabilities::CapabilityProbe;
use super::sinks::{NoopReleaser, ResourceReleaser, StatusSink};
use crate::config::ExecutorConfig;
use crate::error::LibraryError;
use crate::plugin::registry::SharedRegistry;
use crate::protocol::{
    ControlMessage, DeployPayload, LifecycleCommand, OverridePayload, StatusEvent, StatusKind,
};
use crate::runtime::engine::DataflowRuntime;
use crate::runtime::watchdog::WatchdogVerdict;
use crate::util::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Running,
    Stopped,
}

/// Runs whatever graph the manager last deployed to this client.
///
/// Every transition and every rejection is reported through the status
/// sink. Commands naming a deployment other than the current one are stale
/// and dropped without a report.
pub struct ClientExecutor {
    client_id: String,
    config: ExecutorConfig,
    clock: SharedClock,
    runtime: DataflowRuntime,
    capabilities: Arc<dyn CapabilityProbe>,
    status: Arc<dyn StatusSink>,
    releaser: Arc<dyn ResourceReleaser>,
    state: ExecutorState,
    current_id: Option<String>,
    tick_interval_ms: u64,
    next_tick_ms: Option<u64>,
}

impl ClientExecutor {
    pub fn new(
        client_id: &str,
        registry: SharedRegistry,
        clock: SharedClock,
        config: ExecutorConfig,
        capabilities: Arc<dyn CapabilityProbe>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let runtime = DataflowRuntime::new(registry, clock.clone(), &config);
        let tick_interval_ms = config.clamp_tick_interval(None);
        Self {
            client_id: client_id.to_string(),
            config,
            clock,
            runtime,
            capabilities,
            status,
            releaser: Arc::new(NoopReleaser),
            state: ExecutorState::Idle,
            current_id: None,
            tick_interval_ms,
            next_tick_ms: None,
        }
    }

    pub fn with_releaser(mut self, releaser: Arc<dyn ResourceReleaser>) -> Self {
        self.releaser = releaser;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    pub fn runtime(&self) -> &DataflowRuntime {
        &self.runtime
    }

    pub fn handle(&mut self, message: ControlMessage) {
        debug!("{} <- {}", self.client_id, message.name());
        match message {
            ControlMessage::Deploy(raw) => self.deploy(&raw),
            ControlMessage::Start(cmd) => self.start(&cmd),
            ControlMessage::Stop(cmd) => self.stop(&cmd),
            ControlMessage::Remove(cmd) => self.remove(&cmd),
            ControlMessage::OverrideSet(payload) => self.apply_overrides(&payload, false),
            ControlMessage::OverrideRemove(payload) => self.apply_overrides(&payload, true),
        }
    }

    fn emit(&self, event: StatusKind, loop_id: Option<&str>) -> StatusEvent {
        StatusEvent::new(event, loop_id)
    }

    fn report(&self, event: StatusEvent) {
        self.status.emit(event);
    }

    fn reject(&self, loop_id: Option<&str>, error: &LibraryError) {
        warn!("{} rejected deploy: {}", self.client_id, error);
        let mut event = self
            .emit(StatusKind::Rejected, loop_id)
            .with("reason", error.to_string());
        if let LibraryError::Capability(missing) = error {
            event = event.with("missing", missing.clone());
        }
        self.report(event);
    }

    fn deploy(&mut self, raw: &Value) {
        let claimed_id = raw
            .get("meta")
            .and_then(|m| m.get("loopId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let claimed_id = claimed_id.as_deref();

        let payload = match DeployPayload::from_value(raw) {
            Ok(payload) => payload,
            Err(e) => return self.reject(claimed_id, &e),
        };
        let DeployPayload { graph, meta } = payload;
        let loop_id = meta.loop_id.as_str();

        if graph.nodes.len() > self.config.max_nodes {
            let e = LibraryError::validation(format!(
                "graph has {} nodes, limit is {}",
                graph.nodes.len(),
                self.config.max_nodes
            ));
            return self.reject(Some(loop_id), &e);
        }

        let missing = self.capabilities.missing(&meta.required_capabilities);
        if !missing.is_empty() {
            return self.reject(Some(loop_id), &LibraryError::Capability(missing));
        }

        let tick_interval_ms = self.config.clamp_tick_interval(meta.tick_interval_ms);
        if let Some(version) = meta.protocol_version {
            if version != self.config.protocol_version {
                warn!(
                    "{}: deploy {} uses protocol {}, executor speaks {}",
                    self.client_id, loop_id, version, self.config.protocol_version
                );
            }
        }

        if let Some(bound) = meta.client_id.as_deref() {
            if bound != self.client_id {
                let e = LibraryError::Identity {
                    expected: bound.to_string(),
                    actual: self.client_id.clone(),
                };
                warn!("{}", e);
                self.report(self.emit(StatusKind::Error, Some(loop_id)).with("reason", e.to_string()));
                return;
            }
        }

        let previous: BTreeSet<String> = self.runtime.node_ids().map(str::to_string).collect();
        let node_count = graph.nodes.len();
        if let Err(e) = self.runtime.load_graph(graph) {
            return self.reject(Some(loop_id), &e);
        }
        self.runtime.clear_overrides();
        for gone in previous.iter().filter(|id| !self.runtime.graph().contains(id)) {
            self.releaser.release(gone);
        }

        info!(
            "{}: deployed {} ({} nodes, tick {} ms)",
            self.client_id, loop_id, node_count, tick_interval_ms
        );
        self.current_id = Some(loop_id.to_string());
        self.tick_interval_ms = tick_interval_ms;
        self.report(
            self.emit(StatusKind::Deployed, Some(loop_id))
                .with("nodes", node_count)
                .with("tickIntervalMs", tick_interval_ms),
        );
        self.run();
    }

    fn run(&mut self) {
        self.runtime.start();
        self.state = ExecutorState::Running;
        self.next_tick_ms = Some(self.clock.now_ms());
        self.report(self.emit(StatusKind::Started, self.current_id.as_deref()));
    }

    /// Absent ids match; a named id must be the current deployment.
    fn is_current(&self, loop_id: Option<&str>) -> bool {
        match loop_id {
            None => true,
            Some(id) => self.current_id.as_deref() == Some(id),
        }
    }

    fn start(&mut self, cmd: &LifecycleCommand) {
        if !self.is_current(cmd.loop_id.as_deref()) {
            debug!("{}: ignoring stale start {:?}", self.client_id, cmd.loop_id);
            return;
        }
        if self.state == ExecutorState::Stopped {
            self.run();
        }
    }

    fn stop(&mut self, cmd: &LifecycleCommand) {
        if !self.is_current(cmd.loop_id.as_deref()) {
            debug!("{}: ignoring stale stop {:?}", self.client_id, cmd.loop_id);
            return;
        }
        if self.state == ExecutorState::Running {
            self.runtime.stop();
            self.state = ExecutorState::Stopped;
            self.next_tick_ms = None;
            self.report(self.emit(StatusKind::Stopped, self.current_id.as_deref()));
        }
    }

    fn remove(&mut self, cmd: &LifecycleCommand) {
        if !self.is_current(cmd.loop_id.as_deref()) || self.state == ExecutorState::Idle {
            return;
        }
        self.runtime.stop();
        let nodes: Vec<String> = self.runtime.node_ids().map(str::to_string).collect();
        for id in &nodes {
            self.releaser.release(id);
        }
        self.runtime.clear();
        let removed = self.current_id.take();
        self.state = ExecutorState::Idle;
        self.next_tick_ms = None;
        info!("{}: removed {:?}", self.client_id, removed);
        self.report(self.emit(StatusKind::Removed, removed.as_deref()));
    }

    fn apply_overrides(&mut self, payload: &OverridePayload, remove: bool) {
        if self.current_id.as_deref() != Some(payload.loop_id.as_str()) {
            debug!("{}: ignoring overrides for {}", self.client_id, payload.loop_id);
            return;
        }
        for entry in payload.entries() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("{}: skipping malformed override: {}", self.client_id, e);
                    continue;
                }
            };
            let key = entry.key();
            if remove {
                self.runtime.remove_override(&key);
                continue;
            }
            let Some(value) = entry.value else {
                warn!("{}: override {:?} has no value", self.client_id, key);
                continue;
            };
            if let Err(e) = self.runtime.apply_override(key, value, entry.ttl_ms) {
                warn!("{}: {}", self.client_id, e);
            }
        }
    }

    /// Ticks if one is due. Returns when the next tick is due, or `None`
    /// while not running.
    pub fn poll(&mut self) -> Option<u64> {
        if self.state != ExecutorState::Running {
            return None;
        }
        let now = self.clock.now_ms();
        let due = self.next_tick_ms.unwrap_or(now);
        if now < due {
            return Some(due);
        }
        match self.runtime.tick() {
            Ok(report) if report.verdict == WatchdogVerdict::Tripped => {
                self.state = ExecutorState::Stopped;
                self.next_tick_ms = None;
                let recent = self.runtime.recent_tick_durations();
                self.report(
                    self.emit(StatusKind::Stopped, self.current_id.as_deref())
                        .with("watchdog", "slow-tick")
                        .with("recentDurationsMs", recent)
                        .with("budgetMs", self.config.tick_budget_ms),
                );
                None
            }
            Ok(_) => {
                let next = now + self.tick_interval_ms;
                self.next_tick_ms = Some(next);
                Some(next)
            }
            Err(e) => {
                self.runtime.stop();
                self.state = ExecutorState::Stopped;
                self.next_tick_ms = None;
                self.report(
                    self.emit(StatusKind::Error, self.current_id.as_deref())
                        .with("reason", e.to_string()),
                );
                None
            }
        }
    }
}
