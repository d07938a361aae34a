//! Dataflow runtime: holds one graph instance and evaluates it tick by tick.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use log::{debug, error};

use super::context::ProcessContext;
use super::overrides::{OverrideKey, OverrideKind, OverrideStore};
use super::watchdog::{TickWatchdog, WatchdogVerdict};
use crate::config::ExecutorConfig;
use crate::error::LibraryError;
use crate::model::graph::Graph;
use crate::model::graph_analysis::{self, DefinitionMap};
use crate::model::property::{PropertyMap, PropertyValue};
use crate::plugin::registry::SharedRegistry;
use crate::util::clock::SharedClock;

/// Config key that switches a single-in/single-out node to pass-through.
pub const BYPASS_KEY: &str = "__bypass";

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub duration_ms: u64,
    pub delta_ms: u64,
    pub verdict: WatchdogVerdict,
}

/// Runs one graph.
///
/// Input precedence per port: live override, then connection, then the
/// manually set value, then the port default.
pub struct DataflowRuntime {
    registry: SharedRegistry,
    clock: SharedClock,
    graph: Graph,
    defs: DefinitionMap,
    order: Vec<String>,
    outputs: HashMap<String, PropertyMap>,
    last_inputs: HashMap<String, PropertyMap>,
    node_state: HashMap<String, PropertyMap>,
    /// Input+config signature of the last evaluation, for cacheable nodes.
    memo: HashMap<String, u64>,
    /// Nodes that must recompute next tick regardless of memo.
    dirty: HashSet<String>,
    overrides: OverrideStore,
    watchdog: TickWatchdog,
    max_delta_ms: u64,
    started_at_ms: Option<u64>,
    last_tick_ms: Option<u64>,
    running: bool,
}

impl DataflowRuntime {
    pub fn new(registry: SharedRegistry, clock: SharedClock, config: &ExecutorConfig) -> Self {
        Self {
            registry,
            clock,
            graph: Graph::new(),
            defs: DefinitionMap::new(),
            order: Vec::new(),
            outputs: HashMap::new(),
            last_inputs: HashMap::new(),
            node_state: HashMap::new(),
            memo: HashMap::new(),
            dirty: HashSet::new(),
            overrides: OverrideStore::new(),
            watchdog: TickWatchdog::new(
                config.tick_budget_ms,
                config.watchdog_threshold,
                config.watchdog_window,
            ),
            max_delta_ms: config.max_delta_ms,
            started_at_ms: None,
            last_tick_ms: None,
            running: false,
        }
    }

    /// Replaces the active graph.
    ///
    /// Validation happens before anything is touched, so a rejected graph
    /// leaves the previous one running. Node-local state of nodes that are
    /// gone, disabled or changed type is disposed through `on_disable`.
    pub fn load_graph(&mut self, graph: Graph) -> Result<(), LibraryError> {
        let defs = graph_analysis::resolve_definitions(&graph, &self.registry)?;
        graph_analysis::validate_graph(&graph, &defs)?;
        let order = graph_analysis::topological_order(&graph, &defs)?;

        let keep: HashSet<&str> = graph
            .nodes
            .iter()
            .filter(|n| {
                n.enabled
                    && self
                        .defs
                        .get(&n.id)
                        .is_none_or(|old| old.type_id == n.type_id)
            })
            .map(|n| n.id.as_str())
            .collect();
        let stale: Vec<String> = self
            .defs
            .keys()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &stale {
            self.dispose_node(id);
        }

        let present: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        self.overrides.retain_nodes(|id| present.contains(id));
        self.last_inputs.retain(|id, _| present.contains(id.as_str()));

        debug!(
            "DataflowRuntime: loaded {} nodes, {} connections ({} disposed)",
            graph.nodes.len(),
            graph.connections.len(),
            stale.len()
        );
        self.graph = graph;
        self.defs = defs;
        self.order = order;
        self.dirty.extend(self.order.iter().cloned());
        Ok(())
    }

    fn dispose_node(&mut self, node_id: &str) {
        if let Some(mut state) = self.node_state.remove(node_id) {
            if let Some(def) = self.defs.get(node_id) {
                def.processor.on_disable(node_id, &mut state);
            }
        }
        self.outputs.remove(node_id);
        self.memo.remove(node_id);
    }

    /// Disposes every node and empties the graph.
    pub fn clear(&mut self) {
        let ids: Vec<String> = self.defs.keys().cloned().collect();
        for id in &ids {
            self.dispose_node(id);
        }
        self.graph = Graph::new();
        self.defs.clear();
        self.order.clear();
        self.last_inputs.clear();
        self.dirty.clear();
        self.overrides.clear();
        self.started_at_ms = None;
        self.last_tick_ms = None;
        self.running = false;
        self.watchdog.reset();
    }

    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.watchdog.reset();
            // Resume without a catch-up delta.
            self.last_tick_ms = None;
        }
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.graph.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn recent_tick_durations(&self) -> Vec<u64> {
        self.watchdog.recent_durations()
    }

    pub fn apply_override(
        &mut self,
        key: OverrideKey,
        value: PropertyValue,
        ttl_ms: Option<u64>,
    ) -> Result<(), LibraryError> {
        if !self.graph.contains(&key.node_id) {
            return Err(LibraryError::validation(format!(
                "Override targets unknown node {}",
                key.node_id
            )));
        }
        if key.kind == OverrideKind::Config {
            self.dirty.insert(key.node_id.clone());
        }
        let now = self.clock.now_ms();
        self.overrides.set(key, value, now, ttl_ms);
        Ok(())
    }

    pub fn remove_override(&mut self, key: &OverrideKey) -> bool {
        if key.kind == OverrideKind::Config {
            self.dirty.insert(key.node_id.clone());
        }
        self.overrides.remove(key)
    }

    /// Drops every override; nodes recompute from their own values.
    pub fn clear_overrides(&mut self) {
        if !self.overrides.is_empty() {
            self.overrides.clear();
            self.dirty.extend(self.order.iter().cloned());
        }
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    /// Inputs the node saw on its last evaluation.
    pub fn effective_input(&self, node_id: &str, port_id: &str) -> Option<&PropertyValue> {
        self.last_inputs.get(node_id)?.get(port_id)
    }

    pub fn output(&self, node_id: &str, port_id: &str) -> Option<&PropertyValue> {
        self.outputs.get(node_id)?.get(port_id)
    }

    /// Evaluates every enabled node once in topological order.
    pub fn tick(&mut self) -> Result<TickReport, LibraryError> {
        if !self.running {
            return Err(LibraryError::runtime("tick on a stopped runtime"));
        }
        let started = self.clock.now_ms();
        let origin = *self.started_at_ms.get_or_insert(started);
        let delta_ms = self
            .last_tick_ms
            .map(|last| started.saturating_sub(last).min(self.max_delta_ms))
            .unwrap_or(0);
        self.last_tick_ms = Some(started);

        for key in self.overrides.purge_expired(started) {
            if key.kind == OverrideKind::Config {
                self.dirty.insert(key.node_id);
            }
        }

        let order = self.order.clone();
        for node_id in &order {
            self.evaluate_node(node_id, started, started.saturating_sub(origin), delta_ms);
        }

        let duration_ms = self.clock.now_ms().saturating_sub(started);
        let verdict = self.watchdog.observe(duration_ms);
        if verdict == WatchdogVerdict::Tripped {
            error!(
                "Watchdog tripped, stopping runtime (recent ticks {:?} ms)",
                self.watchdog.recent_durations()
            );
            self.running = false;
        }
        Ok(TickReport {
            duration_ms,
            delta_ms,
            verdict,
        })
    }

    fn evaluate_node(&mut self, node_id: &str, now_ms: u64, time_ms: u64, delta_ms: u64) {
        let Some(node) = self.graph.get_node(node_id) else {
            return;
        };
        if !node.enabled {
            return;
        }
        let Some(def) = self.defs.get(node_id).cloned() else {
            return;
        };

        let mut inputs = PropertyMap::new();
        for port in &def.inputs {
            if let Some(value) = self.resolve_input(node_id, &port.id, now_ms) {
                inputs.insert(port.id.clone(), value);
            } else if let Some(manual) = node.inputs.get(&port.id) {
                inputs.insert(port.id.clone(), manual.clone());
            } else if let Some(default) = &port.default_value {
                inputs.insert(port.id.clone(), default.clone());
            }
        }

        let mut config = node.config.clone();
        for field in &def.config_schema {
            config
                .entry(field.id.clone())
                .or_insert_with(|| field.default_value.clone());
        }
        for (key, value) in self.overrides.config_for(node_id, now_ms) {
            config.insert(key.to_string(), value.clone());
        }

        let bypassed = config.get(BYPASS_KEY) == Some(&PropertyValue::Boolean(true));
        let outputs = if bypassed {
            passthrough(&def.inputs, &def.outputs, &inputs)
        } else {
            let signature = def.cacheable.then(|| signature_of(&inputs, &config));
            let fresh = !self.dirty.remove(node_id);
            match signature {
                Some(sig)
                    if fresh
                        && self.memo.get(node_id) == Some(&sig)
                        && self.outputs.contains_key(node_id) =>
                {
                    self.last_inputs.insert(node_id.to_string(), inputs);
                    return;
                }
                Some(sig) => {
                    self.memo.insert(node_id.to_string(), sig);
                }
                None => {}
            }
            let state = self.node_state.entry(node_id.to_string()).or_default();
            let mut ctx = ProcessContext {
                node_id,
                time_ms,
                delta_ms,
                state,
            };
            let outputs = def.processor.process(&inputs, &config, &mut ctx);
            if def.sink {
                def.processor.on_sink(node_id, &inputs, &config);
            }
            outputs
        };

        self.outputs.insert(node_id.to_string(), outputs);
        self.last_inputs.insert(node_id.to_string(), inputs);
    }

    /// Override, else the connected upstream output.
    fn resolve_input(&self, node_id: &str, port_id: &str, now_ms: u64) -> Option<PropertyValue> {
        let key = OverrideKey::new(node_id, OverrideKind::Input, port_id);
        if let Some(value) = self.overrides.get(&key, now_ms) {
            return Some(value.clone());
        }
        let target = crate::model::connection::PortRef::new(node_id, port_id);
        let conn = self.graph.input_connection(&target)?;
        let upstream_enabled = self
            .graph
            .get_node(&conn.source.node_id)
            .is_some_and(|n| n.enabled);
        if !upstream_enabled {
            return None;
        }
        self.outputs
            .get(&conn.source.node_id)?
            .get(&conn.source.port_id)
            .cloned()
    }
}

fn passthrough(
    inputs_spec: &[crate::model::connection::PortSpec],
    outputs_spec: &[crate::model::connection::PortSpec],
    inputs: &PropertyMap,
) -> PropertyMap {
    let mut outputs = PropertyMap::new();
    if let ([input], [output]) = (inputs_spec, outputs_spec) {
        if let Some(value) = inputs.get(&input.id) {
            outputs.insert(output.id.clone(), value.clone());
        }
    }
    outputs
}

fn signature_of(inputs: &PropertyMap, config: &PropertyMap) -> u64 {
    let mut hasher = DefaultHasher::new();
    inputs.hash(&mut hasher);
    config.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::connection::{Connection, PortSpec, PortType};
    use crate::model::node::NodeInstance;
    use crate::plugin::node_types::{NodeCategory, NodeDefinition, NodeProcessor};
    use crate::plugin::registry::NodeRegistry;
    use crate::util::clock::ManualClock;

    struct Counting(Arc<AtomicUsize>);

    impl NodeProcessor for Counting {
        fn process(
            &self,
            inputs: &PropertyMap,
            _config: &PropertyMap,
            _ctx: &mut ProcessContext<'_>,
        ) -> PropertyMap {
            self.0.fetch_add(1, Ordering::SeqCst);
            inputs.clone()
        }
    }

    struct Stateful(Arc<AtomicUsize>);

    impl NodeProcessor for Stateful {
        fn process(
            &self,
            _inputs: &PropertyMap,
            _config: &PropertyMap,
            ctx: &mut ProcessContext<'_>,
        ) -> PropertyMap {
            ctx.state.insert("cache".to_string(), true.into());
            PropertyMap::new()
        }

        fn on_disable(&self, _node_id: &str, state: &mut PropertyMap) {
            if state.remove("cache").is_some() {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn setup() -> (DataflowRuntime, Arc<ManualClock>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let registry = NodeRegistry::with_builtins();
        let calls = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        registry
            .register(
                NodeDefinition::new("test.count", "Count", NodeCategory::Custom)
                    .with_inputs(vec![PortSpec::new("x", "X", PortType::Scalar)])
                    .with_outputs(vec![PortSpec::new("x", "X", PortType::Scalar)])
                    .with_processor(Counting(calls.clone()))
                    .as_cacheable(),
            )
            .unwrap();
        registry
            .register(
                NodeDefinition::new("test.stateful", "Stateful", NodeCategory::Custom)
                    .with_processor(Stateful(disposed.clone())),
            )
            .unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let runtime = DataflowRuntime::new(
            Arc::new(registry),
            clock.clone(),
            &ExecutorConfig::default(),
        );
        (runtime, clock, calls, disposed)
    }

    fn sum_graph() -> Graph {
        let mut graph = Graph::new();
        graph.add_node(NodeInstance::new_with_id("n", "data.number").with_config("value", 2.0));
        graph.add_node(NodeInstance::new_with_id("sum", "math.add").with_input("b", 3.0));
        graph.add_connection(Connection::between(("n", "value"), ("sum", "a")));
        graph
    }

    #[test]
    fn test_tick_follows_precedence() {
        let (mut rt, clock, _, _) = setup();
        rt.load_graph(sum_graph()).unwrap();
        rt.start();
        rt.tick().unwrap();
        assert_eq!(rt.output("sum", "result"), Some(&PropertyValue::from(5.0)));

        rt.apply_override(
            OverrideKey::new("sum", OverrideKind::Input, "a"),
            10.0.into(),
            Some(100),
        )
        .unwrap();
        clock.advance(50);
        rt.tick().unwrap();
        assert_eq!(rt.output("sum", "result"), Some(&PropertyValue::from(13.0)));

        clock.advance(60);
        rt.tick().unwrap();
        assert_eq!(rt.effective_input("sum", "a"), Some(&PropertyValue::from(2.0)));
    }

    #[test]
    fn test_config_override_recomputes() {
        let (mut rt, _, _, _) = setup();
        rt.load_graph(sum_graph()).unwrap();
        rt.start();
        rt.tick().unwrap();
        rt.apply_override(
            OverrideKey::new("n", OverrideKind::Config, "value"),
            7.0.into(),
            None,
        )
        .unwrap();
        rt.tick().unwrap();
        assert_eq!(rt.output("sum", "result"), Some(&PropertyValue::from(10.0)));
    }

    #[test]
    fn test_cacheable_node_skips_unchanged_inputs() {
        let (mut rt, _, calls, _) = setup();
        let mut graph = Graph::new();
        graph.add_node(NodeInstance::new_with_id("c", "test.count").with_input("x", 1.0));
        rt.load_graph(graph).unwrap();
        rt.start();
        rt.tick().unwrap();
        rt.tick().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        rt.apply_override(
            OverrideKey::new("c", OverrideKind::Config, "anything"),
            1.0.into(),
            None,
        )
        .unwrap();
        rt.tick().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_load_graph_disposes_removed_nodes() {
        let (mut rt, _, _, disposed) = setup();
        let mut graph = Graph::new();
        graph.add_node(NodeInstance::new_with_id("s", "test.stateful"));
        rt.load_graph(graph.clone()).unwrap();
        rt.start();
        rt.tick().unwrap();

        rt.load_graph(graph.clone()).unwrap();
        assert_eq!(disposed.load(Ordering::SeqCst), 0);

        graph.get_node_mut("s").unwrap().enabled = false;
        rt.load_graph(graph).unwrap();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejected_graph_keeps_previous() {
        let (mut rt, _, _, _) = setup();
        rt.load_graph(sum_graph()).unwrap();
        let mut bad = Graph::new();
        bad.add_node(NodeInstance::new_with_id("x", "no.such.type"));
        assert!(rt.load_graph(bad).is_err());
        assert!(rt.graph().contains("sum"));
    }

    #[test]
    fn test_delta_is_capped_after_stall() {
        let (mut rt, clock, _, _) = setup();
        rt.load_graph(sum_graph()).unwrap();
        rt.start();
        rt.tick().unwrap();
        clock.advance(10_000);
        let report = rt.tick().unwrap();
        assert_eq!(report.delta_ms, ExecutorConfig::default().max_delta_ms);
    }

    #[test]
    fn test_bypass_passes_single_input_through() {
        let (mut rt, _, _, _) = setup();
        let mut graph = Graph::new();
        graph.add_node(NodeInstance::new_with_id("n", "data.number").with_config("value", 4.0));
        graph.add_node(NodeInstance::new_with_id("d", "data.to_text"));
        graph.add_node(NodeInstance::new_with_id("p", "logic.passthrough"));
        graph.add_connection(Connection::between(("n", "value"), ("p", "in")));
        rt.load_graph(graph).unwrap();
        rt.start();
        rt.apply_override(
            OverrideKey::new("p", OverrideKind::Config, BYPASS_KEY),
            true.into(),
            None,
        )
        .unwrap();
        rt.tick().unwrap();
        assert_eq!(rt.output("p", "out"), Some(&PropertyValue::from(4.0)));
    }
}
