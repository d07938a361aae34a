//! Live-value bridges: manager-side sources pushed into deployed graphs.
//!
//! A route connects a live-source output (a MIDI fader, say) to an input of
//! a deployed node. Sources are sampled on the manager at a capped rate and
//! only changed values are sent.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::model::connection::{PortRef, PortType};
use crate::model::graph::Graph;
use crate::model::property::{PropertyMap, PropertyValue};
use crate::plugin::node_types::NodeRole;
use crate::plugin::registry::NodeRegistry;
use crate::runtime::context::ProcessContext;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BridgeRoute {
    pub source: PortRef,
    pub target: PortRef,
    pub target_type: PortType,
}

/// Where a deployed node runs: `(client, deploy id, deployed at)` per host.
pub type Placement = BTreeSet<(String, String, u64)>;

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeAction {
    Set(PortRef, PropertyValue),
    /// The source has no usable value; the target reverts to its own.
    Remove(PortRef),
}

/// Converts a sampled value to the destination port's type. `None` means
/// unusable: missing, unconvertible, or a type bridges do not carry.
pub fn coerce(value: &PropertyValue, target: PortType) -> Option<PropertyValue> {
    match (target, value) {
        (_, PropertyValue::Null) => None,
        (PortType::Scalar, PropertyValue::Boolean(b)) => Some(if *b { 1.0 } else { 0.0 }.into()),
        (PortType::Scalar, PropertyValue::String(s)) => s.trim().parse::<f64>().ok().map(Into::into),
        (PortType::Scalar, v) => v.as_f64().filter(|f| f.is_finite()).map(Into::into),
        (PortType::Integer, v) => v
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| PropertyValue::Integer(f.round() as i64)),
        (PortType::Boolean, PropertyValue::Boolean(b)) => Some((*b).into()),
        (PortType::Boolean, v) => v.as_f64().map(|f| (f != 0.0).into()),
        (PortType::String, PropertyValue::String(s)) => Some(s.clone().into()),
        (PortType::String, v) => v.as_f64().map(|f| f.to_string().into()),
        (PortType::Color, PropertyValue::Color(c)) => Some((*c).into()),
        _ => None,
    }
}

/// Comparison key: numbers rounded to `precision` decimals, anything else
/// exact.
fn value_signature(value: &PropertyValue, precision: u32) -> String {
    match value.as_f64() {
        Some(f) => format!("{:.*}", precision as usize, f),
        None => value.to_json().to_string(),
    }
}

pub struct LiveBridges {
    min_interval_ms: u64,
    precision: u32,
    routes: Vec<BridgeRoute>,
    /// Target -> signature of the value last sent. Present means owned.
    sent: BTreeMap<PortRef, String>,
    /// Placement of each routed target node when the routes were built.
    placements: BTreeMap<String, Placement>,
    /// Scratch state for sources evaluated on the manager.
    source_state: HashMap<String, PropertyMap>,
    last_sample_ms: Option<u64>,
}

impl LiveBridges {
    pub fn new(min_interval_ms: u64, precision: u32) -> Self {
        Self {
            min_interval_ms,
            precision,
            routes: Vec::new(),
            sent: BTreeMap::new(),
            placements: BTreeMap::new(),
            source_state: HashMap::new(),
            last_sample_ms: None,
        }
    }

    pub fn routes(&self) -> &[BridgeRoute] {
        &self.routes
    }

    pub fn has_routes(&self) -> bool {
        !self.routes.is_empty()
    }

    pub fn owned(&self) -> impl Iterator<Item = &PortRef> {
        self.sent.keys()
    }

    /// Recomputes routes against the current graph and deployments.
    ///
    /// Only edges from an undeployed live source into a deployed node make
    /// a route. Returns removals for targets no longer routed. Values sent
    /// to a target stay owned while its placement is unchanged; a target
    /// that was redeployed gets its value again on the next sample.
    pub fn rebuild(
        &mut self,
        graph: &Graph,
        registry: &NodeRegistry,
        deployed: &BTreeMap<String, Placement>,
    ) -> Vec<BridgeAction> {
        let mut routes = Vec::new();
        for conn in &graph.connections {
            let (Some(source), Some(target)) = (
                graph.get_node(&conn.source.node_id),
                graph.get_node(&conn.target.node_id),
            ) else {
                continue;
            };
            if !source.enabled
                || deployed.contains_key(&source.id)
                || !deployed.contains_key(&target.id)
            {
                continue;
            }
            let Some(source_def) = registry.get(&source.type_id) else {
                continue;
            };
            if source_def.role != NodeRole::LiveSource {
                continue;
            }
            let Some(port) = registry
                .get(&target.type_id)
                .and_then(|d| d.input(&conn.target.port_id).cloned())
            else {
                continue;
            };
            routes.push(BridgeRoute {
                source: conn.source.clone(),
                target: conn.target.clone(),
                target_type: port.port_type,
            });
        }
        routes.sort();

        let routed: BTreeSet<&PortRef> = routes.iter().map(|r| &r.target).collect();
        let dropped: Vec<PortRef> = self
            .sent
            .keys()
            .filter(|t| !routed.contains(t))
            .cloned()
            .collect();
        let live_sources: BTreeSet<&str> = routes.iter().map(|r| r.source.node_id.as_str()).collect();
        self.source_state.retain(|id, _| live_sources.contains(id.as_str()));

        let placements: BTreeMap<String, Placement> = routes
            .iter()
            .filter_map(|r| {
                deployed
                    .get(&r.target.node_id)
                    .map(|p| (r.target.node_id.clone(), p.clone()))
            })
            .collect();
        let previous = std::mem::replace(&mut self.placements, placements);
        let placements = &self.placements;
        self.sent.retain(|target, _| {
            routed.contains(target)
                && previous.get(&target.node_id) == placements.get(&target.node_id)
        });

        if routes != self.routes {
            debug!("Bridge routes: {} (was {})", routes.len(), self.routes.len());
        }
        self.routes = routes;
        dropped.into_iter().map(BridgeAction::Remove).collect()
    }

    /// Samples every routed source, at most once per `min_interval_ms`.
    pub fn sample(
        &mut self,
        graph: &Graph,
        registry: &NodeRegistry,
        now_ms: u64,
    ) -> Vec<BridgeAction> {
        if self
            .last_sample_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < self.min_interval_ms)
        {
            return Vec::new();
        }
        let delta_ms = self.last_sample_ms.map(|l| now_ms - l).unwrap_or(0);
        self.last_sample_ms = Some(now_ms);

        let mut outputs: HashMap<String, PropertyMap> = HashMap::new();
        let mut actions = Vec::new();
        for route in self.routes.clone() {
            let source_outputs = outputs
                .entry(route.source.node_id.clone())
                .or_insert_with(|| self.evaluate_source(graph, registry, &route.source.node_id, now_ms, delta_ms));
            let coerced = source_outputs
                .get(&route.source.port_id)
                .and_then(|v| coerce(v, route.target_type));
            match coerced {
                Some(value) => {
                    let signature = value_signature(&value, self.precision);
                    if self.sent.get(&route.target) != Some(&signature) {
                        self.sent.insert(route.target.clone(), signature);
                        actions.push(BridgeAction::Set(route.target, value));
                    }
                }
                None => {
                    if self.sent.remove(&route.target).is_some() {
                        actions.push(BridgeAction::Remove(route.target));
                    }
                }
            }
        }
        actions
    }

    fn evaluate_source(
        &mut self,
        graph: &Graph,
        registry: &NodeRegistry,
        node_id: &str,
        now_ms: u64,
        delta_ms: u64,
    ) -> PropertyMap {
        let Some(node) = graph.get_node(node_id) else {
            return PropertyMap::new();
        };
        let Some(def) = registry.get(&node.type_id) else {
            return PropertyMap::new();
        };
        let mut config: PropertyMap = def
            .config_schema
            .iter()
            .map(|f| (f.id.clone(), f.default_value.clone()))
            .collect();
        config.extend(node.config.clone());
        let state = self.source_state.entry(node_id.to_string()).or_default();
        let mut ctx = ProcessContext {
            node_id,
            time_ms: now_ms,
            delta_ms,
            state,
        };
        def.processor.process(&node.inputs, &config, &mut ctx)
    }

    pub fn clear(&mut self) {
        self.routes.clear();
        self.sent.clear();
        self.placements.clear();
        self.source_state.clear();
        self.last_sample_ms = None;
    }
}
