//! Wire format of the node-executor control channel.
//!
//! Commands flow manager -> client, status events flow back. Neither side
//! waits for a reply; status events are the only acknowledgement.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LibraryError;
use crate::model::graph::Graph;
use crate::model::property::PropertyValue;
use crate::runtime::overrides::{OverrideKey, OverrideKind};

/// Plugin/control identifier the transport routes these messages under.
pub const CONTROL_CHANNEL: &str = "patchflow.node-executor";
/// `kind` field of every status event.
pub const STATUS_KIND: &str = "node-executor";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeployMeta {
    pub loop_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_version: Option<String>,
    /// Binds the payload to one client; a different client must refuse it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeployPayload {
    pub graph: Graph,
    pub meta: DeployMeta,
}

impl DeployPayload {
    /// Parses a payload, checking the required shape before deserializing so
    /// errors name the missing piece.
    pub fn from_value(value: &Value) -> Result<Self, LibraryError> {
        let graph = value
            .get("graph")
            .and_then(Value::as_object)
            .ok_or_else(|| LibraryError::validation("missing graph object"))?;
        for field in ["nodes", "connections"] {
            if !graph.get(field).is_some_and(Value::is_array) {
                return Err(LibraryError::validation(format!("graph.{} must be an array", field)));
            }
        }
        let loop_id = value
            .get("meta")
            .and_then(|m| m.get("loopId"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if loop_id.is_empty() {
            return Err(LibraryError::validation("meta.loopId is required"));
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_value(&self) -> Result<Value, LibraryError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverrideEntry {
    pub node_id: String,
    pub kind: OverrideKind,
    pub port_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PropertyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl OverrideEntry {
    pub fn set(key: &OverrideKey, value: PropertyValue, ttl_ms: Option<u64>) -> Self {
        Self {
            node_id: key.node_id.clone(),
            kind: key.kind,
            port_id: key.port_id.clone(),
            value: Some(value),
            ttl_ms,
        }
    }

    pub fn remove(key: &OverrideKey) -> Self {
        Self {
            node_id: key.node_id.clone(),
            kind: key.kind,
            port_id: key.port_id.clone(),
            value: None,
            ttl_ms: None,
        }
    }

    pub fn key(&self) -> OverrideKey {
        OverrideKey::new(&self.node_id, self.kind, &self.port_id)
    }
}

/// Batch of overrides for one deployment.
///
/// Entries stay raw JSON until applied so one malformed entry does not
/// poison the batch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverridePayload {
    pub loop_id: String,
    pub overrides: Vec<Value>,
}

impl OverridePayload {
    pub fn new(loop_id: &str, entries: &[OverrideEntry]) -> Result<Self, LibraryError> {
        let overrides = entries
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            loop_id: loop_id.to_string(),
            overrides,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = Result<OverrideEntry, LibraryError>> + '_ {
        self.overrides
            .iter()
            .map(|raw| serde_json::from_value(raw.clone()).map_err(LibraryError::from))
    }
}

/// Guard for lifecycle commands. A command naming another id is stale.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,
}

impl LifecycleCommand {
    pub fn for_id(id: &str) -> Self {
        Self {
            loop_id: Some(id.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Raw payload; the executor validates its shape.
    Deploy(Value),
    Start(LifecycleCommand),
    Stop(LifecycleCommand),
    Remove(LifecycleCommand),
    OverrideSet(OverridePayload),
    OverrideRemove(OverridePayload),
}

impl ControlMessage {
    pub fn deploy(payload: &DeployPayload) -> Result<Self, LibraryError> {
        Ok(ControlMessage::Deploy(payload.to_value()?))
    }

    pub fn start(id: &str) -> Self {
        ControlMessage::Start(LifecycleCommand::for_id(id))
    }

    pub fn stop(id: &str) -> Self {
        ControlMessage::Stop(LifecycleCommand::for_id(id))
    }

    pub fn remove(id: &str) -> Self {
        ControlMessage::Remove(LifecycleCommand::for_id(id))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::Deploy(_) => "deploy",
            ControlMessage::Start(_) => "start",
            ControlMessage::Stop(_) => "stop",
            ControlMessage::Remove(_) => "remove",
            ControlMessage::OverrideSet(_) => "override-set",
            ControlMessage::OverrideRemove(_) => "override-remove",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Deployed,
    Started,
    Stopped,
    Removed,
    Rejected,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub kind: String,
    pub event: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,
    #[serde(flatten)]
    pub diagnostics: Map<String, Value>,
}

impl StatusEvent {
    pub fn new(event: StatusKind, loop_id: Option<&str>) -> Self {
        Self {
            kind: STATUS_KIND.to_string(),
            event,
            loop_id: loop_id.map(str::to_string),
            diagnostics: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.diagnostics.insert(key.to_string(), value.into());
        self
    }

    pub fn diagnostic(&self, key: &str) -> Option<&Value> {
        self.diagnostics.get(key)
    }

    pub fn is_watchdog_stop(&self) -> bool {
        self.event == StatusKind::Stopped
            && self.diagnostic("watchdog").and_then(Value::as_str) == Some("slow-tick")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deploy_payload_requires_shape() {
        let err = DeployPayload::from_value(&json!({"meta": {"loopId": "p1"}})).unwrap_err();
        assert!(err.to_string().contains("graph"));

        let err = DeployPayload::from_value(&json!({
            "graph": {"nodes": [], "connections": {}},
            "meta": {"loopId": "p1"}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("connections"));

        let err = DeployPayload::from_value(&json!({
            "graph": {"nodes": [], "connections": []},
            "meta": {}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("loopId"));
    }

    #[test]
    fn deploy_payload_parses_nodes() {
        let payload = DeployPayload::from_value(&json!({
            "graph": {"nodes": [{"id": "A", "type": "audio.out"}], "connections": []},
            "meta": {"loopId": "p1", "tickIntervalMs": 20}
        }))
        .unwrap();
        assert_eq!(payload.graph.nodes[0].type_id, "audio.out");
        assert!(payload.graph.nodes[0].enabled);
        assert_eq!(payload.meta.tick_interval_ms, Some(20));
    }

    #[test]
    fn control_message_wire_shape() {
        let msg = ControlMessage::stop("p1");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "stop", "payload": {"loopId": "p1"}})
        );
    }

    #[test]
    fn malformed_override_entries_are_reported_individually() {
        let payload: OverridePayload = serde_json::from_value(json!({
            "loopId": "p1",
            "overrides": [
                {"nodeId": "A", "kind": "input", "portId": "volume", "value": 0.5, "ttlMs": 1500},
                {"nodeId": "A", "kind": "sideways", "portId": "volume"}
            ]
        }))
        .unwrap();
        let results: Vec<_> = payload.entries().collect();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn status_event_flattens_diagnostics() {
        let event = StatusEvent::new(StatusKind::Stopped, Some("p1")).with("watchdog", "slow-tick");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "node-executor");
        assert_eq!(value["event"], "stopped");
        assert_eq!(value["watchdog"], "slow-tick");
        assert!(event.is_watchdog_stop());
    }
}
