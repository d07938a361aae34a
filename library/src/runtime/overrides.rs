//! Live parameter overrides, optionally time-limited.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::property::PropertyValue;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    Input,
    Config,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverrideKey {
    pub node_id: String,
    pub kind: OverrideKind,
    pub port_id: String,
}

impl OverrideKey {
    pub fn new(node_id: &str, kind: OverrideKind, port_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            kind,
            port_id: port_id.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct OverrideEntry {
    value: PropertyValue,
    /// Exclusive: the override is gone at exactly this instant.
    expires_at_ms: Option<u64>,
}

impl OverrideEntry {
    fn live_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_none_or(|at| now_ms < at)
    }
}

/// Override values keyed by (node, kind, port).
///
/// Reads check expiry themselves, so a lapsed override is never returned even
/// if `purge_expired` has not run yet.
#[derive(Default, Debug)]
pub struct OverrideStore {
    entries: BTreeMap<OverrideKey, OverrideEntry>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins; a new value also replaces the previous TTL.
    pub fn set(&mut self, key: OverrideKey, value: PropertyValue, now_ms: u64, ttl_ms: Option<u64>) {
        let expires_at_ms = ttl_ms.map(|ttl| now_ms.saturating_add(ttl));
        self.entries.insert(key, OverrideEntry { value, expires_at_ms });
    }

    pub fn remove(&mut self, key: &OverrideKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn get(&self, key: &OverrideKey, now_ms: u64) -> Option<&PropertyValue> {
        self.entries
            .get(key)
            .filter(|e| e.live_at(now_ms))
            .map(|e| &e.value)
    }

    /// Live config overrides of one node.
    pub fn config_for<'a>(
        &'a self,
        node_id: &'a str,
        now_ms: u64,
    ) -> impl Iterator<Item = (&'a str, &'a PropertyValue)> + 'a {
        self.entries
            .iter()
            .filter(move |(k, e)| {
                k.node_id == node_id && k.kind == OverrideKind::Config && e.live_at(now_ms)
            })
            .map(|(k, e)| (k.port_id.as_str(), &e.value))
    }

    /// Drops lapsed entries and returns their keys.
    pub fn purge_expired(&mut self, now_ms: u64) -> Vec<OverrideKey> {
        let expired: Vec<OverrideKey> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.live_at(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        expired
    }

    pub fn retain_nodes(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|k, _| keep(&k.node_id));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
