//! Live set of connected clients as seen by the manager.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    /// Display-class client: may play local-only media.
    #[serde(default)]
    pub display: bool,
}

impl ClientInfo {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display: false,
        }
    }

    pub fn display(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display: true,
        }
    }
}

/// Clients keyed by id. Iteration is always in id order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Audience {
    clients: BTreeMap<String, ClientInfo>,
}

impl Audience {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_clients(clients: impl IntoIterator<Item = ClientInfo>) -> Self {
        Self {
            clients: clients.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn insert(&mut self, client: ClientInfo) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove(&mut self, id: &str) -> Option<ClientInfo> {
        self.clients.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&ClientInfo> {
        self.clients.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    pub fn display_ids(&self) -> Vec<String> {
        self.clients
            .values()
            .filter(|c| c.display)
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn is_display(&self, id: &str) -> bool {
        self.clients.get(id).is_some_and(|c| c.display)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientInfo> {
        self.clients.values()
    }
}
