//! Routes live parameter edits to the clients hosting the edited node.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::config::ManagerConfig;
use crate::deploy::loops::LoopDeployments;
use crate::deploy::reconciler::PatchReconciler;
use crate::error::LibraryError;
use crate::manager::ManagerTask;
use crate::manager::status::StatusTable;
use crate::model::property::PropertyValue;
use crate::protocol::{ControlMessage, OverrideEntry, OverridePayload};
use crate::runtime::overrides::OverrideKey;
use crate::scheduler::{TimerHandle, TimerQueue};
use crate::transport::Transport;

/// Which link of the lookup chain found a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSource {
    LoopStatus,
    LoopStatic,
    PatchStatus,
    PatchStatic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideHost {
    pub client_id: String,
    pub deploy_id: String,
    pub source: HostSource,
}

impl OverrideHost {
    fn new(client_id: &str, deploy_id: &str, source: HostSource) -> Self {
        Self {
            client_id: client_id.to_string(),
            deploy_id: deploy_id.to_string(),
            source,
        }
    }
}

/// Finds the clients currently hosting `node_id`.
///
/// Lookup chain, first non-empty link wins:
/// 1. the node's loop, if its client reports the loop id
/// 2. the node's loop, from the static loop record
/// 3. every client reporting a patch id whose record contains the node
/// 4. the clients whose patch record contains the node
///
/// Self-reports come first because selectors can move a patch between
/// clients before the static records catch up.
pub fn lookup_hosts(
    node_id: &str,
    loops: &LoopDeployments,
    patches: &PatchReconciler,
    statuses: &StatusTable,
) -> Vec<OverrideHost> {
    if let Some(lp) = loops.loop_for_node(node_id) {
        let reported = statuses
            .get(&lp.client_id)
            .is_some_and(|s| s.hosts(&lp.loop_id));
        let source = if reported {
            HostSource::LoopStatus
        } else {
            HostSource::LoopStatic
        };
        return vec![OverrideHost::new(&lp.client_id, &lp.loop_id, source)];
    }

    let patch_ids: BTreeSet<String> = patches
        .records()
        .values()
        .filter(|r| r.node_ids.contains(node_id))
        .map(|r| r.patch_id.clone())
        .collect();
    let reported: Vec<OverrideHost> = statuses
        .iter()
        .filter_map(|(client, s)| {
            let id = s.current_id.as_ref()?;
            patch_ids
                .contains(id)
                .then(|| OverrideHost::new(client, id, HostSource::PatchStatus))
        })
        .collect();
    if !reported.is_empty() {
        return reported;
    }

    patches
        .hosts_of(node_id)
        .into_iter()
        .map(|(client, id)| OverrideHost::new(&client, &id, HostSource::PatchStatic))
        .collect()
}

struct PendingCommit {
    value: PropertyValue,
    handle: TimerHandle,
}

/// Immediate short-TTL sends plus a debounced durable commit per key.
pub struct OverrideRouter {
    ttl_ms: u64,
    commit_debounce_ms: u64,
    pending: BTreeMap<OverrideKey, PendingCommit>,
}

impl OverrideRouter {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            ttl_ms: config.override_ttl_ms,
            commit_debounce_ms: config.commit_debounce_ms,
            pending: BTreeMap::new(),
        }
    }

    fn push(
        hosts: &[OverrideHost],
        entry: &OverrideEntry,
        remove: bool,
        transport: &dyn Transport,
    ) -> Result<usize, LibraryError> {
        for host in hosts {
            let payload = OverridePayload::new(&host.deploy_id, std::slice::from_ref(entry))?;
            let message = if remove {
                ControlMessage::OverrideRemove(payload)
            } else {
                ControlMessage::OverrideSet(payload)
            };
            transport.send(&host.client_id, message)?;
        }
        Ok(hosts.len())
    }

    /// Sends `value` with the short TTL now and schedules its durable
    /// commit, replacing any commit still pending for the key. Returns the
    /// number of hosts reached; zero means the node is not deployed.
    pub fn send(
        &mut self,
        key: OverrideKey,
        value: PropertyValue,
        hosts: &[OverrideHost],
        transport: &dyn Transport,
        timers: &mut TimerQueue<ManagerTask>,
        now_ms: u64,
    ) -> Result<usize, LibraryError> {
        if hosts.is_empty() {
            return Ok(0);
        }
        let entry = OverrideEntry::set(&key, value.clone(), Some(self.ttl_ms));
        let reached = Self::push(hosts, &entry, false, transport)?;

        if let Some(previous) = self.pending.remove(&key) {
            timers.cancel(previous.handle);
        }
        let handle = timers.schedule(
            ManagerTask::CommitOverride(key.clone()),
            self.commit_debounce_ms,
            now_ms,
        );
        self.pending.insert(key, PendingCommit { value, handle });
        Ok(reached)
    }

    /// Fires the durable commit for `key`, to wherever the node lives now.
    pub fn commit(
        &mut self,
        key: &OverrideKey,
        hosts: &[OverrideHost],
        transport: &dyn Transport,
    ) -> Result<usize, LibraryError> {
        let Some(pending) = self.pending.remove(key) else {
            return Ok(0);
        };
        debug!("Committing override {:?} to {} hosts", key, hosts.len());
        Self::push(hosts, &OverrideEntry::set(key, pending.value, None), false, transport)
    }

    /// Durable set with no debounce, used by live-value bridges.
    pub fn set_durable(
        &self,
        key: &OverrideKey,
        value: PropertyValue,
        hosts: &[OverrideHost],
        transport: &dyn Transport,
    ) -> Result<usize, LibraryError> {
        Self::push(hosts, &OverrideEntry::set(key, value, None), false, transport)
    }

    pub fn remove(
        &mut self,
        key: &OverrideKey,
        hosts: &[OverrideHost],
        transport: &dyn Transport,
        timers: &mut TimerQueue<ManagerTask>,
    ) -> Result<usize, LibraryError> {
        if let Some(previous) = self.pending.remove(key) {
            timers.cancel(previous.handle);
        }
        Self::push(hosts, &OverrideEntry::remove(key), true, transport)
    }

    /// Cancels pending commits of nodes whose deployment went away.
    pub fn cancel_nodes(
        &mut self,
        node_ids: &BTreeSet<String>,
        timers: &mut TimerQueue<ManagerTask>,
    ) -> usize {
        let keys: Vec<OverrideKey> = self
            .pending
            .keys()
            .filter(|k| node_ids.contains(&k.node_id))
            .cloned()
            .collect();
        for key in &keys {
            if let Some(pending) = self.pending.remove(key) {
                timers.cancel(pending.handle);
            }
        }
        keys.len()
    }

    pub fn cancel_all(&mut self, timers: &mut TimerQueue<ManagerTask>) {
        for (_, pending) in std::mem::take(&mut self.pending) {
            timers.cancel(pending.handle);
        }
    }

    pub fn is_pending(&self, key: &OverrideKey) -> bool {
        self.pending.contains_key(key)
    }
}
