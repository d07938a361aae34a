//! Named loop deployments, each bound to one client.

use std::collections::{BTreeMap, BTreeSet};

use log::info;

use crate::deploy::bypass::bypass_messages;
use crate::deploy::export::PatchExport;
use crate::error::LibraryError;
use crate::protocol::ControlMessage;

#[derive(Debug, Clone, PartialEq)]
pub struct DeployedLoop {
    pub loop_id: String,
    pub client_id: String,
    pub root_id: String,
    pub node_ids: BTreeSet<String>,
    pub signature: String,
    pub deployed_at_ms: u64,
    pub running: bool,
    /// Nodes deployed with `__bypass` in their config.
    pub baked: BTreeSet<String>,
    pub bypassed: BTreeSet<String>,
}

/// Loop records keyed by loop id. Lifecycle is independent of patches.
#[derive(Debug, Default)]
pub struct LoopDeployments {
    loops: BTreeMap<String, DeployedLoop>,
}

impl LoopDeployments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, loop_id: &str) -> Option<&DeployedLoop> {
        self.loops.get(loop_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeployedLoop> {
        self.loops.values()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn loop_for_node(&self, node_id: &str) -> Option<&DeployedLoop> {
        self.loops.values().find(|l| l.node_ids.contains(node_id))
    }

    pub fn claimed_nodes(&self) -> BTreeSet<String> {
        self.loops
            .values()
            .flat_map(|l| l.node_ids.iter().cloned())
            .collect()
    }

    pub fn claimed_clients(&self) -> BTreeSet<String> {
        self.loops.values().map(|l| l.client_id.clone()).collect()
    }

    /// Deploys or updates `loop_id` on `client_id`.
    ///
    /// An unchanged loop is only restarted if stopped. A changed loop is
    /// stopped and removed where it ran before the new one is deployed.
    pub fn deploy(
        &mut self,
        loop_id: &str,
        client_id: &str,
        root_id: &str,
        export: PatchExport,
        now_ms: u64,
    ) -> Result<Vec<(String, ControlMessage)>, LibraryError> {
        if let Some(other) = self.loops.values().find(|l| {
            l.loop_id != loop_id
                && (l.client_id == client_id || !l.node_ids.is_disjoint(&export.node_ids))
        }) {
            return Err(LibraryError::Loop(format!(
                "{} overlaps loop {} on {}",
                loop_id, other.loop_id, other.client_id
            )));
        }

        let mut commands = Vec::new();
        if let Some(existing) = self.loops.get_mut(loop_id) {
            if existing.client_id == client_id && existing.signature == export.signature {
                if !existing.running {
                    commands.push((client_id.to_string(), ControlMessage::start(loop_id)));
                    existing.running = true;
                }
                for msg in
                    bypass_messages(loop_id, &existing.baked, &existing.bypassed, &export.bypassed)?
                {
                    commands.push((client_id.to_string(), msg));
                }
                existing.bypassed = export.bypassed;
                return Ok(commands);
            }
            commands.push((existing.client_id.clone(), ControlMessage::stop(loop_id)));
            commands.push((existing.client_id.clone(), ControlMessage::remove(loop_id)));
        }

        info!("Deploying loop {} to {}", loop_id, client_id);
        commands.push((
            client_id.to_string(),
            ControlMessage::deploy(&export.payload_for(client_id))?,
        ));
        commands.push((client_id.to_string(), ControlMessage::start(loop_id)));
        self.loops.insert(
            loop_id.to_string(),
            DeployedLoop {
                loop_id: loop_id.to_string(),
                client_id: client_id.to_string(),
                root_id: root_id.to_string(),
                node_ids: export.node_ids,
                signature: export.signature,
                deployed_at_ms: now_ms,
                running: true,
                baked: export.bypassed.clone(),
                bypassed: export.bypassed,
            },
        );
        Ok(commands)
    }

    pub fn stop(&mut self, loop_id: &str) -> Result<Vec<(String, ControlMessage)>, LibraryError> {
        let record = self
            .loops
            .get_mut(loop_id)
            .ok_or_else(|| LibraryError::Loop(format!("unknown loop {}", loop_id)))?;
        if !record.running {
            return Ok(Vec::new());
        }
        record.running = false;
        Ok(vec![(record.client_id.clone(), ControlMessage::stop(loop_id))])
    }

    pub fn remove(
        &mut self,
        loop_id: &str,
    ) -> Result<(DeployedLoop, Vec<(String, ControlMessage)>), LibraryError> {
        let record = self
            .loops
            .remove(loop_id)
            .ok_or_else(|| LibraryError::Loop(format!("unknown loop {}", loop_id)))?;
        let commands = vec![
            (record.client_id.clone(), ControlMessage::stop(loop_id)),
            (record.client_id.clone(), ControlMessage::remove(loop_id)),
        ];
        Ok((record, commands))
    }

    /// Mirrors a stop the client reported on its own (watchdog).
    pub fn mark_stopped(&mut self, loop_id: &str) -> bool {
        match self.loops.get_mut(loop_id) {
            Some(record) if record.running => {
                record.running = false;
                true
            }
            _ => false,
        }
    }

    /// Forgets loops bound to a client that left. Nothing is sent.
    pub fn drop_client(&mut self, client_id: &str) -> Vec<DeployedLoop> {
        let ids: Vec<String> = self
            .loops
            .values()
            .filter(|l| l.client_id == client_id)
            .map(|l| l.loop_id.clone())
            .collect();
        ids.iter().filter_map(|id| self.loops.remove(id)).collect()
    }

    pub fn teardown_all(&mut self) -> Vec<(String, ControlMessage)> {
        let mut commands = Vec::new();
        for (loop_id, record) in std::mem::take(&mut self.loops) {
            commands.push((record.client_id.clone(), ControlMessage::stop(&loop_id)));
            commands.push((record.client_id, ControlMessage::remove(&loop_id)));
        }
        commands
    }
}
