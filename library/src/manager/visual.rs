//! Deploy membership as shown on the editing surface.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeVisualState {
    pub node_id: String,
    pub deployed: bool,
    pub in_loop: bool,
}

/// Receives only the nodes whose membership changed.
pub trait VisualStateSink: Send + Sync {
    fn patch(&self, changes: &[NodeVisualState]);
}

#[derive(Debug, Default)]
pub struct NullVisualSink;

impl VisualStateSink for NullVisualSink {
    fn patch(&self, _changes: &[NodeVisualState]) {}
}

/// Keeps every patch batch, for tests and headless runs.
#[derive(Debug, Default)]
pub struct RecordingVisualSink {
    batches: Mutex<Vec<Vec<NodeVisualState>>>,
}

impl RecordingVisualSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Vec<NodeVisualState>> {
        match self.batches.lock() {
            Ok(mut b) => std::mem::take(&mut *b),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl VisualStateSink for RecordingVisualSink {
    fn patch(&self, changes: &[NodeVisualState]) {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(changes.to_vec());
    }
}

/// Last state pushed per node; produces diffs.
#[derive(Debug, Default)]
pub(crate) struct VisualState {
    shown: BTreeMap<String, (bool, bool)>,
}

impl VisualState {
    /// Diff against `deployed`/`in_loop` over `node_ids` plus everything
    /// shown before.
    pub(crate) fn update<'a>(
        &mut self,
        node_ids: impl IntoIterator<Item = &'a String>,
        deployed: &BTreeSet<String>,
        in_loop: &BTreeSet<String>,
    ) -> Vec<NodeVisualState> {
        let mut ids: BTreeSet<String> = self.shown.keys().cloned().collect();
        ids.extend(node_ids.into_iter().cloned());
        let mut changes = Vec::new();
        for id in ids {
            let next = (deployed.contains(&id), in_loop.contains(&id));
            let prev = self.shown.get(&id).copied().unwrap_or((false, false));
            if next != prev {
                changes.push(NodeVisualState {
                    node_id: id.clone(),
                    deployed: next.0,
                    in_loop: next.1,
                });
            }
            if next == (false, false) {
                self.shown.remove(&id);
            } else {
                self.shown.insert(id, next);
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_changes() {
        let mut state = VisualState::default();
        let ids = vec!["a".to_string(), "b".to_string()];
        let deployed: BTreeSet<String> = ["a".to_string()].into();
        let first = state.update(&ids, &deployed, &BTreeSet::new());
        assert_eq!(first.len(), 1);
        assert!(state.update(&ids, &deployed, &BTreeSet::new()).is_empty());

        let cleared = state.update(&ids, &BTreeSet::new(), &BTreeSet::new());
        assert_eq!(
            cleared,
            vec![NodeVisualState {
                node_id: "a".into(),
                deployed: false,
                in_loop: false
            }]
        );
    }
}
