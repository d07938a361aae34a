//! Which disabled nodes can be switched off in place.

use std::collections::BTreeSet;

use crate::config::BypassPolicy;
use crate::error::LibraryError;
use crate::plugin::node_types::NodeDefinition;
use crate::protocol::{ControlMessage, OverrideEntry, OverridePayload};
use crate::runtime::engine::BYPASS_KEY;
use crate::runtime::overrides::{OverrideKey, OverrideKind};

/// A node is bypassable when it has exactly one input and one output of the
/// same type, and that type is not excluded by the policy. Bypassing passes
/// the input straight through, so the deployed topology stays the same.
pub fn is_bypassable(def: &NodeDefinition, policy: &BypassPolicy) -> bool {
    if !policy.enabled {
        return false;
    }
    match (def.inputs.as_slice(), def.outputs.as_slice()) {
        ([input], [output]) => {
            input.port_type == output.port_type
                && !policy.excluded_types.contains(&input.port_type)
        }
        _ => false,
    }
}

pub fn bypass_key(node_id: &str) -> OverrideKey {
    OverrideKey::new(node_id, OverrideKind::Config, BYPASS_KEY)
}

/// Durable overrides that move a deployment from the `sent` bypass set to
/// the `desired` one.
///
/// `baked` holds the nodes shipped with `__bypass` already in their config.
/// A node going back to its baked state has its override removed; any
/// other change is set explicitly, so re-enabling a baked node sends
/// `false`.
pub fn bypass_messages(
    deploy_id: &str,
    baked: &BTreeSet<String>,
    sent: &BTreeSet<String>,
    desired: &BTreeSet<String>,
) -> Result<Vec<ControlMessage>, LibraryError> {
    let mut set = Vec::new();
    let mut cleared = Vec::new();
    for id in sent.symmetric_difference(desired) {
        let bypass = desired.contains(id);
        if bypass == baked.contains(id) {
            cleared.push(OverrideEntry::remove(&bypass_key(id)));
        } else {
            set.push(OverrideEntry::set(&bypass_key(id), bypass.into(), None));
        }
    }

    let mut messages = Vec::new();
    if !set.is_empty() {
        messages.push(ControlMessage::OverrideSet(OverridePayload::new(deploy_id, &set)?));
    }
    if !cleared.is_empty() {
        messages.push(ControlMessage::OverrideRemove(OverridePayload::new(
            deploy_id, &cleared,
        )?));
    }
    Ok(messages)
}
