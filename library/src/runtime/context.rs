//! Per-node evaluation context.

use crate::model::property::PropertyMap;

/// Handed to `NodeProcessor::process` for one node in one tick.
pub struct ProcessContext<'a> {
    pub node_id: &'a str,
    /// Milliseconds since the runtime started ticking.
    pub time_ms: u64,
    /// Milliseconds since the previous tick, capped after stalls.
    pub delta_ms: u64,
    /// Node-local state that survives across ticks until the node is
    /// removed or disabled.
    pub state: &'a mut PropertyMap,
}
