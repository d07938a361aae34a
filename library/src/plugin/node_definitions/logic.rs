use super::{inp, node, out};
use crate::model::connection::PortType;
use crate::model::property::{PropertyMap, PropertyValue};
use crate::plugin::node_types::{NodeCategory, NodeDefinition};
use crate::runtime::context::ProcessContext;

fn passthrough(inputs: &PropertyMap, _: &PropertyMap, _: &mut ProcessContext<'_>) -> PropertyMap {
    let mut outputs = PropertyMap::new();
    if let Some(v) = inputs.get("in") {
        outputs.insert("out".to_string(), v.clone());
    }
    outputs
}

/// Emits last tick's input: the one-tick delay that makes feedback legal.
fn hold(inputs: &PropertyMap, _: &PropertyMap, ctx: &mut ProcessContext<'_>) -> PropertyMap {
    let previous = ctx.state.get("held").cloned().unwrap_or(PropertyValue::Null);
    match inputs.get("in") {
        Some(v) => ctx.state.insert("held".to_string(), v.clone()),
        None => ctx.state.remove("held"),
    };
    let mut outputs = PropertyMap::new();
    if !previous.is_null() {
        outputs.insert("out".to_string(), previous);
    }
    outputs
}

pub(super) fn logic_nodes() -> Vec<NodeDefinition> {
    use PortType::*;
    let nc = NodeCategory::Logic;
    vec![
        node("logic.passthrough", "Pass Through", nc)
            .with_inputs(vec![inp("in", "In", Any)])
            .with_outputs(vec![out("out", "Out", Any)])
            .with_processor(passthrough)
            .as_cacheable(),
        node("logic.hold", "Hold", nc)
            .with_description("Outputs the previous tick's input")
            .with_inputs(vec![inp("in", "In", Any)])
            .with_outputs(vec![out("out", "Out", Any)])
            .with_processor(hold)
            .as_feedback(),
    ]
}
