use super::{node, out, scalar, single};
use crate::model::connection::PortType;
use crate::model::property::PropertyMap;
use crate::plugin::node_types::{ConfigField, NodeCategory, NodeDefinition, NodeRole};
use crate::runtime::context::ProcessContext;

/// The controller driver writes the current position into `value`.
fn fader(_: &PropertyMap, config: &PropertyMap, _: &mut ProcessContext<'_>) -> PropertyMap {
    single("value", scalar(config, "value", 0.0))
}

pub(super) fn control_nodes() -> Vec<NodeDefinition> {
    vec![
        node("midi.fader", "MIDI Fader", NodeCategory::Control)
            .with_config(vec![
                ConfigField::new("channel", PortType::Integer, 0i64),
                ConfigField::new("value", PortType::Scalar, 0.0),
            ])
            .with_outputs(vec![out("value", "Value", PortType::Scalar)])
            .with_processor(fader)
            .with_role(NodeRole::LiveSource),
    ]
}
