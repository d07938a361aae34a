use super::{inp, node, out, scalar, single};
use crate::model::connection::PortType;
use crate::model::property::PropertyMap;
use crate::plugin::node_types::{ConfigField, NodeCategory, NodeDefinition};
use crate::runtime::context::ProcessContext;

fn number(_: &PropertyMap, config: &PropertyMap, _: &mut ProcessContext<'_>) -> PropertyMap {
    single("value", scalar(config, "value", 0.0))
}

fn to_text(inputs: &PropertyMap, config: &PropertyMap, _: &mut ProcessContext<'_>) -> PropertyMap {
    let precision = scalar(config, "precision", 2.0).max(0.0) as usize;
    let value = scalar(inputs, "value", 0.0);
    single("text", format!("{:.*}", precision, value))
}

pub(super) fn data_nodes() -> Vec<NodeDefinition> {
    use PortType::*;
    let nc = NodeCategory::Data;
    vec![
        node("data.number", "Number", nc)
            .with_description("Constant numeric value")
            .with_config(vec![ConfigField::new("value", Scalar, 0.0)])
            .with_outputs(vec![out("value", "Value", Scalar)])
            .with_processor(number)
            .as_cacheable(),
        node("data.to_text", "To Text", nc)
            .with_description("Format a number as text")
            .with_inputs(vec![inp("value", "Value", Scalar).with_default(0.0)])
            .with_config(vec![ConfigField::new("precision", Integer, 2i64)])
            .with_outputs(vec![out("text", "Text", String)])
            .with_processor(to_text)
            .as_cacheable(),
    ]
}
