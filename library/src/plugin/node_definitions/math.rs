use super::{inp, node, out, scalar, single};
use crate::model::connection::PortType;
use crate::model::property::PropertyMap;
use crate::plugin::node_types::{NodeCategory, NodeDefinition};
use crate::runtime::context::ProcessContext;

fn add(inputs: &PropertyMap, _: &PropertyMap, _: &mut ProcessContext<'_>) -> PropertyMap {
    single("result", scalar(inputs, "a", 0.0) + scalar(inputs, "b", 0.0))
}

fn multiply(inputs: &PropertyMap, _: &PropertyMap, _: &mut ProcessContext<'_>) -> PropertyMap {
    single("result", scalar(inputs, "a", 1.0) * scalar(inputs, "b", 1.0))
}

pub(super) fn math_nodes() -> Vec<NodeDefinition> {
    use PortType::*;
    let nc = NodeCategory::Math;
    vec![
        node("math.add", "Add", nc)
            .with_inputs(vec![
                inp("a", "A", Scalar).with_default(0.0),
                inp("b", "B", Scalar).with_default(0.0),
            ])
            .with_outputs(vec![out("result", "Result", Scalar)])
            .with_processor(add)
            .as_cacheable(),
        node("math.multiply", "Multiply", nc)
            .with_inputs(vec![
                inp("a", "A", Scalar).with_default(1.0),
                inp("b", "B", Scalar).with_default(1.0),
            ])
            .with_outputs(vec![out("result", "Result", Scalar)])
            .with_processor(multiply)
            .as_cacheable(),
    ]
}
