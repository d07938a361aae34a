use super::{inp, node, out};
use crate::model::connection::PortType;
use crate::plugin::node_types::{ConfigField, NodeCategory, NodeDefinition, NodeRole};

/// Routing nodes never run on clients; they only shape target resolution.
pub(super) fn routing_nodes() -> Vec<NodeDefinition> {
    use PortType::*;
    let nc = NodeCategory::Routing;
    vec![
        node("route.aggregate", "Aggregate", nc)
            .with_description("Merges deploy commands from several roots")
            .with_inputs(vec![inp("a", "A", Command), inp("b", "B", Command)])
            .with_outputs(vec![out("cmd", "Deploy", Command)]),
        node("route.clients", "Clients", nc)
            .with_description("Selects clients by index, range or stable random order")
            .with_inputs(vec![inp("cmd", "Deploy", Command)])
            .with_outputs(vec![out("clients", "Clients", Client)])
            .with_config(vec![
                ConfigField::new("mode", String, "index"),
                ConfigField::new("index", Integer, 0i64),
                ConfigField::new("start", Integer, 0i64),
                ConfigField::new("count", Integer, 1i64),
            ])
            .with_role(NodeRole::ClientSelector),
        node("display.out", "Display", nc)
            .with_description("Local display session and display-class clients")
            .with_inputs(vec![inp("cmd", "Deploy", Command)])
            .with_role(NodeRole::DisplaySink),
    ]
}
