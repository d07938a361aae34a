use log::trace;

use super::{inp, node, out, scalar, single};
use crate::model::connection::PortType;
use crate::model::property::{PropertyMap, PropertyValue};
use crate::plugin::node_types::{ConfigField, NodeCategory, NodeDefinition, NodeProcessor};
use crate::runtime::context::ProcessContext;

/// Audio travels between nodes as a descriptor map; synthesis happens in
/// the renderer adapter behind `audio.out`.
fn signal(source: &str, frequency: f64, phase: f64, gain: f64) -> PropertyValue {
    let mut map = PropertyMap::new();
    map.insert("source".to_string(), source.into());
    map.insert("frequency".to_string(), frequency.into());
    map.insert("phase".to_string(), phase.into());
    map.insert("gain".to_string(), gain.into());
    PropertyValue::Map(map)
}

fn oscillator(inputs: &PropertyMap, _: &PropertyMap, ctx: &mut ProcessContext<'_>) -> PropertyMap {
    let frequency = scalar(inputs, "frequency", 440.0);
    let phase = scalar(ctx.state, "phase", 0.0);
    let next = (phase + frequency * ctx.delta_ms as f64 / 1000.0).fract();
    ctx.state.insert("phase".to_string(), next.into());
    single("out", signal(ctx.node_id, frequency, next, 1.0))
}

fn gain(inputs: &PropertyMap, _: &PropertyMap, _: &mut ProcessContext<'_>) -> PropertyMap {
    let amount = scalar(inputs, "gain", 1.0);
    match inputs.get("in") {
        Some(PropertyValue::Map(sig)) => {
            let mut scaled = sig.clone();
            let current = scalar(sig, "gain", 1.0);
            scaled.insert("gain".to_string(), (current * amount).into());
            single("out", PropertyValue::Map(scaled))
        }
        _ => PropertyMap::new(),
    }
}

fn delay(inputs: &PropertyMap, config: &PropertyMap, _: &mut ProcessContext<'_>) -> PropertyMap {
    match inputs.get("in") {
        Some(PropertyValue::Map(sig)) => {
            let mut delayed = sig.clone();
            delayed.insert("delayMs".to_string(), scalar(config, "time_ms", 250.0).into());
            single("out", PropertyValue::Map(delayed))
        }
        _ => PropertyMap::new(),
    }
}

struct AudioOut;

impl NodeProcessor for AudioOut {
    fn process(
        &self,
        _inputs: &PropertyMap,
        _config: &PropertyMap,
        _ctx: &mut ProcessContext<'_>,
    ) -> PropertyMap {
        PropertyMap::new()
    }

    fn on_sink(&self, node_id: &str, inputs: &PropertyMap, _config: &PropertyMap) {
        trace!(
            "audio.out {}: volume={}",
            node_id,
            scalar(inputs, "volume", 1.0)
        );
    }
}

pub(super) fn audio_nodes() -> Vec<NodeDefinition> {
    use PortType::*;
    let nc = NodeCategory::Audio;
    vec![
        node("audio.oscillator", "Oscillator", nc)
            .with_inputs(vec![inp("frequency", "Frequency", Scalar).with_default(440.0)])
            .with_outputs(vec![out("out", "Out", Audio)])
            .with_processor(oscillator)
            .with_capabilities(&["audio"]),
        node("audio.gain", "Gain", nc)
            .with_inputs(vec![
                inp("in", "In", Audio),
                inp("gain", "Gain", Scalar).with_default(1.0),
            ])
            .with_outputs(vec![out("out", "Out", Audio)])
            .with_processor(gain)
            .with_capabilities(&["audio"]),
        node("audio.delay", "Delay", nc)
            .with_inputs(vec![inp("in", "In", Audio)])
            .with_config(vec![ConfigField::new("time_ms", Scalar, 250.0)])
            .with_outputs(vec![out("out", "Out", Audio)])
            .with_processor(delay)
            .with_capabilities(&["audio"]),
        node("audio.out", "Audio Output", nc)
            .with_description("Plays its input on the client; deploy root")
            .with_inputs(vec![
                inp("in", "In", Audio).as_sink(),
                inp("volume", "Volume", Scalar).with_default(1.0),
            ])
            .with_outputs(vec![out("cmd", "Deploy", Command)])
            .with_processor(AudioOut)
            .with_capabilities(&["audio"])
            .as_sink(),
    ]
}
