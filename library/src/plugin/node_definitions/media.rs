use log::debug;

use super::{inp, node, out, scalar, single};
use crate::model::connection::PortType;
use crate::model::property::{PropertyMap, PropertyValue};
use crate::plugin::node_types::{NodeCategory, NodeDefinition, NodeProcessor};
use crate::runtime::context::ProcessContext;

/// Video playback keeps a per-node timeline in runtime state.
struct VideoPlayer;

impl NodeProcessor for VideoPlayer {
    fn process(
        &self,
        inputs: &PropertyMap,
        _config: &PropertyMap,
        ctx: &mut ProcessContext<'_>,
    ) -> PropertyMap {
        let Some(path) = inputs.get("path").and_then(|p| p.as_str()) else {
            return PropertyMap::new();
        };
        let playhead = scalar(ctx.state, "timeline", 0.0) + ctx.delta_ms as f64;
        ctx.state.insert("timeline".to_string(), playhead.into());

        let mut frame = PropertyMap::new();
        frame.insert("path".to_string(), path.into());
        frame.insert("positionMs".to_string(), playhead.into());
        single("image", PropertyValue::Map(frame))
    }

    fn on_disable(&self, node_id: &str, state: &mut PropertyMap) {
        if state.remove("timeline").is_some() {
            debug!("media.video {}: released playback timeline", node_id);
        }
    }
}

struct SceneOut;

impl NodeProcessor for SceneOut {
    fn process(
        &self,
        _inputs: &PropertyMap,
        _config: &PropertyMap,
        _ctx: &mut ProcessContext<'_>,
    ) -> PropertyMap {
        PropertyMap::new()
    }
}

pub(super) fn media_nodes() -> Vec<NodeDefinition> {
    use PortType::*;
    vec![
        node("media.video", "Video File", NodeCategory::Media)
            .with_description("Plays a local video file")
            .with_inputs(vec![inp("path", "Path", String)])
            .with_outputs(vec![out("image", "Image", Image)])
            .with_processor(VideoPlayer)
            .with_capabilities(&["video"])
            .as_local_only(),
        node("scene.out", "Scene Output", NodeCategory::Visual)
            .with_description("Presents its input on the client; deploy root")
            .with_inputs(vec![inp("image", "Image", Image).as_sink()])
            .with_outputs(vec![out("cmd", "Deploy", Command)])
            .with_processor(SceneOut)
            .with_capabilities(&["video"])
            .as_sink(),
    ]
}
