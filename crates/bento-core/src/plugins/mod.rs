//! Internal processors shipped with the engine.
//!
//! Internal plugins are addressed by uid in session files
//! (`"type": "internal"`). Construction happens on the control side;
//! the returned processor is unnamed and uninitialised.

mod gain;
mod passthrough;
mod sample_player;

pub use gain::GainPlugin;
pub use passthrough::PassthroughPlugin;
pub use sample_player::SamplePlayerPlugin;

use std::sync::Arc;

use crate::error::EngineError;
use crate::processor::{AsyncWorkHandler, Processor};

pub const GAIN_PLUGIN_UID: &str = "bento.gain";
pub const PASSTHROUGH_PLUGIN_UID: &str = "bento.passthrough";
pub const SAMPLE_PLAYER_PLUGIN_UID: &str = "bento.sampleplayer";

/// Instantiate an internal plugin by uid. The second element is the plugin's
/// non-RT task handler when it has one.
pub fn create_internal_plugin(
    uid: &str,
) -> Result<(Box<dyn Processor>, Option<Arc<dyn AsyncWorkHandler>>), EngineError> {
    match uid {
        GAIN_PLUGIN_UID => Ok((Box::new(GainPlugin::new()), None)),
        PASSTHROUGH_PLUGIN_UID => Ok((Box::new(PassthroughPlugin::new()), None)),
        SAMPLE_PLAYER_PLUGIN_UID => {
            let plugin = SamplePlayerPlugin::new();
            let handler = plugin.async_handler();
            Ok((Box::new(plugin), Some(handler)))
        }
        _ => Err(EngineError::InvalidPluginUid(uid.to_string())),
    }
}
