//! # Bento — a modular real-time audio host
//!
//! Bento loads audio processors of several kinds — internal plugins, VST
//! 2.x libraries and port-graph plugins — arranges them into named tracks,
//! and drives them from a fixed-block audio callback with sample-accurate
//! event routing.
//!
//! ## Architecture
//!
//! - **bento-core** — the engine: sample buffers, RT events and queues, the
//!   processor contract, tracks, transport, MIDI and event dispatchers.
//! - **bento-plugin** — plugin hosting: the VST2 and port-graph wrappers.
//! - **bento** (this crate) — the host facade, builders, JSON session
//!   loading and frontends.
//!
//! ## Quick start
//!
//! ```no_run
//! use bento::{BentoEngine, PluginSpec};
//!
//! # fn main() -> Result<(), bento::EngineError> {
//! let engine = BentoEngine::builder().sample_rate(48000.0).build();
//! engine.create_track("main", 2)?;
//! engine.add_plugin("main", "gain", PluginSpec::Internal { uid: "bento.gain" })?;
//! engine.controller().connect_audio_input_channel(0, 0, "main")?;
//! engine.controller().connect_audio_output_channel(0, 0, "main")?;
//!
//! // Hand the RT half to a frontend.
//! let rt = engine.take_audio_engine().unwrap();
//! # let _ = rt;
//! # Ok(())
//! # }
//! ```

mod builder;
mod engine;

pub mod config;
pub mod frontend;

pub use builder::BentoEngineBuilder;
pub use config::{ConfigError, SessionConfig};
pub use engine::{BentoEngine, PluginSpec};
pub use frontend::{DummyFrontend, DummyStopHandle, FrontendError, MidiFrontend, OfflineFrontend};

// Engine core re-exports.
pub use bento_core::{
    AudioEngine, EngineError, MidiDispatcherError, Notification, NotificationType, ObjectId,
    Processor, ProcessorError, RtEvent, RtEventData, SampleBuffer, TimingSnapshot, BLOCK_SIZE,
};

// Plugin hosting re-exports.
pub use bento_plugin::{PlayState, PortGraphWrapper};

#[cfg(feature = "vst2")]
pub use bento_plugin::Vst2Wrapper;

/// Convenience prelude for common imports.
pub mod prelude {
    pub use crate::{BentoEngine, BentoEngineBuilder, PluginSpec};

    pub use bento_core::{
        AudioEngine, Processor, ProcessorData, RtEvent, RtEventData, SampleBuffer, BLOCK_SIZE,
    };

    pub use crate::frontend::OfflineFrontend;
}
