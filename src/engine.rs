//! The host facade.
//!
//! [`BentoEngine`] wires the engine core, the event dispatcher and the MIDI
//! dispatcher together and exposes the external control surface: transport,
//! keyboard injection, audio-graph editing, parameters, programs, MIDI
//! routing and notifications. Everything here is non-RT; the audio half is
//! handed to a frontend with [`BentoEngine::take_audio_engine`].

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use bento_core::controller::EngineController;
use bento_core::event_dispatcher::{EventDispatcher, NotificationCallback, NotificationType};
use bento_core::midi_dispatcher::{MidiConnectionInfo, MidiDispatcher, MidiFrontend};
use bento_core::plugins::create_internal_plugin;
use bento_core::processor::{AsyncWorkHandler, Processor, ProcessorRecord};
use bento_core::{AudioEngine, EngineError, ObjectId, TimingSnapshot};
use bento_plugin::PluginLoader;

use crate::builder::BentoEngineBuilder;

/// How a plugin should be instantiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSpec<'a> {
    /// A processor shipped with the engine, addressed by uid.
    Internal { uid: &'a str },
    /// A VST 2.x shared library.
    Vst2 { path: &'a Path },
    /// A port-graph shared library.
    PortGraph { path: &'a Path },
}

pub struct BentoEngine {
    controller: EngineController,
    midi_dispatcher: Arc<MidiDispatcher>,
    dispatcher: EventDispatcher,
    plugin_loader: Arc<PluginLoader>,
    audio_engine: Mutex<Option<AudioEngine>>,
}

impl BentoEngine {
    pub fn builder() -> BentoEngineBuilder {
        BentoEngineBuilder::new()
    }

    pub(crate) fn assemble(
        controller: EngineController,
        midi_dispatcher: Arc<MidiDispatcher>,
        dispatcher: EventDispatcher,
        audio_engine: AudioEngine,
    ) -> Self {
        Self {
            controller,
            midi_dispatcher,
            dispatcher,
            plugin_loader: Arc::new(PluginLoader::new()),
            audio_engine: Mutex::new(Some(audio_engine)),
        }
    }

    // ---- system ---------------------------------------------------------

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn build_info() -> String {
        format!("bento {} ({})", Self::version(), std::env::consts::ARCH)
    }

    // ---- wiring ---------------------------------------------------------

    /// The RT half, taken once by the audio frontend.
    pub fn take_audio_engine(&self) -> Option<AudioEngine> {
        self.audio_engine.lock().take()
    }

    pub fn controller(&self) -> &EngineController {
        &self.controller
    }

    pub fn midi_dispatcher(&self) -> &Arc<MidiDispatcher> {
        &self.midi_dispatcher
    }

    pub fn set_midi_frontend(&self, frontend: Box<dyn MidiFrontend>) {
        self.midi_dispatcher.set_frontend(frontend);
    }

    pub fn subscribe(&self, kind: NotificationType, callback: NotificationCallback) {
        self.dispatcher.subscribe(kind, callback);
    }

    // ---- transport ------------------------------------------------------

    pub fn sample_rate(&self) -> f32 {
        self.controller.sample_rate()
    }

    pub fn set_sample_rate(&self, sample_rate: f32) -> Result<(), EngineError> {
        self.controller.set_sample_rate(sample_rate)
    }

    pub fn tempo(&self) -> f32 {
        self.controller.tempo()
    }

    pub fn set_tempo(&self, bpm: f32) -> Result<(), EngineError> {
        self.controller.set_tempo(bpm)
    }

    pub fn playing(&self) -> bool {
        self.controller.playing()
    }

    pub fn set_playing(&self, playing: bool) -> Result<(), EngineError> {
        self.controller.set_playing(playing)
    }

    // ---- timing ---------------------------------------------------------

    pub fn timings(&self) -> TimingSnapshot {
        self.controller.timings()
    }

    pub fn reset_timings(&self) {
        self.controller.reset_timings()
    }

    // ---- audio graph ----------------------------------------------------

    pub fn create_track(&self, name: &str, channels: usize) -> Result<ObjectId, EngineError> {
        self.controller.create_track(name, channels)
    }

    pub fn create_multibus_track(&self, name: &str, buses: usize) -> Result<ObjectId, EngineError> {
        self.controller.create_multibus_track(name, buses)
    }

    pub fn delete_track(&self, name: &str) -> Result<(), EngineError> {
        self.controller.delete_track(name)
    }

    pub fn tracks(&self) -> Vec<ProcessorRecord> {
        self.controller.tracks()
    }

    pub fn processors_on_track(&self, track: ObjectId) -> Vec<ProcessorRecord> {
        self.controller.processors_on_track(track)
    }

    /// Instantiate a plugin and append it to a track's chain.
    pub fn add_plugin(
        &self,
        track: &str,
        name: &str,
        spec: PluginSpec<'_>,
    ) -> Result<ObjectId, EngineError> {
        let (mut processor, handler): (Box<dyn Processor>, Option<Arc<dyn AsyncWorkHandler>>) =
            match spec {
                PluginSpec::Internal { uid } => create_internal_plugin(uid)?,
                PluginSpec::Vst2 { path } => (self.load_vst2(path)?, None),
                PluginSpec::PortGraph { path } => {
                    let library = self
                        .plugin_loader
                        .load(path)
                        .map_err(|e| EngineError::InvalidPluginUid(e.to_string()))?;
                    (
                        Box::new(bento_plugin::PortGraphWrapper::from_library(library)),
                        None,
                    )
                }
            };
        processor.data_mut().set_name(name);
        self.controller
            .add_processor_to_track(processor, track, handler)
    }

    #[cfg(feature = "vst2")]
    fn load_vst2(&self, path: &Path) -> Result<Box<dyn Processor>, EngineError> {
        Ok(Box::new(bento_plugin::Vst2Wrapper::from_path(path)))
    }

    #[cfg(not(feature = "vst2"))]
    fn load_vst2(&self, path: &Path) -> Result<Box<dyn Processor>, EngineError> {
        Err(EngineError::InvalidPluginUid(format!(
            "vst2 support not compiled: {}",
            path.display()
        )))
    }

    pub fn remove_plugin(&self, track: &str, name: &str) -> Result<(), EngineError> {
        self.controller.remove_processor_from_track(name, track)
    }

    pub fn move_plugin(&self, name: &str, from: &str, to: &str) -> Result<(), EngineError> {
        self.controller.move_processor(name, from, to)
    }

    // ---- MIDI routing ---------------------------------------------------

    pub fn midi_connections(&self) -> Vec<MidiConnectionInfo> {
        self.midi_dispatcher.connections()
    }
}

impl Drop for BentoEngine {
    fn drop(&mut self) {
        self.dispatcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!BentoEngine::version().is_empty());
        assert!(BentoEngine::build_info().contains("bento"));
    }
}
