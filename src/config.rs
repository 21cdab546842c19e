//! JSON session configuration.
//!
//! A session document describes the host sample rate, the track layout with
//! audio routing and plugin chains, MIDI routing, and optionally a list of
//! pre-scheduled events. Loading applies each section to a freshly built
//! engine and fails fast with a section-specific error, leaving whatever
//! was applied so far in place.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use bento_core::{EngineError, MidiDispatcherError, RtEvent};

use crate::engine::{BentoEngine, PluginSpec};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid config file: {0}")]
    InvalidFile(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid track name: {0}")]
    InvalidTrackName(String),

    #[error("invalid plugin path: {0}")]
    InvalidPluginPath(String),

    #[error("invalid plugin name: {0}")]
    InvalidPluginName(String),

    #[error("invalid midi port: {0}")]
    InvalidMidiPort(usize),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<MidiDispatcherError> for ConfigError {
    fn from(error: MidiDispatcherError) -> Self {
        match error {
            MidiDispatcherError::InvalidMidiInput(port)
            | MidiDispatcherError::InvalidMidiOutput(port) => ConfigError::InvalidMidiPort(port),
            MidiDispatcherError::InvalidTrackName(name) => ConfigError::InvalidTrackName(name),
            MidiDispatcherError::InvalidProcessor(name) => ConfigError::InvalidPluginName(name),
            MidiDispatcherError::InvalidParameter(name) => ConfigError::InvalidParameter(name),
            MidiDispatcherError::InvalidChannel(channel) => {
                ConfigError::InvalidConfiguration(format!("midi channel {}", channel))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub host_config: Option<HostConfig>,
    #[serde(default)]
    pub tracks: Vec<TrackConfig>,
    pub midi: Option<MidiConfig>,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

#[derive(Debug, Deserialize)]
pub struct HostConfig {
    pub samplerate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackModeConfig {
    Mono,
    Stereo,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackConfig {
    pub name: String,
    pub mode: TrackModeConfig,
    #[serde(default)]
    pub inputs: Vec<ConnectionConfig>,
    #[serde(default)]
    pub outputs: Vec<ConnectionConfig>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Either a bus pair or a channel pair; exactly one of the two shapes.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub engine_bus: Option<usize>,
    pub track_bus: Option<usize>,
    pub engine_channel: Option<usize>,
    pub track_channel: Option<usize>,
}

/// Plugin kind from the session document. Unknown names are kept verbatim
/// so loading can reject them as a configuration error rather than a
/// malformed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginTypeConfig {
    Internal,
    Vst2x,
    PortGraph,
    Unknown(String),
}

impl<'de> Deserialize<'de> for PluginTypeConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "internal" => Self::Internal,
            "vst2x" => Self::Vst2x,
            "portgraph" => Self::PortGraph,
            _ => Self::Unknown(raw),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PluginTypeConfig,
    pub uid: Option<String>,
    pub path: Option<String>,
}

/// A channel number, or the string `"omni"` for all channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiChannelConfig(pub Option<u8>);

impl<'de> Deserialize<'de> for MidiChannelConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u8),
            Name(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(channel) => Ok(MidiChannelConfig(Some(channel))),
            Raw::Name(name) if name.eq_ignore_ascii_case("omni") => Ok(MidiChannelConfig(None)),
            Raw::Name(other) => Err(serde::de::Error::custom(format!(
                "unknown midi channel '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MidiConfig {
    #[serde(default)]
    pub track_connections: Vec<MidiTrackConnection>,
    #[serde(default)]
    pub track_out_connections: Vec<MidiTrackOutConnection>,
    #[serde(default)]
    pub cc_mappings: Vec<CcMapping>,
    #[serde(default)]
    pub program_change_mappings: Vec<ProgramChangeMapping>,
    #[serde(default)]
    pub raw_midi_connections: Vec<MidiTrackConnection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MidiTrackConnection {
    pub port: usize,
    pub track: String,
    pub channel: MidiChannelConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MidiTrackOutConnection {
    pub port: usize,
    pub track: String,
    pub channel: u8,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CcMapping {
    pub port: usize,
    pub channel: MidiChannelConfig,
    pub plugin_name: String,
    pub parameter_name: String,
    pub cc_number: u8,
    pub min_range: f32,
    pub max_range: f32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramChangeMapping {
    pub port: usize,
    pub channel: MidiChannelConfig,
    pub plugin_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum EventConfig {
    #[serde(rename = "parameter_change")]
    ParameterChange {
        time: f64,
        plugin_name: String,
        parameter_name: String,
        value: f32,
    },
    #[serde(rename = "note_on")]
    NoteOn {
        time: f64,
        track: String,
        channel: u8,
        note: u8,
        velocity: f32,
    },
    #[serde(rename = "note_off")]
    NoteOff {
        time: f64,
        track: String,
        channel: u8,
        note: u8,
        velocity: f32,
    },
}

impl SessionConfig {
    pub fn from_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidFile(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::InvalidFile(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&contents)
    }
}

impl BentoEngine {
    pub fn load_session(&self, json: &str) -> Result<(), ConfigError> {
        let config = SessionConfig::from_str(json)?;
        self.apply_session(&config)
    }

    pub fn load_session_file(&self, path: &Path) -> Result<(), ConfigError> {
        let config = SessionConfig::from_file(path)?;
        self.apply_session(&config)
    }

    pub fn apply_session(&self, config: &SessionConfig) -> Result<(), ConfigError> {
        if let Some(host) = &config.host_config {
            self.set_sample_rate(host.samplerate)?;
            tracing::info!(samplerate = host.samplerate, "host config applied");
        }
        for track in &config.tracks {
            self.apply_track(track)?;
        }
        if let Some(midi) = &config.midi {
            self.apply_midi(midi)?;
        }
        for event in &config.events {
            self.apply_event(event)?;
        }
        Ok(())
    }

    fn apply_track(&self, config: &TrackConfig) -> Result<(), ConfigError> {
        let channels = match config.mode {
            TrackModeConfig::Mono => 1,
            TrackModeConfig::Stereo => 2,
        };
        self.create_track(&config.name, channels)
            .map_err(|_| ConfigError::InvalidTrackName(config.name.clone()))?;

        for connection in &config.inputs {
            self.apply_connection(&config.name, connection, true)?;
        }
        for connection in &config.outputs {
            self.apply_connection(&config.name, connection, false)?;
        }

        for plugin in &config.plugins {
            let spec = match (&plugin.kind, &plugin.uid, &plugin.path) {
                (PluginTypeConfig::Internal, Some(uid), _) => PluginSpec::Internal { uid },
                (PluginTypeConfig::Vst2x, _, Some(path)) => PluginSpec::Vst2 {
                    path: Path::new(path),
                },
                (PluginTypeConfig::PortGraph, _, Some(path)) => PluginSpec::PortGraph {
                    path: Path::new(path),
                },
                (PluginTypeConfig::Unknown(kind), _, _) => {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "unknown plugin type '{}' for plugin '{}'",
                        kind, plugin.name
                    )))
                }
                _ => {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "plugin '{}' is missing its uid or path",
                        plugin.name
                    )))
                }
            };
            self.add_plugin(&config.name, &plugin.name, spec)
                .map_err(|error| match error {
                    EngineError::InvalidPluginUid(uid) => ConfigError::InvalidPluginPath(uid),
                    _ => ConfigError::InvalidPluginName(plugin.name.clone()),
                })?;
        }
        tracing::debug!(track = %config.name, "track configured");
        Ok(())
    }

    fn apply_connection(
        &self,
        track: &str,
        connection: &ConnectionConfig,
        input: bool,
    ) -> Result<(), ConfigError> {
        let result = match connection {
            ConnectionConfig {
                engine_bus: Some(engine),
                track_bus: Some(track_bus),
                ..
            } => {
                if input {
                    self.controller().connect_audio_input_bus(*engine, *track_bus, track)
                } else {
                    self.controller().connect_audio_output_bus(*engine, *track_bus, track)
                }
            }
            ConnectionConfig {
                engine_channel: Some(engine),
                track_channel: Some(track_channel),
                ..
            } => {
                if input {
                    self.controller()
                        .connect_audio_input_channel(*engine, *track_channel, track)
                } else {
                    self.controller()
                        .connect_audio_output_channel(*engine, *track_channel, track)
                }
            }
            _ => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "connection on track '{}' names neither a bus nor a channel pair",
                    track
                )))
            }
        };
        result.map_err(|e| ConfigError::InvalidConfiguration(e.to_string()))
    }

    fn apply_midi(&self, config: &MidiConfig) -> Result<(), ConfigError> {
        let dispatcher = self.midi_dispatcher();
        for connection in &config.track_connections {
            dispatcher.connect_kb_to_track(connection.port, &connection.track, connection.channel.0)?;
        }
        for connection in &config.raw_midi_connections {
            dispatcher.connect_raw_midi_to_track(
                connection.port,
                &connection.track,
                connection.channel.0,
            )?;
        }
        for connection in &config.track_out_connections {
            dispatcher.connect_track_to_output(connection.port, &connection.track, connection.channel)?;
        }
        for mapping in &config.cc_mappings {
            dispatcher.connect_cc_to_parameter(
                mapping.port,
                &mapping.plugin_name,
                &mapping.parameter_name,
                mapping.cc_number,
                mapping.min_range,
                mapping.max_range,
                mapping.channel.0,
            )?;
        }
        for mapping in &config.program_change_mappings {
            dispatcher.connect_pc_to_processor(mapping.port, &mapping.plugin_name, mapping.channel.0)?;
        }
        Ok(())
    }

    fn apply_event(&self, event: &EventConfig) -> Result<(), ConfigError> {
        use bento_core::event_dispatcher::Event;

        let sample_rate = self.sample_rate();
        let offset = |time: f64| (time * sample_rate as f64).max(0.0) as u32;
        let container = self.controller().container();

        let rt_event = match event {
            EventConfig::ParameterChange {
                time,
                plugin_name,
                parameter_name,
                value,
            } => {
                let processor = container
                    .id_from_name(plugin_name)
                    .ok_or_else(|| ConfigError::InvalidPluginName(plugin_name.clone()))?;
                let parameter = container
                    .parameter_id_from_name(plugin_name, parameter_name)
                    .ok_or_else(|| ConfigError::InvalidParameter(parameter_name.clone()))?;
                RtEvent::float_parameter_change(processor, offset(*time), parameter, *value)
            }
            EventConfig::NoteOn {
                time,
                track,
                channel,
                note,
                velocity,
            } => {
                let target = container
                    .id_from_name(track)
                    .ok_or_else(|| ConfigError::InvalidTrackName(track.clone()))?;
                RtEvent::note_on(target, offset(*time), *channel, *note, *velocity)
            }
            EventConfig::NoteOff {
                time,
                track,
                channel,
                note,
                velocity,
            } => {
                let target = container
                    .id_from_name(track)
                    .ok_or_else(|| ConfigError::InvalidTrackName(track.clone()))?;
                RtEvent::note_off(target, offset(*time), *channel, *note, *velocity)
            }
        };
        self.controller()
            .post_event(Event::Engine(rt_event))
            .map_err(ConfigError::Engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_session() {
        let config = SessionConfig::from_str(r#"{ "host_config": { "samplerate": 48000 } }"#)
            .unwrap();
        assert_eq!(config.host_config.unwrap().samplerate, 48000.0);
        assert!(config.tracks.is_empty());
    }

    #[test]
    fn test_parse_track_with_plugins() {
        let json = r#"{
            "tracks": [
                {
                    "name": "main",
                    "mode": "stereo",
                    "inputs": [{"engine_channel": 0, "track_channel": 0}],
                    "outputs": [{"engine_bus": 0, "track_bus": 0}],
                    "plugins": [
                        {"name": "gain", "type": "internal", "uid": "bento.gain"}
                    ]
                }
            ]
        }"#;
        let config = SessionConfig::from_str(json).unwrap();
        assert_eq!(config.tracks.len(), 1);
        let track = &config.tracks[0];
        assert_eq!(track.mode, TrackModeConfig::Stereo);
        assert_eq!(track.inputs[0].engine_channel, Some(0));
        assert_eq!(track.outputs[0].engine_bus, Some(0));
        assert_eq!(track.plugins[0].kind, PluginTypeConfig::Internal);
    }

    #[test]
    fn test_parse_midi_channels() {
        let json = r#"{
            "midi": {
                "track_connections": [
                    {"port": 0, "track": "main", "channel": "omni"},
                    {"port": 0, "track": "main", "channel": 3}
                ]
            }
        }"#;
        let config = SessionConfig::from_str(json).unwrap();
        let midi = config.midi.unwrap();
        assert_eq!(midi.track_connections[0].channel.0, None);
        assert_eq!(midi.track_connections[1].channel.0, Some(3));
    }

    #[test]
    fn test_reject_malformed_json() {
        assert!(matches!(
            SessionConfig::from_str("{ not json"),
            Err(ConfigError::InvalidFile(_))
        ));
    }

    #[test]
    fn test_unknown_plugin_type_is_kept_for_validation() {
        // Unknown plugin types parse (the file is well-formed) and are
        // rejected when the session is applied.
        let json = r#"{
            "tracks": [{"name": "t", "mode": "mono", "plugins": [
                {"name": "x", "type": "vst3x", "uid": "u"}
            ]}]
        }"#;
        let config = SessionConfig::from_str(json).unwrap();
        assert_eq!(
            config.tracks[0].plugins[0].kind,
            PluginTypeConfig::Unknown("vst3x".to_string())
        );
    }

    #[test]
    fn test_parse_events() {
        let json = r#"{
            "events": [
                {"type": "note_on", "time": 0.5, "track": "t", "channel": 0, "note": 60, "velocity": 0.8},
                {"type": "parameter_change", "time": 1.0, "plugin_name": "g", "parameter_name": "gain", "value": 0.5}
            ]
        }"#;
        let config = SessionConfig::from_str(json).unwrap();
        assert_eq!(config.events.len(), 2);
        assert!(matches!(config.events[0], EventConfig::NoteOn { note: 60, .. }));
    }
}
