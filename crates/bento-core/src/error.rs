//! Error types for the engine core.
//!
//! Everything fallible lives on the non-RT side and returns a categorical
//! status. The RT path never surfaces errors: an RT operation either
//! completes or silently drops its event behind a telemetry counter.

use thiserror::Error;

use crate::event::ObjectId;

/// Status returned by engine-level operations (graph edits, routing,
/// transport configuration).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid track name: {0}")]
    InvalidTrackName(String),

    #[error("invalid processor: {0}")]
    InvalidProcessor(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid plugin uid: {0}")]
    InvalidPluginUid(String),

    #[error("invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("engine error: {0}")]
    Other(String),
}

/// Status returned by processor-level operations (plugin loading,
/// parameter access, program management).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
    #[error("could not open shared library: {0}")]
    SharedLibraryOpening(String),

    #[error("plugin entry point not found: {0}")]
    EntryPointNotFound(String),

    #[error("plugin load error: {0}")]
    PluginLoad(String),

    #[error("plugin init error: {0}")]
    PluginInit(String),

    #[error("parameter error: {0}")]
    Parameter(String),

    #[error("parameter not found: {0}")]
    ParameterNotFound(ObjectId),

    #[error("unsupported operation")]
    UnsupportedOperation,

    #[error("processor error: {0}")]
    Other(String),
}

/// Status returned by MIDI route management.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MidiDispatcherError {
    #[error("invalid midi input port: {0}")]
    InvalidMidiInput(usize),

    #[error("invalid midi output port: {0}")]
    InvalidMidiOutput(usize),

    #[error("invalid midi channel: {0}")]
    InvalidChannel(u8),

    #[error("invalid track name: {0}")]
    InvalidTrackName(String),

    #[error("invalid processor: {0}")]
    InvalidProcessor(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
