//! Plugin hosting for the Bento audio engine.
//!
//! Two external plugin standards are adapted to the engine's
//! [`Processor`](bento_core::Processor) contract:
//!
//! - **VST 2.x** through the `vst` crate ([`Vst2Wrapper`], feature `vst2`,
//!   on by default);
//! - **port-graph** plugins, a typed-port C ABI with URID-named event
//!   buffers and a host worker protocol ([`PortGraphWrapper`]).
//!
//! Shared libraries for port-graph plugins are cached and reference-counted
//! by [`PluginLoader`]; unloading happens with the last wrapper's
//! destruction on the dispatcher thread.

pub mod error;
pub mod loader;
pub mod portgraph;

#[cfg(feature = "vst2")]
pub mod vst2;

pub use error::LoadStage;
pub use loader::{PluginLibrary, PluginLoader};
pub use portgraph::{PlayState, PlayStateHandle, PortGraphWrapper};

#[cfg(feature = "vst2")]
pub use vst2::Vst2Wrapper;
