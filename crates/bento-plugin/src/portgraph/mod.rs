//! Hosting for the port-graph plugin standard.
//!
//! Plugins expose typed ports (audio, control, event) behind a C descriptor
//! loaded from a shared library, or linked into the host directly. See
//! [`abi`] for the contract and [`PortGraphWrapper`] for the processor
//! implementation.

pub mod abi;
pub mod port;
pub mod urid;
pub mod worker;
mod wrapper;

pub use port::EventBuffer;
pub use urid::{KnownUrids, UridMap};
pub use worker::PluginWorker;
pub use wrapper::{PlayState, PlayStateHandle, PortGraphWrapper};
