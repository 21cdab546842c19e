//! Real-time audio engine core for the Bento host.
//!
//! Bento arranges audio processors into named tracks and drives them from a
//! fixed-size block callback. This crate is the engine itself: the sample
//! buffer, the sample-accurate event system, the processor contract, tracks,
//! the transport, and the dispatchers that bridge the audio thread and the
//! control side.
//!
//! # Architecture
//!
//! ```text
//! Control side                          Audio thread
//!     │                                     │
//! EngineController ──GraphCommand──▶  AudioEngine::process_chunk
//! MidiDispatcher  ──┐                      │  tracks ▶ processors
//! control API     ──┼─▶ EventDispatcher ──SPSC──▶ per-processor FIFOs
//! worker thread   ──┘         ▲                        │
//!                             └────────SPSC────────────┘
//!                          (notifications, MIDI out, work requests)
//! ```
//!
//! # RT safety
//!
//! The audio thread never allocates, locks or blocks. Graph edits are
//! prepared off-thread and adopted at block boundaries; removed objects are
//! deallocated on the dispatcher thread. All queues are bounded and drop on
//! overflow behind telemetry counters.

pub mod buffer;
pub mod bypass;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod event_dispatcher;
pub mod lockfree;
pub mod midi_dispatcher;
pub mod parameter;
pub mod plugins;
pub mod processor;
pub mod queue;
pub mod track;
pub mod transport;

pub use buffer::{SampleBuffer, BLOCK_SIZE};
pub use bypass::{bypass_mapping, BypassManager, RAMP_TIME_MS};
pub use controller::{engine_with_controller, CvGateRoute, EngineController, EngineQueues};
pub use engine::{
    AudioEngine, GraphCommand, ProcessTimings, Reclaimed, TimingSnapshot, MAX_ENGINE_CHANNELS,
    MAX_TRACKS,
};
pub use error::{EngineError, MidiDispatcherError, ProcessorError};
pub use event::{EventId, ObjectId, RtEvent, RtEventData, ENGINE_TARGET, MAX_MIDI_DATA_BYTES};
pub use event_dispatcher::{
    Event, EventDispatcher, Notification, NotificationCallback, NotificationType,
};
pub use lockfree::{AtomicDouble, AtomicFlag, AtomicFloat, DropCounter};
pub use midi_dispatcher::{MidiConnectionInfo, MidiDispatcher, MidiFrontend, MidiRouteKind};
pub use parameter::{
    ParameterDescriptor, ParameterRange, ParameterRegistry, ParameterType, ParameterValue,
};
pub use processor::{
    AsyncWorkHandler, Processor, ProcessorContainer, ProcessorData, ProcessorRecord,
};
pub use queue::{
    rt_event_queue, rt_output_queue, RtEventFifo, RtEventReceiver, RtEventSender,
    PROCESSOR_FIFO_CAPACITY, RT_EVENT_QUEUE_CAPACITY,
};
pub use track::{
    AudioConnection, Track, TrackMode, MAX_PROCESSORS_PER_TRACK, MAX_TRACK_CHANNELS,
};
pub use transport::{SharedTransport, SyncMode, TimeSignature, Transport, DEFAULT_TEMPO};
