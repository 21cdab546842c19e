//! Processor implementation hosting a port-graph plugin.
//!
//! The wrapper owns the instance, the URID map, the port storage and an
//! optional worker. Per block it refreshes control-input cells, encodes the
//! queued events into the designated event-input buffer (prefixed by a
//! transport atom when the clock changed and a patch-get object when a
//! state update was requested), runs the instance for exactly one block,
//! then decodes event outputs back into engine events and services the
//! worker queues.

use std::ffi::{c_void, CStr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bento_core::bypass::{bypass_mapping, BypassManager};
use bento_core::buffer::{SampleBuffer, BLOCK_SIZE};
use bento_core::lockfree::AtomicFlag;
use bento_core::event::{RtEvent, RtEventData};
use bento_core::parameter::{ParameterRange, ParameterType};
use bento_core::processor::{Processor, ProcessorData};
use bento_core::ProcessorError;
use smallvec::SmallVec;

use crate::error::{load_error, LoadStage};
use crate::loader::PluginLibrary;
use crate::portgraph::abi::{
    PgDescriptor, PgHandle, PgHost, PgPortKind, PgTransportBody, PgWorkerInterface,
    PG_EXT_WORKER, PORTGRAPH_ABI_VERSION,
};
use crate::portgraph::port::EventBuffer;
use crate::portgraph::urid::{urid_map_callback, KnownUrids, UridMap};
use crate::portgraph::worker::{schedule_work_callback, PluginWorker};

const MAX_STAGED_EVENTS: usize = 64;
const EVENT_BUFFER_BYTES: usize = 4096;

/// Block-boundary pause machine, driven from the control side through
/// [`PlayStateHandle`] and polled by the wrapper every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayState {
    Running = 0,
    PauseRequested = 1,
    Paused = 2,
}

impl PlayState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::PauseRequested,
            2 => Self::Paused,
            _ => Self::Running,
        }
    }
}

#[derive(Clone)]
pub struct PlayStateHandle {
    state: Arc<AtomicU8>,
}

impl PlayStateHandle {
    pub fn request_pause(&self) {
        self.state
            .store(PlayState::PauseRequested as u8, Ordering::Release);
    }

    pub fn resume(&self) {
        self.state.store(PlayState::Running as u8, Ordering::Release);
    }

    pub fn current(&self) -> PlayState {
        PlayState::from_raw(self.state.load(Ordering::Acquire))
    }
}

struct ControlInPort {
    index: u32,
    parameter_id: bento_core::ObjectId,
    storage: Box<f32>,
}

struct ControlOutPort {
    index: u32,
    storage: Box<f32>,
    reports_latency: bool,
}

struct EventPort {
    index: u32,
    buffer: EventBuffer,
    is_control: bool,
}

#[derive(Default)]
struct PortLayout {
    audio_inputs: Vec<u32>,
    audio_outputs: Vec<u32>,
    control_inputs: Vec<ControlInPort>,
    control_outputs: Vec<ControlOutPort>,
    event_inputs: Vec<EventPort>,
    event_outputs: Vec<EventPort>,
}

pub struct PortGraphWrapper {
    data: ProcessorData,
    /// Keeps the shared library mapped for as long as the instance lives.
    /// `None` for plugins compiled into the host.
    _library: Option<Arc<PluginLibrary>>,
    descriptor: *const PgDescriptor,
    instance: PgHandle,
    active: bool,
    urid_map: Box<UridMap>,
    urids: Option<KnownUrids>,
    host: Option<Box<PgHost>>,
    worker: Option<PluginWorker>,
    ports: PortLayout,
    bypass: BypassManager,
    play_state: Arc<AtomicU8>,
    state_update_requested: Arc<AtomicFlag>,
    staged: SmallVec<[RtEvent; 32]>,
    last_transport: Option<(f32, bool, u32)>,
    silent: SampleBuffer,
    discard: SampleBuffer,
    double_mono_input: bool,
    latency: u32,
    sample_rate: f32,
}

// The raw plugin pointers are used by one thread at a time; ownership moves
// between threads only at block boundaries via the graph command channel.
unsafe impl Send for PortGraphWrapper {}

impl PortGraphWrapper {
    pub fn from_library(library: Arc<PluginLibrary>) -> Self {
        let descriptor = library.descriptor();
        Self::with_source(Some(library), descriptor)
    }

    /// Host a plugin compiled into this process (a static descriptor).
    pub fn from_descriptor(descriptor: *const PgDescriptor) -> Self {
        Self::with_source(None, descriptor)
    }

    fn with_source(library: Option<Arc<PluginLibrary>>, descriptor: *const PgDescriptor) -> Self {
        Self {
            data: ProcessorData::new("Port-graph plugin", 0, 0),
            _library: library,
            descriptor,
            instance: std::ptr::null_mut(),
            active: false,
            urid_map: Box::new(UridMap::new()),
            urids: None,
            host: None,
            worker: None,
            ports: PortLayout::default(),
            bypass: BypassManager::new(),
            play_state: Arc::new(AtomicU8::new(PlayState::Running as u8)),
            state_update_requested: Arc::new(AtomicFlag::new(false)),
            staged: SmallVec::new(),
            last_transport: None,
            silent: SampleBuffer::new(1),
            discard: SampleBuffer::new(1),
            double_mono_input: false,
            latency: 0,
            sample_rate: 44100.0,
        }
    }

    pub fn play_state_handle(&self) -> PlayStateHandle {
        PlayStateHandle {
            state: Arc::clone(&self.play_state),
        }
    }

    /// Ask the wrapper to request the plugin's state on the next block
    /// (a patch-get object prepended to the event input).
    pub fn state_update_flag(&self) -> Arc<AtomicFlag> {
        Arc::clone(&self.state_update_requested)
    }

    pub fn latency(&self) -> u32 {
        self.latency
    }

    fn scan_ports(&mut self) -> Result<(), ProcessorError> {
        let descriptor = unsafe { &*self.descriptor };
        let ports = descriptor.ports;
        for index in 0..descriptor.port_count {
            let port = unsafe { &*ports.add(index as usize) };
            let kind = PgPortKind::from_raw(port.kind)
                .ok_or_else(|| load_error(LoadStage::PortScan, format!("port kind {}", port.kind)))?;
            match kind {
                PgPortKind::CvIn | PgPortKind::CvOut => {
                    return Err(ProcessorError::PluginInit(
                        "cv ports are not supported".to_string(),
                    ));
                }
                PgPortKind::AudioIn => self.ports.audio_inputs.push(index),
                PgPortKind::AudioOut => self.ports.audio_outputs.push(index),
                PgPortKind::ControlIn => {
                    let name = unsafe { cstr_or(port.name, "control") };
                    let registered = self.register_control(&name, port.min, port.max, port.default)?;
                    self.ports.control_inputs.push(ControlInPort {
                        index,
                        parameter_id: registered,
                        storage: Box::new(port.default),
                    });
                }
                PgPortKind::ControlOut => {
                    self.ports.control_outputs.push(ControlOutPort {
                        index,
                        storage: Box::new(0.0),
                        reports_latency: port.reports_latency != 0,
                    });
                }
                PgPortKind::EventIn => {
                    self.ports.event_inputs.push(EventPort {
                        index,
                        buffer: EventBuffer::new(EVENT_BUFFER_BYTES),
                        is_control: port.is_control_designation != 0,
                    });
                }
                PgPortKind::EventOut => {
                    self.ports.event_outputs.push(EventPort {
                        index,
                        buffer: EventBuffer::new(EVENT_BUFFER_BYTES),
                        is_control: false,
                    });
                }
            }
        }
        Ok(())
    }

    /// Register a control port as a float parameter, suffixing collisions
    /// the way hosted plugins with repeated port names require.
    fn register_control(
        &mut self,
        name: &str,
        min: f32,
        max: f32,
        default: f32,
    ) -> Result<bento_core::ObjectId, ProcessorError> {
        let (min, max) = if max > min { (min, max) } else { (0.0, 1.0) };
        let range = ParameterRange::new(min, max, default);
        if self
            .data
            .parameters
            .register(name, name, "", ParameterType::Float, range)
            .is_err()
        {
            let unique = format!("{}_{}", name, self.data.parameters.count());
            self.data
                .parameters
                .register(&unique, name, "", ParameterType::Float, range)
                .map_err(|e| ProcessorError::Parameter(e.to_string()))?;
        }
        Ok(self.data.parameters.count() as bento_core::ObjectId - 1)
    }

    fn connect_static_ports(&mut self) {
        let descriptor = unsafe { &*self.descriptor };
        let Some(connect) = descriptor.connect_port else {
            return;
        };
        unsafe {
            for port in &mut self.ports.control_inputs {
                connect(
                    self.instance,
                    port.index,
                    port.storage.as_mut() as *mut f32 as *mut c_void,
                );
            }
            for port in &mut self.ports.control_outputs {
                connect(
                    self.instance,
                    port.index,
                    port.storage.as_mut() as *mut f32 as *mut c_void,
                );
            }
            for port in &mut self.ports.event_inputs {
                connect(self.instance, port.index, port.buffer.as_ptr());
            }
            for port in &mut self.ports.event_outputs {
                connect(self.instance, port.index, port.buffer.as_ptr());
            }
        }
    }

    fn write_event_input(&mut self) {
        let Some(urids) = self.urids else {
            return;
        };
        for port in &mut self.ports.event_inputs {
            port.buffer.clear();
        }
        // The designated control port takes host events; without one, the
        // first event input does.
        let control_index = self
            .ports
            .event_inputs
            .iter()
            .position(|p| p.is_control)
            .unwrap_or(0);
        let Some(control) = self.ports.event_inputs.get_mut(control_index) else {
            self.staged.clear();
            return;
        };

        // Transport first, so the plugin sees the clock before any event
        // of this block.
        if let Some(transport) = self.data.transport() {
            let signature = transport.time_signature();
            let packed_signature = (signature.numerator << 16) | signature.denominator;
            let state = (transport.tempo(), transport.playing(), packed_signature);
            if self.last_transport != Some(state) {
                self.last_transport = Some(state);
                let body = PgTransportBody {
                    tempo: transport.tempo(),
                    playing: transport.playing() as u32,
                    beats: transport.current_beats(),
                    sample: transport.current_samples(),
                    time_sig_numerator: signature.numerator,
                    time_sig_denominator: signature.denominator,
                };
                let bytes = unsafe {
                    std::slice::from_raw_parts(
                        &body as *const PgTransportBody as *const u8,
                        std::mem::size_of::<PgTransportBody>(),
                    )
                };
                control.buffer.append(0, urids.transport, bytes);
            }
        }

        if self.state_update_requested.swap(false) {
            control.buffer.append(0, urids.patch_get, &[]);
        }

        for event in self.staged.drain(..) {
            let frames = event.sample_offset;
            let mut bytes = [0u8; 3];
            let encoded: &[u8] = match event.data {
                RtEventData::NoteOn {
                    channel,
                    note,
                    velocity,
                } => {
                    bytes = [0x90 | (channel & 0x0F), note, to_7bit(velocity)];
                    &bytes
                }
                RtEventData::NoteOff {
                    channel,
                    note,
                    velocity,
                } => {
                    bytes = [0x80 | (channel & 0x0F), note, to_7bit(velocity)];
                    &bytes
                }
                RtEventData::NoteAftertouch {
                    channel,
                    note,
                    value,
                } => {
                    bytes = [0xA0 | (channel & 0x0F), note, to_7bit(value)];
                    &bytes
                }
                RtEventData::Aftertouch { channel, value } => {
                    bytes = [0xD0 | (channel & 0x0F), to_7bit(value), 0];
                    &bytes[..2]
                }
                RtEventData::Modulation { channel, value } => {
                    bytes = [0xB0 | (channel & 0x0F), 1, to_7bit(value)];
                    &bytes
                }
                RtEventData::PitchBend { channel, value } => {
                    let raw = (((value.clamp(-1.0, 1.0) + 1.0) * 8192.0) as u16).min(16383);
                    bytes = [
                        0xE0 | (channel & 0x0F),
                        (raw & 0x7F) as u8,
                        (raw >> 7) as u8,
                    ];
                    &bytes
                }
                RtEventData::WrappedMidi { bytes: raw, len } => {
                    let len = (len as usize).min(3);
                    bytes[..len].copy_from_slice(&raw[..len]);
                    &bytes[..len]
                }
                _ => continue,
            };
            control.buffer.append(frames, urids.midi_event, encoded);
        }
    }

    fn drain_event_outputs(&mut self) {
        let Some(urids) = self.urids else {
            return;
        };
        let own_id = self.data.id();
        for port in &mut self.ports.event_outputs {
            for (header, body) in port.buffer.iter() {
                if header.body_type != urids.midi_event || body.is_empty() {
                    continue;
                }
                let status = body[0] & 0xF0;
                let channel = body[0] & 0x0F;
                let byte = |i: usize| body.get(i).copied().unwrap_or(0);
                let event = match status {
                    0x90 => RtEvent::note_on(
                        own_id,
                        header.frames,
                        channel,
                        byte(1),
                        byte(2) as f32 / 127.0,
                    ),
                    0x80 => RtEvent::note_off(
                        own_id,
                        header.frames,
                        channel,
                        byte(1),
                        byte(2) as f32 / 127.0,
                    ),
                    0xA0 => RtEvent::note_aftertouch(
                        own_id,
                        header.frames,
                        channel,
                        byte(1),
                        byte(2) as f32 / 127.0,
                    ),
                    _ => RtEvent::wrapped_midi(own_id, header.frames, body),
                };
                self.data.output_event(event);
            }
            port.buffer.clear();
        }
    }

    fn connect_audio_and_run(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let descriptor = unsafe { &*self.descriptor };
        let (Some(connect), Some(run)) = (descriptor.connect_port, descriptor.run) else {
            return;
        };
        let current_inputs = self.data.input_channels();
        let current_outputs = self.data.output_channels();

        unsafe {
            for (slot, port_index) in self.ports.audio_inputs.iter().enumerate() {
                let pointer = if self.double_mono_input && slot < 2 {
                    input.channel(0).as_ptr()
                } else if slot < current_inputs && slot < input.channel_count() {
                    input.channel(slot).as_ptr()
                } else {
                    self.silent.channel(0).as_ptr()
                };
                connect(self.instance, *port_index, pointer as *mut c_void);
            }
            for (slot, port_index) in self.ports.audio_outputs.iter().enumerate() {
                let pointer = if slot < current_outputs && slot < output.channel_count() {
                    output.channel_mut(slot).as_mut_ptr()
                } else {
                    self.discard.channel_mut(0).as_mut_ptr()
                };
                connect(self.instance, *port_index, pointer as *mut c_void);
            }
            run(self.instance, BLOCK_SIZE as u32);
        }
    }

    fn read_latency(&mut self) {
        for port in &self.ports.control_outputs {
            if port.reports_latency {
                self.latency = (*port.storage).max(0.0) as u32;
            }
        }
    }

    fn update_mono_mode(&mut self) {
        self.double_mono_input =
            self.data.input_channels() == 1 && self.data.max_input_channels() == 2;
    }
}

fn to_7bit(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 127.0).round() as u8
}

unsafe fn cstr_or(pointer: *const std::os::raw::c_char, fallback: &str) -> String {
    if pointer.is_null() {
        return fallback.to_string();
    }
    CStr::from_ptr(pointer)
        .to_str()
        .unwrap_or(fallback)
        .to_string()
}

impl Processor for PortGraphWrapper {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> Result<(), ProcessorError> {
        self.sample_rate = sample_rate;
        let descriptor = unsafe { &*self.descriptor };
        if descriptor.abi_version != PORTGRAPH_ABI_VERSION {
            return Err(load_error(
                LoadStage::Entry,
                format!("abi version {}", descriptor.abi_version),
            ));
        }

        let uri = unsafe { cstr_or(descriptor.uri, "portgraph") };
        let label = unsafe { cstr_or(descriptor.label, &uri) };
        if self.data.name().is_empty() {
            self.data.set_name(&uri);
        }
        self.data.set_label(&label);

        self.scan_ports()?;
        self.data.set_max_channels(
            self.ports.audio_inputs.len(),
            self.ports.audio_outputs.len(),
        );
        self.update_mono_mode();
        self.urids = Some(KnownUrids::resolve(&self.urid_map));

        // The worker extension lives on the descriptor, so probe before
        // instantiating and hand its schedule endpoint to the host struct.
        let worker_iface = descriptor.extension_data.and_then(|extension| {
            let pointer =
                unsafe { extension(PG_EXT_WORKER.as_ptr() as *const std::os::raw::c_char) };
            if pointer.is_null() {
                None
            } else {
                Some(pointer as *const PgWorkerInterface)
            }
        });
        let mut worker = worker_iface.map(|_| PluginWorker::new(descriptor.wants_worker_thread != 0));

        let mut host = Box::new(PgHost {
            urid_map_handle: self.urid_map.as_ref() as *const UridMap as *mut c_void,
            urid_map: Some(urid_map_callback),
            schedule_handle: std::ptr::null_mut(),
            schedule_work: None,
        });
        if let Some(worker) = worker.as_mut() {
            host.schedule_handle = worker.schedule_handle();
            host.schedule_work = Some(schedule_work_callback);
        }

        let instantiate = descriptor
            .instantiate
            .ok_or_else(|| load_error(LoadStage::Instantiation, "missing instantiate"))?;
        let instance =
            unsafe { instantiate(sample_rate as f64, BLOCK_SIZE as u32, host.as_ref()) };
        if instance.is_null() {
            return Err(load_error(LoadStage::Instantiation, "instantiate returned null"));
        }
        self.instance = instance;
        self.host = Some(host);

        if let (Some(worker), Some(iface)) = (worker.as_mut(), worker_iface) {
            worker.attach(iface, instance);
        }
        self.worker = worker;

        self.connect_static_ports();
        if let Some(activate) = descriptor.activate {
            unsafe { activate(self.instance) };
        }
        self.active = true;
        self.play_state
            .store(PlayState::Running as u8, Ordering::Release);
        tracing::info!(plugin = %uri, "port-graph plugin ready");
        Ok(())
    }

    fn configure(&mut self, sample_rate: f32) {
        // The instance was built for a fixed rate; remember the new one for
        // reinstantiation by the host.
        self.sample_rate = sample_rate;
    }

    fn process_event(&mut self, event: RtEvent) {
        match event.data {
            RtEventData::FloatParameterChange {
                parameter_id,
                value,
            } => {
                if let Some(cell) = self.data.parameters.value(parameter_id) {
                    cell.set(value);
                }
            }
            RtEventData::SetBypass { bypassed } => {
                self.data.set_bypassed(bypassed);
                self.bypass.set_bypass(bypassed, self.sample_rate);
            }
            _ if event.is_keyboard_event() => {
                if PlayState::from_raw(self.play_state.load(Ordering::Acquire))
                    == PlayState::Running
                    && self.staged.len() < MAX_STAGED_EVENTS
                {
                    self.staged.push(event);
                }
            }
            _ => {}
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        match PlayState::from_raw(self.play_state.load(Ordering::Acquire)) {
            PlayState::PauseRequested => {
                self.play_state
                    .store(PlayState::Paused as u8, Ordering::Release);
                self.staged.clear();
                return;
            }
            PlayState::Paused => {
                self.staged.clear();
                return;
            }
            PlayState::Running => {}
        }

        let inputs = self.data.input_channels();
        let outputs = self.data.output_channels();
        if !self.bypass.should_process() {
            bypass_mapping(input, output, inputs, outputs);
            self.staged.clear();
            return;
        }

        for port in &mut self.ports.control_inputs {
            if let Some(cell) = self.data.parameters.value(port.parameter_id) {
                *port.storage = cell.domain_value();
            }
        }

        self.write_event_input();
        self.connect_audio_and_run(input, output);

        if let Some(worker) = self.worker.as_mut() {
            worker.emit_responses();
            worker.end_run();
        }

        self.drain_event_outputs();
        self.read_latency();

        if self.bypass.should_ramp() {
            self.bypass.crossfade_output(input, output, inputs, outputs);
        }
    }

    fn set_input_channels(&mut self, channels: usize) {
        self.data.set_input_channels(channels);
        self.update_mono_mode();
    }

    fn set_output_channels(&mut self, channels: usize) {
        self.data.set_output_channels(channels);
    }
}

impl Drop for PortGraphWrapper {
    fn drop(&mut self) {
        // Worker threads reference the instance; stop them first.
        self.worker = None;
        if !self.instance.is_null() {
            let descriptor = unsafe { &*self.descriptor };
            unsafe {
                if self.active {
                    if let Some(deactivate) = descriptor.deactivate {
                        deactivate(self.instance);
                    }
                }
                if let Some(destroy) = descriptor.destroy {
                    destroy(self.instance);
                }
            }
            self.instance = std::ptr::null_mut();
        }
        // `_library` drops after this body, releasing the library last.
    }
}
