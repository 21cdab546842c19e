//! Processor implementation hosting VST 2.x plugins through the `vst` crate.
//!
//! The crate performs the library loading, entry-point lookup and magic
//! check; the wrapper contributes everything host-shaped: parameter
//! registration over the normalised range, a per-block MIDI FIFO delivered
//! ahead of processing, channel matching with silent and discard buffers,
//! host-side bypass with crossfade, and a `TimeInfo` served lock-free from
//! the engine transport.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender};
use vst::api;
use vst::host::{Host, PluginInstance, PluginLoader};
use vst::plugin::{CanDo, Plugin, PluginParameters};

use bento_core::buffer::{SampleBuffer, BLOCK_SIZE};
use bento_core::bypass::{bypass_mapping, BypassManager};
use bento_core::event::{RtEvent, RtEventData};
use bento_core::lockfree::AtomicFloat;
use bento_core::processor::{Processor, ProcessorData};
use bento_core::transport::SharedTransport;
use bento_core::ProcessorError;

/// Per-block MIDI FIFO depth; events beyond this are dropped.
const MAX_VST_EVENTS: usize = 128;

// VST2 TimeInfo flag constants (from the VST2.4 SDK).
mod time_info_flags {
    pub const TRANSPORT_CHANGED: i32 = 1 << 0;
    pub const TRANSPORT_PLAYING: i32 = 1 << 1;
    pub const NANOS_VALID: i32 = 1 << 8;
    pub const TEMPO_VALID: i32 = 1 << 9;
    pub const TIME_SIG_VALID: i32 = 1 << 10;
    pub const PPQ_POS_VALID: i32 = 1 << 11;
    pub const BARS_VALID: i32 = 1 << 13;
}

/// `api::Events` with room for a full FIFO. The leading fields mirror the
/// `api::Events` layout so a pointer to this struct can be passed to
/// `process_events`.
#[repr(C)]
struct EventBlock {
    num_events: i32,
    _reserved: isize,
    events: [*mut api::Event; MAX_VST_EVENTS],
}

impl EventBlock {
    fn new() -> Self {
        Self {
            num_events: 0,
            _reserved: 0,
            events: [std::ptr::null_mut(); MAX_VST_EVENTS],
        }
    }
}

/// Host half shared with the plugin. Parameter automation and plugin MIDI
/// output travel through bounded channels drained each block; `TimeInfo`
/// is synthesised on demand from the engine transport.
struct Vst2Host {
    param_tx: Sender<(i32, f32)>,
    midi_tx: Sender<api::MidiEvent>,
    transport: ArcSwapOption<SharedTransport>,
    sample_rate: AtomicFloat,
}

impl Host for Vst2Host {
    fn automate(&self, index: i32, value: f32) {
        let _ = self.param_tx.try_send((index, value));
    }

    fn get_plugin_id(&self) -> i32 {
        // "bnto"
        0x626e_746f
    }

    fn idle(&self) {}

    fn process_events(&self, events: &api::Events) {
        let pointers = unsafe {
            std::slice::from_raw_parts(events.events.as_ptr(), events.num_events.max(0) as usize)
        };
        for &pointer in pointers {
            if pointer.is_null() {
                continue;
            }
            let event_type = unsafe { (*pointer).event_type };
            if let api::EventType::Midi = event_type {
                let midi = unsafe { std::ptr::read(pointer as *const api::MidiEvent) };
                let _ = self.midi_tx.try_send(midi);
            }
        }
    }

    fn get_time_info(&self, _mask: i32) -> Option<api::TimeInfo> {
        use time_info_flags::*;

        let transport = self.transport.load();
        let transport = transport.as_ref()?;
        let signature = transport.time_signature();

        let mut flags = NANOS_VALID | PPQ_POS_VALID | TEMPO_VALID | BARS_VALID | TIME_SIG_VALID;
        if transport.playing() {
            flags |= TRANSPORT_PLAYING;
        }
        if transport.playing_changed() {
            flags |= TRANSPORT_CHANGED;
        }

        Some(api::TimeInfo {
            sample_pos: transport.current_samples() as f64,
            sample_rate: self.sample_rate.get() as f64,
            nanoseconds: transport.process_time_ns() as f64,
            ppq_pos: transport.current_beats(),
            tempo: transport.tempo() as f64,
            bar_start_pos: transport.current_bar_start_beats(),
            time_sig_numerator: signature.numerator as i32,
            time_sig_denominator: signature.denominator as i32,
            flags,
            ..Default::default()
        })
    }
}

pub struct Vst2Wrapper {
    data: ProcessorData,
    path: PathBuf,
    instance: Option<PluginInstance>,
    params: Option<Arc<dyn PluginParameters>>,
    host: Arc<Mutex<Vst2Host>>,
    param_rx: Receiver<(i32, f32)>,
    midi_rx: Receiver<api::MidiEvent>,
    bypass: BypassManager,
    can_do_soft_bypass: bool,
    double_mono_input: bool,
    staged_midi: Vec<api::MidiEvent>,
    event_block: Box<EventBlock>,
    silent: SampleBuffer,
    discard: SampleBuffer,
    input_ptrs: Vec<*const f32>,
    output_ptrs: Vec<*mut f32>,
    program_count: usize,
    transport_published: bool,
    sample_rate: f32,
}

// Raw pointer scratch and the plugin instance are only touched by the
// thread currently owning the wrapper; ownership moves at block boundaries.
unsafe impl Send for Vst2Wrapper {}

impl Vst2Wrapper {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let (param_tx, param_rx) = crossbeam_channel::bounded(256);
        let (midi_tx, midi_rx) = crossbeam_channel::bounded(MAX_VST_EVENTS);
        let host = Arc::new(Mutex::new(Vst2Host {
            param_tx,
            midi_tx,
            transport: ArcSwapOption::empty(),
            sample_rate: AtomicFloat::new(44100.0),
        }));
        Self {
            data: ProcessorData::new("VST 2.x plugin", 0, 0),
            path: path.into(),
            instance: None,
            params: None,
            host,
            param_rx,
            midi_rx,
            bypass: BypassManager::new(),
            can_do_soft_bypass: false,
            double_mono_input: false,
            staged_midi: Vec::with_capacity(MAX_VST_EVENTS),
            event_block: Box::new(EventBlock::new()),
            silent: SampleBuffer::new(1),
            discard: SampleBuffer::new(1),
            input_ptrs: Vec::new(),
            output_ptrs: Vec::new(),
            program_count: 0,
            transport_published: false,
            sample_rate: 44100.0,
        }
    }

    fn register_parameters(
        &mut self,
        params: &Arc<dyn PluginParameters>,
        count: i32,
    ) -> Result<(), ProcessorError> {
        for index in 0..count.max(0) {
            let name = params.get_parameter_name(index);
            let unit = params.get_parameter_label(index);
            let default = params.get_parameter(index).clamp(0.0, 1.0);
            let registered = self
                .data
                .parameters
                .register_float(&name, &name, &unit, 0.0, 1.0, default);
            match registered {
                Ok(_) => {}
                Err(_) => {
                    // Hosted plugins repeat names; suffix with the index.
                    let unique = format!("{} {}", name, index);
                    self.data
                        .parameters
                        .register_float(&unique, &name, &unit, 0.0, 1.0, default)
                        .map_err(|e| ProcessorError::Parameter(e.to_string()))?;
                }
            }
            tracing::debug!(plugin = self.data.name(), parameter = %name, "registered parameter");
        }
        Ok(())
    }

    fn stage_midi(&mut self, event: &RtEvent) {
        if self.staged_midi.len() >= MAX_VST_EVENTS {
            return;
        }
        if let Some(midi) = midi_event_from_rt(event) {
            self.staged_midi.push(midi);
        }
    }

    fn deliver_staged_midi(&mut self) {
        if self.staged_midi.is_empty() {
            return;
        }
        let block = self.event_block.as_mut();
        for (slot, event) in self.staged_midi.iter_mut().enumerate() {
            block.events[slot] = event as *mut api::MidiEvent as *mut api::Event;
        }
        block.num_events = self.staged_midi.len() as i32;
        if let Some(instance) = self.instance.as_mut() {
            let events = block as *const EventBlock as *const api::Events;
            instance.process_events(unsafe { &*events });
        }
        self.staged_midi.clear();
    }

    /// Wire the plugin's expected channel count to the engine buffers,
    /// feeding unused inputs silence and sinking unused outputs.
    fn map_audio_buffers(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        self.input_ptrs.clear();
        self.output_ptrs.clear();
        let current_inputs = self.data.input_channels().min(input.channel_count());
        let current_outputs = self.data.output_channels().min(output.channel_count());

        if self.double_mono_input && input.channel_count() > 0 {
            self.input_ptrs.push(input.channel(0).as_ptr());
            self.input_ptrs.push(input.channel(0).as_ptr());
        } else {
            for channel in 0..current_inputs {
                self.input_ptrs.push(input.channel(channel).as_ptr());
            }
        }
        while self.input_ptrs.len() < self.data.max_input_channels() {
            self.input_ptrs.push(self.silent.channel(0).as_ptr());
        }

        for channel in 0..current_outputs {
            self.output_ptrs.push(output.channel_mut(channel).as_mut_ptr());
        }
        while self.output_ptrs.len() < self.data.max_output_channels() {
            self.output_ptrs.push(self.discard.channel_mut(0).as_mut_ptr());
        }
    }

    fn update_mono_mode(&mut self) {
        self.double_mono_input =
            self.data.input_channels() == 1 && self.data.max_input_channels() == 2;
    }

    fn drain_plugin_feedback(&mut self) {
        let own_id = self.data.id();
        while let Ok((index, value)) = self.param_rx.try_recv() {
            if index < 0 {
                continue;
            }
            if let Some(cell) = self.data.parameters.value(index as u32) {
                cell.set(value);
                self.data.output_event(RtEvent::float_parameter_change(
                    own_id,
                    0,
                    index as u32,
                    value,
                ));
            }
        }
        while let Ok(midi) = self.midi_rx.try_recv() {
            let offset = midi.delta_frames.max(0) as u32;
            self.data
                .output_event(RtEvent::wrapped_midi(own_id, offset, &midi.midi_data));
        }
    }
}

fn midi_event_from_rt(event: &RtEvent) -> Option<api::MidiEvent> {
    let to_7bit = |value: f32| (value.clamp(0.0, 1.0) * 127.0).round() as u8;
    let data = match event.data {
        RtEventData::NoteOn {
            channel,
            note,
            velocity,
        } => [0x90 | (channel & 0x0F), note, to_7bit(velocity)],
        RtEventData::NoteOff {
            channel,
            note,
            velocity,
        } => [0x80 | (channel & 0x0F), note, to_7bit(velocity)],
        RtEventData::NoteAftertouch {
            channel,
            note,
            value,
        } => [0xA0 | (channel & 0x0F), note, to_7bit(value)],
        RtEventData::Modulation { channel, value } => [0xB0 | (channel & 0x0F), 1, to_7bit(value)],
        RtEventData::Aftertouch { channel, value } => [0xD0 | (channel & 0x0F), to_7bit(value), 0],
        RtEventData::PitchBend { channel, value } => {
            let raw = (((value.clamp(-1.0, 1.0) + 1.0) * 8192.0) as u16).min(16383);
            [
                0xE0 | (channel & 0x0F),
                (raw & 0x7F) as u8,
                (raw >> 7) as u8,
            ]
        }
        RtEventData::WrappedMidi { bytes, .. } => [bytes[0], bytes[1], bytes[2]],
        _ => return None,
    };
    Some(api::MidiEvent {
        event_type: api::EventType::Midi,
        byte_size: std::mem::size_of::<api::MidiEvent>() as i32,
        delta_frames: event.sample_offset as i32,
        flags: api::MidiEventFlags::REALTIME_EVENT.bits(),
        note_length: 0,
        note_offset: 0,
        midi_data: data,
        _midi_reserved: 0,
        detune: 0,
        note_off_velocity: 0,
        _reserved1: 0,
        _reserved2: 0,
    })
}

impl Processor for Vst2Wrapper {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> Result<(), ProcessorError> {
        self.sample_rate = sample_rate;
        self.host
            .lock()
            .map_err(|_| ProcessorError::Other("host poisoned".to_string()))?
            .sample_rate
            .set(sample_rate);

        let mut loader =
            PluginLoader::load(&self.path, Arc::clone(&self.host)).map_err(|e| {
                ProcessorError::SharedLibraryOpening(format!(
                    "{}: {:?}",
                    self.path.display(),
                    e
                ))
            })?;
        let mut instance = loader.instance().map_err(|e| {
            ProcessorError::EntryPointNotFound(format!("{}: {:?}", self.path.display(), e))
        })?;

        instance.init();
        instance.set_sample_rate(sample_rate);
        instance.set_block_size(BLOCK_SIZE as i64);

        let info = instance.get_info();
        if self.data.name().is_empty() {
            self.data.set_name(&info.name);
        }
        self.data.set_label(&info.name);
        self.data
            .set_max_channels(info.inputs.max(0) as usize, info.outputs.max(0) as usize);
        self.update_mono_mode();

        self.can_do_soft_bypass = matches!(instance.can_do(CanDo::Bypass), vst::api::Supported::Yes);
        if self.can_do_soft_bypass {
            tracing::info!(plugin = %info.name, "plugin reports a soft bypass");
        }
        self.program_count = info.presets.max(0) as usize;

        let params = instance.get_parameter_object();
        self.register_parameters(&params, info.parameters)?;

        self.params = Some(params);
        self.instance = Some(instance);
        tracing::info!(plugin = %info.name, path = %self.path.display(), "vst2 plugin ready");
        Ok(())
    }

    fn configure(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        if let Ok(host) = self.host.lock() {
            host.sample_rate.set(sample_rate);
        }
        if let Some(instance) = self.instance.as_mut() {
            let was_enabled = self.data.enabled();
            if was_enabled {
                instance.suspend();
            }
            instance.set_sample_rate(sample_rate);
            if was_enabled {
                instance.resume();
            }
        }
    }

    fn process_event(&mut self, event: RtEvent) {
        match event.data {
            RtEventData::FloatParameterChange {
                parameter_id,
                value,
            } => {
                let value = value.clamp(0.0, 1.0);
                if let Some(params) = self.params.as_ref() {
                    params.set_parameter(parameter_id as i32, value);
                }
                if let Some(cell) = self.data.parameters.value(parameter_id) {
                    cell.set(value);
                }
            }
            RtEventData::SetBypass { bypassed } => {
                self.data.set_bypassed(bypassed);
                self.bypass.set_bypass(bypassed, self.sample_rate);
            }
            RtEventData::ProgramChange { program, .. } => {
                if self.program_count > 0 {
                    if let Some(params) = self.params.as_ref() {
                        params.change_preset(program as i32);
                    }
                    self.data
                        .current_program_cell()
                        .store(program as u32, std::sync::atomic::Ordering::Release);
                }
            }
            _ if event.is_keyboard_event() => self.stage_midi(&event),
            _ => {}
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let inputs = self.data.input_channels();
        let outputs = self.data.output_channels();

        if !self.bypass.should_process() {
            bypass_mapping(input, output, inputs, outputs);
            self.staged_midi.clear();
            return;
        }

        if !self.transport_published {
            if let Some(transport) = self.data.transport() {
                if let Ok(host) = self.host.lock() {
                    host.transport.store(Some(Arc::clone(transport)));
                    self.transport_published = true;
                }
            }
        }

        self.deliver_staged_midi();
        self.map_audio_buffers(input, output);
        if let Some(instance) = self.instance.as_mut() {
            let mut buffer = unsafe {
                vst::buffer::AudioBuffer::from_raw(
                    self.input_ptrs.len(),
                    self.output_ptrs.len(),
                    self.input_ptrs.as_ptr(),
                    self.output_ptrs.as_mut_ptr(),
                    BLOCK_SIZE,
                )
            };
            instance.process(&mut buffer);
        }
        self.drain_plugin_feedback();

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

    fn set_enabled(&mut self, enabled: bool) {
        self.data.set_enabled(enabled);
        if let Some(instance) = self.instance.as_mut() {
            if enabled {
                instance.resume();
            } else {
                instance.suspend();
            }
        }
    }

    fn supports_programs(&self) -> bool {
        self.program_count > 0
    }

    fn program_count(&self) -> usize {
        self.program_count
    }

    fn current_program(&self) -> usize {
        self.params
            .as_ref()
            .map(|p| p.get_preset_num().max(0) as usize)
            .unwrap_or(0)
    }

    fn current_program_name(&self) -> Result<String, ProcessorError> {
        if !self.supports_programs() {
            return Err(ProcessorError::UnsupportedOperation);
        }
        let params = self
            .params
            .as_ref()
            .ok_or(ProcessorError::UnsupportedOperation)?;
        Ok(params.get_preset_name(params.get_preset_num()))
    }

    fn program_name(&self, program: usize) -> Result<String, ProcessorError> {
        if !self.supports_programs() {
            return Err(ProcessorError::UnsupportedOperation);
        }
        let params = self
            .params
            .as_ref()
            .ok_or(ProcessorError::UnsupportedOperation)?;
        if program >= self.program_count {
            return Err(ProcessorError::ParameterNotFound(program as u32));
        }
        Ok(params.get_preset_name(program as i32))
    }

    fn all_program_names(&self) -> Result<Vec<String>, ProcessorError> {
        if !self.supports_programs() {
            return Err(ProcessorError::UnsupportedOperation);
        }
        (0..self.program_count)
            .map(|program| self.program_name(program))
            .collect()
    }

    fn set_program(&mut self, program: usize) -> Result<(), ProcessorError> {
        if !self.supports_programs() || program >= self.program_count {
            return Err(ProcessorError::UnsupportedOperation);
        }
        if let Some(params) = self.params.as_ref() {
            params.change_preset(program as i32);
        }
        Ok(())
    }
}

impl Drop for Vst2Wrapper {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.as_mut() {
            instance.suspend();
        }
        tracing::debug!(plugin = self.data.name(), "unloading vst2 plugin");
    }
}
