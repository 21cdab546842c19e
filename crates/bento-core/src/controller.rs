//! Control-side surface of the engine.
//!
//! The [`EngineController`] is the non-RT counterpart of
//! [`AudioEngine`](crate::engine::AudioEngine): it owns the
//! [`ProcessorContainer`], prepares graph edits as commands, and posts
//! everything event-shaped through the dispatcher so the engine input ring
//! keeps its single producer.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::engine::{
    AudioEngine, GraphCommand, ProcessTimings, Reclaimed, TimingSnapshot, MAX_ENGINE_CHANNELS,
    MAX_TRACKS,
};
use crate::error::{EngineError, ProcessorError};
use crate::event::{ObjectId, RtEvent};
use crate::event_dispatcher::Event;
use crate::processor::{AsyncWorkHandler, Processor, ProcessorContainer, ProcessorRecord};
use crate::queue::{rt_event_queue, rt_output_queue, RtEventReceiver, RtEventSender, RT_EVENT_QUEUE_CAPACITY};
use crate::track::{AudioConnection, Track, MAX_TRACK_CHANNELS};
use crate::transport::{SharedTransport, SyncMode, TimeSignature};

/// Queue ends produced alongside the engine, wired into the event
/// dispatcher by the host.
pub struct EngineQueues {
    pub rt_sender: RtEventSender,
    pub output_receiver: RtEventReceiver,
    pub reclaim_receiver: Receiver<Reclaimed>,
}

/// Build an engine with its controller and the dispatcher-facing queue ends.
pub fn engine_with_controller(sample_rate: f32) -> (AudioEngine, EngineController, EngineQueues) {
    let (rt_sender, rt_receiver) = rt_event_queue(RT_EVENT_QUEUE_CAPACITY);
    let (output_sender, output_receiver) = rt_output_queue(RT_EVENT_QUEUE_CAPACITY);
    let (command_sender, command_receiver) = crossbeam_channel::bounded(64);
    let (reclaim_sender, reclaim_receiver) = crossbeam_channel::bounded(64);

    let engine = AudioEngine::new(
        sample_rate,
        rt_receiver,
        output_sender,
        command_receiver,
        reclaim_sender,
    );
    let controller = EngineController {
        container: ProcessorContainer::new(),
        commands: command_sender,
        transport: engine.transport().shared(),
        timings: engine.timings(),
        event_sink: Mutex::new(None),
        sync_mode: AtomicU8::new(SyncMode::Internal as u8),
        input_channels: AtomicUsize::new(MAX_ENGINE_CHANNELS),
        output_channels: AtomicUsize::new(MAX_ENGINE_CHANNELS),
        osc_outputs: Mutex::new(Vec::new()),
        cv_routes: Mutex::new(Vec::new()),
        gate_routes: Mutex::new(Vec::new()),
    };
    let queues = EngineQueues {
        rt_sender,
        output_receiver,
        reclaim_receiver,
    };
    (engine, controller, queues)
}

/// A control-voltage or gate binding. Port layers are owned by frontends;
/// the engine only keeps the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvGateRoute {
    pub port: usize,
    pub processor: ObjectId,
    /// Parameter for CV routes, MIDI channel for gate routes.
    pub target: ObjectId,
}

pub struct EngineController {
    container: ProcessorContainer,
    commands: Sender<GraphCommand>,
    transport: Arc<SharedTransport>,
    timings: Arc<ProcessTimings>,
    event_sink: Mutex<Option<Sender<Event>>>,
    sync_mode: AtomicU8,
    input_channels: AtomicUsize,
    output_channels: AtomicUsize,
    osc_outputs: Mutex<Vec<(ObjectId, ObjectId)>>,
    cv_routes: Mutex<Vec<CvGateRoute>>,
    gate_routes: Mutex<Vec<CvGateRoute>>,
}

impl EngineController {
    pub fn container(&self) -> &ProcessorContainer {
        &self.container
    }

    /// Wire the dispatcher's inbox in; done once by the host at startup.
    pub fn connect_event_sink(&self, sink: Sender<Event>) {
        *self.event_sink.lock() = Some(sink);
    }

    pub fn post_event(&self, event: Event) -> Result<(), EngineError> {
        let sink = self.event_sink.lock();
        let sink = sink
            .as_ref()
            .ok_or_else(|| EngineError::Other("event dispatcher not connected".to_string()))?;
        sink.send(event)
            .map_err(|_| EngineError::Other("event dispatcher stopped".to_string()))
    }

    fn send_command(&self, command: GraphCommand) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::Other("audio engine stopped".to_string()))
    }

    // ---- audio configuration -------------------------------------------

    pub fn sample_rate(&self) -> f32 {
        self.transport.sample_rate()
    }

    pub fn set_sample_rate(&self, sample_rate: f32) -> Result<(), EngineError> {
        if !(8000.0..=384000.0).contains(&sample_rate) {
            return Err(EngineError::Other(format!(
                "sample rate {} out of range",
                sample_rate
            )));
        }
        self.send_command(GraphCommand::SetSampleRate(sample_rate))
    }

    /// Channel counts of the engine-wide buffers, as configured by the
    /// audio frontend.
    pub fn set_audio_channels(&self, inputs: usize, outputs: usize) -> Result<(), EngineError> {
        if inputs > MAX_ENGINE_CHANNELS || outputs > MAX_ENGINE_CHANNELS {
            return Err(EngineError::InvalidChannelCount(inputs.max(outputs)));
        }
        self.input_channels.store(inputs, Ordering::Relaxed);
        self.output_channels.store(outputs, Ordering::Relaxed);
        Ok(())
    }

    pub fn audio_channels(&self) -> (usize, usize) {
        (
            self.input_channels.load(Ordering::Relaxed),
            self.output_channels.load(Ordering::Relaxed),
        )
    }

    // ---- transport ------------------------------------------------------

    pub fn tempo(&self) -> f32 {
        self.transport.tempo()
    }

    pub fn set_tempo(&self, bpm: f32) -> Result<(), EngineError> {
        self.post_event(Event::Engine(RtEvent::tempo(bpm)))
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.transport.time_signature()
    }

    pub fn set_time_signature(&self, signature: TimeSignature) -> Result<(), EngineError> {
        if signature.numerator == 0 || signature.denominator == 0 {
            return Err(EngineError::Other("invalid time signature".to_string()));
        }
        self.post_event(Event::Engine(RtEvent::time_signature(
            signature.numerator as u8,
            signature.denominator as u8,
        )))
    }

    pub fn playing(&self) -> bool {
        self.transport.playing()
    }

    pub fn set_playing(&self, playing: bool) -> Result<(), EngineError> {
        self.post_event(Event::Engine(RtEvent::set_playing(playing)))
    }

    pub fn sync_mode(&self) -> SyncMode {
        match self.sync_mode.load(Ordering::Relaxed) {
            1 => SyncMode::Midi,
            2 => SyncMode::Link,
            _ => SyncMode::Internal,
        }
    }

    pub fn set_sync_mode(&self, mode: SyncMode) {
        self.sync_mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn shared_transport(&self) -> Arc<SharedTransport> {
        Arc::clone(&self.transport)
    }

    // ---- timing statistics ---------------------------------------------

    pub fn timings(&self) -> TimingSnapshot {
        self.timings.snapshot()
    }

    pub fn reset_timings(&self) {
        self.timings.reset();
    }

    // ---- track management ----------------------------------------------

    pub fn create_track(&self, name: &str, channels: usize) -> Result<ObjectId, EngineError> {
        if channels == 0 || channels > MAX_TRACK_CHANNELS {
            return Err(EngineError::InvalidChannelCount(channels));
        }
        self.install_track(Track::new(name, channels))
    }

    pub fn create_multibus_track(&self, name: &str, buses: usize) -> Result<ObjectId, EngineError> {
        if buses == 0 || buses * 2 > MAX_TRACK_CHANNELS {
            return Err(EngineError::InvalidChannelCount(buses * 2));
        }
        self.install_track(Track::with_buses(name, buses))
    }

    fn install_track(&self, mut track: Track) -> Result<ObjectId, EngineError> {
        if self.container.tracks().len() >= MAX_TRACKS {
            return Err(EngineError::Other("track limit reached".to_string()));
        }
        track
            .init(self.sample_rate())
            .map_err(|e| EngineError::Other(e.to_string()))?;
        track.set_enabled(true);
        track.data_mut().set_transport(Arc::clone(&self.transport));
        let id = self.container.register(&mut track, true, None)?;
        self.send_command(GraphCommand::AddTrack(Box::new(track)))?;
        let _ = self.post_event(Event::Notify(
            crate::event_dispatcher::Notification::ProcessorUpdate { processor: id },
        ));
        tracing::info!(track = id, "created track");
        Ok(id)
    }

    pub fn delete_track(&self, name: &str) -> Result<(), EngineError> {
        let record = self.track_record(name)?;
        for processor in self.container.processors_on_track(record.id) {
            self.send_command(GraphCommand::RemoveProcessor {
                track: record.id,
                processor: processor.id,
            })?;
        }
        self.send_command(GraphCommand::RemoveTrack(record.id))?;
        tracing::info!(track = record.id, "deleted track");
        Ok(())
    }

    fn track_record(&self, name: &str) -> Result<ProcessorRecord, EngineError> {
        self.container
            .record_by_name(name)
            .filter(|r| r.is_track)
            .ok_or_else(|| EngineError::InvalidTrackName(name.to_string()))
    }

    pub fn tracks(&self) -> Vec<ProcessorRecord> {
        self.container.tracks()
    }

    pub fn processors_on_track(&self, track: ObjectId) -> Vec<ProcessorRecord> {
        self.container.processors_on_track(track)
    }

    pub fn rename_processor(&self, id: ObjectId, new_name: &str) -> Result<(), EngineError> {
        self.container.rename(id, new_name)
    }

    // ---- processor management ------------------------------------------

    /// Publish an already-constructed processor onto a track. The processor
    /// must carry its name; init, channel setup and registration happen
    /// here.
    pub fn add_processor_to_track(
        &self,
        mut processor: Box<dyn Processor>,
        track_name: &str,
        async_handler: Option<Arc<dyn AsyncWorkHandler>>,
    ) -> Result<ObjectId, EngineError> {
        let track = self.track_record(track_name)?;
        processor
            .init(self.sample_rate())
            .map_err(|e| map_processor_error(&e, processor.data().name()))?;

        let data = processor.data();
        let inputs = track.channels.min(data.max_input_channels());
        let outputs = track.channels.min(data.max_output_channels());
        processor.set_input_channels(inputs);
        processor.set_output_channels(outputs);
        processor.set_enabled(true);
        processor
            .data_mut()
            .set_transport(Arc::clone(&self.transport));

        let id = self
            .container
            .register(processor.as_mut(), false, async_handler)?;
        self.container.set_track_membership(id, Some(track.id));
        self.send_command(GraphCommand::AddProcessor {
            track: track.id,
            processor,
        })?;
        let _ = self.post_event(Event::Notify(
            crate::event_dispatcher::Notification::ProcessorUpdate { processor: id },
        ));
        tracing::info!(processor = id, track = track.id, "added processor");
        Ok(id)
    }

    pub fn remove_processor_from_track(
        &self,
        processor_name: &str,
        track_name: &str,
    ) -> Result<(), EngineError> {
        let track = self.track_record(track_name)?;
        let processor = self
            .container
            .record_by_name(processor_name)
            .filter(|r| r.track == Some(track.id))
            .ok_or_else(|| EngineError::InvalidProcessor(processor_name.to_string()))?;
        self.container.set_track_membership(processor.id, None);
        self.send_command(GraphCommand::RemoveProcessor {
            track: track.id,
            processor: processor.id,
        })
    }

    pub fn move_processor(
        &self,
        processor_name: &str,
        from_track: &str,
        to_track: &str,
    ) -> Result<(), EngineError> {
        let from = self.track_record(from_track)?;
        let to = self.track_record(to_track)?;
        let processor = self
            .container
            .record_by_name(processor_name)
            .filter(|r| r.track == Some(from.id))
            .ok_or_else(|| EngineError::InvalidProcessor(processor_name.to_string()))?;
        self.container.set_track_membership(processor.id, Some(to.id));
        self.send_command(GraphCommand::MoveProcessor {
            from: from.id,
            to: to.id,
            processor: processor.id,
        })
    }

    pub fn set_processor_bypass(&self, id: ObjectId, bypassed: bool) -> Result<(), EngineError> {
        self.post_event(Event::Engine(RtEvent::set_bypass(id, 0, bypassed)))
    }

    pub fn set_processor_property(
        &self,
        id: ObjectId,
        property: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        let record = self
            .container
            .record(id)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", id)))?;
        let handler = record
            .async_handler
            .ok_or_else(|| EngineError::InvalidParameter(property.to_string()))?;
        handler
            .set_property(property, value)
            .map_err(|e| EngineError::InvalidParameter(e.to_string()))?;
        self.post_event(Event::AsyncWork { processor: id })
    }

    // ---- audio routing --------------------------------------------------

    pub fn connect_audio_input_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> Result<(), EngineError> {
        self.connect(
            track_name,
            AudioConnection::Channel {
                engine: engine_channel,
                track: track_channel,
            },
            true,
        )
    }

    pub fn connect_audio_output_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> Result<(), EngineError> {
        self.connect(
            track_name,
            AudioConnection::Channel {
                engine: engine_channel,
                track: track_channel,
            },
            false,
        )
    }

    pub fn connect_audio_input_bus(
        &self,
        engine_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> Result<(), EngineError> {
        self.connect(
            track_name,
            AudioConnection::Bus {
                engine: engine_bus,
                track: track_bus,
            },
            true,
        )
    }

    pub fn connect_audio_output_bus(
        &self,
        engine_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> Result<(), EngineError> {
        self.connect(
            track_name,
            AudioConnection::Bus {
                engine: engine_bus,
                track: track_bus,
            },
            false,
        )
    }

    fn connect(
        &self,
        track_name: &str,
        connection: AudioConnection,
        input: bool,
    ) -> Result<(), EngineError> {
        let record = self.track_record(track_name)?;
        let engine_channels = if input {
            self.input_channels.load(Ordering::Relaxed)
        } else {
            self.output_channels.load(Ordering::Relaxed)
        };
        let valid = match connection {
            AudioConnection::Channel { engine, track } => {
                engine < engine_channels && track < record.channels
            }
            AudioConnection::Bus { engine, track } => {
                (engine + 1) * 2 <= engine_channels && (track + 1) * 2 <= record.channels
            }
        };
        if !valid {
            return Err(EngineError::InvalidChannelCount(record.channels));
        }
        self.send_command(if input {
            GraphCommand::AddInputConnection {
                track: record.id,
                connection,
            }
        } else {
            GraphCommand::AddOutputConnection {
                track: record.id,
                connection,
            }
        })
    }

    pub fn disconnect_audio_input(
        &self,
        track_name: &str,
        connection: AudioConnection,
    ) -> Result<(), EngineError> {
        let record = self.track_record(track_name)?;
        self.send_command(GraphCommand::RemoveInputConnection {
            track: record.id,
            connection,
        })
    }

    pub fn disconnect_audio_output(
        &self,
        track_name: &str,
        connection: AudioConnection,
    ) -> Result<(), EngineError> {
        let record = self.track_record(track_name)?;
        self.send_command(GraphCommand::RemoveOutputConnection {
            track: record.id,
            connection,
        })
    }

    // ---- parameters -----------------------------------------------------

    pub fn parameter_value(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
    ) -> Result<f32, EngineError> {
        let record = self
            .container
            .record(processor)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", processor)))?;
        record
            .values
            .get(parameter as usize)
            .map(|v| v.normalized_value())
            .ok_or_else(|| EngineError::InvalidParameter(format!("id {}", parameter)))
    }

    pub fn parameter_value_in_domain(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
    ) -> Result<f32, EngineError> {
        let record = self
            .container
            .record(processor)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", processor)))?;
        record
            .values
            .get(parameter as usize)
            .map(|v| v.domain_value())
            .ok_or_else(|| EngineError::InvalidParameter(format!("id {}", parameter)))
    }

    /// Set from a normalised [0, 1] value; converted with the parameter's
    /// range and delivered sample-accurately through the engine queue.
    pub fn set_parameter_value(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
        normalized: f32,
    ) -> Result<(), EngineError> {
        let record = self
            .container
            .record(processor)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", processor)))?;
        let value = record
            .values
            .get(parameter as usize)
            .map(|v| v.range().denormalize(normalized))
            .ok_or_else(|| EngineError::InvalidParameter(format!("id {}", parameter)))?;
        self.post_event(Event::Engine(RtEvent::float_parameter_change(
            processor, 0, parameter, value,
        )))
    }

    pub fn set_parameter_value_in_domain(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
        value: f32,
    ) -> Result<(), EngineError> {
        let record = self
            .container
            .record(processor)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", processor)))?;
        if record.values.get(parameter as usize).is_none() {
            return Err(EngineError::InvalidParameter(format!("id {}", parameter)));
        }
        self.post_event(Event::Engine(RtEvent::float_parameter_change(
            processor, 0, parameter, value,
        )))
    }

    pub fn parameter_descriptors(
        &self,
        processor: ObjectId,
    ) -> Result<Vec<crate::parameter::ParameterDescriptor>, EngineError> {
        self.container
            .record(processor)
            .map(|r| r.parameters)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", processor)))
    }

    // ---- programs -------------------------------------------------------

    pub fn program_names(&self, processor: ObjectId) -> Result<Vec<String>, EngineError> {
        let record = self
            .container
            .record(processor)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", processor)))?;
        if record.programs.is_empty() {
            return Err(EngineError::Other("programs not supported".to_string()));
        }
        Ok(record.programs)
    }

    pub fn current_program(&self, processor: ObjectId) -> Result<usize, EngineError> {
        let record = self
            .container
            .record(processor)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", processor)))?;
        Ok(record.current_program.load(Ordering::Acquire) as usize)
    }

    pub fn set_program(&self, processor: ObjectId, program: usize) -> Result<(), EngineError> {
        let record = self
            .container
            .record(processor)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", processor)))?;
        if record.programs.is_empty() || program >= record.programs.len() {
            return Err(EngineError::InvalidParameter(format!(
                "program {}",
                program
            )));
        }
        self.post_event(Event::Engine(RtEvent::program_change(
            processor,
            0,
            0,
            program as u8,
        )))
    }

    // ---- keyboard -------------------------------------------------------

    pub fn note_on(
        &self,
        track: ObjectId,
        channel: u8,
        note: u8,
        velocity: f32,
    ) -> Result<(), EngineError> {
        self.post_event(Event::Engine(RtEvent::note_on(
            track, 0, channel, note, velocity,
        )))
    }

    pub fn note_off(
        &self,
        track: ObjectId,
        channel: u8,
        note: u8,
        velocity: f32,
    ) -> Result<(), EngineError> {
        self.post_event(Event::Engine(RtEvent::note_off(
            track, 0, channel, note, velocity,
        )))
    }

    pub fn note_aftertouch(
        &self,
        track: ObjectId,
        channel: u8,
        note: u8,
        value: f32,
    ) -> Result<(), EngineError> {
        self.post_event(Event::Engine(RtEvent::note_aftertouch(
            track, 0, channel, note, value,
        )))
    }

    pub fn pitch_bend(&self, track: ObjectId, channel: u8, value: f32) -> Result<(), EngineError> {
        self.post_event(Event::Engine(RtEvent::pitch_bend(track, 0, channel, value)))
    }

    pub fn modulation(&self, track: ObjectId, channel: u8, value: f32) -> Result<(), EngineError> {
        self.post_event(Event::Engine(RtEvent::modulation(track, 0, channel, value)))
    }

    // ---- OSC and CV/Gate route tables -----------------------------------

    fn check_parameter(&self, processor: ObjectId, parameter: ObjectId) -> Result<(), EngineError> {
        let record = self
            .container
            .record(processor)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", processor)))?;
        if record.parameters.get(parameter as usize).is_none() {
            return Err(EngineError::InvalidParameter(format!("id {}", parameter)));
        }
        Ok(())
    }

    /// Mark a parameter for OSC output; the OSC bridge polls this table.
    pub fn enable_osc_output(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
    ) -> Result<(), EngineError> {
        self.check_parameter(processor, parameter)?;
        let mut outputs = self.osc_outputs.lock();
        if !outputs.contains(&(processor, parameter)) {
            outputs.push((processor, parameter));
        }
        Ok(())
    }

    pub fn disable_osc_output(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
    ) -> Result<(), EngineError> {
        self.osc_outputs.lock().retain(|r| *r != (processor, parameter));
        Ok(())
    }

    pub fn osc_outputs(&self) -> Vec<(ObjectId, ObjectId)> {
        self.osc_outputs.lock().clone()
    }

    pub fn connect_cv_input(
        &self,
        port: usize,
        processor: ObjectId,
        parameter: ObjectId,
    ) -> Result<(), EngineError> {
        self.check_parameter(processor, parameter)?;
        self.cv_routes.lock().push(CvGateRoute {
            port,
            processor,
            target: parameter,
        });
        Ok(())
    }

    pub fn connect_gate_input(
        &self,
        port: usize,
        processor: ObjectId,
        channel: u8,
    ) -> Result<(), EngineError> {
        if self.container.record(processor).is_none() {
            return Err(EngineError::InvalidProcessor(format!("id {}", processor)));
        }
        self.gate_routes.lock().push(CvGateRoute {
            port,
            processor,
            target: channel as ObjectId,
        });
        Ok(())
    }

    pub fn cv_routes(&self) -> Vec<CvGateRoute> {
        self.cv_routes.lock().clone()
    }

    pub fn gate_routes(&self) -> Vec<CvGateRoute> {
        self.gate_routes.lock().clone()
    }
}

fn map_processor_error(error: &ProcessorError, name: &str) -> EngineError {
    match error {
        ProcessorError::SharedLibraryOpening(_)
        | ProcessorError::EntryPointNotFound(_)
        | ProcessorError::PluginLoad(_)
        | ProcessorError::PluginInit(_) => EngineError::InvalidPluginUid(name.to_string()),
        other => EngineError::Other(other.to_string()),
    }
}
