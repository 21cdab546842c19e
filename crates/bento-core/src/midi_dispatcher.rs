//! Routing between raw MIDI and engine events.
//!
//! Inbound frames are decoded once, then posted to the OMNI route list and
//! the specific-channel route list, in that order. A subscriber present in
//! both lists receives two events; the duplication is intentional and
//! matches the routing tables' contract. Outbound keyboard events from
//! processors with a registered output route are encoded back to MIDI bytes
//! and handed to the MIDI frontend.
//!
//! Route management is control-side and lock-guarded; `process_midi` runs
//! on the MIDI I/O thread and only reads.

#[cfg(test)]
use std::sync::Arc;

use crossbeam_channel::Sender;
use midi_msg::{Channel, ChannelVoiceMsg, MidiMsg};
use parking_lot::{Mutex, RwLock};

use crate::error::MidiDispatcherError;
use crate::event::{ObjectId, RtEvent, RtEventData};
use crate::event_dispatcher::Event;
use crate::processor::ProcessorContainer;

/// Slot index used for routes that match any channel.
const OMNI_SLOT: usize = 16;

/// Accepts outbound MIDI frames; implemented by the host's MIDI backend.
pub trait MidiFrontend: Send {
    fn send_midi(&mut self, port: usize, data: &[u8], timestamp_ns: u64);
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct InputConnection {
    target: ObjectId,
    parameter: ObjectId,
    min: f32,
    max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputConnection {
    port: usize,
    channel: u8,
}

type ChannelRoutes = [Vec<InputConnection>; 17];

fn empty_routes() -> ChannelRoutes {
    std::array::from_fn(|_| Vec::new())
}

fn channel_slot(channel: Option<u8>) -> usize {
    channel.map_or(OMNI_SLOT, |c| (c & 0x0F) as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiRouteKind {
    Keyboard,
    ControlChange,
    RawMidi,
    ProgramChange,
    KeyboardOutput,
}

/// Listing entry for the control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiConnectionInfo {
    pub kind: MidiRouteKind,
    pub port: usize,
    pub channel: Option<u8>,
    pub target: ObjectId,
}

#[derive(Default)]
struct RouteTables {
    kb_routes: Vec<(usize, ChannelRoutes)>,
    cc_routes: Vec<(usize, u8, ChannelRoutes)>,
    raw_routes: Vec<(usize, ChannelRoutes)>,
    pc_routes: Vec<(usize, ChannelRoutes)>,
    kb_routes_out: Vec<(ObjectId, Vec<OutputConnection>)>,
}

impl RouteTables {
    fn kb_slot(&mut self, port: usize) -> &mut ChannelRoutes {
        if let Some(index) = self.kb_routes.iter().position(|(p, _)| *p == port) {
            return &mut self.kb_routes[index].1;
        }
        self.kb_routes.push((port, empty_routes()));
        &mut self.kb_routes.last_mut().unwrap().1
    }

    fn cc_slot(&mut self, port: usize, cc: u8) -> &mut ChannelRoutes {
        if let Some(index) = self
            .cc_routes
            .iter()
            .position(|(p, n, _)| *p == port && *n == cc)
        {
            return &mut self.cc_routes[index].2;
        }
        self.cc_routes.push((port, cc, empty_routes()));
        &mut self.cc_routes.last_mut().unwrap().2
    }

    fn raw_slot(&mut self, port: usize) -> &mut ChannelRoutes {
        if let Some(index) = self.raw_routes.iter().position(|(p, _)| *p == port) {
            return &mut self.raw_routes[index].1;
        }
        self.raw_routes.push((port, empty_routes()));
        &mut self.raw_routes.last_mut().unwrap().1
    }

    fn pc_slot(&mut self, port: usize) -> &mut ChannelRoutes {
        if let Some(index) = self.pc_routes.iter().position(|(p, _)| *p == port) {
            return &mut self.pc_routes[index].1;
        }
        self.pc_routes.push((port, empty_routes()));
        &mut self.pc_routes.last_mut().unwrap().1
    }
}

pub struct MidiDispatcher {
    tables: RwLock<RouteTables>,
    container: ProcessorContainer,
    event_sink: Mutex<Option<Sender<Event>>>,
    frontend: Mutex<Option<Box<dyn MidiFrontend>>>,
    midi_inputs: usize,
    midi_outputs: usize,
}

impl MidiDispatcher {
    pub fn new(container: ProcessorContainer, midi_inputs: usize, midi_outputs: usize) -> Self {
        Self {
            tables: RwLock::new(RouteTables::default()),
            container,
            event_sink: Mutex::new(None),
            frontend: Mutex::new(None),
            midi_inputs,
            midi_outputs,
        }
    }

    pub fn connect_event_sink(&self, sink: Sender<Event>) {
        *self.event_sink.lock() = Some(sink);
    }

    pub fn set_frontend(&self, frontend: Box<dyn MidiFrontend>) {
        *self.frontend.lock() = Some(frontend);
    }

    fn check_input(&self, port: usize) -> Result<(), MidiDispatcherError> {
        if port >= self.midi_inputs {
            return Err(MidiDispatcherError::InvalidMidiInput(port));
        }
        Ok(())
    }

    fn check_channel(&self, channel: Option<u8>) -> Result<(), MidiDispatcherError> {
        if let Some(channel) = channel {
            if channel > 15 {
                return Err(MidiDispatcherError::InvalidChannel(channel));
            }
        }
        Ok(())
    }

    fn track_id(&self, track_name: &str) -> Result<ObjectId, MidiDispatcherError> {
        self.container
            .record_by_name(track_name)
            .filter(|r| r.is_track)
            .map(|r| r.id)
            .ok_or_else(|| MidiDispatcherError::InvalidTrackName(track_name.to_string()))
    }

    // ---- route management ----------------------------------------------

    pub fn connect_kb_to_track(
        &self,
        port: usize,
        track_name: &str,
        channel: Option<u8>,
    ) -> Result<(), MidiDispatcherError> {
        self.check_input(port)?;
        self.check_channel(channel)?;
        let target = self.track_id(track_name)?;
        let connection = InputConnection {
            target,
            parameter: 0,
            min: 0.0,
            max: 0.0,
        };
        self.tables.write().kb_slot(port)[channel_slot(channel)].push(connection);
        tracing::debug!(port, track = track_name, "connected keyboard route");
        Ok(())
    }

    pub fn connect_raw_midi_to_track(
        &self,
        port: usize,
        track_name: &str,
        channel: Option<u8>,
    ) -> Result<(), MidiDispatcherError> {
        self.check_input(port)?;
        self.check_channel(channel)?;
        let target = self.track_id(track_name)?;
        let connection = InputConnection {
            target,
            parameter: 0,
            min: 0.0,
            max: 0.0,
        };
        self.tables.write().raw_slot(port)[channel_slot(channel)].push(connection);
        tracing::debug!(port, track = track_name, "connected raw midi route");
        Ok(())
    }

    pub fn connect_cc_to_parameter(
        &self,
        port: usize,
        processor_name: &str,
        parameter_name: &str,
        cc_number: u8,
        min_range: f32,
        max_range: f32,
        channel: Option<u8>,
    ) -> Result<(), MidiDispatcherError> {
        self.check_input(port)?;
        self.check_channel(channel)?;
        let record = self
            .container
            .record_by_name(processor_name)
            .ok_or_else(|| MidiDispatcherError::InvalidProcessor(processor_name.to_string()))?;
        let parameter = record
            .parameters
            .iter()
            .find(|p| p.name == parameter_name)
            .map(|p| p.id)
            .ok_or_else(|| MidiDispatcherError::InvalidParameter(parameter_name.to_string()))?;
        let connection = InputConnection {
            target: record.id,
            parameter,
            min: min_range,
            max: max_range,
        };
        self.tables.write().cc_slot(port, cc_number)[channel_slot(channel)].push(connection);
        tracing::debug!(
            port,
            cc = cc_number,
            processor = processor_name,
            parameter = parameter_name,
            "connected cc route"
        );
        Ok(())
    }

    pub fn connect_pc_to_processor(
        &self,
        port: usize,
        processor_name: &str,
        channel: Option<u8>,
    ) -> Result<(), MidiDispatcherError> {
        self.check_input(port)?;
        self.check_channel(channel)?;
        let record = self
            .container
            .record_by_name(processor_name)
            .ok_or_else(|| MidiDispatcherError::InvalidProcessor(processor_name.to_string()))?;
        let connection = InputConnection {
            target: record.id,
            parameter: 0,
            min: 0.0,
            max: 0.0,
        };
        self.tables.write().pc_slot(port)[channel_slot(channel)].push(connection);
        Ok(())
    }

    pub fn connect_track_to_output(
        &self,
        port: usize,
        track_name: &str,
        channel: u8,
    ) -> Result<(), MidiDispatcherError> {
        if channel > 15 {
            return Err(MidiDispatcherError::InvalidChannel(channel));
        }
        if port >= self.midi_outputs {
            return Err(MidiDispatcherError::InvalidMidiOutput(port));
        }
        let target = self.track_id(track_name)?;
        let mut tables = self.tables.write();
        let connection = OutputConnection { port, channel };
        if let Some((_, connections)) = tables.kb_routes_out.iter_mut().find(|(t, _)| *t == target)
        {
            connections.push(connection);
        } else {
            tables.kb_routes_out.push((target, vec![connection]));
        }
        tracing::debug!(port, track = track_name, channel, "connected output route");
        Ok(())
    }

    pub fn clear_connections(&self) {
        let mut tables = self.tables.write();
        *tables = RouteTables::default();
    }

    pub fn connections(&self) -> Vec<MidiConnectionInfo> {
        let tables = self.tables.read();
        let mut list = Vec::new();
        let collect = |kind: MidiRouteKind,
                       port: usize,
                       routes: &ChannelRoutes,
                       list: &mut Vec<MidiConnectionInfo>| {
            for (slot, connections) in routes.iter().enumerate() {
                let channel = if slot == OMNI_SLOT {
                    None
                } else {
                    Some(slot as u8)
                };
                for connection in connections {
                    list.push(MidiConnectionInfo {
                        kind,
                        port,
                        channel,
                        target: connection.target,
                    });
                }
            }
        };
        for (port, routes) in &tables.kb_routes {
            collect(MidiRouteKind::Keyboard, *port, routes, &mut list);
        }
        for (port, _, routes) in &tables.cc_routes {
            collect(MidiRouteKind::ControlChange, *port, routes, &mut list);
        }
        for (port, routes) in &tables.raw_routes {
            collect(MidiRouteKind::RawMidi, *port, routes, &mut list);
        }
        for (port, routes) in &tables.pc_routes {
            collect(MidiRouteKind::ProgramChange, *port, routes, &mut list);
        }
        for (target, connections) in &tables.kb_routes_out {
            for connection in connections {
                list.push(MidiConnectionInfo {
                    kind: MidiRouteKind::KeyboardOutput,
                    port: connection.port,
                    channel: Some(connection.channel),
                    target: *target,
                });
            }
        }
        list
    }

    // ---- inbound --------------------------------------------------------

    /// Decode one inbound frame and post the resulting events. Called from
    /// the MIDI I/O thread.
    ///
    /// Routing decodes the status byte directly; the tables are keyed by
    /// plain controller numbers, so a note-off disguised as a zero-velocity
    /// note-on stays a note-on, exactly as it arrived.
    pub fn process_midi(&self, port: usize, data: &[u8], timestamp_ns: u64) {
        if data.is_empty() {
            return;
        }
        let status = data[0] & 0xF0;
        let channel = data[0] & 0x0F;
        if status < 0x80 || status == 0xF0 {
            return;
        }
        let _ = timestamp_ns;

        let tables = self.tables.read();

        // Raw routes see every channel-voice message unparsed.
        if let Some((_, routes)) = tables.raw_routes.iter().find(|(p, _)| *p == port) {
            self.post_to_routes(routes, channel, |target| {
                RtEvent::wrapped_midi(target, 0, data)
            });
        }

        let byte = |index: usize| data.get(index).copied().unwrap_or(0);
        match status {
            0x90 => {
                if let Some((_, routes)) = tables.kb_routes.iter().find(|(p, _)| *p == port) {
                    let (note, velocity) = (byte(1), byte(2));
                    self.post_to_routes(routes, channel, |target| {
                        RtEvent::note_on(target, 0, channel, note, velocity as f32 / 127.0)
                    });
                }
            }
            0x80 => {
                if let Some((_, routes)) = tables.kb_routes.iter().find(|(p, _)| *p == port) {
                    let (note, velocity) = (byte(1), byte(2));
                    self.post_to_routes(routes, channel, |target| {
                        RtEvent::note_off(target, 0, channel, note, velocity as f32 / 127.0)
                    });
                }
            }
            0xA0 => {
                if let Some((_, routes)) = tables.kb_routes.iter().find(|(p, _)| *p == port) {
                    let (note, pressure) = (byte(1), byte(2));
                    self.post_to_routes(routes, channel, |target| {
                        RtEvent::note_aftertouch(target, 0, channel, note, pressure as f32 / 127.0)
                    });
                }
            }
            0xD0 => {
                if let Some((_, routes)) = tables.kb_routes.iter().find(|(p, _)| *p == port) {
                    let pressure = byte(1);
                    self.post_to_routes(routes, channel, |target| {
                        RtEvent::aftertouch(target, 0, channel, pressure as f32 / 127.0)
                    });
                }
            }
            0xE0 => {
                if let Some((_, routes)) = tables.kb_routes.iter().find(|(p, _)| *p == port) {
                    let bend = byte(1) as u16 | ((byte(2) as u16) << 7);
                    self.post_to_routes(routes, channel, |target| {
                        RtEvent::pitch_bend(target, 0, channel, (bend as f32 - 8192.0) / 8192.0)
                    });
                }
            }
            0xB0 => {
                let (controller, value) = (byte(1), byte(2));
                if let Some((_, _, routes)) = tables
                    .cc_routes
                    .iter()
                    .find(|(p, n, _)| *p == port && *n == controller)
                {
                    self.post_scaled_to_routes(routes, channel, value);
                }
            }
            0xC0 => {
                if let Some((_, routes)) = tables.pc_routes.iter().find(|(p, _)| *p == port) {
                    let program = byte(1);
                    self.post_to_routes(routes, channel, |target| {
                        RtEvent::program_change(target, 0, channel, program)
                    });
                }
            }
            _ => {}
        }
    }

    /// OMNI list first, then the specific channel list. A target subscribed
    /// to both gets both events.
    fn post_to_routes(
        &self,
        routes: &ChannelRoutes,
        channel: u8,
        make_event: impl Fn(ObjectId) -> RtEvent,
    ) {
        for connection in &routes[OMNI_SLOT] {
            self.post(Event::Engine(make_event(connection.target)));
        }
        for connection in &routes[channel as usize] {
            self.post(Event::Engine(make_event(connection.target)));
        }
    }

    fn post_scaled_to_routes(&self, routes: &ChannelRoutes, channel: u8, value: u8) {
        let scaled = |c: &InputConnection| {
            value as f32 / 127.0 * (c.max - c.min) + c.min
        };
        for connection in &routes[OMNI_SLOT] {
            self.post(Event::Engine(RtEvent::float_parameter_change(
                connection.target,
                0,
                connection.parameter,
                scaled(connection),
            )));
        }
        for connection in &routes[channel as usize] {
            self.post(Event::Engine(RtEvent::float_parameter_change(
                connection.target,
                0,
                connection.parameter,
                scaled(connection),
            )));
        }
    }

    fn post(&self, event: Event) {
        let sink = self.event_sink.lock();
        if let Some(sink) = sink.as_ref() {
            if sink.send(event).is_err() {
                tracing::warn!("event dispatcher is gone, dropping midi event");
            }
        }
    }

    // ---- outbound -------------------------------------------------------

    /// Encode a keyboard event from a processor with an output route and
    /// hand it to the frontend. Called from the dispatcher thread.
    pub fn dispatch_outbound(&self, event: &RtEvent, timestamp_ns: u64) {
        let tables = self.tables.read();
        let Some((_, connections)) = tables
            .kb_routes_out
            .iter()
            .find(|(target, _)| *target == event.target)
        else {
            return;
        };

        for connection in connections {
            let msg = match event.data {
                RtEventData::NoteOn { note, velocity, .. } => ChannelVoiceMsg::NoteOn {
                    note,
                    velocity: (velocity * 127.0).round().clamp(0.0, 127.0) as u8,
                },
                RtEventData::NoteOff { note, velocity, .. } => ChannelVoiceMsg::NoteOff {
                    note,
                    velocity: (velocity * 127.0).round().clamp(0.0, 127.0) as u8,
                },
                RtEventData::NoteAftertouch { note, value, .. } => ChannelVoiceMsg::PolyPressure {
                    note,
                    pressure: (value * 127.0).round().clamp(0.0, 127.0) as u8,
                },
                _ => continue,
            };
            let bytes = MidiMsg::ChannelVoice {
                channel: Channel::from_u8(connection.channel),
                msg,
            }
            .to_midi();
            let mut frontend = self.frontend.lock();
            if let Some(frontend) = frontend.as_mut() {
                frontend.send_midi(connection.port, &bytes, timestamp_ns);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Processor, ProcessorData};
    use crate::buffer::SampleBuffer;
    use crossbeam_channel::Receiver;
    use std::sync::Mutex as StdMutex;

    struct StubTrack {
        data: ProcessorData,
    }

    impl StubTrack {
        fn named(name: &str) -> Self {
            let mut data = ProcessorData::new("Track", 2, 2);
            data.set_name(name);
            data.parameters
                .register_float("gain", "Gain", "", 0.0, 1.0, 1.0)
                .unwrap();
            Self { data }
        }
    }

    impl Processor for StubTrack {
        fn data(&self) -> &ProcessorData {
            &self.data
        }
        fn data_mut(&mut self) -> &mut ProcessorData {
            &mut self.data
        }
        fn process_event(&mut self, _event: RtEvent) {}
        fn process_audio(&mut self, _input: &SampleBuffer, _output: &mut SampleBuffer) {}
    }

    fn dispatcher_with_track() -> (Arc<MidiDispatcher>, Receiver<Event>, ObjectId) {
        let container = ProcessorContainer::new();
        let mut track = StubTrack::named("t1");
        let id = container.register(&mut track, true, None).unwrap();

        let dispatcher = Arc::new(MidiDispatcher::new(container, 2, 2));
        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher.connect_event_sink(tx);
        (dispatcher, rx, id)
    }

    fn engine_events(rx: &Receiver<Event>) -> Vec<RtEvent> {
        rx.try_iter()
            .filter_map(|e| match e {
                Event::Engine(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_note_on_routing() {
        let (dispatcher, rx, id) = dispatcher_with_track();
        dispatcher.connect_kb_to_track(0, "t1", Some(3)).unwrap();

        // Note on, channel 3, note 60, velocity 100.
        dispatcher.process_midi(0, &[0x93, 60, 100], 0);

        let events = engine_events(&rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, id);
        match events[0].data {
            RtEventData::NoteOn {
                channel,
                note,
                velocity,
            } => {
                assert_eq!(channel, 3);
                assert_eq!(note, 60);
                assert!((velocity - 100.0 / 127.0).abs() < 1e-6);
            }
            _ => panic!("expected note on"),
        }
    }

    #[test]
    fn test_channel_filter() {
        let (dispatcher, rx, _) = dispatcher_with_track();
        dispatcher.connect_kb_to_track(0, "t1", Some(2)).unwrap();
        dispatcher.process_midi(0, &[0x93, 60, 100], 0);
        assert!(engine_events(&rx).is_empty());
    }

    #[test]
    fn test_omni_and_channel_both_fire() {
        let (dispatcher, rx, _) = dispatcher_with_track();
        dispatcher.connect_kb_to_track(0, "t1", None).unwrap();
        dispatcher.connect_kb_to_track(0, "t1", Some(3)).unwrap();

        dispatcher.process_midi(0, &[0x93, 60, 100], 0);
        // Both lists posted, duplicates intended.
        assert_eq!(engine_events(&rx).len(), 2);
    }

    #[test]
    fn test_cc_scaling() {
        let (dispatcher, rx, id) = dispatcher_with_track();
        dispatcher
            .connect_cc_to_parameter(0, "t1", "gain", 7, 0.0, 1.0, None)
            .unwrap();

        dispatcher.process_midi(0, &[0xB0, 7, 64], 0);

        let events = engine_events(&rx);
        assert_eq!(events.len(), 1);
        match events[0].data {
            RtEventData::FloatParameterChange {
                parameter_id,
                value,
            } => {
                assert_eq!(events[0].target, id);
                assert_eq!(parameter_id, 0);
                assert!((value - 64.0 / 127.0).abs() < 1e-4);
            }
            _ => panic!("expected parameter change"),
        }
    }

    #[test]
    fn test_cc_range_scaling() {
        let (dispatcher, rx, _) = dispatcher_with_track();
        dispatcher
            .connect_cc_to_parameter(0, "t1", "gain", 1, 10.0, 20.0, None)
            .unwrap();
        dispatcher.process_midi(0, &[0xB0, 1, 127], 0);
        let events = engine_events(&rx);
        match events[0].data {
            RtEventData::FloatParameterChange { value, .. } => {
                assert!((value - 20.0).abs() < 1e-4);
            }
            _ => panic!("expected parameter change"),
        }
    }

    #[test]
    fn test_raw_midi_route() {
        let (dispatcher, rx, id) = dispatcher_with_track();
        dispatcher.connect_raw_midi_to_track(0, "t1", None).unwrap();
        dispatcher.process_midi(0, &[0x93, 60, 100], 0);

        let events = engine_events(&rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, id);
        match events[0].data {
            RtEventData::WrappedMidi { bytes, len } => {
                assert_eq!(len, 3);
                assert_eq!(&bytes[..3], &[0x93, 60, 100]);
            }
            _ => panic!("expected wrapped midi"),
        }
    }

    #[test]
    fn test_program_change_route() {
        let (dispatcher, rx, _) = dispatcher_with_track();
        dispatcher.connect_pc_to_processor(0, "t1", None).unwrap();
        dispatcher.process_midi(0, &[0xC0, 5], 0);
        let events = engine_events(&rx);
        assert!(matches!(
            events[0].data,
            RtEventData::ProgramChange { program: 5, .. }
        ));
    }

    #[test]
    fn test_validation_errors() {
        let (dispatcher, _rx, _) = dispatcher_with_track();
        assert!(matches!(
            dispatcher.connect_kb_to_track(9, "t1", None),
            Err(MidiDispatcherError::InvalidMidiInput(9))
        ));
        assert!(matches!(
            dispatcher.connect_kb_to_track(0, "missing", None),
            Err(MidiDispatcherError::InvalidTrackName(_))
        ));
        assert!(matches!(
            dispatcher.connect_kb_to_track(0, "t1", Some(16)),
            Err(MidiDispatcherError::InvalidChannel(16))
        ));
        assert!(matches!(
            dispatcher.connect_cc_to_parameter(0, "t1", "nope", 7, 0.0, 1.0, None),
            Err(MidiDispatcherError::InvalidParameter(_))
        ));
        assert!(matches!(
            dispatcher.connect_track_to_output(7, "t1", 0),
            Err(MidiDispatcherError::InvalidMidiOutput(7))
        ));
    }

    #[test]
    fn test_outbound_roundtrip() {
        let (dispatcher, _rx, id) = dispatcher_with_track();
        dispatcher.connect_track_to_output(1, "t1", 2).unwrap();

        let sent: Arc<StdMutex<Vec<(usize, Vec<u8>)>>> = Arc::new(StdMutex::new(Vec::new()));
        struct Capture(Arc<StdMutex<Vec<(usize, Vec<u8>)>>>);
        impl MidiFrontend for Capture {
            fn send_midi(&mut self, port: usize, data: &[u8], _timestamp_ns: u64) {
                self.0.lock().unwrap().push((port, data.to_vec()));
            }
        }
        dispatcher.set_frontend(Box::new(Capture(Arc::clone(&sent))));

        let event = RtEvent::note_on(id, 0, 0, 60, 100.0 / 127.0);
        dispatcher.dispatch_outbound(&event, 0);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (port, bytes) = &sent[0];
        assert_eq!(*port, 1);
        // Note on, channel 2: exactly what decode would reverse.
        assert_eq!(bytes.as_slice(), &[0x92, 60, 100]);
    }

    #[test]
    fn test_connection_listing() {
        let (dispatcher, _rx, id) = dispatcher_with_track();
        dispatcher.connect_kb_to_track(0, "t1", Some(3)).unwrap();
        dispatcher
            .connect_cc_to_parameter(1, "t1", "gain", 7, 0.0, 1.0, None)
            .unwrap();

        let connections = dispatcher.connections();
        assert_eq!(connections.len(), 2);
        assert!(connections.contains(&MidiConnectionInfo {
            kind: MidiRouteKind::Keyboard,
            port: 0,
            channel: Some(3),
            target: id,
        }));
        assert!(connections.contains(&MidiConnectionInfo {
            kind: MidiRouteKind::ControlChange,
            port: 1,
            channel: None,
            target: id,
        }));

        dispatcher.clear_connections();
        assert!(dispatcher.connections().is_empty());
    }
}
