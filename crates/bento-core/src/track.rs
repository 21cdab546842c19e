//! Tracks: processor chains with audio routing to the engine channels.
//!
//! A track is itself a [`Processor`]. It owns an ordered chain of child
//! processors and a set of connections mapping engine channels or buses onto
//! its internal channels. Rendering ping-pongs between two internal buffers
//! so the chain never aliases the engine-wide buffers, which also makes
//! identical source and destination connections safe.

use crate::buffer::SampleBuffer;
use crate::error::ProcessorError;
use crate::event::{ObjectId, RtEvent, RtEventData};
use crate::processor::{Processor, ProcessorData};

/// Upper bound on a track's channel count (4 stereo buses).
pub const MAX_TRACK_CHANNELS: usize = 8;

/// Chain capacity, fixed so adding a processor on the audio thread never
/// grows the vector.
pub const MAX_PROCESSORS_PER_TRACK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    Mono,
    Stereo,
    MultiBus(usize),
}

/// One routing entry between the engine-wide buffers and a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioConnection {
    Channel { engine: usize, track: usize },
    Bus { engine: usize, track: usize },
}

pub struct Track {
    data: ProcessorData,
    processors: Vec<Box<dyn Processor>>,
    input_connections: Vec<AudioConnection>,
    output_connections: Vec<AudioConnection>,
    buffer_a: SampleBuffer,
    buffer_b: SampleBuffer,
    mode: TrackMode,
}

impl Track {
    /// A mono or stereo track with `channels` in and out.
    pub fn new(name: &str, channels: usize) -> Self {
        let channels = channels.clamp(1, MAX_TRACK_CHANNELS);
        let mode = if channels == 1 {
            TrackMode::Mono
        } else {
            TrackMode::Stereo
        };
        Self::with_mode(name, channels, mode)
    }

    /// A multi-bus track with `buses` stereo pairs.
    pub fn with_buses(name: &str, buses: usize) -> Self {
        let buses = buses.clamp(1, MAX_TRACK_CHANNELS / 2);
        Self::with_mode(name, buses * 2, TrackMode::MultiBus(buses))
    }

    fn with_mode(name: &str, channels: usize, mode: TrackMode) -> Self {
        let mut data = ProcessorData::new("Track", channels, channels);
        data.set_name(name);
        Self {
            data,
            processors: Vec::with_capacity(MAX_PROCESSORS_PER_TRACK),
            input_connections: Vec::with_capacity(MAX_TRACK_CHANNELS),
            output_connections: Vec::with_capacity(MAX_TRACK_CHANNELS),
            buffer_a: SampleBuffer::new(channels),
            buffer_b: SampleBuffer::new(channels),
            mode,
        }
    }

    pub fn mode(&self) -> TrackMode {
        self.mode
    }

    pub fn channels(&self) -> usize {
        self.data.input_channels()
    }

    /// Append a processor to the chain. Fails when the chain is full or the
    /// processor is already a member.
    pub fn add_processor(&mut self, processor: Box<dyn Processor>) -> Result<(), Box<dyn Processor>> {
        let id = processor.data().id();
        if self.processors.len() >= MAX_PROCESSORS_PER_TRACK || self.has_processor(id) {
            return Err(processor);
        }
        self.processors.push(processor);
        Ok(())
    }

    pub fn remove_processor(&mut self, id: ObjectId) -> Option<Box<dyn Processor>> {
        let index = self.processors.iter().position(|p| p.data().id() == id)?;
        Some(self.processors.remove(index))
    }

    pub fn has_processor(&self, id: ObjectId) -> bool {
        self.processors.iter().any(|p| p.data().id() == id)
    }

    pub fn processor_mut(&mut self, id: ObjectId) -> Option<&mut (dyn Processor + '_)> {
        let p = self.processors.iter_mut().find(|p| p.data().id() == id)?;
        Some(&mut **p)
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn processor_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.processors.iter().map(|p| p.data().id())
    }

    pub fn add_input_connection(&mut self, connection: AudioConnection) -> bool {
        if self.input_connections.len() == self.input_connections.capacity() {
            return false;
        }
        self.input_connections.push(connection);
        true
    }

    pub fn add_output_connection(&mut self, connection: AudioConnection) -> bool {
        if self.output_connections.len() == self.output_connections.capacity() {
            return false;
        }
        self.output_connections.push(connection);
        true
    }

    pub fn remove_input_connection(&mut self, connection: AudioConnection) {
        self.input_connections.retain(|c| *c != connection);
    }

    pub fn remove_output_connection(&mut self, connection: AudioConnection) {
        self.output_connections.retain(|c| *c != connection);
    }

    pub fn input_connections(&self) -> &[AudioConnection] {
        &self.input_connections
    }

    pub fn output_connections(&self) -> &[AudioConnection] {
        &self.output_connections
    }

    /// Drain outgoing events from this track and all its children.
    pub fn drain_all_output_events(&mut self, mut sink: impl FnMut(RtEvent)) {
        self.data.drain_output_events(&mut sink);
        for processor in &mut self.processors {
            processor.data_mut().drain_output_events(&mut sink);
        }
    }

    fn apply_input_connections(&mut self, engine_in: &SampleBuffer) {
        let channels = self.data.input_channels();
        for connection in &self.input_connections {
            match *connection {
                AudioConnection::Channel { engine, track } => {
                    if engine < engine_in.channel_count() && track < channels {
                        self.buffer_a.replace(track, engine, engine_in);
                    }
                }
                AudioConnection::Bus { engine, track } => {
                    if (engine + 1) * 2 <= engine_in.channel_count() && (track + 1) * 2 <= channels
                    {
                        self.buffer_a.replace_bus(track, engine, engine_in);
                    }
                }
            }
        }
    }

    fn apply_output_connections(&self, engine_out: &mut SampleBuffer) {
        let channels = self.data.output_channels();
        for connection in &self.output_connections {
            match *connection {
                AudioConnection::Channel { engine, track } => {
                    if engine < engine_out.channel_count() && track < channels {
                        engine_out.add(engine, track, &self.buffer_a);
                    }
                }
                AudioConnection::Bus { engine, track } => {
                    if (engine + 1) * 2 <= engine_out.channel_count() && (track + 1) * 2 <= channels
                    {
                        engine_out.add_bus(engine, track, &self.buffer_a);
                    }
                }
            }
        }
    }

    /// Deliver queued events for the chain, run every child in order, then
    /// route the result to the engine output buffer.
    fn render(&mut self, engine_in: &SampleBuffer, engine_out: &mut SampleBuffer) {
        while let Some(event) = self.data.next_event() {
            self.handle_own_event(event);
        }
        if !self.data.enabled() {
            return;
        }

        self.buffer_a.clear();
        self.apply_input_connections(engine_in);

        if !self.data.bypassed() {
            let Track {
                processors,
                buffer_a,
                buffer_b,
                ..
            } = self;
            for processor in processors.iter_mut() {
                while let Some(event) = processor.data_mut().next_event() {
                    processor.process_event(event);
                }
                if !processor.data().enabled() {
                    continue;
                }
                buffer_b.clear();
                processor.process_audio(buffer_a, buffer_b);
                std::mem::swap(buffer_a, buffer_b);
            }
        }

        self.apply_output_connections(engine_out);
    }

    fn handle_own_event(&mut self, event: RtEvent) {
        match event.data {
            RtEventData::SetBypass { bypassed } => self.data.set_bypassed(bypassed),
            // Keyboard events addressed to the track fan out to every child;
            // instruments pick up what they understand.
            _ if event.is_keyboard_event() => {
                for processor in &mut self.processors {
                    let mut forwarded = event;
                    forwarded.target = processor.data().id();
                    processor.process_event(forwarded);
                }
            }
            _ => {}
        }
    }
}

impl Processor for Track {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> Result<(), ProcessorError> {
        for processor in &mut self.processors {
            processor.init(sample_rate)?;
        }
        Ok(())
    }

    fn configure(&mut self, sample_rate: f32) {
        for processor in &mut self.processors {
            processor.configure(sample_rate);
        }
    }

    fn process_event(&mut self, event: RtEvent) {
        self.handle_own_event(event);
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        self.render(input, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BLOCK_SIZE;

    /// Adds a constant to channel 0; re-emits received events.
    struct OffsetProcessor {
        data: ProcessorData,
        offset: f32,
    }

    impl OffsetProcessor {
        fn boxed(name: &str, id: ObjectId, offset: f32) -> Box<Self> {
            let mut data = ProcessorData::new("Offset", 2, 2);
            data.set_name(name);
            data.set_id(id);
            data.set_enabled(true);
            Box::new(Self { data, offset })
        }
    }

    impl Processor for OffsetProcessor {
        fn data(&self) -> &ProcessorData {
            &self.data
        }
        fn data_mut(&mut self) -> &mut ProcessorData {
            &mut self.data
        }
        fn process_event(&mut self, event: RtEvent) {
            self.data.output_event(event);
        }
        fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
            for ch in 0..input.channel_count().min(output.channel_count()) {
                output.replace(ch, ch, input);
            }
            for sample in output.channel_mut(0) {
                *sample += self.offset;
            }
        }
    }

    fn stereo_track() -> Track {
        let mut track = Track::new("t", 2);
        track.data_mut().set_id(100);
        track.data_mut().set_enabled(true);
        track.add_input_connection(AudioConnection::Channel { engine: 0, track: 0 });
        track.add_input_connection(AudioConnection::Channel { engine: 1, track: 1 });
        track.add_output_connection(AudioConnection::Channel { engine: 0, track: 0 });
        track.add_output_connection(AudioConnection::Channel { engine: 1, track: 1 });
        track
    }

    #[test]
    fn test_chain_runs_in_order() {
        let mut track = stereo_track();
        track.add_processor(OffsetProcessor::boxed("a", 1, 1.0)).ok();
        track.add_processor(OffsetProcessor::boxed("b", 2, 2.0)).ok();

        let engine_in = SampleBuffer::new(2);
        let mut engine_out = SampleBuffer::new(2);
        track.process_audio(&engine_in, &mut engine_out);

        // 0 + 1 + 2 on channel 0, untouched channel 1.
        assert!(engine_out.channel(0).iter().all(|&s| (s - 3.0).abs() < 1e-6));
        assert!(engine_out.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_duplicate_processor_rejected() {
        let mut track = stereo_track();
        track.add_processor(OffsetProcessor::boxed("a", 1, 1.0)).ok();
        assert!(track.add_processor(OffsetProcessor::boxed("a2", 1, 1.0)).is_err());
        assert_eq!(track.processor_count(), 1);
    }

    #[test]
    fn test_remove_returns_ownership() {
        let mut track = stereo_track();
        track.add_processor(OffsetProcessor::boxed("a", 1, 1.0)).ok();
        let removed = track.remove_processor(1);
        assert!(removed.is_some());
        assert_eq!(track.processor_count(), 0);
        assert!(track.remove_processor(1).is_none());
    }

    #[test]
    fn test_disabled_track_produces_nothing() {
        let mut track = stereo_track();
        track.data_mut().set_enabled(false);
        let mut engine_in = SampleBuffer::new(2);
        engine_in.channel_mut(0).fill(0.5);
        let mut engine_out = SampleBuffer::new(2);
        track.process_audio(&engine_in, &mut engine_out);
        assert!(engine_out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_bypassed_track_passes_dry() {
        let mut track = stereo_track();
        track.add_processor(OffsetProcessor::boxed("a", 1, 5.0)).ok();
        track
            .data_mut()
            .enqueue_event(RtEvent::set_bypass(100, 0, true));

        let mut engine_in = SampleBuffer::new(2);
        engine_in.channel_mut(0).fill(0.5);
        let mut engine_out = SampleBuffer::new(2);
        track.process_audio(&engine_in, &mut engine_out);
        assert!(engine_out.channel(0).iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_keyboard_events_fan_out() {
        let mut track = stereo_track();
        track.add_processor(OffsetProcessor::boxed("a", 1, 0.0)).ok();
        track.add_processor(OffsetProcessor::boxed("b", 2, 0.0)).ok();
        track
            .data_mut()
            .enqueue_event(RtEvent::note_on(100, 0, 0, 60, 0.8));

        let engine_in = SampleBuffer::new(2);
        let mut engine_out = SampleBuffer::new(2);
        track.process_audio(&engine_in, &mut engine_out);

        // Each child re-emits what it received; both must have seen the note,
        // retargeted at their own id.
        let mut received = Vec::new();
        track.drain_all_output_events(|e| received.push(e.target));
        received.sort_unstable();
        assert_eq!(received, vec![1, 2]);
    }

    #[test]
    fn test_bus_connections() {
        let mut track = Track::with_buses("buses", 2);
        track.data_mut().set_id(7);
        track.data_mut().set_enabled(true);
        assert_eq!(track.channels(), 4);
        assert_eq!(track.mode(), TrackMode::MultiBus(2));

        track.add_input_connection(AudioConnection::Bus { engine: 0, track: 1 });
        track.add_output_connection(AudioConnection::Bus { engine: 1, track: 1 });

        let mut engine_in = SampleBuffer::new(4);
        engine_in.channel_mut(0).fill(0.25);
        engine_in.channel_mut(1).fill(0.5);
        let mut engine_out = SampleBuffer::new(4);
        track.process_audio(&engine_in, &mut engine_out);

        // Engine bus 0 landed on track bus 1 and came back out on engine bus 1.
        assert!(engine_out.channel(2).iter().all(|&s| s == 0.25));
        assert!(engine_out.channel(3).iter().all(|&s| s == 0.5));
        assert!(engine_out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_out_of_range_connection_ignored() {
        let mut track = stereo_track();
        track.add_output_connection(AudioConnection::Channel {
            engine: 7,
            track: 0,
        });
        let engine_in = SampleBuffer::new(2);
        let mut engine_out = SampleBuffer::new(2);
        // Must not panic or write outside the two allocated channels.
        track.process_audio(&engine_in, &mut engine_out);
        assert_eq!(engine_out.channel(0).len(), BLOCK_SIZE);
    }
}
