//! The real-time engine: block loop, event routing and graph adoption.
//!
//! [`AudioEngine`] lives on the audio thread. The control side never touches
//! it directly: graph edits arrive as prepared [`GraphCommand`] values built
//! off-thread and adopted at block boundaries, events arrive through the
//! SPSC input ring, and everything removed from the graph leaves through the
//! reclaim channel so deallocation happens on the dispatcher thread.
//!
//! `process_chunk` is the single RT entry point. Per block it:
//!
//! 1. adopts pending graph commands,
//! 2. advances the transport,
//! 3. drains due events into per-processor FIFOs (future events stay queued),
//! 4. clears the output buffer and runs every track in order,
//! 5. publishes processor output events to the output ring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use crate::buffer::{SampleBuffer, BLOCK_SIZE};
use crate::event::{ObjectId, RtEvent, RtEventData, ENGINE_TARGET};
use crate::lockfree::DropCounter;
use crate::processor::Processor;
use crate::queue::{RtEventFifo, RtEventReceiver, RtEventSender};
use crate::track::{AudioConnection, Track};
use crate::transport::{TimeSignature, Transport};

/// Engine-wide channel ceiling; frontends may configure fewer.
pub const MAX_ENGINE_CHANNELS: usize = 8;

pub const MAX_TRACKS: usize = 16;

/// Events scheduled past the current block wait here, offsets counted down
/// block by block.
const PENDING_EVENT_CAPACITY: usize = 256;

/// Graph edits prepared on the control side, applied between blocks.
pub enum GraphCommand {
    AddTrack(Box<Track>),
    RemoveTrack(ObjectId),
    AddProcessor {
        track: ObjectId,
        processor: Box<dyn Processor>,
    },
    RemoveProcessor {
        track: ObjectId,
        processor: ObjectId,
    },
    MoveProcessor {
        from: ObjectId,
        to: ObjectId,
        processor: ObjectId,
    },
    AddInputConnection {
        track: ObjectId,
        connection: AudioConnection,
    },
    AddOutputConnection {
        track: ObjectId,
        connection: AudioConnection,
    },
    RemoveInputConnection {
        track: ObjectId,
        connection: AudioConnection,
    },
    RemoveOutputConnection {
        track: ObjectId,
        connection: AudioConnection,
    },
    SetSampleRate(f32),
}

/// Ownership leaving the RT graph, dropped on the dispatcher thread.
pub enum Reclaimed {
    Processor(Box<dyn Processor>),
    Track(Box<Track>),
}

impl Reclaimed {
    pub fn id(&self) -> ObjectId {
        match self {
            Reclaimed::Processor(p) => p.data().id(),
            Reclaimed::Track(t) => t.data().id(),
        }
    }
}

/// Per-block processing-time statistics, written by the audio thread and
/// read by the control API.
#[derive(Debug, Default)]
pub struct ProcessTimings {
    total_ns: AtomicU64,
    blocks: AtomicU64,
    max_ns: AtomicU64,
    min_ns: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSnapshot {
    pub average_ms: f32,
    pub min_ms: f32,
    pub max_ms: f32,
    pub blocks: u64,
}

impl ProcessTimings {
    pub fn record(&self, nanoseconds: u64) {
        self.total_ns.fetch_add(nanoseconds, Ordering::Relaxed);
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.max_ns.fetch_max(nanoseconds, Ordering::Relaxed);
        let mut min = self.min_ns.load(Ordering::Relaxed);
        while (min == 0 || nanoseconds < min)
            && self
                .min_ns
                .compare_exchange_weak(min, nanoseconds, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            min = self.min_ns.load(Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        let blocks = self.blocks.load(Ordering::Relaxed);
        let total = self.total_ns.load(Ordering::Relaxed);
        let average = if blocks == 0 { 0 } else { total / blocks };
        TimingSnapshot {
            average_ms: average as f32 / 1e6,
            min_ms: self.min_ns.load(Ordering::Relaxed) as f32 / 1e6,
            max_ms: self.max_ns.load(Ordering::Relaxed) as f32 / 1e6,
            blocks,
        }
    }

    pub fn reset(&self) {
        self.total_ns.store(0, Ordering::Relaxed);
        self.blocks.store(0, Ordering::Relaxed);
        self.max_ns.store(0, Ordering::Relaxed);
        self.min_ns.store(0, Ordering::Relaxed);
    }
}

pub struct AudioEngine {
    tracks: Vec<Box<Track>>,
    transport: Transport,
    input_events: RtEventReceiver,
    output_events: RtEventSender,
    commands: Receiver<GraphCommand>,
    reclaim: Sender<Reclaimed>,
    pending: RtEventFifo,
    timings: Arc<ProcessTimings>,
    unroutable: Arc<DropCounter>,
}

impl AudioEngine {
    pub fn new(
        sample_rate: f32,
        input_events: RtEventReceiver,
        output_events: RtEventSender,
        commands: Receiver<GraphCommand>,
        reclaim: Sender<Reclaimed>,
    ) -> Self {
        Self {
            tracks: Vec::with_capacity(MAX_TRACKS),
            transport: Transport::new(sample_rate),
            input_events,
            output_events,
            commands,
            reclaim,
            pending: RtEventFifo::with_capacity(PENDING_EVENT_CAPACITY),
            timings: Arc::new(ProcessTimings::default()),
            unroutable: Arc::new(DropCounter::new()),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn timings(&self) -> Arc<ProcessTimings> {
        Arc::clone(&self.timings)
    }

    pub fn unroutable_events(&self) -> Arc<DropCounter> {
        Arc::clone(&self.unroutable)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// The RT entry point. Writes exactly [`BLOCK_SIZE`] samples to every
    /// configured output channel.
    pub fn process_chunk(
        &mut self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        timestamp_ns: u64,
    ) {
        let started = Instant::now();

        self.apply_commands();
        self.transport.update(timestamp_ns);
        self.route_events();

        output.clear();
        for track in &mut self.tracks {
            track.process_audio(input, output);
        }

        let output_events = &mut self.output_events;
        for track in &mut self.tracks {
            track.drain_all_output_events(|event| {
                output_events.push(event);
            });
        }

        self.transport.advance_block();
        self.timings.record(started.elapsed().as_nanos() as u64);
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                GraphCommand::AddTrack(track) => {
                    if self.tracks.len() < MAX_TRACKS {
                        self.tracks.push(track);
                    } else {
                        self.discard(Reclaimed::Track(track));
                    }
                }
                GraphCommand::RemoveTrack(id) => {
                    if let Some(index) = self.tracks.iter().position(|t| t.data().id() == id) {
                        let track = self.tracks.remove(index);
                        self.discard(Reclaimed::Track(track));
                    }
                }
                GraphCommand::AddProcessor { track, processor } => {
                    let rejected = match self.track_mut(track) {
                        Some(t) => t.add_processor(processor).err(),
                        None => Some(processor),
                    };
                    if let Some(rejected) = rejected {
                        self.discard(Reclaimed::Processor(rejected));
                    }
                }
                GraphCommand::RemoveProcessor { track, processor } => {
                    let removed = self
                        .track_mut(track)
                        .and_then(|t| t.remove_processor(processor));
                    if let Some(removed) = removed {
                        self.discard(Reclaimed::Processor(removed));
                    }
                }
                GraphCommand::MoveProcessor {
                    from,
                    to,
                    processor,
                } => {
                    let moved = self
                        .track_mut(from)
                        .and_then(|t| t.remove_processor(processor));
                    if let Some(moved) = moved {
                        let rejected = match self.track_mut(to) {
                            Some(t) => t.add_processor(moved).err(),
                            None => Some(moved),
                        };
                        if let Some(rejected) = rejected {
                            self.discard(Reclaimed::Processor(rejected));
                        }
                    }
                }
                GraphCommand::AddInputConnection { track, connection } => {
                    if let Some(t) = self.track_mut(track) {
                        t.add_input_connection(connection);
                    }
                }
                GraphCommand::AddOutputConnection { track, connection } => {
                    if let Some(t) = self.track_mut(track) {
                        t.add_output_connection(connection);
                    }
                }
                GraphCommand::RemoveInputConnection { track, connection } => {
                    if let Some(t) = self.track_mut(track) {
                        t.remove_input_connection(connection);
                    }
                }
                GraphCommand::RemoveOutputConnection { track, connection } => {
                    if let Some(t) = self.track_mut(track) {
                        t.remove_output_connection(connection);
                    }
                }
                GraphCommand::SetSampleRate(sample_rate) => {
                    self.transport.set_sample_rate(sample_rate);
                    for track in &mut self.tracks {
                        track.configure(sample_rate);
                    }
                }
            }
        }
    }

    fn track_mut(&mut self, id: ObjectId) -> Option<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| t.data().id() == id)
            .map(|t| t.as_mut())
    }

    fn discard(&self, reclaimed: Reclaimed) {
        // Dropping the box here would free memory on the audio thread; the
        // dispatcher owns destruction. A full reclaim queue loses that
        // guarantee for this one object, which the counter records.
        if self.reclaim.try_send(reclaimed).is_err() {
            self.unroutable.increment();
        }
    }

    fn route_events(&mut self) {
        let deferred = self.pending.len();
        for _ in 0..deferred {
            if let Some(event) = self.pending.pop() {
                self.dispatch(event);
            }
        }
        while let Some(event) = self.input_events.pop() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, mut event: RtEvent) {
        if event.sample_offset >= BLOCK_SIZE as u32 {
            event.sample_offset -= BLOCK_SIZE as u32;
            if !self.pending.push(event) {
                self.unroutable.increment();
            }
            return;
        }
        if event.target == ENGINE_TARGET || event.is_engine_event() {
            self.handle_engine_event(event);
            return;
        }
        for track in &mut self.tracks {
            if track.data().id() == event.target {
                if !track.data_mut().enqueue_event(event) {
                    self.unroutable.increment();
                }
                return;
            }
            if let Some(processor) = track.processor_mut(event.target) {
                if !processor.data_mut().enqueue_event(event) {
                    self.unroutable.increment();
                }
                return;
            }
        }
        self.unroutable.increment();
    }

    fn handle_engine_event(&mut self, event: RtEvent) {
        match event.data {
            RtEventData::Tempo { bpm } => self.transport.set_tempo(bpm),
            RtEventData::TimeSignature {
                numerator,
                denominator,
            } => self.transport.set_time_signature(TimeSignature {
                numerator: numerator as u32,
                denominator: denominator as u32,
            }),
            RtEventData::SetPlaying { playing } => self.transport.set_playing(playing),
            _ => {
                self.unroutable.increment();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::GainPlugin;
    use crate::queue::{rt_event_queue, rt_output_queue, RT_EVENT_QUEUE_CAPACITY};

    struct Harness {
        engine: AudioEngine,
        events: RtEventSender,
        output: RtEventReceiver,
        commands: Sender<GraphCommand>,
        reclaim_rx: Receiver<Reclaimed>,
    }

    fn harness() -> Harness {
        let (events, input_rx) = rt_event_queue(RT_EVENT_QUEUE_CAPACITY);
        let (output_tx, output) = rt_output_queue(RT_EVENT_QUEUE_CAPACITY);
        let (commands, command_rx) = crossbeam_channel::bounded(64);
        let (reclaim_tx, reclaim_rx) = crossbeam_channel::bounded(64);
        Harness {
            engine: AudioEngine::new(48000.0, input_rx, output_tx, command_rx, reclaim_tx),
            events,
            output,
            commands,
            reclaim_rx,
        }
    }

    fn stereo_track(id: ObjectId, name: &str) -> Box<Track> {
        let mut track = Track::new(name, 2);
        track.data_mut().set_id(id);
        track.data_mut().set_enabled(true);
        track.add_input_connection(AudioConnection::Channel { engine: 0, track: 0 });
        track.add_output_connection(AudioConnection::Channel { engine: 0, track: 0 });
        Box::new(track)
    }

    fn gain(id: ObjectId) -> Box<dyn Processor> {
        let mut plugin = GainPlugin::new();
        plugin.data_mut().set_id(id);
        plugin.data_mut().set_name("gain");
        plugin.data_mut().set_enabled(true);
        Box::new(plugin)
    }

    #[test]
    fn test_commands_adopted_at_block_boundary() {
        let mut h = harness();
        h.commands.send(GraphCommand::AddTrack(stereo_track(1, "t"))).unwrap();
        assert_eq!(h.engine.track_count(), 0);

        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        h.engine.process_chunk(&input, &mut output, 0);
        assert_eq!(h.engine.track_count(), 1);
    }

    #[test]
    fn test_audio_flows_through_track() {
        let mut h = harness();
        h.commands.send(GraphCommand::AddTrack(stereo_track(1, "t"))).unwrap();
        h.commands
            .send(GraphCommand::AddProcessor {
                track: 1,
                processor: gain(2),
            })
            .unwrap();

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        let mut output = SampleBuffer::new(2);
        h.engine.process_chunk(&input, &mut output, 0);
        assert!(output.channel(0).iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(output.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_event_routing_to_processor() {
        let mut h = harness();
        h.commands.send(GraphCommand::AddTrack(stereo_track(1, "t"))).unwrap();
        h.commands
            .send(GraphCommand::AddProcessor {
                track: 1,
                processor: gain(2),
            })
            .unwrap();
        h.events.push(RtEvent::float_parameter_change(2, 0, 0, 0.25));

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        let mut output = SampleBuffer::new(2);
        h.engine.process_chunk(&input, &mut output, 0);
        assert!(output.channel(0).iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_future_events_wait_for_their_block() {
        let mut h = harness();
        h.commands.send(GraphCommand::AddTrack(stereo_track(1, "t"))).unwrap();
        h.commands
            .send(GraphCommand::AddProcessor {
                track: 1,
                processor: gain(2),
            })
            .unwrap();
        // Scheduled one block ahead.
        h.events.push(RtEvent::float_parameter_change(
            2,
            BLOCK_SIZE as u32,
            0,
            0.0,
        ));

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        let mut output = SampleBuffer::new(2);

        h.engine.process_chunk(&input, &mut output, 0);
        assert!(output.channel(0).iter().all(|&s| (s - 1.0).abs() < 1e-6));

        h.engine.process_chunk(&input, &mut output, 1);
        assert!(output.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fifo_order_per_target() {
        let mut h = harness();
        h.commands.send(GraphCommand::AddTrack(stereo_track(1, "t"))).unwrap();
        h.commands
            .send(GraphCommand::AddProcessor {
                track: 1,
                processor: gain(2),
            })
            .unwrap();
        // Two changes in push order: the later one must win.
        h.events.push(RtEvent::float_parameter_change(2, 0, 0, 0.25));
        h.events.push(RtEvent::float_parameter_change(2, 0, 0, 0.75));

        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        let mut output = SampleBuffer::new(2);
        h.engine.process_chunk(&input, &mut output, 0);
        assert!(output.channel(0).iter().all(|&s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_removed_processor_is_reclaimed_not_dropped() {
        let mut h = harness();
        h.commands.send(GraphCommand::AddTrack(stereo_track(1, "t"))).unwrap();
        h.commands
            .send(GraphCommand::AddProcessor {
                track: 1,
                processor: gain(2),
            })
            .unwrap();
        h.commands
            .send(GraphCommand::RemoveProcessor {
                track: 1,
                processor: 2,
            })
            .unwrap();

        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        h.engine.process_chunk(&input, &mut output, 0);

        let reclaimed = h.reclaim_rx.try_recv().expect("processor handed back");
        assert_eq!(reclaimed.id(), 2);
    }

    #[test]
    fn test_transport_events() {
        let mut h = harness();
        h.events.push(RtEvent::tempo(140.0));
        h.events.push(RtEvent::set_playing(true));

        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        h.engine.process_chunk(&input, &mut output, 0);
        assert_eq!(h.engine.transport().tempo(), 140.0);
        assert!(h.engine.transport().playing());
    }

    #[test]
    fn test_unroutable_event_counted() {
        let mut h = harness();
        h.events.push(RtEvent::set_bypass(99, 0, true));
        let counter = h.engine.unroutable_events();

        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        h.engine.process_chunk(&input, &mut output, 0);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_outgoing_events_reach_output_queue() {
        let mut h = harness();
        h.commands.send(GraphCommand::AddTrack(stereo_track(1, "t"))).unwrap();
        let mut passthrough = crate::plugins::PassthroughPlugin::new();
        passthrough.data_mut().set_id(2);
        passthrough.data_mut().set_name("pt");
        passthrough.data_mut().set_enabled(true);
        h.commands
            .send(GraphCommand::AddProcessor {
                track: 1,
                processor: Box::new(passthrough),
            })
            .unwrap();
        h.events.push(RtEvent::note_on(2, 0, 0, 60, 0.5));

        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        h.engine.process_chunk(&input, &mut output, 0);

        let forwarded = h.output.pop().expect("note forwarded to output queue");
        assert!(matches!(
            forwarded.data,
            RtEventData::NoteOn { note: 60, .. }
        ));
    }
}
