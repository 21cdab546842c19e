//! Global musical-time clock.
//!
//! The [`Transport`] is owned by the audio thread and advanced once per block
//! before any processor runs. A [`SharedTransport`] of atomic cells mirrors
//! the current state for lock-free reads from plugin host callbacks and the
//! control API.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::BLOCK_SIZE;
use crate::lockfree::{AtomicDouble, AtomicFlag, AtomicFloat};

pub const DEFAULT_TEMPO: f32 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

/// Where the transport clock takes its timing from. Only `Internal` drives
/// the clock in this engine; the other modes are accepted and stored for
/// frontends that slave to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Internal,
    Midi,
    Link,
}

/// Atomic mirror of the transport state, readable from any thread.
#[derive(Debug, Default)]
pub struct SharedTransport {
    sample_rate: AtomicFloat,
    tempo: AtomicFloat,
    playing: AtomicFlag,
    sample_count: AtomicU64,
    beats: AtomicDouble,
    bar_start_beats: AtomicDouble,
    /// numerator << 16 | denominator
    time_signature: AtomicU32,
    process_time_ns: AtomicU64,
    playing_changed: AtomicFlag,
}

impl SharedTransport {
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate.get()
    }

    pub fn tempo(&self) -> f32 {
        self.tempo.get()
    }

    pub fn playing(&self) -> bool {
        self.playing.get()
    }

    pub fn current_samples(&self) -> u64 {
        self.sample_count.load(Ordering::Acquire)
    }

    pub fn current_beats(&self) -> f64 {
        self.beats.get()
    }

    pub fn current_bar_start_beats(&self) -> f64 {
        self.bar_start_beats.get()
    }

    pub fn time_signature(&self) -> TimeSignature {
        let packed = self.time_signature.load(Ordering::Acquire);
        TimeSignature {
            numerator: packed >> 16,
            denominator: packed & 0xFFFF,
        }
    }

    pub fn process_time_ns(&self) -> u64 {
        self.process_time_ns.load(Ordering::Acquire)
    }

    /// True when play state flipped during the last block.
    pub fn playing_changed(&self) -> bool {
        self.playing_changed.get()
    }
}

/// The audio-thread half of the clock.
pub struct Transport {
    shared: Arc<SharedTransport>,
    sample_rate: f32,
    sample_count: u64,
    tempo: f32,
    playing: bool,
    playing_changed: bool,
    time_signature: TimeSignature,
    beats: f64,
    bar_start_beats: f64,
}

impl Transport {
    pub fn new(sample_rate: f32) -> Self {
        let transport = Self {
            shared: Arc::new(SharedTransport::default()),
            sample_rate,
            sample_count: 0,
            tempo: DEFAULT_TEMPO,
            playing: false,
            playing_changed: false,
            time_signature: TimeSignature::default(),
            beats: 0.0,
            bar_start_beats: 0.0,
        };
        transport.publish();
        transport
    }

    pub fn shared(&self) -> Arc<SharedTransport> {
        Arc::clone(&self.shared)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.publish();
    }

    pub fn set_tempo(&mut self, bpm: f32) {
        self.tempo = bpm.clamp(20.0, 999.0);
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature) {
        if signature.numerator > 0 && signature.denominator > 0 {
            self.time_signature = signature;
        }
    }

    pub fn set_playing(&mut self, playing: bool) {
        if playing != self.playing {
            self.playing = playing;
            self.playing_changed = true;
        }
    }

    pub fn playing(&self) -> bool {
        self.playing
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    pub fn current_samples(&self) -> u64 {
        self.sample_count
    }

    pub fn current_beats(&self) -> f64 {
        self.beats
    }

    /// Called at the start of every block with the frontend timestamp,
    /// before any events or audio are processed.
    pub fn update(&mut self, timestamp_ns: u64) {
        self.shared
            .process_time_ns
            .store(timestamp_ns, Ordering::Release);
        self.publish();
    }

    /// Advance by one block. Called after the block has been rendered.
    pub fn advance_block(&mut self) {
        self.sample_count += BLOCK_SIZE as u64;
        if self.playing {
            let beats_per_sample = self.tempo as f64 / 60.0 / self.sample_rate as f64;
            self.beats += BLOCK_SIZE as f64 * beats_per_sample;
            let bar_length =
                self.time_signature.numerator as f64 * 4.0 / self.time_signature.denominator as f64;
            self.bar_start_beats = (self.beats / bar_length).floor() * bar_length;
        }
        self.playing_changed = false;
    }

    fn publish(&self) {
        let shared = &self.shared;
        shared.sample_rate.set(self.sample_rate);
        shared.tempo.set(self.tempo);
        shared.playing.set(self.playing);
        shared.playing_changed.set(self.playing_changed);
        shared
            .sample_count
            .store(self.sample_count, Ordering::Release);
        shared.beats.set(self.beats);
        shared.bar_start_beats.set(self.bar_start_beats);
        shared.time_signature.store(
            (self.time_signature.numerator << 16) | (self.time_signature.denominator & 0xFFFF),
            Ordering::Release,
        );
    }
}
