//! Audio frontend contracts and the built-in offline and dummy frontends.
//!
//! Frontends own the [`AudioEngine`] and call `process_chunk` with planar
//! buffers and a monotonically increasing nanosecond timestamp. They are
//! also responsible for configuring the sample rate before processing
//! starts. Device-backed frontends live outside this crate; the two here
//! cover file-less offline rendering and a self-driving loop for soak
//! testing.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use bento_core::buffer::{SampleBuffer, BLOCK_SIZE};
use bento_core::lockfree::AtomicFlag;
use bento_core::AudioEngine;

pub use bento_core::midi_dispatcher::MidiFrontend;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrontendError {
    #[error("invalid channel count {0}")]
    InvalidChannelCount(usize),

    #[error("input length {0} is not a whole number of blocks")]
    InvalidInputLength(usize),
}

/// Renders in-memory audio through the engine block by block.
pub struct OfflineFrontend {
    engine: AudioEngine,
    input_buffer: SampleBuffer,
    output_buffer: SampleBuffer,
    sample_rate: f32,
    timestamp_ns: u64,
}

impl OfflineFrontend {
    pub fn new(engine: AudioEngine, channels: usize, sample_rate: f32) -> Self {
        Self {
            engine,
            input_buffer: SampleBuffer::new(channels),
            output_buffer: SampleBuffer::new(channels),
            sample_rate,
            timestamp_ns: 0,
        }
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine {
        &mut self.engine
    }

    /// Render one block. `input` holds one slice per channel; the result is
    /// copied into `output` the same way.
    pub fn process_block(
        &mut self,
        input: &[&[f32]],
        output: &mut [Vec<f32>],
    ) -> Result<(), FrontendError> {
        let channels = self.input_buffer.channel_count();
        if input.len() > channels || output.len() > channels {
            return Err(FrontendError::InvalidChannelCount(
                input.len().max(output.len()),
            ));
        }
        for (channel, samples) in input.iter().enumerate() {
            if samples.len() != BLOCK_SIZE {
                return Err(FrontendError::InvalidInputLength(samples.len()));
            }
            self.input_buffer.channel_mut(channel).copy_from_slice(samples);
        }

        self.engine
            .process_chunk(&self.input_buffer, &mut self.output_buffer, self.timestamp_ns);
        self.timestamp_ns += block_duration_ns(self.sample_rate);

        for (channel, samples) in output.iter_mut().enumerate() {
            samples.clear();
            samples.extend_from_slice(self.output_buffer.channel(channel));
        }
        Ok(())
    }

    /// Drive the engine for `blocks` blocks of silence, discarding output.
    /// Useful to let scheduled events and commands settle.
    pub fn run_silent(&mut self, blocks: usize) {
        self.input_buffer.clear();
        for _ in 0..blocks {
            self.engine
                .process_chunk(&self.input_buffer, &mut self.output_buffer, self.timestamp_ns);
            self.timestamp_ns += block_duration_ns(self.sample_rate);
        }
    }
}

/// Stop flag shared with a running [`DummyFrontend`].
#[derive(Clone)]
pub struct DummyStopHandle {
    stop: Arc<AtomicFlag>,
}

impl DummyStopHandle {
    pub fn stop(&self) {
        self.stop.set(true);
    }
}

/// Drives the engine with silence in real time until stopped. Stands in for
/// a device backend in tests and headless setups.
pub struct DummyFrontend {
    engine: AudioEngine,
    sample_rate: f32,
    stop: Arc<AtomicFlag>,
}

impl DummyFrontend {
    pub fn new(engine: AudioEngine, sample_rate: f32) -> Self {
        Self {
            engine,
            sample_rate,
            stop: Arc::new(AtomicFlag::new(false)),
        }
    }

    pub fn stop_handle(&self) -> DummyStopHandle {
        DummyStopHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Block-loop until the stop handle fires. The in-progress block always
    /// completes before the loop exits.
    pub fn run(&mut self) {
        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        let mut timestamp_ns = 0u64;
        let pacing = Duration::from_nanos(block_duration_ns(self.sample_rate));
        while !self.stop.get() {
            self.engine.process_chunk(&input, &mut output, timestamp_ns);
            timestamp_ns += block_duration_ns(self.sample_rate);
            std::thread::sleep(pacing);
        }
    }
}

fn block_duration_ns(sample_rate: f32) -> u64 {
    (BLOCK_SIZE as f64 / sample_rate as f64 * 1e9) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use bento_core::controller::engine_with_controller;

    #[test]
    fn test_offline_frontend_passes_blocks() {
        let (engine, _controller, _queues) = engine_with_controller(48000.0);
        let mut frontend = OfflineFrontend::new(engine, 2, 48000.0);

        let input = [vec![0.5f32; BLOCK_SIZE], vec![0.0; BLOCK_SIZE]];
        let input_refs: Vec<&[f32]> = input.iter().map(|c| c.as_slice()).collect();
        let mut output = vec![Vec::new(), Vec::new()];
        frontend.process_block(&input_refs, &mut output).unwrap();

        // No tracks configured: the engine clears its output.
        assert_eq!(output[0].len(), BLOCK_SIZE);
        assert!(output[0].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_offline_frontend_rejects_bad_shapes() {
        let (engine, _controller, _queues) = engine_with_controller(48000.0);
        let mut frontend = OfflineFrontend::new(engine, 2, 48000.0);

        let short = vec![0.0f32; 10];
        let input: Vec<&[f32]> = vec![&short];
        let mut output = vec![Vec::new()];
        assert!(matches!(
            frontend.process_block(&input, &mut output),
            Err(FrontendError::InvalidInputLength(10))
        ));
    }

    #[test]
    fn test_dummy_frontend_stops() {
        let (engine, _controller, _queues) = engine_with_controller(48000.0);
        let mut frontend = DummyFrontend::new(engine, 48000.0);
        let handle = frontend.stop_handle();

        let runner = std::thread::spawn(move || frontend.run());
        std::thread::sleep(Duration::from_millis(10));
        handle.stop();
        runner.join().unwrap();
    }
}
