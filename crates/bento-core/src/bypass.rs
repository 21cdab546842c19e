//! Host-driven bypass with a short crossfade ramp.
//!
//! Bypass requests arrive as RT events so they apply at block boundaries.
//! The manager tracks whether the wrapped unit should still run and whether
//! a crossfade between the processed signal and the dry input is in flight.
//! The ramp spans [`RAMP_TIME_MS`] rounded up to whole blocks.

use crate::buffer::{SampleBuffer, BLOCK_SIZE};

/// Length of the bypass crossfade.
pub const RAMP_TIME_MS: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BypassState {
    NotBypassed,
    RampingDown,
    Bypassed,
    RampingUp,
}

#[derive(Debug)]
pub struct BypassManager {
    state: BypassState,
    ramp_chunks: u32,
    ramp_count: u32,
}

impl BypassManager {
    pub fn new() -> Self {
        Self {
            state: BypassState::NotBypassed,
            ramp_chunks: 1,
            ramp_count: 0,
        }
    }

    /// Number of blocks the crossfade spans at the given sample rate.
    pub fn ramp_chunks(sample_rate: f32) -> u32 {
        (RAMP_TIME_MS * sample_rate / (1000.0 * BLOCK_SIZE as f32)).ceil() as u32
    }

    pub fn bypassed(&self) -> bool {
        matches!(
            self.state,
            BypassState::Bypassed | BypassState::RampingDown
        )
    }

    /// Request a bypass change. Re-requesting the current state is a no-op.
    pub fn set_bypass(&mut self, bypassed: bool, sample_rate: f32) {
        if bypassed == self.bypassed() {
            return;
        }
        self.ramp_chunks = Self::ramp_chunks(sample_rate).max(1);
        self.ramp_count = self.ramp_chunks;
        self.state = if bypassed {
            BypassState::RampingDown
        } else {
            BypassState::RampingUp
        };
    }

    /// Whether the wrapped unit should process this block at all.
    #[inline]
    pub fn should_process(&self) -> bool {
        self.state != BypassState::Bypassed
    }

    /// Whether a crossfade is still in flight this block.
    #[inline]
    pub fn should_ramp(&self) -> bool {
        matches!(
            self.state,
            BypassState::RampingDown | BypassState::RampingUp
        )
    }

    /// Crossfade gains (start, end) for the wet signal over this block, then
    /// advance the ramp. The dry side uses the complement.
    fn next_ramp(&mut self) -> (f32, f32) {
        let chunks = self.ramp_chunks as f32;
        let (start, end) = match self.state {
            BypassState::RampingDown => (
                self.ramp_count as f32 / chunks,
                (self.ramp_count - 1) as f32 / chunks,
            ),
            BypassState::RampingUp => (
                (self.ramp_chunks - self.ramp_count) as f32 / chunks,
                (self.ramp_chunks - self.ramp_count + 1) as f32 / chunks,
            ),
            _ => (1.0, 1.0),
        };
        if self.ramp_count > 0 {
            self.ramp_count -= 1;
        }
        if self.ramp_count == 0 {
            self.state = match self.state {
                BypassState::RampingDown => BypassState::Bypassed,
                BypassState::RampingUp => BypassState::NotBypassed,
                other => other,
            };
        }
        (start, end)
    }

    /// Mix the dry input into the processed output for the remainder of the
    /// ramp. `output` holds the wet signal on entry and the crossfaded block
    /// on return.
    pub fn crossfade_output(
        &mut self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        input_channels: usize,
        output_channels: usize,
    ) {
        let (wet_start, wet_end) = self.next_ramp();
        output.ramp(wet_start, wet_end);
        for channel in 0..output_channels {
            // Map dry channels onto the output the same way bypass_mapping
            // does, faded with the complementary gains.
            let source = if input_channels == 0 {
                continue;
            } else if channel < input_channels {
                channel
            } else {
                0
            };
            output.add_with_ramp(
                channel,
                input.channel(source),
                1.0 - wet_start,
                1.0 - wet_end,
            );
        }
    }
}

impl Default for BypassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic dry mapping used when a unit is fully bypassed: identity
/// for equal channel counts, channel 0 spread when the input is narrower,
/// summing when the output is narrower.
pub fn bypass_mapping(
    input: &SampleBuffer,
    output: &mut SampleBuffer,
    input_channels: usize,
    output_channels: usize,
) {
    if input_channels == output_channels {
        for channel in 0..output_channels {
            output.replace(channel, channel, input);
        }
    } else if input_channels > output_channels {
        for channel in 0..output_channels {
            output.replace(channel, channel, input);
        }
        for channel in output_channels..input_channels {
            let dst = channel % output_channels.max(1);
            output.add(dst, channel, input);
        }
    } else {
        for channel in 0..output_channels {
            let src = if channel < input_channels { channel } else { 0 };
            output.replace(channel, src, input);
        }
    }
}
