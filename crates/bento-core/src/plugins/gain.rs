//! Plain gain stage.

use crate::buffer::SampleBuffer;
use crate::bypass::{bypass_mapping, BypassManager};
use crate::error::ProcessorError;
use crate::event::{RtEvent, RtEventData};
use crate::parameter::ParameterValue;
use crate::processor::{Processor, ProcessorData};

pub const MAX_CHANNELS: usize = 2;

pub struct GainPlugin {
    data: ProcessorData,
    gain: ParameterValue,
    bypass: BypassManager,
    sample_rate: f32,
}

impl GainPlugin {
    pub fn new() -> Self {
        let mut data = ProcessorData::new("Gain", MAX_CHANNELS, MAX_CHANNELS);
        let gain = data
            .parameters
            .register_float("gain", "Gain", "", 0.0, 1.0, 1.0)
            .expect("empty registry cannot collide");
        Self {
            data,
            gain,
            bypass: BypassManager::new(),
            sample_rate: 44100.0,
        }
    }
}

impl Default for GainPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for GainPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> Result<(), ProcessorError> {
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn configure(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    fn process_event(&mut self, event: RtEvent) {
        match event.data {
            RtEventData::FloatParameterChange {
                parameter_id,
                value,
            } => {
                if parameter_id == 0 {
                    self.gain.set(value);
                }
            }
            RtEventData::SetBypass { bypassed } => {
                self.data.set_bypassed(bypassed);
                self.bypass.set_bypass(bypassed, self.sample_rate);
            }
            _ => {}
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let inputs = self.data.input_channels();
        let outputs = self.data.output_channels();
        if !self.bypass.should_process() {
            bypass_mapping(input, output, inputs, outputs);
            return;
        }

        let gain = self.gain.domain_value();
        let channels = outputs
            .min(input.channel_count())
            .min(output.channel_count());
        for channel in 0..channels {
            output.replace(channel, channel, input);
        }
        for channel in 0..channels {
            for sample in output.channel_mut(channel) {
                *sample *= gain;
            }
        }

        if self.bypass.should_ramp() {
            self.bypass.crossfade_output(input, output, inputs, outputs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bypass::BypassManager;

    fn filled(value: f32) -> SampleBuffer {
        let mut buffer = SampleBuffer::new(2);
        buffer.channel_mut(0).fill(value);
        buffer.channel_mut(1).fill(value);
        buffer
    }

    #[test]
    fn test_unity_by_default() {
        let mut plugin = GainPlugin::new();
        plugin.init(48000.0).unwrap();
        let input = filled(0.5);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        assert!(output.channel(0).iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_gain_change_event() {
        let mut plugin = GainPlugin::new();
        plugin.init(48000.0).unwrap();
        plugin.process_event(RtEvent::float_parameter_change(1, 0, 0, 0.25));
        let input = filled(1.0);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        assert!(output.channel(1).iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert_eq!(plugin.parameter_value_in_domain(0).unwrap(), 0.25);
    }

    #[test]
    fn test_gain_clamped() {
        let mut plugin = GainPlugin::new();
        plugin.process_event(RtEvent::float_parameter_change(1, 0, 0, 7.0));
        assert_eq!(plugin.parameter_value_in_domain(0).unwrap(), 1.0);
    }

    #[test]
    fn test_bypass_crossfades_to_dry() {
        let mut plugin = GainPlugin::new();
        plugin.init(48000.0).unwrap();
        plugin.process_event(RtEvent::float_parameter_change(1, 0, 0, 0.0));
        plugin.process_event(RtEvent::set_bypass(1, 0, true));

        let input = filled(0.5);
        let chunks = BypassManager::ramp_chunks(48000.0);

        // During the ramp the output sits between wet (0.0) and dry (0.5).
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        let mid = output.channel(0)[32];
        assert!(mid > 0.0 && mid < 0.5);

        for _ in 0..chunks {
            output.clear();
            plugin.process_audio(&input, &mut output);
        }
        assert!(output.channel(0).iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }
}
