//! Copies audio through unchanged and mirrors keyboard events to its
//! output. Useful as a MIDI tap in front of an instrument and in tests.

use crate::buffer::SampleBuffer;
use crate::event::{RtEvent, RtEventData};
use crate::processor::{Processor, ProcessorData};

pub struct PassthroughPlugin {
    data: ProcessorData,
}

impl PassthroughPlugin {
    pub fn new() -> Self {
        Self {
            data: ProcessorData::new("Passthrough", 2, 2),
        }
    }
}

impl Default for PassthroughPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PassthroughPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn process_event(&mut self, event: RtEvent) {
        if event.is_keyboard_event() {
            self.data.output_event(event);
        } else if let RtEventData::SetBypass { bypassed } = event.data {
            self.data.set_bypassed(bypassed);
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let channels = self
            .data
            .output_channels()
            .min(input.channel_count())
            .min(output.channel_count());
        for channel in 0..channels {
            output.replace(channel, channel, input);
        }
    }
}
