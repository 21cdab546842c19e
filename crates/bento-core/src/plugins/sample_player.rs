//! Polyphonic one-shot sample player.
//!
//! Demonstrates the full non-RT task round-trip: setting the `sample_file`
//! property stages a path, the dispatcher's worker loads the file off the
//! audio thread, and the completion event makes the audio thread adopt the
//! new sample at a block boundary. Sample files are raw little-endian f32
//! mono data.
//!
//! Eight voices with a linear ADSR envelope; pitch follows the played note
//! relative to middle C.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::buffer::{SampleBuffer, BLOCK_SIZE};
use crate::bypass::bypass_mapping;
use crate::error::ProcessorError;
use crate::event::{EventId, RtEvent, RtEventData};
use crate::parameter::ParameterValue;
use crate::processor::{AsyncWorkHandler, Processor, ProcessorData};

pub const TOTAL_POLYPHONY: usize = 8;

/// State shared between the processor and its non-RT task handler.
struct SampleHost {
    pending_path: Mutex<Option<String>>,
    sample: ArcSwap<Vec<f32>>,
}

/// Worker-side half: loads staged sample files.
pub struct SamplePlayerHost {
    shared: Arc<SampleHost>,
}

impl AsyncWorkHandler for SamplePlayerHost {
    fn run_task(&self, _event_id: EventId) -> i32 {
        let path = self.shared.pending_path.lock().take();
        let Some(path) = path else {
            return 1;
        };
        match std::fs::read(&path) {
            Ok(bytes) => {
                let samples: Vec<f32> = bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                tracing::debug!(samples = samples.len(), %path, "loaded sample file");
                self.shared.sample.store(Arc::new(samples));
                0
            }
            Err(error) => {
                tracing::warn!(%path, %error, "failed to load sample file");
                1
            }
        }
    }

    fn set_property(&self, name: &str, value: &str) -> Result<(), ProcessorError> {
        if name != "sample_file" {
            return Err(ProcessorError::Parameter(format!(
                "unknown property '{}'",
                name
            )));
        }
        *self.shared.pending_path.lock() = Some(value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopeStage {
    Attack,
    Decay,
    Sustain,
    Release,
    Off,
}

#[derive(Debug, Clone, Copy)]
struct Voice {
    note: u8,
    gain: f32,
    position: f64,
    playback_rate: f64,
    stage: EnvelopeStage,
    envelope: f32,
}

impl Voice {
    fn idle() -> Self {
        Self {
            note: 0,
            gain: 0.0,
            position: 0.0,
            playback_rate: 1.0,
            stage: EnvelopeStage::Off,
            envelope: 0.0,
        }
    }

    fn active(&self) -> bool {
        self.stage != EnvelopeStage::Off
    }
}

pub struct SamplePlayerPlugin {
    data: ProcessorData,
    volume: ParameterValue,
    attack: ParameterValue,
    decay: ParameterValue,
    sustain: ParameterValue,
    release: ParameterValue,
    voices: [Voice; TOTAL_POLYPHONY],
    shared: Arc<SampleHost>,
    /// RT-side clone of the currently adopted sample.
    current_sample: Arc<Vec<f32>>,
    sample_rate: f32,
}

impl SamplePlayerPlugin {
    pub fn new() -> Self {
        let mut data = ProcessorData::new("Sample player", 2, 2);
        let volume = data
            .parameters
            .register_float("volume", "Volume", "dB", -90.0, 24.0, 0.0)
            .expect("parameter names are distinct");
        let attack = data
            .parameters
            .register_float("attack", "Attack", "s", 0.0, 10.0, 0.0)
            .expect("parameter names are distinct");
        let decay = data
            .parameters
            .register_float("decay", "Decay", "s", 0.0, 10.0, 0.0)
            .expect("parameter names are distinct");
        let sustain = data
            .parameters
            .register_float("sustain", "Sustain", "", 0.0, 1.0, 1.0)
            .expect("parameter names are distinct");
        let release = data
            .parameters
            .register_float("release", "Release", "s", 0.0, 10.0, 0.05)
            .expect("parameter names are distinct");
        data.parameters
            .register_string("sample_file", "Sample file")
            .expect("parameter names are distinct");

        let shared = Arc::new(SampleHost {
            pending_path: Mutex::new(None),
            sample: ArcSwap::from_pointee(Vec::new()),
        });

        Self {
            data,
            volume,
            attack,
            decay,
            sustain,
            release,
            voices: [Voice::idle(); TOTAL_POLYPHONY],
            current_sample: shared.sample.load_full(),
            shared,
            sample_rate: 44100.0,
        }
    }

    pub fn async_handler(&self) -> Arc<dyn AsyncWorkHandler> {
        Arc::new(SamplePlayerHost {
            shared: Arc::clone(&self.shared),
        })
    }

    fn note_on(&mut self, note: u8, velocity: f32) {
        // Free voice if available, otherwise steal the one playing longest.
        let slot = self
            .voices
            .iter()
            .position(|v| !v.active())
            .unwrap_or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .max_by(|a, b| {
                        a.1.position
                            .partial_cmp(&b.1.position)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(index, _)| index)
                    .unwrap_or(0)
            });
        self.voices[slot] = Voice {
            note,
            gain: velocity,
            position: 0.0,
            playback_rate: ((note as f64 - 60.0) / 12.0).exp2(),
            stage: EnvelopeStage::Attack,
            envelope: 0.0,
        };
    }

    fn note_off(&mut self, note: u8) {
        for voice in &mut self.voices {
            if voice.active() && voice.note == note && voice.stage != EnvelopeStage::Release {
                voice.stage = EnvelopeStage::Release;
            }
        }
    }

    /// Per-sample envelope step. Linear segments; times come from the
    /// parameter cells.
    fn step_envelope(voice: &mut Voice, attack: f32, decay: f32, sustain: f32, release: f32, sample_rate: f32) {
        let step = |seconds: f32| {
            if seconds <= 0.0 {
                1.0
            } else {
                1.0 / (seconds * sample_rate)
            }
        };
        match voice.stage {
            EnvelopeStage::Attack => {
                voice.envelope += step(attack);
                if voice.envelope >= 1.0 {
                    voice.envelope = 1.0;
                    voice.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                voice.envelope -= step(decay);
                if voice.envelope <= sustain {
                    voice.envelope = sustain;
                    voice.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => {
                voice.envelope = sustain;
            }
            EnvelopeStage::Release => {
                voice.envelope -= step(release);
                if voice.envelope <= 0.0 {
                    voice.envelope = 0.0;
                    voice.stage = EnvelopeStage::Off;
                }
            }
            EnvelopeStage::Off => {}
        }
    }
}

impl Default for SamplePlayerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for SamplePlayerPlugin {
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
            RtEventData::NoteOn { note, velocity, .. } => self.note_on(note, velocity),
            RtEventData::NoteOff { note, .. } => self.note_off(note),
            RtEventData::FloatParameterChange {
                parameter_id,
                value,
            } => {
                if let Some(cell) = self.data.parameters.value(parameter_id) {
                    cell.set(value);
                }
            }
            RtEventData::SetBypass { bypassed } => {
                self.data.set_bypassed(bypassed);
                if bypassed {
                    for voice in &mut self.voices {
                        *voice = Voice::idle();
                    }
                }
            }
            RtEventData::AsyncWorkCompletion { status, .. } => {
                if status == 0 {
                    // Worker finished loading; adopt the new sample and
                    // silence voices pointing into the old one.
                    self.current_sample = self.shared.sample.load_full();
                    for voice in &mut self.voices {
                        *voice = Voice::idle();
                    }
                }
            }
            _ => {}
        }
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let outputs = self.data.output_channels().min(output.channel_count());
        if self.data.bypassed() {
            bypass_mapping(input, output, self.data.input_channels(), outputs);
            return;
        }

        let volume_db = self.volume.domain_value();
        let master = 10.0_f32.powf(volume_db / 20.0);
        let attack = self.attack.domain_value();
        let decay = self.decay.domain_value();
        let sustain = self.sustain.domain_value();
        let release = self.release.domain_value();
        let sample = self.current_sample.as_slice();

        for voice in &mut self.voices {
            if !voice.active() {
                continue;
            }
            for frame in 0..BLOCK_SIZE {
                if voice.position as usize >= sample.len().saturating_sub(1) {
                    voice.stage = EnvelopeStage::Off;
                    break;
                }
                Self::step_envelope(voice, attack, decay, sustain, release, self.sample_rate);
                if !voice.active() {
                    break;
                }
                let index = voice.position as usize;
                let fraction = (voice.position - index as f64) as f32;
                let value = sample[index] * (1.0 - fraction) + sample[index + 1] * fraction;
                output.channel_mut(0)[frame] +=
                    value * voice.gain * voice.envelope * master;
                voice.position += voice.playback_rate;
            }
        }
        // Mono engine, duplicated to any further outputs.
        for channel in 1..outputs {
            output.duplicate_channel(0, channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn loaded_player(values: &[f32]) -> SamplePlayerPlugin {
        let mut plugin = SamplePlayerPlugin::new();
        plugin.init(48000.0).unwrap();
        plugin.shared.sample.store(Arc::new(values.to_vec()));
        plugin.process_event(RtEvent::async_work_completion(1, 1, 0));
        plugin
    }

    #[test]
    fn test_silent_without_sample() {
        let mut plugin = SamplePlayerPlugin::new();
        plugin.init(48000.0).unwrap();
        plugin.process_event(RtEvent::note_on(1, 0, 0, 60, 1.0));
        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        assert!(output.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_plays_loaded_sample() {
        let mut plugin = loaded_player(&vec![0.5; 4096]);
        plugin.process_event(RtEvent::note_on(1, 0, 0, 60, 1.0));
        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        plugin.process_audio(&input, &mut output);
        // Default envelope: zero attack, unity sustain, 0 dB volume.
        assert!(output.channel(0).iter().skip(1).any(|&s| s > 0.4));
    }

    #[test]
    fn test_note_off_releases() {
        let mut plugin = loaded_player(&vec![0.5; 1 << 20]);
        plugin.process_event(RtEvent::note_on(1, 0, 0, 60, 1.0));
        plugin.process_event(RtEvent::note_off(1, 0, 0, 60, 0.0));
        let input = SampleBuffer::new(2);
        let mut output = SampleBuffer::new(2);
        // 0.05 s release at 48 kHz is 2400 samples; run past it.
        for _ in 0..64 {
            output.clear();
            plugin.process_audio(&input, &mut output);
        }
        assert!(plugin.voices.iter().all(|v| !v.active()));
    }

    #[test]
    fn test_handler_loads_file() {
        let plugin = SamplePlayerPlugin::new();
        let handler = plugin.async_handler();

        let path = std::env::temp_dir().join("bento_sample_player_test.raw");
        std::fs::write(&path, sample_bytes(&[0.1, 0.2, 0.3])).unwrap();

        handler
            .set_property("sample_file", path.to_str().unwrap())
            .unwrap();
        assert_eq!(handler.run_task(1), 0);
        assert_eq!(plugin.shared.sample.load().len(), 3);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_handler_rejects_unknown_property() {
        let plugin = SamplePlayerPlugin::new();
        let handler = plugin.async_handler();
        assert!(handler.set_property("nope", "x").is_err());
    }

    #[test]
    fn test_missing_file_reports_failure() {
        let plugin = SamplePlayerPlugin::new();
        let handler = plugin.async_handler();
        handler
            .set_property("sample_file", "/nonexistent/bento.raw")
            .unwrap();
        assert_eq!(handler.run_task(1), 1);
    }
}
