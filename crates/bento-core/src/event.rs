//! Sample-accurate events for the audio thread.
//!
//! [`RtEvent`] is the only message type that crosses into `process_audio`.
//! Events are plain values, cheap to copy and free of heap pointers, so they
//! can travel through lock-free rings without ownership concerns. Each event
//! carries the id of its target processor and an offset in samples from the
//! start of the block it should apply to.

/// Process-wide identifier assigned at registration time. Never reused while
/// the object is alive.
pub type ObjectId = u32;

/// Identifier for a non-RT task round-trip (request and completion).
pub type EventId = u64;

/// Events addressed to this id are handled by the engine itself
/// (transport changes and similar) rather than a processor.
pub const ENGINE_TARGET: ObjectId = 0;

/// Maximum raw MIDI bytes carried inline by a wrapped MIDI event.
pub const MAX_MIDI_DATA_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtEvent {
    /// Offset in samples from the start of the block, `0 <= offset`.
    /// Events with an offset past the current block stay queued.
    pub sample_offset: u32,
    pub target: ObjectId,
    pub data: RtEventData,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtEventData {
    FloatParameterChange {
        parameter_id: ObjectId,
        /// Domain value; the receiving processor clamps to its range.
        value: f32,
    },
    IntParameterChange {
        parameter_id: ObjectId,
        value: i32,
    },
    BoolParameterChange {
        parameter_id: ObjectId,
        value: bool,
    },
    NoteOn {
        channel: u8,
        note: u8,
        /// Velocity normalised to [0, 1].
        velocity: f32,
    },
    NoteOff {
        channel: u8,
        note: u8,
        velocity: f32,
    },
    NoteAftertouch {
        channel: u8,
        note: u8,
        value: f32,
    },
    PitchBend {
        channel: u8,
        /// Bend normalised to [-1, 1].
        value: f32,
    },
    Modulation {
        channel: u8,
        value: f32,
    },
    Aftertouch {
        channel: u8,
        value: f32,
    },
    WrappedMidi {
        bytes: [u8; MAX_MIDI_DATA_BYTES],
        len: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    SetBypass {
        bypassed: bool,
    },
    AsyncWork {
        event_id: EventId,
    },
    AsyncWorkCompletion {
        event_id: EventId,
        status: i32,
    },
    Tempo {
        bpm: f32,
    },
    TimeSignature {
        numerator: u8,
        denominator: u8,
    },
    SetPlaying {
        playing: bool,
    },
}

impl RtEvent {
    pub fn new(target: ObjectId, sample_offset: u32, data: RtEventData) -> Self {
        Self {
            sample_offset,
            target,
            data,
        }
    }

    pub fn float_parameter_change(
        target: ObjectId,
        sample_offset: u32,
        parameter_id: ObjectId,
        value: f32,
    ) -> Self {
        Self::new(
            target,
            sample_offset,
            RtEventData::FloatParameterChange {
                parameter_id,
                value,
            },
        )
    }

    pub fn int_parameter_change(
        target: ObjectId,
        sample_offset: u32,
        parameter_id: ObjectId,
        value: i32,
    ) -> Self {
        Self::new(
            target,
            sample_offset,
            RtEventData::IntParameterChange {
                parameter_id,
                value,
            },
        )
    }

    pub fn bool_parameter_change(
        target: ObjectId,
        sample_offset: u32,
        parameter_id: ObjectId,
        value: bool,
    ) -> Self {
        Self::new(
            target,
            sample_offset,
            RtEventData::BoolParameterChange {
                parameter_id,
                value,
            },
        )
    }

    pub fn note_on(target: ObjectId, sample_offset: u32, channel: u8, note: u8, velocity: f32) -> Self {
        Self::new(
            target,
            sample_offset,
            RtEventData::NoteOn {
                channel,
                note,
                velocity,
            },
        )
    }

    pub fn note_off(target: ObjectId, sample_offset: u32, channel: u8, note: u8, velocity: f32) -> Self {
        Self::new(
            target,
            sample_offset,
            RtEventData::NoteOff {
                channel,
                note,
                velocity,
            },
        )
    }

    pub fn note_aftertouch(
        target: ObjectId,
        sample_offset: u32,
        channel: u8,
        note: u8,
        value: f32,
    ) -> Self {
        Self::new(
            target,
            sample_offset,
            RtEventData::NoteAftertouch {
                channel,
                note,
                value,
            },
        )
    }

    pub fn pitch_bend(target: ObjectId, sample_offset: u32, channel: u8, value: f32) -> Self {
        Self::new(target, sample_offset, RtEventData::PitchBend { channel, value })
    }

    pub fn modulation(target: ObjectId, sample_offset: u32, channel: u8, value: f32) -> Self {
        Self::new(target, sample_offset, RtEventData::Modulation { channel, value })
    }

    pub fn aftertouch(target: ObjectId, sample_offset: u32, channel: u8, value: f32) -> Self {
        Self::new(target, sample_offset, RtEventData::Aftertouch { channel, value })
    }

    pub fn wrapped_midi(target: ObjectId, sample_offset: u32, data: &[u8]) -> Self {
        let mut bytes = [0u8; MAX_MIDI_DATA_BYTES];
        let len = data.len().min(MAX_MIDI_DATA_BYTES);
        bytes[..len].copy_from_slice(&data[..len]);
        Self::new(
            target,
            sample_offset,
            RtEventData::WrappedMidi {
                bytes,
                len: len as u8,
            },
        )
    }

    pub fn program_change(target: ObjectId, sample_offset: u32, channel: u8, program: u8) -> Self {
        Self::new(
            target,
            sample_offset,
            RtEventData::ProgramChange { channel, program },
        )
    }

    pub fn set_bypass(target: ObjectId, sample_offset: u32, bypassed: bool) -> Self {
        Self::new(target, sample_offset, RtEventData::SetBypass { bypassed })
    }

    pub fn async_work(target: ObjectId, event_id: EventId) -> Self {
        Self::new(target, 0, RtEventData::AsyncWork { event_id })
    }

    pub fn async_work_completion(target: ObjectId, event_id: EventId, status: i32) -> Self {
        Self::new(
            target,
            0,
            RtEventData::AsyncWorkCompletion { event_id, status },
        )
    }

    pub fn tempo(bpm: f32) -> Self {
        Self::new(ENGINE_TARGET, 0, RtEventData::Tempo { bpm })
    }

    pub fn time_signature(numerator: u8, denominator: u8) -> Self {
        Self::new(
            ENGINE_TARGET,
            0,
            RtEventData::TimeSignature {
                numerator,
                denominator,
            },
        )
    }

    pub fn set_playing(playing: bool) -> Self {
        Self::new(ENGINE_TARGET, 0, RtEventData::SetPlaying { playing })
    }

    /// True for note and controller-style events a synth consumes from its
    /// keyboard input.
    #[inline]
    pub fn is_keyboard_event(&self) -> bool {
        matches!(
            self.data,
            RtEventData::NoteOn { .. }
                | RtEventData::NoteOff { .. }
                | RtEventData::NoteAftertouch { .. }
                | RtEventData::PitchBend { .. }
                | RtEventData::Modulation { .. }
                | RtEventData::Aftertouch { .. }
                | RtEventData::WrappedMidi { .. }
        )
    }

    #[inline]
    pub fn is_engine_event(&self) -> bool {
        matches!(
            self.data,
            RtEventData::Tempo { .. }
                | RtEventData::TimeSignature { .. }
                | RtEventData::SetPlaying { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_compact() {
        // The whole point of RtEvent is to fit in a machine word or two so
        // rings stay dense.
        assert!(std::mem::size_of::<RtEvent>() <= 32);
    }

    #[test]
    fn test_keyboard_classification() {
        let note = RtEvent::note_on(5, 0, 0, 60, 0.5);
        assert!(note.is_keyboard_event());
        assert!(!note.is_engine_event());

        let bypass = RtEvent::set_bypass(5, 0, true);
        assert!(!bypass.is_keyboard_event());

        let tempo = RtEvent::tempo(120.0);
        assert!(tempo.is_engine_event());
    }

    #[test]
    fn test_wrapped_midi_truncates() {
        let event = RtEvent::wrapped_midi(1, 0, &[0x90, 60, 100, 0, 7]);
        match event.data {
            RtEventData::WrappedMidi { bytes, len } => {
                assert_eq!(len, 4);
                assert_eq!(&bytes[..3], &[0x90, 60, 100]);
            }
            _ => panic!("wrong event type"),
        }
    }
}
