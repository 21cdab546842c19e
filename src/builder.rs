//! Engine construction.

use std::sync::Arc;

use bento_core::controller::engine_with_controller;
use bento_core::event_dispatcher::EventDispatcher;
use bento_core::midi_dispatcher::MidiDispatcher;

use crate::engine::BentoEngine;

pub struct BentoEngineBuilder {
    sample_rate: f32,
    midi_inputs: usize,
    midi_outputs: usize,
}

impl BentoEngineBuilder {
    pub fn new() -> Self {
        Self {
            sample_rate: 44100.0,
            midi_inputs: 1,
            midi_outputs: 1,
        }
    }

    pub fn sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn midi_ports(mut self, inputs: usize, outputs: usize) -> Self {
        self.midi_inputs = inputs;
        self.midi_outputs = outputs;
        self
    }

    pub fn build(self) -> BentoEngine {
        let (audio_engine, controller, queues) = engine_with_controller(self.sample_rate);
        let midi_dispatcher = Arc::new(MidiDispatcher::new(
            controller.container().clone(),
            self.midi_inputs,
            self.midi_outputs,
        ));
        let dispatcher = EventDispatcher::spawn(
            queues.rt_sender,
            queues.output_receiver,
            queues.reclaim_receiver,
            controller.container().clone(),
            Arc::clone(&midi_dispatcher),
            controller.shared_transport(),
        );
        controller.connect_event_sink(dispatcher.sender());
        midi_dispatcher.connect_event_sink(dispatcher.sender());
        tracing::info!(sample_rate = self.sample_rate, "engine assembled");
        BentoEngine::assemble(controller, midi_dispatcher, dispatcher, audio_engine)
    }
}

impl Default for BentoEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
