//! Shared scaffolding for integration tests.

use std::time::{Duration, Instant};

use bento::frontend::OfflineFrontend;
use bento::{BentoEngine, BLOCK_SIZE};

pub const SAMPLE_RATE: f32 = 48000.0;

/// Build an engine and hand its RT half to an offline frontend.
pub fn engine_with_frontend(channels: usize) -> (BentoEngine, OfflineFrontend) {
    let engine = BentoEngine::builder().sample_rate(SAMPLE_RATE).build();
    let rt = engine.take_audio_engine().expect("fresh engine has its RT half");
    let frontend = OfflineFrontend::new(rt, channels, SAMPLE_RATE);
    (engine, frontend)
}

/// Render one block of a constant signal on channel 0 and return all output
/// channels.
pub fn render_constant(frontend: &mut OfflineFrontend, channels: usize, value: f32) -> Vec<Vec<f32>> {
    let filled = vec![value; BLOCK_SIZE];
    let silence = vec![0.0f32; BLOCK_SIZE];
    let mut input: Vec<&[f32]> = Vec::new();
    for channel in 0..channels {
        input.push(if channel == 0 { &filled } else { &silence });
    }
    let mut output = vec![Vec::new(); channels];
    frontend
        .process_block(&input, &mut output)
        .expect("block renders");
    output
}

/// Keep rendering until `condition` holds on the output, with a deadline.
/// Control-side events travel through the dispatcher thread, so the block
/// that first shows an effect is not deterministic.
pub fn render_until(
    frontend: &mut OfflineFrontend,
    channels: usize,
    value: f32,
    mut condition: impl FnMut(&[Vec<f32>]) -> bool,
) -> Vec<Vec<f32>> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let output = render_constant(frontend, channels, value);
        if condition(&output) {
            return output;
        }
        assert!(Instant::now() < deadline, "condition never held");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Wait for a control-side condition while pumping silent blocks.
pub fn settle(frontend: &mut OfflineFrontend, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        frontend.run_silent(1);
        assert!(Instant::now() < deadline, "condition never held");
        std::thread::sleep(Duration::from_millis(1));
    }
}
