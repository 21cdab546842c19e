//! Session loading end to end: host config, track graphs, audio routing.

mod helpers;
use helpers::*;

use bento::BLOCK_SIZE;

#[test]
fn test_host_config_sets_sample_rate() {
    // Start away from the target rate so the change is observable.
    let engine = bento::BentoEngine::builder().sample_rate(44100.0).build();
    let rt = engine.take_audio_engine().unwrap();
    let mut frontend = bento::frontend::OfflineFrontend::new(rt, 2, 44100.0);

    engine
        .load_session(r#"{ "host_config": { "samplerate": 48000 } }"#)
        .unwrap();

    // The rate change is adopted at a block boundary.
    settle(&mut frontend, || engine.sample_rate() == 48000.0);
}

#[test]
fn test_two_track_graph_renders() {
    let (engine, mut frontend) = engine_with_frontend(2);
    let session = r#"{
        "host_config": { "samplerate": 48000 },
        "tracks": [
            {
                "name": "main_l",
                "mode": "mono",
                "inputs": [{"engine_channel": 0, "track_channel": 0}],
                "outputs": [{"engine_channel": 0, "track_channel": 0}],
                "plugins": [{"name": "gain_l", "type": "internal", "uid": "bento.gain"}]
            },
            {
                "name": "main_r",
                "mode": "mono",
                "inputs": [{"engine_channel": 1, "track_channel": 0}],
                "outputs": [{"engine_channel": 1, "track_channel": 0}],
                "plugins": [{"name": "gain_r", "type": "internal", "uid": "bento.gain"}]
            }
        ]
    }"#;
    engine.load_session(session).unwrap();

    let gain = engine.controller().container().id_from_name("gain_l").unwrap();
    engine.controller().set_parameter_value(gain, 0, 1.0).unwrap();

    // 0.5 into engine channel 0: channel 0 comes back at unity gain,
    // channel 1 stays at its initial zero.
    let output = render_until(&mut frontend, 2, 0.5, |out| {
        out[0].iter().all(|&s| (s - 0.5).abs() < 1e-6)
    });
    assert_eq!(output[0].len(), BLOCK_SIZE);
    assert!(output[1].iter().all(|&s| s == 0.0));
}

#[test]
fn test_unknown_plugin_type_fails_as_configuration_error() {
    let (engine, _frontend) = engine_with_frontend(2);
    let session = r#"{
        "tracks": [
            {
                "name": "t",
                "mode": "mono",
                "plugins": [{"name": "x", "type": "vst3x", "uid": "u"}]
            }
        ]
    }"#;
    // A well-formed file with an unsupported plugin type is a configuration
    // error, not a file error.
    assert!(matches!(
        engine.load_session(session),
        Err(bento::ConfigError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_unknown_internal_uid_fails() {
    let (engine, _frontend) = engine_with_frontend(2);
    let session = r#"{
        "tracks": [
            {
                "name": "t",
                "mode": "mono",
                "plugins": [{"name": "x", "type": "internal", "uid": "bento.missing"}]
            }
        ]
    }"#;
    assert!(matches!(
        engine.load_session(session),
        Err(bento::ConfigError::InvalidPluginPath(_))
    ));
}

#[test]
fn test_duplicate_track_name_fails() {
    let (engine, _frontend) = engine_with_frontend(2);
    let session = r#"{
        "tracks": [
            {"name": "t", "mode": "mono"},
            {"name": "t", "mode": "stereo"}
        ]
    }"#;
    assert!(matches!(
        engine.load_session(session),
        Err(bento::ConfigError::InvalidTrackName(_))
    ));
}

#[test]
fn test_scheduled_events_fire_at_their_time() {
    let (engine, mut frontend) = engine_with_frontend(2);
    let session = r#"{
        "tracks": [
            {
                "name": "main",
                "mode": "mono",
                "inputs": [{"engine_channel": 0, "track_channel": 0}],
                "outputs": [{"engine_channel": 0, "track_channel": 0}],
                "plugins": [{"name": "gain", "type": "internal", "uid": "bento.gain"}]
            }
        ],
        "events": [
            {"type": "parameter_change", "time": 0.0,
             "plugin_name": "gain", "parameter_name": "gain", "value": 0.25}
        ]
    }"#;
    engine.load_session(session).unwrap();

    let output = render_until(&mut frontend, 2, 1.0, |out| {
        out[0].iter().all(|&s| (s - 0.25).abs() < 1e-6)
    });
    assert!(output[0].iter().all(|&s| (s - 0.25).abs() < 1e-6));
}
