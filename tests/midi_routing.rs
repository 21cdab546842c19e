//! MIDI routing end to end: CC mappings and the keyboard round trip.

mod helpers;
use helpers::*;

use std::sync::{Arc, Mutex};

use bento::frontend::MidiFrontend;

const GAIN_SESSION: &str = r#"{
    "tracks": [
        {
            "name": "t1",
            "mode": "stereo",
            "inputs": [{"engine_channel": 0, "track_channel": 0}],
            "outputs": [{"engine_channel": 0, "track_channel": 0}],
            "plugins": [
                {"name": "tap", "type": "internal", "uid": "bento.passthrough"},
                {"name": "gain", "type": "internal", "uid": "bento.gain"}
            ]
        }
    ]
}"#;

#[test]
fn test_cc_to_parameter_scaling() {
    let (engine, mut frontend) = engine_with_frontend(2);
    engine.load_session(GAIN_SESSION).unwrap();
    engine
        .midi_dispatcher()
        .connect_cc_to_parameter(0, "gain", "gain", 7, 0.0, 1.0, None)
        .unwrap();

    // CC 7 value 64 on any channel scales linearly into [0, 1].
    engine.midi_dispatcher().process_midi(0, &[0xB0, 7, 64], 0);

    let gain = engine.controller().container().id_from_name("gain").unwrap();
    settle(&mut frontend, || {
        let value = engine
            .controller()
            .parameter_value_in_domain(gain, 0)
            .unwrap();
        (value - 64.0 / 127.0).abs() < 1e-4
    });
}

#[test]
fn test_note_on_reaches_track_processors() {
    let (engine, mut frontend) = engine_with_frontend(2);
    engine.load_session(GAIN_SESSION).unwrap();
    engine
        .midi_dispatcher()
        .connect_kb_to_track(0, "t1", Some(3))
        .unwrap();

    struct Capture(Arc<Mutex<Vec<(usize, Vec<u8>)>>>);
    impl MidiFrontend for Capture {
        fn send_midi(&mut self, port: usize, data: &[u8], _timestamp_ns: u64) {
            self.0.lock().unwrap().push((port, data.to_vec()));
        }
    }
    let sent = Arc::new(Mutex::new(Vec::new()));
    engine.set_midi_frontend(Box::new(Capture(Arc::clone(&sent))));
    engine
        .midi_dispatcher()
        .connect_track_to_output(0, "t1", 2)
        .unwrap();

    // Note on, channel 3, note 60, velocity 100. The track fans it out to
    // its chain; the passthrough tap mirrors it back out, where the output
    // route re-encodes it onto channel 2.
    engine.midi_dispatcher().process_midi(0, &[0x93, 60, 100], 0);

    settle(&mut frontend, || !sent.lock().unwrap().is_empty());
    let sent = sent.lock().unwrap();
    let (port, bytes) = &sent[0];
    assert_eq!(*port, 0);
    assert_eq!(bytes.as_slice(), &[0x92, 60, 100]);
}

#[test]
fn test_omni_and_channel_routes_both_deliver() {
    let (engine, mut frontend) = engine_with_frontend(2);
    engine.load_session(GAIN_SESSION).unwrap();
    engine
        .midi_dispatcher()
        .connect_kb_to_track(0, "t1", None)
        .unwrap();
    engine
        .midi_dispatcher()
        .connect_kb_to_track(0, "t1", Some(3))
        .unwrap();

    struct Capture(Arc<Mutex<Vec<Vec<u8>>>>);
    impl MidiFrontend for Capture {
        fn send_midi(&mut self, _port: usize, data: &[u8], _timestamp_ns: u64) {
            self.0.lock().unwrap().push(data.to_vec());
        }
    }
    let sent = Arc::new(Mutex::new(Vec::new()));
    engine.set_midi_frontend(Box::new(Capture(Arc::clone(&sent))));
    engine
        .midi_dispatcher()
        .connect_track_to_output(0, "t1", 0)
        .unwrap();

    engine.midi_dispatcher().process_midi(0, &[0x93, 60, 100], 0);

    // Subscribed both OMNI and channel 3: two deliveries, by design.
    settle(&mut frontend, || sent.lock().unwrap().len() >= 2);
    assert_eq!(sent.lock().unwrap().len(), 2);
}

#[test]
fn test_midi_session_section() {
    let (engine, _frontend) = engine_with_frontend(2);
    let session = r#"{
        "tracks": [
            {
                "name": "t1",
                "mode": "stereo",
                "plugins": [{"name": "gain", "type": "internal", "uid": "bento.gain"}]
            }
        ],
        "midi": {
            "track_connections": [{"port": 0, "track": "t1", "channel": "omni"}],
            "cc_mappings": [
                {"port": 0, "channel": 5, "plugin_name": "gain",
                 "parameter_name": "gain", "cc_number": 11,
                 "min_range": 0.0, "max_range": 1.0}
            ]
        }
    }"#;
    engine.load_session(session).unwrap();
    assert_eq!(engine.midi_connections().len(), 2);

    // Bad port number surfaces as a config error.
    let bad = r#"{
        "midi": {
            "track_connections": [{"port": 99, "track": "t1", "channel": 0}]
        }
    }"#;
    assert!(matches!(
        engine.load_session(bad),
        Err(bento::ConfigError::InvalidMidiPort(99))
    ));
}
