//! Renders pipeline VM output into WAV files and reads it back.

use std::f64::consts::TAU;
use std::time::Duration;

use pulsar_core::nodes::{Gain, NoiseSource, SineSource, Sink};
use pulsar_core::{NodeId, PipelineVm};
use pulsar_io::{WavBackend, read_wav_channels};
use tempfile::tempdir;

const SAMPLE_RATE: u32 = 44100;
const FRAME: usize = 128;

fn id(s: &str) -> NodeId {
    NodeId::new(s)
}

#[test]
fn test_render_stereo_graph_to_wav() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("render.wav");

    let vm = PipelineVm::new(SAMPLE_RATE, FRAME);
    vm.add_node(Box::new(SineSource::new("osc", 441.0))).unwrap();
    vm.add_node(Box::new(NoiseSource::new("noise"))).unwrap();
    vm.add_node(Box::new(Gain::new("quiet", 0.5))).unwrap();
    vm.add_node(Box::new(Sink::stereo("out"))).unwrap();
    vm.connect_ports(&id("osc"), "out", &id("out"), "left").unwrap();
    vm.connect_ports(&id("noise"), "out", &id("quiet"), "in")
        .unwrap();
    vm.connect_ports(&id("quiet"), "out", &id("out"), "right")
        .unwrap();
    vm.update_spec().unwrap();

    let backend = WavBackend::new(&path, ["left", "right"], FRAME).with_max_frames(50);
    vm.set_backend(Some(Box::new(backend))).unwrap();
    vm.setup().unwrap();
    assert!(vm.wait_stopped(Duration::from_secs(20)));
    // Cleanup finalizes the WAV header.
    vm.cleanup().unwrap();

    let (channels, sr) = read_wav_channels(&path).unwrap();
    assert_eq!(sr, SAMPLE_RATE);
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].len(), 50 * FRAME);
    assert_eq!(channels[1].len(), 50 * FRAME);

    let step = TAU * 441.0 / f64::from(SAMPLE_RATE);
    for (n, &s) in channels[0].iter().enumerate() {
        let expected = (n as f64 * step).sin() as f32;
        assert!((s - expected).abs() < 1e-4, "sample {n}: {s} vs {expected}");
    }
    assert!(channels[1].iter().all(|s| (-0.5..0.5).contains(s)));
    assert!(channels[1].iter().any(|&s| s != 0.0));
}

#[test]
fn test_mono_sink_unknown_to_backend_stops_vm() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mismatch.wav");

    let vm = PipelineVm::new(SAMPLE_RATE, FRAME);
    vm.add_node(Box::new(NoiseSource::new("noise"))).unwrap();
    vm.add_node(Box::new(Sink::mono("out"))).unwrap();
    vm.connect_ports(&id("noise"), "out", &id("out"), "mono")
        .unwrap();
    vm.update_spec().unwrap();

    // The sink writes "mono", the backend only knows "left": the first
    // frame's output fails and the loop ends without a fatal exit.
    let backend = WavBackend::new(&path, ["left"], FRAME).with_max_frames(10);
    vm.set_backend(Some(Box::new(backend))).unwrap();
    vm.setup().unwrap();
    assert!(vm.wait_stopped(Duration::from_secs(20)));
    vm.cleanup().unwrap();

    let (channels, _) = read_wav_channels(&path).unwrap();
    assert!(channels[0].is_empty());
}
