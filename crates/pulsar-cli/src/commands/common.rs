//! Shared CLI helpers used across multiple commands.

use std::path::Path;
use std::time::Duration;

use clap::{Args, ValueEnum};
use pulsar_config::{BackendConfig, VmConfig};
use pulsar_core::nodes::{Gain, NoiseSource, SineSource, Sink};
use pulsar_core::{Backend, NodeId, NullBackend, PipelineVm};
use pulsar_io::{DeviceBackend, WavBackend};

/// Poll interval of commands waiting for the VM to stop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signal generator at the head of the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Sine oscillator
    Sine,
    /// White noise
    Noise,
}

/// The `source -> gain -> sink` graph shared by every command.
#[derive(Args, Clone, Debug)]
pub struct GraphArgs {
    /// Signal source
    #[arg(long, value_enum, default_value = "sine")]
    pub source: SourceKind,

    /// Sine frequency in Hz
    #[arg(long, default_value = "440.0")]
    pub freq: f32,

    /// Linear output gain
    #[arg(long, default_value = "0.5")]
    pub gain: f32,

    /// Feed the same signal to a stereo sink instead of a mono one
    #[arg(long)]
    pub stereo: bool,

    /// Samples per frame (overrides the config file)
    #[arg(long)]
    pub frame_size: Option<usize>,

    /// Sample rate in Hz (overrides the config file)
    #[arg(long)]
    pub sample_rate: Option<u32>,
}

impl GraphArgs {
    /// Sink channel names, in output order.
    pub fn channels(&self) -> Vec<String> {
        if self.stereo {
            vec!["left".into(), "right".into()]
        } else {
            vec!["mono".into()]
        }
    }

    /// Applies command-line overrides to `config` and validates the result.
    pub fn apply(&self, config: &mut VmConfig) -> anyhow::Result<()> {
        if let Some(frame_size) = self.frame_size {
            config.frame_size = frame_size;
        }
        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate = sample_rate;
        }
        config.validate()?;
        Ok(())
    }
}

/// Loads the VM configuration, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<VmConfig> {
    let config = VmConfig::load_or_default(path)?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

/// Builds a VM holding the `source -> gain -> sink` graph and compiles it.
pub fn build_vm(config: &VmConfig, graph: &GraphArgs) -> anyhow::Result<PipelineVm> {
    let vm = PipelineVm::new(config.sample_rate, config.frame_size).with_seed(config.seed);
    let source: Box<dyn pulsar_core::Node> = match graph.source {
        SourceKind::Sine => Box::new(SineSource::new("source", graph.freq)),
        SourceKind::Noise => Box::new(NoiseSource::new("source")),
    };
    vm.add_node(source)?;
    vm.add_node(Box::new(Gain::new("gain", graph.gain)))?;
    vm.add_node(Box::new(Sink::new("sink", graph.channels())))?;

    let (source, gain, sink) = (NodeId::new("source"), NodeId::new("gain"), NodeId::new("sink"));
    vm.connect_ports(&source, "out", &gain, "in")?;
    for channel in graph.channels() {
        vm.connect_ports(&gain, "out", &sink, &channel)?;
    }
    let spec = vm.update_spec()?;
    tracing::info!(
        opcodes = spec.opcodes().len(),
        buffers = spec.buffers().len(),
        "graph compiled"
    );
    Ok(vm)
}

/// Number of whole frames covering `seconds` of audio.
pub fn frames_for(seconds: f64, sample_rate: u32, frame_size: usize) -> u64 {
    let samples = (seconds.max(0.0) * f64::from(sample_rate)).ceil();
    (samples / frame_size.max(1) as f64).ceil() as u64
}

/// Instantiates the backend a config file selects.
pub fn backend_from_config(
    config: &VmConfig,
    channels: Vec<String>,
) -> anyhow::Result<Box<dyn Backend>> {
    let backend: Box<dyn Backend> = match &config.backend {
        BackendConfig::Null {
            realtime,
            max_frames,
        } => {
            let mut backend = NullBackend::new(config.frame_size).with_realtime(*realtime);
            if let Some(max) = max_frames {
                backend = backend.with_max_frames(*max);
            }
            Box::new(backend)
        }
        BackendConfig::Wav { path, max_frames } => {
            let Some(max) = max_frames else {
                anyhow::bail!("wav backend in config needs max_frames");
            };
            Box::new(WavBackend::new(path, channels, config.frame_size).with_max_frames(*max))
        }
        BackendConfig::Device {
            device_name,
            latency_frames,
        } => Box::new(
            DeviceBackend::new(device_name.clone(), channels, config.frame_size)
                .with_latency_frames(*latency_frames),
        ),
    };
    Ok(backend)
}

/// Installs `backend`, starts the VM and returns once it is running.
pub fn start(vm: &PipelineVm, backend: Box<dyn Backend>) -> anyhow::Result<()> {
    vm.set_backend(Some(backend))?;
    vm.setup()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(stereo: bool) -> GraphArgs {
        GraphArgs {
            source: SourceKind::Sine,
            freq: 440.0,
            gain: 0.5,
            stereo,
            frame_size: None,
            sample_rate: None,
        }
    }

    #[test]
    fn test_frames_for_rounds_up() {
        assert_eq!(frames_for(1.0, 44100, 128), 345);
        assert_eq!(frames_for(0.0, 44100, 128), 0);
        assert_eq!(frames_for(0.5, 256, 128), 1);
    }

    #[test]
    fn test_channels() {
        assert_eq!(graph(false).channels(), vec!["mono"]);
        assert_eq!(graph(true).channels(), vec!["left", "right"]);
    }

    #[test]
    fn test_overrides_validated() {
        let mut config = VmConfig::default();
        let mut args = graph(false);
        args.frame_size = Some(64);
        args.apply(&mut config).unwrap();
        assert_eq!(config.frame_size, 64);

        args.frame_size = Some(0);
        assert!(args.apply(&mut config).is_err());
    }

    #[test]
    fn test_build_vm_compiles_graph() {
        let vm = build_vm(&VmConfig::default(), &graph(true)).unwrap();
        let spec = vm.spec().unwrap();
        assert_eq!(spec.frame_size(), 128);
        assert_eq!(vm.node_ids().len(), 3);
    }

    #[test]
    fn test_wav_config_needs_frame_limit() {
        let config = VmConfig {
            backend: BackendConfig::Wav {
                path: "x.wav".into(),
                max_frames: None,
            },
            ..VmConfig::default()
        };
        assert!(backend_from_config(&config, vec!["mono".into()]).is_err());
    }
}
