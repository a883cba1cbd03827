//! Real-time playback of a source graph on an audio device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::Args;
use pulsar_config::{BackendConfig, VmConfig};
use pulsar_io::DeviceBackend;

use super::common::{GraphArgs, POLL_INTERVAL, build_vm, start};

#[derive(Args)]
pub struct PlayArgs {
    #[command(flatten)]
    graph: GraphArgs,

    /// Output device (partial name; default device if omitted)
    #[arg(short, long)]
    output: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short, long)]
    duration: Option<f64>,

    /// Ring buffer capacity in frames
    #[arg(long)]
    latency_frames: Option<usize>,
}

pub fn run(args: PlayArgs, mut config: VmConfig) -> anyhow::Result<()> {
    args.graph.apply(&mut config)?;

    // Device settings from the config file apply unless overridden.
    let (config_device, config_latency) = match &config.backend {
        BackendConfig::Device {
            device_name,
            latency_frames,
        } => (device_name.clone(), Some(*latency_frames)),
        _ => (None, None),
    };
    let device = args.output.clone().or(config_device);
    let mut backend = DeviceBackend::new(device, args.graph.channels(), config.frame_size);
    if let Some(frames) = args.latency_frames.or(config_latency) {
        backend = backend.with_latency_frames(frames);
    }

    let vm = build_vm(&config, &args.graph)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    start(&vm, Box::new(backend))?;
    println!("\nPlaying... Press Ctrl+C to stop.\n");

    let started = Instant::now();
    while running.load(Ordering::SeqCst) && !vm.wait_stopped(POLL_INTERVAL) {
        if let Some(limit) = args.duration
            && started.elapsed().as_secs_f64() >= limit
        {
            break;
        }
    }

    vm.cleanup()?;
    println!("Done!");
    Ok(())
}
