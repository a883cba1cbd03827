//! Offline rendering of a source graph into a WAV file.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use pulsar_config::VmConfig;
use pulsar_io::WavBackend;

use super::common::{GraphArgs, POLL_INTERVAL, build_vm, frames_for, start};

#[derive(Args)]
pub struct RenderArgs {
    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    #[command(flatten)]
    graph: GraphArgs,

    /// Number of frames to render (overrides --duration)
    #[arg(long)]
    frames: Option<u64>,

    /// Duration in seconds
    #[arg(short, long, default_value = "1.0")]
    duration: f64,
}

pub fn run(args: RenderArgs, mut config: VmConfig) -> anyhow::Result<()> {
    args.graph.apply(&mut config)?;
    let total = args
        .frames
        .unwrap_or_else(|| frames_for(args.duration, config.sample_rate, config.frame_size));
    if total == 0 {
        anyhow::bail!("nothing to render: zero frames requested");
    }

    let vm = build_vm(&config, &args.graph)?;
    let rendered = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&rendered);
    // Perf stats are published once per loop iteration.
    vm.listeners().perf.subscribe(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    println!(
        "Rendering {} frames of {} samples at {} Hz to {}",
        total,
        config.frame_size,
        config.sample_rate,
        args.output.display()
    );
    let backend = WavBackend::new(&args.output, args.graph.channels(), config.frame_size)
        .with_max_frames(total);
    start(&vm, Box::new(backend))?;

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({eta})")?
            .progress_chars("##-"),
    );
    while !vm.wait_stopped(POLL_INTERVAL) {
        pb.set_position(rendered.load(Ordering::Relaxed).min(total));
    }
    pb.set_position(total);
    pb.finish_with_message("done");

    vm.cleanup()?;
    println!(
        "Wrote {:.2}s of audio to {}",
        (total * config.frame_size as u64) as f64 / f64::from(config.sample_rate),
        args.output.display()
    );
    Ok(())
}
