//! Pulsar CLI - command-line front end for the pulsar pipeline VM.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pulsar")]
#[command(author, version, about = "Pulsar audio pipeline VM", long_about = None)]
struct Cli {
    /// VM configuration file (default: <config_dir>/pulsar/pulsar.toml, if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "pulsar_core=trace" (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a source graph into a WAV file
    Render(commands::render::RenderArgs),

    /// Play a source graph on an audio device
    Play(commands::play::PlayArgs),

    /// Run a source graph on the backend selected in the config file
    Run(commands::run::RunArgs),

    /// Print the compiled opcode listing of a source graph
    Dump(commands::dump::DumpArgs),

    /// List audio output devices
    Devices(commands::devices::DevicesArgs),
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let config = commands::common::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render(args) => commands::render::run(args, config),
        Commands::Play(args) => commands::play::run(args, config),
        Commands::Run(args) => commands::run::run(args, config),
        Commands::Dump(args) => commands::dump::run(args, config),
        Commands::Devices(args) => commands::devices::run(args),
    }
}
