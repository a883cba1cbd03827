//! Runs a source graph on whichever backend the config file selects.

use clap::Args;
use pulsar_config::VmConfig;

use super::common::{GraphArgs, POLL_INTERVAL, backend_from_config, build_vm, start};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    graph: GraphArgs,
}

pub fn run(args: RunArgs, mut config: VmConfig) -> anyhow::Result<()> {
    args.graph.apply(&mut config)?;
    let backend = backend_from_config(&config, args.graph.channels())?;
    let vm = build_vm(&config, &args.graph)?;

    tracing::info!(backend = config.backend.kind(), "running");
    start(&vm, backend)?;
    while !vm.wait_stopped(POLL_INTERVAL) {}
    vm.cleanup()?;
    Ok(())
}
