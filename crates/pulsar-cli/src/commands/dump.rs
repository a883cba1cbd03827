//! Prints the compiled opcode listing of a source graph.

use clap::Args;
use pulsar_config::VmConfig;

use super::common::{GraphArgs, build_vm};

#[derive(Args)]
pub struct DumpArgs {
    #[command(flatten)]
    graph: GraphArgs,
}

pub fn run(args: DumpArgs, mut config: VmConfig) -> anyhow::Result<()> {
    args.graph.apply(&mut config)?;
    let vm = build_vm(&config, &args.graph)?;
    let Some(spec) = vm.spec() else {
        anyhow::bail!("graph produced no spec");
    };
    print!("{}", spec.dump());
    Ok(())
}
