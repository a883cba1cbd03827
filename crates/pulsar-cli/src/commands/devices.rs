//! Audio device listing command.

use clap::Args;
use pulsar_io::list_devices;

#[derive(Args)]
pub struct DevicesArgs {
    /// Print only device names, one per line
    #[arg(long)]
    names: bool,
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    let devices = list_devices()?;

    if args.names {
        for device in &devices {
            println!("{}", device.name);
        }
        return Ok(());
    }

    if devices.is_empty() {
        println!("No audio output devices found.");
        return Ok(());
    }

    println!("Output Devices");
    println!("==============\n");
    for (idx, device) in devices.iter().enumerate() {
        let default = if device.is_default { " (default)" } else { "" };
        println!(
            "  [{}] {} ({} ch, {} Hz){}",
            idx, device.name, device.channels, device.default_sample_rate, default
        );
    }
    println!();
    println!("Tip: pass a partial name with --output:");
    println!("  pulsar play --output \"{}\"", devices[0].name);
    Ok(())
}
