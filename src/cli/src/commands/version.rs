//! `acr-sweep version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("acr-sweep version {}", acr_sweep_core::VERSION);
    Ok(())
}
