//! `dhi-migrate version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("dhi-migrate version {}", dhi_migrate_core::VERSION);
    Ok(())
}
