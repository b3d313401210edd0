use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
pub struct Args {
    /// XML configuration file.
    #[clap(long, default_value = "config.xml", env = "CURRENTCOST_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read the CurrentCost monitor forever, recording every reading.
    #[clap(name = "poll")]
    Poll,

    /// Send the latest solar and house readings to PVOutput once.
    #[clap(name = "upload")]
    Upload(UploadArgs),
}

#[derive(Parser)]
pub struct UploadArgs {
    /// Solar power to send instead of the bridge's `SolarPower`.
    #[clap(long)]
    pub solar: Option<String>,

    /// House power to send instead of the bridge's `HousePower`.
    #[clap(long)]
    pub house: Option<String>,

    /// Log what would be sent without posting it.
    #[clap(long)]
    pub dry_run: bool,
}

impl UploadArgs {
    pub fn has_overrides(&self) -> bool {
        self.solar.is_some() || self.house.is_some()
    }
}
