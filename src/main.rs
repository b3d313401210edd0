use chrono::Local;
use clap::Parser;
use cli::{Args, Command, UploadArgs};
use currentcost_bridge::config::Config;
use currentcost_bridge::pvoutput::PvOutputClient;
use currentcost_bridge::shared_store::{
    BridgeStore, MemoryStore, OverlayStore, SharedStore, HOUSE_POWER, SOLAR_POWER,
};
use currentcost_bridge::{poller, upload};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() {
    // Diagnostics go to stderr, stdout only carries the CSV data lines
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config)?;
    match args.command {
        Command::Poll => poller::run(&config).await,
        Command::Upload(upload_args) => upload_once(&config, upload_args).await,
    }
}

async fn upload_once(config: &Config, args: UploadArgs) -> anyhow::Result<()> {
    let bridge = BridgeStore::new(&config.bridge_url)?;
    let store: Box<dyn SharedStore> = if args.has_overrides() {
        // Keys given on the command line win, the rest still come from the bridge
        let values = [(SOLAR_POWER, &args.solar), (HOUSE_POWER, &args.house)];
        let overrides = MemoryStore::with_values(
            values
                .iter()
                .filter_map(|(key, value)| value.as_deref().map(|v| (*key, v))),
        );
        Box::new(OverlayStore::new(overrides, bridge))
    } else {
        Box::new(bridge)
    };

    let client = PvOutputClient::from_config(config)?;
    upload::run(store.as_ref(), &client, Local::now(), args.dry_run).await?;
    Ok(())
}
