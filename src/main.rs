use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use data_runtime::configs::{server, telemetry};

#[derive(Parser)]
#[command(author, version, about = "Tick-synchronized multiplayer world server", long_about = None)]
struct Cli {
    /// Server config (defaults to data/config/server.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Stop after this many ticks instead of running forever
    #[arg(long)]
    ticks: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let tcfg = telemetry::load_default()?;
    let _guard = server_core::telemetry::init_telemetry(&tcfg)?;
    let cfg = server::load(cli.config.as_deref())?;
    log::info!(
        "config: {}x{}x{} tiles, {} ms ticks, bind {}",
        cfg.world.size[0],
        cfg.world.size[1],
        cfg.world.size[2],
        cfg.tick_ms,
        cfg.net.bind_addr
    );
    gridkeep::server::run(cfg, cli.ticks)
}
