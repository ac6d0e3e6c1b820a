use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vox_gateway::{Config, Daemon};

/// Vox - voice-first conversational gateway
#[derive(Parser)]
#[command(name = "vox-gateway", version, about)]
struct Cli {
    /// Bind address override (otherwise VOICE_WS_ADDR or the default)
    #[arg(long)]
    addr: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,vox_gateway=info",
        1 => "info,vox_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(addr) = cli.addr {
        config.ws_addr = addr;
    }

    tracing::info!(
        addr = %config.ws_addr,
        db = %config.memory.db_path.display(),
        "starting voice gateway"
    );

    let daemon = Daemon::new(config)?;
    daemon.run().await?;

    Ok(())
}
