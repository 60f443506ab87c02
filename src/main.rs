use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zcuflash::cli::Cli;
use zcuflash::flash::JobController;

async fn run(cli: Cli) -> zcuflash::Result<()> {
    info!(
        app_name = cli.app_name,
        channel = cli.channel,
        zone = ?cli.zone_type,
        "zcuflash starting"
    );

    let job = cli.build_job()?;
    let adapter = cli.open_link()?;
    let controller = JobController::new(adapter);

    tokio::select! {
        result = controller.execute(&job) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted by user");
            Err(zcuflash::Error::Interrupted)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
