use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use hl7_listener::cli::Args;
use hl7_listener::Listener;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // clap exits with usage on bad arguments, before anything is bound
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            warn!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let (config, archive) = args.into_config()?;
    info!("Saving received messages to {}", archive.directory().display());

    let handle = Listener::new(config, Arc::new(archive))
        .start()
        .await
        .context("Unable to start the listener")?;

    tokio::signal::ctrl_c()
        .await
        .context("Unable to listen for the shutdown signal")?;

    handle.request_stop();
    handle.join().await;
    Ok(())
}
