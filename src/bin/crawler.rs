//! Thin entrypoint: parse CLI → load config → acquire the instance lock → run the session
//! orchestrator with signal handling. Mirrors the library's `run_with_shutdown`-based quick-start.

use std::process::ExitCode;

use clap::Parser;

use centre_crawler::config::{CliArgs, RuntimeConfig};
use centre_crawler::lock::DEFAULT_LOCK_PATH;
use centre_crawler::session::Session;
use centre_crawler::{run_with_shutdown, Error};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Error> {
    let args = CliArgs::parse();
    let config = RuntimeConfig::load(&args).await?;
    let session = Session::open(config, DEFAULT_LOCK_PATH).await?;
    run_with_shutdown(session).await
}
