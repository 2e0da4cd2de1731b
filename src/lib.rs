//! # centre-crawler
//!
//! Periodic multi-source ingestion pipeline: discovers zip packages on remote FTP/SFTP hosts,
//! downloads and extracts them, validates their inner XML documents against a schema, and drives
//! them through a configurable chain of downstream subprocess tools (serializer, integrity
//! checker, context builder, overview builder).
//!
//! ## Quick start
//!
//! ```no_run
//! use clap::Parser;
//! use centre_crawler::config::{CliArgs, RuntimeConfig};
//! use centre_crawler::lock::DEFAULT_LOCK_PATH;
//! use centre_crawler::session::Session;
//! use centre_crawler::run_with_shutdown;
//!
//! # async fn example() -> centre_crawler::Result<()> {
//! let args = CliArgs::parse();
//! let config = RuntimeConfig::load(&args).await?;
//! let session = Session::open(config, DEFAULT_LOCK_PATH).await?;
//! run_with_shutdown(session).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration (C11, ambient): CLI surface plus the resolved runtime settings.
pub mod config;
/// Tracker store (C1): persistent pipeline state.
pub mod db;
/// Discovery workers (C6).
pub mod discovery;
/// Download workers (C7).
pub mod download;
/// Error types.
pub mod error;
/// Extractor workers (C8).
pub mod extraction;
/// Single-instance lock (C5).
pub mod lock;
/// Post-ingest driver (C9).
pub mod post_ingest;
/// Progress meter (C4).
pub mod progress;
/// Java `.properties` file parser, backing the crawler/tool configuration files.
pub mod properties;
/// Source-rating comparator (C3).
pub mod rating;
/// Run-report e-mail (`-r`).
pub mod report;
/// Retry logic with exponential backoff.
pub mod retry;
/// Session orchestrator (C10) and periodic scheduler.
pub mod session;
/// Filename tokenizer (C2).
pub mod tokenizer;
/// Remote transport drivers (FTP/SFTP), supplementing C6/C7.
pub mod transport;
/// Core types: newtype ids, Phase/Status/ProcessingType enums.
pub mod types;

pub use config::{CliArgs, RuntimeConfig};
pub use db::Tracker;
pub use error::{Error, Result};
pub use session::{Scheduler, Session, SessionOutcome};

/// Run `session` to completion, handling graceful shutdown on SIGTERM/SIGINT (Unix) or Ctrl+C.
///
/// A one-shot session (`-p 0`) runs once and returns once post-ingest has closed the session row.
/// A periodic session runs its first tick immediately, then on the configured interval, until a
/// termination signal arrives; the in-flight tick (if any) is allowed to finish before the
/// instance lock is released.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(session: Session) -> Result<()> {
    match session.period() {
        None => {
            let outcome = session.run_once().await?;
            session.close().await?;
            if !outcome.success {
                tracing::warn!(failed_documents = outcome.failed_documents, "session completed with failures");
            }
            Ok(())
        }
        Some(period) => {
            let session = std::sync::Arc::new(session);
            let scheduler = Scheduler::new(session.clone(), period);
            let shutdown = scheduler.shutdown_handle();

            let handle = tokio::spawn(scheduler.run());
            wait_for_signal().await;
            shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
            let _ = handle.await;

            match std::sync::Arc::try_unwrap(session) {
                Ok(session) => session.close().await?,
                Err(_) => {
                    tracing::warn!("a session tick was still running at shutdown; instance lock file left on disk");
                }
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
