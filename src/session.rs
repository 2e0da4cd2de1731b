//! Session orchestrator (C10) and periodic scheduler (ambient, §10.6): the top-level driver that
//! ties the instance lock, the three worker pools, and the post-ingest driver into one pipeline
//! invocation, and re-runs that invocation on a configured interval.
//!
//! Distinct from [`crate::db::CrawlingSession`], which is just the tracker row this module opens
//! and closes around each run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::db::Tracker;
use crate::discovery::Discovery;
use crate::download::{DownloadConfig, DownloadPool, ExtractionSubmitter};
use crate::error::Error;
use crate::extraction::{ExtractionPool, ValidatorConfig};
use crate::lock::InstanceLock;
use crate::post_ingest::{PostIngestConfig, PostIngestDriver};
use crate::tokenizer::Tokenizer;
use crate::types::SessionId;

/// Outcome of one full pipeline invocation.
#[derive(Debug, Clone, Copy)]
pub struct SessionOutcome {
    /// The `crawling_session` row this run recorded its work under.
    pub session_id: SessionId,
    /// `true` iff post-ingest reported no document failures and the overview step exited 0.
    pub success: bool,
    /// Number of documents that failed at any post-ingest stage.
    pub failed_documents: usize,
}

/// Holds the instance lock and the services a single run needs: the tracker, the filename
/// tokenizer, and the resolved runtime configuration. Lives for the whole process, across every
/// periodic tick — the lock is acquired once at [`Session::open`] and released once at
/// [`Session::close`], never re-acquired between ticks.
pub struct Session {
    lock: InstanceLock,
    tracker: Tracker,
    tokenizer: Arc<Tokenizer>,
    config: RuntimeConfig,
}

impl Session {
    /// Acquire the instance lock at `lock_path`, open the tracker at `config.database_path`, and
    /// compile the configured tokenizer patterns.
    pub async fn open(config: RuntimeConfig, lock_path: impl Into<std::path::PathBuf>) -> Result<Self, Error> {
        let lock = InstanceLock::acquire(lock_path)?;
        let tracker = Tracker::open(&config.database_path).await?;
        let tokenizer = Arc::new(
            Tokenizer::new(
                &config.tokenizer_zip_pattern,
                &config.tokenizer_xml_pattern,
                config.known_centres.clone(),
            )
            .map_err(|e| Error::Config(format!("invalid tokenizer pattern: {e}")))?,
        );
        Ok(Self { lock, tracker, tokenizer, config })
    }

    /// Run discovery, then downloads (draining their attendant extractions), then post-ingest,
    /// recording a `crawling_session` row around the whole run (§4.10, §5 ordering guarantee).
    pub async fn run_once(&self) -> Result<SessionOutcome, Error> {
        for dir in self.config.todo_dirs() {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let session_id = self.tracker.open_session().await?;
        tracing::info!(session_id = session_id.get(), "session started");

        let discovery = Discovery::new(self.tracker.clone(), self.tokenizer.clone(), self.config.pool_size);
        if let Err(e) = discovery.run().await {
            tracing::warn!(session_id = session_id.get(), error = %e, "discovery phase failed");
        }

        let extraction = Arc::new(ExtractionPool::new(
            self.tracker.clone(),
            self.tokenizer.clone(),
            ValidatorConfig {
                validator_bin: self.config.validator_bin.clone().unwrap_or_default(),
                properties_path: self.config.tools.validator.clone(),
                resources_properties_path: self.config.tools.resources.clone(),
                pool_size: self.config.pool_size,
            },
        ));

        let download = DownloadPool::new(
            self.tracker.clone(),
            DownloadConfig {
                pool_size: self.config.downloaders,
                max_retries: self.config.retries,
                backup_dir: self.config.data_dir.clone(),
            },
            extraction.clone() as Arc<dyn ExtractionSubmitter>,
        );
        if let Err(e) = download.run().await {
            tracing::warn!(session_id = session_id.get(), error = %e, "download phase failed");
        }
        // §5: downloads and their attendant extractions fully drain before post-ingest begins.
        extraction.join_all().await;

        let post_ingest = PostIngestDriver::new(
            self.tracker.clone(),
            PostIngestConfig {
                data_dir: self.config.data_dir.clone(),
                tools: self.config.tools.clone(),
                serializer_bin: self.config.serializer_bin.clone(),
                integrity_checker_bin: self.config.integrity_checker_bin.clone(),
                context_builder_bin: self.config.context_builder_bin.clone(),
                overview_builder_bin: self.config.overview_builder_bin.clone(),
                overview_database_name: self.config.overview_database_name.clone(),
            },
        );
        let outcome = post_ingest.run(session_id).await?;

        self.tracker.close_session(session_id, outcome.success).await?;
        tracing::info!(
            session_id = session_id.get(),
            success = outcome.success,
            failed_documents = outcome.failed_documents,
            "session finished"
        );

        let session_outcome = SessionOutcome {
            session_id,
            success: outcome.success,
            failed_documents: outcome.failed_documents,
        };

        if let Some(to) = self.config.report_email.clone() {
            let tasks = self.tracker.session_tasks(session_id).await?;
            let relay_host = self.config.smtp_relay_host.clone();
            let report_outcome = session_outcome;
            let sent = tokio::task::spawn_blocking(move || {
                crate::report::send(&to, &relay_host, &report_outcome, &tasks)
            })
            .await
            .map_err(|e| Error::Other(format!("run-report task panicked: {e}")))?;
            if let Err(e) = sent {
                tracing::warn!(session_id = session_id.get(), error = %e, "could not send run report");
            }
        }

        Ok(session_outcome)
    }

    /// Periodic delay configured for this run, if any (`-p`).
    pub fn period(&self) -> Option<Duration> {
        self.config.period
    }

    /// Release the instance lock and close the tracker's connection pool. Called once, on clean
    /// process shutdown; an unclean exit simply drops the [`Session`], which still releases the
    /// OS-level lock (via [`InstanceLock`]'s `Drop`) but leaves the lock file on disk.
    pub async fn close(self) -> Result<(), Error> {
        self.tracker.close().await;
        self.lock.release()?;
        Ok(())
    }
}

/// Drives repeated [`Session::run_once`] invocations on the configured interval, skipping a tick
/// if the previous one is still running (§4.10, §10.6) instead of queueing it up behind it.
/// Grounded on the teacher's `rss_scheduler.rs`: an interval-driven loop checking a shutdown flag
/// each iteration, except here each tick's work is spawned so a slow run can't block the ticker
/// itself — the `in_progress` flag is what actually enforces the re-entrancy guard.
pub struct Scheduler {
    session: Arc<Session>,
    period: Duration,
    in_progress: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// Build a scheduler over `session`, ticking every `period`.
    pub fn new(session: Arc<Session>, period: Duration) -> Self {
        Self {
            session,
            period,
            in_progress: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle the caller can flip to stop the scheduler after its current wait.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run the first tick immediately, then one tick per `period` until `shutdown_handle` is
    /// set. Returns once the loop has observed shutdown; in-flight ticks are not waited on.
    pub async fn run(self) {
        tracing::info!(period = ?self.period, "session scheduler started");

        self.spawn_tick();

        let mut ticker = tokio::time::interval(self.period);
        ticker.tick().await; // consume the immediate first tick, already run above

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.spawn_tick();
        }

        tracing::info!("session scheduler shut down");
    }

    fn spawn_tick(&self) {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            tracing::warn!("previous session tick still running, skipping this tick");
            return;
        }

        let session = self.session.clone();
        let in_progress = self.in_progress.clone();
        tokio::spawn(async move {
            match session.run_once().await {
                Ok(outcome) => tracing::info!(
                    session_id = outcome.session_id.get(),
                    success = outcome.success,
                    "session tick complete"
                ),
                Err(e) => tracing::error!(error = %e, "session tick failed"),
            }
            in_progress.store(false, Ordering::SeqCst);
        });
    }
}
