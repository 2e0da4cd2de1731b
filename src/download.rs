//! Download workers (C7): claim jobs, fetch bytes from the best-ranked candidate source, hand
//! off to extraction on success.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::db::{FileSource, Tracker};
use crate::error::Error;
use crate::progress::ProgressMeter;
use crate::rating::{AffinityRating, Candidate, SourceRating};
use crate::retry::{self, RetryConfig};
use crate::transport::{self, FileSourceDriver, SourceCredentials};
use crate::types::{Phase, Status, ZipActionId, ZipDownloadId};

/// A unit of work handed to the extraction pool once a download completes.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    /// The completed download this archive came from.
    pub zip_download_id: ZipDownloadId,
    /// The owning action, for phase/status escalation.
    pub zip_action_id: ZipActionId,
    /// Local path of the downloaded archive.
    pub archive_path: PathBuf,
}

/// Accepts completed downloads for extraction. Implemented by the extraction pool; kept as a
/// trait here so `download.rs` does not need to depend on `extraction.rs`'s internals, the same
/// separation `transport::FileSourceDriver` draws between discovery/download and the wire
/// protocol.
pub trait ExtractionSubmitter: Send + Sync {
    /// Hand off a completed download. Must not block; implementations spawn their own task.
    fn submit(&self, job: ExtractionJob);
}

/// Tunables for the download pool, taken from the CLI surface (§6).
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Number of concurrent downloader workers (`-a`).
    pub pool_size: usize,
    /// Per-source retry count (`-m`).
    pub max_retries: u32,
    /// Local data directory archives are written under (`-d`).
    pub backup_dir: PathBuf,
}

/// A fixed-size pool of download workers sharing one tracker and one extraction submitter.
pub struct DownloadPool {
    tracker: Tracker,
    config: DownloadConfig,
    rating: Arc<dyn SourceRating>,
    extraction: Arc<dyn ExtractionSubmitter>,
}

impl DownloadPool {
    /// Build a download pool using the default [`AffinityRating`] strategy.
    pub fn new(tracker: Tracker, config: DownloadConfig, extraction: Arc<dyn ExtractionSubmitter>) -> Self {
        Self {
            tracker,
            config,
            rating: Arc::new(AffinityRating),
            extraction,
        }
    }

    /// Run `pool_size` workers concurrently until every worker finds no claimable job,
    /// returning once the pool has fully drained.
    pub async fn run(&self) -> Result<(), Error> {
        let mut handles = Vec::with_capacity(self.config.pool_size);
        for worker_id in 0..self.config.pool_size.max(1) {
            let tracker = self.tracker.clone();
            let config = self.config.clone();
            let rating = self.rating.clone();
            let extraction = self.extraction.clone();
            handles.push(tokio::spawn(async move {
                run_worker(worker_id, tracker, config, rating, extraction).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "download worker task panicked");
            }
        }

        Ok(())
    }
}

async fn run_worker(
    worker_id: usize,
    tracker: Tracker,
    config: DownloadConfig,
    rating: Arc<dyn SourceRating>,
    extraction: Arc<dyn ExtractionSubmitter>,
) {
    let mut connections: HashMap<String, Box<dyn FileSourceDriver>> = HashMap::new();

    loop {
        let claim = match tracker.take_download_job().await {
            Ok(Some(claim)) => claim,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "failed to claim a download job");
                break;
            }
        };

        let (_fshz_id, _claimed_source_id, zip_action_id) = claim;
        if let Err(e) = attempt_action(
            &tracker,
            &config,
            rating.as_ref(),
            extraction.as_ref(),
            &mut connections,
            zip_action_id,
        )
        .await
        {
            tracing::warn!(worker_id, zip_action_id = zip_action_id.get(), error = %e, "download attempt failed");
        }
    }

    for (host, mut driver) in connections.drain() {
        tracing::debug!(host = %host, worker_id, "closing cached connection");
        driver.disconnect().await;
    }
}

async fn attempt_action(
    tracker: &Tracker,
    config: &DownloadConfig,
    rating: &dyn SourceRating,
    extraction: &dyn ExtractionSubmitter,
    connections: &mut HashMap<String, Box<dyn FileSourceDriver>>,
    zip_action_id: ZipActionId,
) -> Result<(), Error> {
    let action = tracker.get_zip_action(zip_action_id).await?;
    let zip_file = tracker.get_zip_file(action.zip_file_id).await?;
    let candidates = tracker.candidate_sources_for_action(zip_action_id).await?;

    if candidates.is_empty() {
        tracker
            .escalate_zip_action(zip_action_id, Phase::Download, Status::Failed)
            .await?;
        return Err(Error::Other(format!(
            "no hosting file source for zip action {}",
            zip_action_id.get()
        )));
    }

    let mut by_source_id = HashMap::new();
    let rated: Vec<Candidate> = candidates
        .iter()
        .map(|(fshz, fs)| {
            let same_centre = zip_file.centre_id == Some(fs.centre_id);
            by_source_id.insert(fshz.id.get(), (fshz.clone(), fs.clone()));
            Candidate {
                source_id: fshz.id.get(),
                same_centre,
            }
        })
        .collect();
    let ordered = rating.sort(rated);

    for candidate in ordered {
        let (fshz, source) = by_source_id
            .get(&candidate.source_id)
            .expect("candidate came from by_source_id's own keys")
            .clone();

        let retry_config = RetryConfig {
            max_attempts: config.max_retries.saturating_sub(1),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        };

        match retry::with_backoff(&retry_config, || {
            try_once(tracker, config, connections, &zip_file, &action, &source, fshz.id, zip_action_id)
        })
        .await
        {
            Ok(job) => {
                extraction.submit(job);
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    source_id = fshz.file_source_id.get(),
                    error = %e,
                    "download attempts exhausted for this source, trying next candidate"
                );
            }
        }
    }

    tracker
        .escalate_zip_action(zip_action_id, Phase::Download, Status::Failed)
        .await?;
    Ok(())
}

async fn try_once(
    tracker: &Tracker,
    config: &DownloadConfig,
    connections: &mut HashMap<String, Box<dyn FileSourceDriver>>,
    zip_file: &crate::db::ZipFile,
    action: &crate::db::ZipAction,
    source: &FileSource,
    fshz_id: crate::types::FileSourceHasZipId,
    zip_action_id: ZipActionId,
) -> Result<ExtractionJob, Error> {
    let todo = action.processing_type;
    let remote_path = join_remote_path(&source.base_path, todo.dir_name(), &zip_file.filename);
    let local_dir = config.backup_dir.join(todo.dir_name());
    let local_path = local_dir.join(&zip_file.filename);

    let download_id = tracker.start_download(fshz_id).await?;

    match fetch_to_disk(connections, source, &remote_path, &local_dir, &local_path, tracker.clone(), download_id).await {
        Ok(bytes_written) => {
            tracker.set_zip_file_size(zip_file.id, bytes_written as i64).await?;
            tracker
                .finish_download(download_id, Phase::Download, Status::Done)
                .await?;
            tracker
                .escalate_zip_action(zip_action_id, Phase::Download, Status::Done)
                .await?;
            Ok(ExtractionJob {
                zip_download_id: download_id,
                zip_action_id,
                archive_path: local_path,
            })
        }
        Err(e) => {
            tracker
                .finish_download(download_id, Phase::Download, Status::Failed)
                .await?;
            tracker
                .append_zip_log(download_id, "TransportError", &e.to_string())
                .await?;
            Err(e)
        }
    }
}

async fn fetch_to_disk(
    connections: &mut HashMap<String, Box<dyn FileSourceDriver>>,
    source: &FileSource,
    remote_path: &str,
    local_dir: &Path,
    local_path: &Path,
    tracker: Tracker,
    download_id: ZipDownloadId,
) -> Result<u64, Error> {
    if !connections.contains_key(&source.hostname) {
        let credentials = SourceCredentials {
            username: source.username.clone(),
            password: source.password.clone(),
        };
        let driver = transport::connect(source.protocol, &source.hostname, &credentials).await?;
        connections.insert(source.hostname.clone(), driver);
    }
    let driver = connections.get_mut(&source.hostname).expect("just inserted above");

    let mut remote = driver.open_stream(remote_path).await?;

    tokio::fs::create_dir_all(local_dir).await?;
    let mut file = tokio::fs::File::create(local_path).await?;

    let sink: Arc<dyn crate::progress::ProgressSink> =
        Arc::new(crate::db::TrackerProgressSink::new(tracker, download_id));
    let meter = ProgressMeter::new(0, sink);

    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = remote.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        meter.advance(n as u64);
    }
    file.flush().await?;

    Ok(meter.bytes_so_far())
}

fn join_remote_path(base_path: &str, todo: &str, filename: &str) -> String {
    let dir = if base_path.ends_with('/') {
        format!("{base_path}{todo}")
    } else {
        format!("{base_path}/{todo}")
    };
    format!("{dir}/{filename}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeDriver;
    use crate::types::{ProcessingType, SourceProtocol};
    use std::sync::Mutex;

    struct RecordingSubmitter {
        jobs: Mutex<Vec<ExtractionJob>>,
    }

    impl ExtractionSubmitter for RecordingSubmitter {
        fn submit(&self, job: ExtractionJob) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    #[tokio::test]
    async fn fetch_to_disk_writes_bytes_and_reports_total() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();
        let centre_id = tracker.get_or_create_centre("ABCD", "A Centre").await.unwrap();
        let source_id = tracker
            .add_file_source(centre_id, "fake-host", SourceProtocol::Ftp, "/outgoing/", None, None)
            .await
            .unwrap();
        let zip_file_id = tracker
            .get_or_create_zip_file("ABCD_20140115_1.zip", Some(centre_id), None)
            .await
            .unwrap();
        let action_id = tracker
            .get_or_create_zip_action(zip_file_id, ProcessingType::Add)
            .await
            .unwrap();
        let fshz_id = tracker
            .get_or_create_file_source_has_zip(source_id, action_id)
            .await
            .unwrap();
        let download_id = tracker.start_download(fshz_id).await.unwrap();

        let fake = FakeDriver::new();
        fake.seed("/outgoing/add", vec![("ABCD_20140115_1.zip", b"hello world".to_vec())]);
        let mut connections: HashMap<String, Box<dyn FileSourceDriver>> = HashMap::new();
        connections.insert("fake-host".to_string(), Box::new(fake));

        let source = FileSource {
            id: source_id,
            centre_id,
            hostname: "fake-host".to_string(),
            protocol: SourceProtocol::Ftp,
            base_path: "/outgoing/".to_string(),
            username: None,
            password: None,
            resource_state: crate::types::ResourceState::Available,
        };

        let local_dir = dir.path().join("backup").join("add");
        let local_path = local_dir.join("ABCD_20140115_1.zip");
        let bytes = fetch_to_disk(
            &mut connections,
            &source,
            "/outgoing/add/ABCD_20140115_1.zip",
            &local_dir,
            &local_path,
            tracker.clone(),
            download_id,
        )
        .await
        .unwrap();

        assert_eq!(bytes, 11);
        let on_disk = tokio::fs::read(&local_path).await.unwrap();
        assert_eq!(on_disk, b"hello world");
    }

    #[test]
    fn join_remote_path_builds_full_path() {
        assert_eq!(
            join_remote_path("/outgoing/", "add", "ABCD_20140115_1.zip"),
            "/outgoing/add/ABCD_20140115_1.zip"
        );
        assert_eq!(
            join_remote_path("/outgoing", "add", "ABCD_20140115_1.zip"),
            "/outgoing/add/ABCD_20140115_1.zip"
        );
    }

    #[allow(dead_code)]
    fn assert_submitter_object_safe(_: &dyn ExtractionSubmitter) {}
    #[allow(dead_code)]
    fn assert_has_recording_submitter() -> RecordingSubmitter {
        RecordingSubmitter { jobs: Mutex::new(Vec::new()) }
    }
}
