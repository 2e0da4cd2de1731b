//! Post-ingest driver (C9): upload, integrity+context, and overview stages, run single-threaded
//! in the exact document order §4.9 specifies — specimens strictly before experiments within
//! each phase group, ascending creation time within each group.
//!
//! Each subprocess invocation is grounded on the teacher's `parity/cli.rs` pattern (an external
//! binary path plus `tokio::process::Command`, as already reused in `extraction.rs`'s schema
//! validator call), and records a [`crate::db::SessionTask`] row regardless of outcome.

use std::path::PathBuf;

use tokio::process::Command;

use crate::config::ToolProperties;
use crate::db::{Tracker, XmlFile};
use crate::error::Error;
use crate::types::{Phase, SessionId, Status, XmlFileId};

/// Binary paths and the backup directory layout the post-ingest driver needs to invoke each
/// downstream tool and locate each document's extracted XML file on disk.
#[derive(Debug, Clone)]
pub struct PostIngestConfig {
    /// Local data directory (`-d`), containing `add/`, `edit/`, `delete/`.
    pub data_dir: PathBuf,
    /// Properties-file paths for each optional tool.
    pub tools: ToolProperties,
    /// Serializer (upload) binary.
    pub serializer_bin: Option<PathBuf>,
    /// Integrity-checker binary.
    pub integrity_checker_bin: Option<PathBuf>,
    /// Context-builder binary.
    pub context_builder_bin: Option<PathBuf>,
    /// Overview-builder binary.
    pub overview_builder_bin: Option<PathBuf>,
    /// Name of the overview database, the overview-builder's sole argument.
    pub overview_database_name: Option<String>,
}

/// Outcome of a full post-ingest run (§4.9 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostIngestOutcome {
    /// `true` iff no document failed at any stage and the overview step exited 0.
    pub success: bool,
    /// Number of documents that failed at any stage.
    pub failed_documents: usize,
}

/// Drives the upload → integrity/context → overview stages over the tracker's current work
/// queues for one session.
pub struct PostIngestDriver {
    tracker: Tracker,
    config: PostIngestConfig,
}

impl PostIngestDriver {
    /// Build a driver over `tracker`, using `config` to locate subprocess binaries, their
    /// properties files, and the on-disk archive layout.
    pub fn new(tracker: Tracker, config: PostIngestConfig) -> Self {
        Self { tracker, config }
    }

    /// Run all three stages in order for `session_id`, recording a [`crate::db::SessionTask`]
    /// row per subprocess invocation.
    pub async fn run(&self, session_id: SessionId) -> Result<PostIngestOutcome, Error> {
        let mut failed_documents = self.run_upload(session_id).await?;
        failed_documents += self.run_integrity_and_context(session_id).await?;
        let overview_ok = self.run_overview(session_id).await?;

        Ok(PostIngestOutcome {
            success: failed_documents == 0 && overview_ok,
            failed_documents,
        })
    }

    /// Step 1: serializer stage. Specimens then experiments, each ordered by ascending
    /// creation time. Returns the number of documents that failed.
    async fn run_upload(&self, session_id: SessionId) -> Result<usize, Error> {
        let mut failed = 0usize;
        let docs = self.specimens_then_experiments(Phase::Xsd, Status::Done).await?;

        let Some(serializer_bin) = self.config.serializer_bin.as_ref() else {
            tracing::warn!("no serializer binary configured, skipping upload stage");
            for doc in &docs {
                self.tracker.escalate_xml_file(doc.id, Phase::Data, Status::Pending).await?;
            }
            return Ok(failed);
        };

        for doc in docs {
            let xml_path = self.xml_path(&doc).await?;
            self.tracker.escalate_xml_file(doc.id, Phase::Upload, Status::Running).await?;

            let Some(properties) = self.config.tools.serializer.as_ref() else {
                tracing::warn!(xml_file = doc.id.get(), "no serializer properties file (-s), skipping upload");
                self.tracker.escalate_xml_file(doc.id, Phase::Data, Status::Pending).await?;
                continue;
            };

            let is_experiment = doc.name.contains("experiment");
            let mut command = Command::new(serializer_bin);
            command
                .arg(doc.id.get().to_string())
                .arg(doc.created_at.to_string())
                .arg(properties)
                .arg(if is_experiment { "experiment" } else { "specimen" })
                .arg(&xml_path);

            match self.run_tool(session_id, Phase::Upload, command).await {
                Ok(0) => {
                    self.tracker.escalate_xml_file(doc.id, Phase::Data, Status::Pending).await?;
                }
                Ok(code) => {
                    failed += 1;
                    self.record_subprocess_failure(doc.id, Phase::Upload, code).await?;
                }
                Err(e) => {
                    failed += 1;
                    self.tracker.append_xml_log(doc.id, "UploadSubprocessError", &e.to_string(), None, None).await?;
                    self.tracker.escalate_xml_file(doc.id, Phase::Upload, Status::Failed).await?;
                }
            }
        }
        Ok(failed)
    }

    /// Step 2: integrity check then context build, for documents sitting at `(data, pending)`.
    /// Returns the number of documents that failed.
    async fn run_integrity_and_context(&self, session_id: SessionId) -> Result<usize, Error> {
        let mut failed = 0usize;
        for doc in self.specimens_then_experiments(Phase::Data, Status::Pending).await? {
            let xml_path = self.xml_path(&doc).await?;
            self.tracker.escalate_xml_file(doc.id, Phase::Data, Status::Running).await?;

            let integrity_ok = match (self.config.integrity_checker_bin.as_ref(), self.config.tools.integrity_checker.as_ref()) {
                (Some(bin), Some(properties)) => {
                    let mut command = Command::new(bin);
                    command.arg(doc.id.get().to_string()).arg(properties).arg(&xml_path);
                    match self.run_tool(session_id, Phase::Data, command).await {
                        Ok(0) => true,
                        Ok(code) => {
                            failed += 1;
                            self.record_subprocess_failure(doc.id, Phase::Data, code).await?;
                            false
                        }
                        Err(e) => {
                            failed += 1;
                            self.tracker.append_xml_log(doc.id, "IntegritySubprocessError", &e.to_string(), None, None).await?;
                            self.tracker.escalate_xml_file(doc.id, Phase::Data, Status::Failed).await?;
                            false
                        }
                    }
                }
                _ => {
                    tracing::warn!(xml_file = doc.id.get(), "no integrity-checker configured, skipping check");
                    true
                }
            };

            if !integrity_ok {
                continue;
            }

            self.tracker.escalate_xml_file(doc.id, Phase::Context, Status::Running).await?;

            let context_ok = match (self.config.context_builder_bin.as_ref(), self.config.tools.context_builder.as_ref()) {
                (Some(bin), Some(properties)) => {
                    let mut command = Command::new(bin);
                    command.arg(doc.id.get().to_string()).arg(properties).arg(&xml_path);
                    match self.run_tool(session_id, Phase::Context, command).await {
                        Ok(0) => true,
                        Ok(code) => {
                            failed += 1;
                            self.record_subprocess_failure(doc.id, Phase::Context, code).await?;
                            false
                        }
                        Err(e) => {
                            failed += 1;
                            self.tracker.append_xml_log(doc.id, "ContextBuilderSubprocessError", &e.to_string(), None, None).await?;
                            self.tracker.escalate_xml_file(doc.id, Phase::Context, Status::Failed).await?;
                            false
                        }
                    }
                }
                _ => {
                    tracing::warn!(xml_file = doc.id.get(), "no context-builder configured, skipping build");
                    true
                }
            };

            if context_ok {
                self.tracker.escalate_xml_file(doc.id, Phase::Overview, Status::Pending).await?;
            }
        }
        Ok(failed)
    }

    /// Step 3: overview rebuild, run once for every document sitting at `(overview, pending)`.
    /// Returns `true` iff the overview step was either not needed or exited 0.
    async fn run_overview(&self, session_id: SessionId) -> Result<bool, Error> {
        let pending = self.tracker.xml_files_by_phase_status(Phase::Overview, Status::Pending).await?;
        if pending.is_empty() {
            return Ok(true);
        }

        let (Some(bin), Some(db_name)) =
            (self.config.overview_builder_bin.as_ref(), self.config.overview_database_name.as_ref())
        else {
            tracing::warn!("no overview-builder configured, skipping overview rebuild");
            for doc in &pending {
                self.tracker.escalate_xml_file(doc.id, Phase::Overview, Status::Done).await?;
            }
            return Ok(true);
        };

        let mut command = Command::new(bin);
        command.arg(db_name);

        let outcome = self.run_tool(session_id, Phase::Overview, command).await;
        let overview_ok = matches!(outcome, Ok(0));

        for doc in &pending {
            let status = if overview_ok { Status::Done } else { Status::Failed };
            self.tracker.escalate_xml_file(doc.id, Phase::Overview, status).await?;
        }

        Ok(overview_ok)
    }

    /// Fetch the work queue for `(phase, status)` and split it into specimens then experiments,
    /// preserving ascending creation-time order within each group (§4.9).
    async fn specimens_then_experiments(&self, phase: Phase, status: Status) -> Result<Vec<XmlFile>, Error> {
        let docs = self.tracker.xml_files_by_phase_status(phase, status).await?;
        let (specimens, experiments): (Vec<_>, Vec<_>) =
            docs.into_iter().partition(|d| d.name.contains("specimen"));
        Ok(specimens.into_iter().chain(experiments).collect())
    }

    /// Resolve a document's on-disk path: `<data_dir>/<todo>/<archive>.zip.contents/<name>`.
    async fn xml_path(&self, doc: &XmlFile) -> Result<PathBuf, Error> {
        let download = self.tracker.get_download(doc.zip_download_id).await?;
        let fshz = self.tracker.get_file_source_has_zip(download.file_source_has_zip_id).await?;
        let action = self.tracker.get_zip_action(fshz.zip_action_id).await?;
        let zip_file = self.tracker.get_zip_file(action.zip_file_id).await?;

        let contents_dir = self
            .config
            .data_dir
            .join(action.processing_type.dir_name())
            .join(format!("{}.contents", zip_file.filename));
        Ok(contents_dir.join(&doc.name))
    }

    /// Run `command`, recording a [`crate::db::SessionTask`] row for `phase` regardless of
    /// outcome. Returns the subprocess's exit code, or an [`Error::Subprocess`]/I-O error if it
    /// could not be interpreted.
    async fn run_tool(&self, session_id: SessionId, phase: Phase, mut command: Command) -> Result<i32, Error> {
        let task_id = self.tracker.start_session_task(session_id, phase).await?;
        let output = command.output().await;

        match output {
            Ok(output) => {
                let code = output.status.code().unwrap_or(-1);
                let comment = subprocess_comment(code);
                self.tracker.finish_session_task(task_id, code, Some(comment)).await?;
                Ok(code)
            }
            Err(e) => {
                self.tracker.finish_session_task(task_id, -1, Some(&e.to_string())).await?;
                Err(Error::Io(e))
            }
        }
    }

    /// Record a generic (non-zero, non-I/O) subprocess failure against a document and fail it
    /// at `phase`.
    async fn record_subprocess_failure(&self, xml_file_id: XmlFileId, phase: Phase, exit_code: i32) -> Result<(), Error> {
        self.tracker
            .append_xml_log(xml_file_id, "SubprocessError", subprocess_comment(exit_code), None, None)
            .await?;
        self.tracker.escalate_xml_file(xml_file_id, phase, Status::Failed).await?;
        Ok(())
    }
}

/// Human-readable description of a subprocess exit code, per §6's fixed contract.
fn subprocess_comment(exit_code: i32) -> &'static str {
    match exit_code {
        0 => "success",
        100 => "argument parse failure",
        101 => "database properties file not found",
        102 => "missing XML file path",
        103 => "database connection error",
        104 => "serialization error",
        _ => "generic subprocess failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProcessingType, SourceProtocol};
    use std::path::Path;

    async fn seed_document(tracker: &Tracker, name: &str, phase: Phase, status: Status) -> (XmlFileId, PathBuf) {
        let centre_id = tracker.get_or_create_centre("ABCD", "A Centre").await.unwrap();
        let source_id = tracker
            .add_file_source(centre_id, "fake-host", SourceProtocol::Ftp, "/outgoing", None, None)
            .await
            .unwrap();
        let zip_file_id = tracker
            .get_or_create_zip_file("ABCD_20140115_1.zip", Some(centre_id), None)
            .await
            .unwrap();
        let action_id = tracker.get_or_create_zip_action(zip_file_id, ProcessingType::Add).await.unwrap();
        let fshz_id = tracker.get_or_create_file_source_has_zip(source_id, action_id).await.unwrap();
        let download_id = tracker.start_download(fshz_id).await.unwrap();

        let xml_file_id = tracker
            .get_or_create_xml_file(download_id, name, Some(centre_id), None, 128)
            .await
            .unwrap();
        tracker.escalate_xml_file(xml_file_id, phase, status).await.unwrap();
        (xml_file_id, PathBuf::from(name))
    }

    fn no_tools_config(dir: &Path) -> PostIngestConfig {
        PostIngestConfig {
            data_dir: dir.to_path_buf(),
            tools: ToolProperties::default(),
            serializer_bin: None,
            integrity_checker_bin: None,
            context_builder_bin: None,
            overview_builder_bin: None,
            overview_database_name: None,
        }
    }

    #[tokio::test]
    async fn upload_without_serializer_binary_advances_every_document_instead_of_stranding_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();
        let (first_id, _) =
            seed_document(&tracker, "ABCD_20140115_1_specimen.xml", Phase::Xsd, Status::Done).await;
        let (second_id, _) =
            seed_document(&tracker, "ABCD_20140115_1_experiment.xml", Phase::Xsd, Status::Done).await;

        let driver = PostIngestDriver::new(tracker.clone(), no_tools_config(dir.path()));

        let session_id = tracker.open_session().await.unwrap();
        driver.run_upload(session_id).await.unwrap();

        let first = tracker.get_xml_file(first_id).await.unwrap();
        let second = tracker.get_xml_file(second_id).await.unwrap();
        assert_eq!((first.phase, first.status), (Phase::Data, Status::Pending));
        assert_eq!((second.phase, second.status), (Phase::Data, Status::Pending));
    }

    #[tokio::test]
    async fn upload_without_serializer_properties_advances_to_data_pending() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();
        let (xml_file_id, _) =
            seed_document(&tracker, "ABCD_20140115_1_specimen.xml", Phase::Xsd, Status::Done).await;

        let driver = PostIngestDriver::new(
            tracker.clone(),
            PostIngestConfig {
                serializer_bin: Some(PathBuf::from("/usr/bin/serializer")),
                ..no_tools_config(dir.path())
            },
        );

        let session_id = tracker.open_session().await.unwrap();
        driver.run_upload(session_id).await.unwrap();

        let doc = tracker.get_xml_file(xml_file_id).await.unwrap();
        assert_eq!((doc.phase, doc.status), (Phase::Data, Status::Pending));
    }

    #[tokio::test]
    async fn overview_with_no_pending_documents_is_a_no_op_success() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();
        let driver = PostIngestDriver::new(tracker.clone(), no_tools_config(dir.path()));

        let session_id = tracker.open_session().await.unwrap();
        let ok = driver.run_overview(session_id).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn overview_without_builder_marks_pending_documents_overview_done() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();
        let (xml_file_id, _) =
            seed_document(&tracker, "ABCD_20140115_1_specimen.xml", Phase::Overview, Status::Pending).await;

        let driver = PostIngestDriver::new(tracker.clone(), no_tools_config(dir.path()));
        let session_id = tracker.open_session().await.unwrap();
        let ok = driver.run_overview(session_id).await.unwrap();
        assert!(ok);

        let doc = tracker.get_xml_file(xml_file_id).await.unwrap();
        assert_eq!((doc.phase, doc.status), (Phase::Overview, Status::Done));
    }

    #[tokio::test]
    async fn specimens_sort_before_experiments_within_the_same_phase() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();
        seed_document(&tracker, "ABCD_20140115_1_experiment.xml", Phase::Xsd, Status::Done).await;
        seed_document(&tracker, "ABCD_20140115_2_specimen.xml", Phase::Xsd, Status::Done).await;

        let driver = PostIngestDriver::new(tracker.clone(), no_tools_config(dir.path()));
        let ordered = driver.specimens_then_experiments(Phase::Xsd, Status::Done).await.unwrap();

        assert_eq!(ordered.len(), 2);
        assert!(ordered[0].name.contains("specimen"));
        assert!(ordered[1].name.contains("experiment"));
    }

    #[test]
    fn subprocess_comment_maps_known_codes() {
        assert_eq!(subprocess_comment(0), "success");
        assert_eq!(subprocess_comment(101), "database properties file not found");
        assert_eq!(subprocess_comment(42), "generic subprocess failure");
    }
}
