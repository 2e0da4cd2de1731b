//! Extractor workers (C8): one task per successful `ZipDownload`, unpacking the archive and
//! driving each inner document through `xml_name`/`unzip`/`xsd`.
//!
//! The synchronous `zip` crate is read entirely inside `spawn_blocking`, the same way the
//! teacher's `extraction/zip.rs` wraps `zip::ZipArchive` — the per-entry tracker work that
//! follows is all async, so reading happens up front rather than interleaved with awaits.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::process::Command;

use crate::db::Tracker;
use crate::download::{ExtractionJob, ExtractionSubmitter};
use crate::error::Error;
use crate::tokenizer::{Tokenizer, Tokens};
use crate::types::{Phase, Status, XmlFileId};

/// Configuration for the inner XML schema-validation pool (§6 `-v`/`-x`, §4.8 step 3).
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Path to the schema-validator executable.
    pub validator_bin: PathBuf,
    /// XML validator properties file (`-v`). `None` skips validation with a warning, per the
    /// "tool whose properties file was not supplied is skipped, not failed" rule (§4.9).
    pub properties_path: Option<PathBuf>,
    /// XML validation-resources properties file (`-x`).
    pub resources_properties_path: Option<PathBuf>,
    /// Bound on concurrent validation subprocesses per extractor task.
    pub pool_size: usize,
}

/// Unbounded, cached pool of extractor tasks (§5): one `tokio::spawn` per submitted
/// [`ExtractionJob`], each owning its own bounded inner pool of schema-validation subprocesses.
pub struct ExtractionPool {
    tracker: Tracker,
    tokenizer: Arc<Tokenizer>,
    validators: Arc<ValidatorConfig>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ExtractionPool {
    /// Build an extraction pool over `tracker`, tokenizing inner document names with
    /// `tokenizer` and validating them per `validators`.
    pub fn new(tracker: Tracker, tokenizer: Arc<Tokenizer>, validators: ValidatorConfig) -> Self {
        Self {
            tracker,
            tokenizer,
            validators: Arc::new(validators),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Wait for every extraction task submitted so far to finish. Per §4.8 step 4 and §5's
    /// ordering guarantee, the session orchestrator calls this before starting post-ingest.
    pub async fn join_all(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "extraction task panicked");
            }
        }
    }
}

impl ExtractionSubmitter for ExtractionPool {
    fn submit(&self, job: ExtractionJob) {
        let tracker = self.tracker.clone();
        let tokenizer = self.tokenizer.clone();
        let validators = self.validators.clone();
        let archive_path = job.archive_path.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = extract_one(&tracker, &tokenizer, &validators, job).await {
                tracing::warn!(archive = %archive_path.display(), error = %e, "extraction task failed");
            }
        });

        self.handles.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }
}

/// One archive entry that passed the `.xml`/no-path-separator filter.
struct QualifyingEntry {
    name: String,
    bytes: Vec<u8>,
}

fn read_zip_entries(archive_path: &Path) -> Result<Vec<QualifyingEntry>, Error> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entries = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        if !name.ends_with(".xml") || name.contains('/') || name.contains('\\') {
            continue;
        }

        let mut bytes = Vec::new();
        std::io::copy(&mut entry, &mut bytes)?;
        entries.push(QualifyingEntry { name, bytes });
    }

    Ok(entries)
}

async fn extract_one(
    tracker: &Tracker,
    tokenizer: &Tokenizer,
    validators: &ValidatorConfig,
    job: ExtractionJob,
) -> Result<(), Error> {
    let contents_dir = PathBuf::from(format!("{}.contents", job.archive_path.display()));
    tokio::fs::create_dir_all(&contents_dir).await?;

    let archive_path = job.archive_path.clone();
    let entries = tokio::task::spawn_blocking(move || read_zip_entries(&archive_path))
        .await
        .map_err(|e| Error::Other(format!("extraction task panicked: {e}")))??;

    if entries.is_empty() {
        tracker.finish_download(job.zip_download_id, Phase::Unzip, Status::Done).await?;
        tracker.escalate_zip_action(job.zip_action_id, Phase::Unzip, Status::Done).await?;
        return Ok(());
    }

    let mut any_failed = false;

    for entry in entries {
        let tokens = tokenizer.tokenize(&entry.name);
        let xml_tokens = match &tokens {
            Tokens::Xml(t) => Some(t.clone()),
            _ => None,
        };

        let centre_id = match &xml_tokens {
            Some(t) => tracker.find_centre(&t.centre).await?.map(|c| c.id),
            None => None,
        };

        let xml_file_id = tracker
            .get_or_create_xml_file(
                job.zip_download_id,
                &entry.name,
                centre_id,
                xml_tokens.as_ref(),
                entry.bytes.len() as i64,
            )
            .await?;

        let name_status = if xml_tokens.is_some() { Status::Done } else { Status::Failed };
        propagate(tracker, &job, xml_file_id, Phase::XmlName, name_status).await?;

        if xml_tokens.is_none() {
            any_failed = true;
            continue;
        }

        propagate(tracker, &job, xml_file_id, Phase::Unzip, Status::Running).await?;
        let dest_path = contents_dir.join(&entry.name);
        tokio::fs::write(&dest_path, &entry.bytes).await?;
        propagate(tracker, &job, xml_file_id, Phase::Unzip, Status::Done).await?;

        let is_experiment = entry.name.contains("experiment");
        match validate_xml(tracker, validators, xml_file_id, &dest_path, is_experiment).await {
            Ok(true) => propagate(tracker, &job, xml_file_id, Phase::Xsd, Status::Done).await?,
            Ok(false) => {
                any_failed = true;
                propagate(tracker, &job, xml_file_id, Phase::Xsd, Status::Failed).await?;
            }
            Err(e) => {
                any_failed = true;
                tracker
                    .append_xml_log(xml_file_id, "XsdValidatorSubprocessError", &e.to_string(), None, None)
                    .await?;
                propagate(tracker, &job, xml_file_id, Phase::Xsd, Status::Failed).await?;
            }
        }
    }

    if !any_failed {
        tracker.finish_download(job.zip_download_id, Phase::Unzip, Status::Done).await?;
        tracker.escalate_zip_action(job.zip_action_id, Phase::Unzip, Status::Done).await?;
    }

    Ok(())
}

/// Escalate an `XmlFile` to `(phase, status)` and fold the same proposal onto its owning
/// `ZipDownload` and `ZipAction`, per the chain-wide escalation rule (§3 invariant 4, §4.1).
async fn propagate(
    tracker: &Tracker,
    job: &ExtractionJob,
    xml_file_id: XmlFileId,
    phase: Phase,
    status: Status,
) -> Result<(), Error> {
    tracker.escalate_xml_file(xml_file_id, phase, status).await?;
    tracker.escalate_download(job.zip_download_id, phase, status).await?;
    tracker.escalate_zip_action(job.zip_action_id, phase, status).await?;
    Ok(())
}

/// Run the configured schema validator over `xml_path`. Returns `Ok(true)` on a clean pass,
/// `Ok(false)` on a validation failure (per-error `XmlLog` rows already recorded), `Err` if the
/// subprocess itself could not be run or exited with one of the structural codes in §6.
async fn validate_xml(
    tracker: &Tracker,
    validators: &ValidatorConfig,
    xml_file_id: XmlFileId,
    xml_path: &Path,
    is_experiment: bool,
) -> Result<bool, Error> {
    let Some(properties_path) = validators.properties_path.as_ref() else {
        tracing::warn!(
            xml_file = xml_file_id.get(),
            "no XML validator properties file configured (-v), skipping validation"
        );
        return Ok(true);
    };

    let mut command = Command::new(&validators.validator_bin);
    command.arg("-v").arg(properties_path);
    if let Some(resources_path) = validators.resources_properties_path.as_ref() {
        command.arg("-x").arg(resources_path);
    }
    command.arg(if is_experiment { "experiment" } else { "specimen" });
    command.arg(xml_path);

    let output = command.output().await?;

    match output.status.code() {
        Some(0) => Ok(true),
        Some(100..=104) => Err(Error::Subprocess { phase: Phase::Xsd, exit_code: output.status.code().unwrap_or(-1) }),
        _ => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
                let (line_no, column, message) = parse_validation_error_line(line);
                tracker
                    .append_xml_log(xml_file_id, "XsdValidationError", &message, line_no, column)
                    .await?;
            }
            if stdout.trim().is_empty() {
                tracker
                    .append_xml_log(
                        xml_file_id,
                        "XsdValidationError",
                        "schema validation failed with no detail on stdout",
                        None,
                        None,
                    )
                    .await?;
            }
            Ok(false)
        }
    }
}

/// Parse one line of validator stdout in the `line:column:message` convention. Lines that don't
/// match are carried through as a message with no position.
fn parse_validation_error_line(line: &str) -> (Option<i32>, Option<i32>, String) {
    let mut parts = line.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(l), Some(c), Some(msg)) => match (l.trim().parse::<i32>(), c.trim().parse::<i32>()) {
            (Ok(l), Ok(c)) => (Some(l), Some(c), msg.trim().to_string()),
            _ => (None, None, line.to_string()),
        },
        _ => (None, None, line.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProcessingType, SourceProtocol};
    use std::io::Write;

    fn tokenizer() -> Arc<Tokenizer> {
        Arc::new(
            Tokenizer::new(
                r"^([A-Z]+)_(\d{4})(\d{2})(\d{2})_(\d+)\.zip$",
                r"^([A-Z]+)_(\d{4})(\d{2})(\d{2})_(\d+)_(specimen|experiment)\.xml$",
                vec!["ABCD".into()],
            )
            .unwrap(),
        )
    }

    fn no_validator() -> ValidatorConfig {
        ValidatorConfig {
            validator_bin: PathBuf::from("/nonexistent/validator"),
            properties_path: None,
            resources_properties_path: None,
            pool_size: 4,
        }
    }

    async fn seed_job(tracker: &Tracker, archive_path: &Path) -> ExtractionJob {
        let centre_id = tracker.get_or_create_centre("ABCD", "A Centre").await.unwrap();
        let source_id = tracker
            .add_file_source(centre_id, "fake-host", SourceProtocol::Ftp, "/outgoing", None, None)
            .await
            .unwrap();
        let zip_file_id = tracker
            .get_or_create_zip_file("ABCD_20140115_1.zip", Some(centre_id), None)
            .await
            .unwrap();
        let zip_action_id = tracker
            .get_or_create_zip_action(zip_file_id, ProcessingType::Add)
            .await
            .unwrap();
        let fshz_id = tracker
            .get_or_create_file_source_has_zip(source_id, zip_action_id)
            .await
            .unwrap();
        let zip_download_id = tracker.start_download(fshz_id).await.unwrap();

        ExtractionJob {
            zip_download_id,
            zip_action_id,
            archive_path: archive_path.to_path_buf(),
        }
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
        for (name, bytes) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn extracts_valid_specimen_and_marks_unzip_done() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();

        let archive_path = dir.path().join("ABCD_20140115_1.zip");
        write_zip(&archive_path, &[("ABCD_20140115_1_specimen.xml", b"<root/>")]);

        let job = seed_job(&tracker, &archive_path).await;
        let zip_action_id = job.zip_action_id;
        let zip_download_id = job.zip_download_id;

        extract_one(&tracker, &tokenizer(), &no_validator(), job).await.unwrap();

        let contents_dir = PathBuf::from(format!("{}.contents", archive_path.display()));
        assert!(contents_dir.join("ABCD_20140115_1_specimen.xml").exists());

        let download = tracker.get_download(zip_download_id).await.unwrap();
        assert_eq!((download.phase, download.status), (Phase::Xsd, Status::Done));

        let action = tracker.get_zip_action(zip_action_id).await.unwrap();
        assert_eq!((action.phase, action.status), (Phase::Xsd, Status::Done));
    }

    #[tokio::test]
    async fn directory_entries_and_nested_paths_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();

        let archive_path = dir.path().join("ABCD_20140115_1.zip");
        write_zip(
            &archive_path,
            &[
                ("nested/foo.xml", b"<root/>"),
                ("readme.txt", b"not xml"),
                ("ABCD_20140115_1_specimen.xml", b"<root/>"),
            ],
        );

        let job = seed_job(&tracker, &archive_path).await;
        let zip_download_id = job.zip_download_id;

        extract_one(&tracker, &tokenizer(), &no_validator(), job).await.unwrap();

        let contents_dir = PathBuf::from(format!("{}.contents", archive_path.display()));
        assert!(!contents_dir.join("nested").exists());
        assert!(!contents_dir.join("readme.txt").exists());
        assert!(contents_dir.join("ABCD_20140115_1_specimen.xml").exists());

        let download = tracker.get_download(zip_download_id).await.unwrap();
        assert_eq!(download.phase, Phase::Xsd);
    }

    #[tokio::test]
    async fn zero_valid_entries_leaves_no_xml_files_and_marks_unzip_done() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();

        let archive_path = dir.path().join("ABCD_20140115_1.zip");
        write_zip(&archive_path, &[("readme.txt", b"nothing useful")]);

        let job = seed_job(&tracker, &archive_path).await;
        let zip_download_id = job.zip_download_id;
        let zip_action_id = job.zip_action_id;

        extract_one(&tracker, &tokenizer(), &no_validator(), job).await.unwrap();

        let download = tracker.get_download(zip_download_id).await.unwrap();
        assert_eq!((download.phase, download.status), (Phase::Unzip, Status::Done));

        let action = tracker.get_zip_action(zip_action_id).await.unwrap();
        assert_eq!((action.phase, action.status), (Phase::Unzip, Status::Done));
    }

    #[tokio::test]
    async fn unrecognized_document_name_fails_xml_name_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite")).await.unwrap();

        let archive_path = dir.path().join("ABCD_20140115_1.zip");
        write_zip(&archive_path, &[("not-a-valid-document-name.xml", b"<root/>")]);

        let job = seed_job(&tracker, &archive_path).await;
        let zip_download_id = job.zip_download_id;
        let zip_action_id = job.zip_action_id;

        extract_one(&tracker, &tokenizer(), &no_validator(), job).await.unwrap();

        let download = tracker.get_download(zip_download_id).await.unwrap();
        assert_eq!((download.phase, download.status), (Phase::XmlName, Status::Failed));

        let action = tracker.get_zip_action(zip_action_id).await.unwrap();
        assert_eq!((action.phase, action.status), (Phase::XmlName, Status::Failed));
    }

    #[test]
    fn parses_line_column_message_convention() {
        assert_eq!(
            parse_validation_error_line("12:4:unexpected element 'foo'"),
            (Some(12), Some(4), "unexpected element 'foo'".to_string())
        );
        assert_eq!(
            parse_validation_error_line("not in the expected shape"),
            (None, None, "not in the expected shape".to_string())
        );
    }
}
