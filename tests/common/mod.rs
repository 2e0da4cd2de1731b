//! Shared helpers for the cross-module integration tests in this directory.

use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use centre_crawler::config::ToolProperties;
use centre_crawler::db::Tracker;
use centre_crawler::types::{CentreId, FileSourceId, ProcessingType, SourceProtocol, ZipActionId, ZipFileId};

/// Write a `/bin/sh` script at `path` that prints `stdout` (if any) and exits with `code`, and
/// mark it executable. Stands in for the external serializer/validator/context-builder/
/// overview-builder binaries these tests can't assume are installed.
pub fn write_tool_script(path: &Path, code: i32, stdout: &str) {
    let mut file = std::fs::File::create(path).unwrap();
    if stdout.is_empty() {
        writeln!(file, "#!/bin/sh\nexit {code}").unwrap();
    } else {
        writeln!(file, "#!/bin/sh\nprintf '%s\\n' '{stdout}'\nexit {code}").unwrap();
    }
    #[cfg(unix)]
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Write an empty placeholder properties file — its contents are never read by the fake tool
/// scripts above, only its path is passed through as a CLI argument.
pub fn write_properties_stub(path: &Path) {
    std::fs::write(path, "").unwrap();
}

/// `ToolProperties` pointing every optional properties slot at the same stub file.
pub fn all_tools_configured(properties_path: &Path) -> ToolProperties {
    ToolProperties {
        serializer: Some(properties_path.to_path_buf()),
        validator: Some(properties_path.to_path_buf()),
        resources: Some(properties_path.to_path_buf()),
        context_builder: Some(properties_path.to_path_buf()),
        integrity_checker: Some(properties_path.to_path_buf()),
    }
}

/// Write a zip archive at `path` containing the given (name, contents) entries.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

/// Seed a centre, one FTP file source, a zip file/action pair at `(zip_name, done)`, and a
/// hosting relation, returning the ids a download/extraction job needs.
pub async fn seed_hosted_action(
    tracker: &Tracker,
    zip_filename: &str,
) -> (CentreId, FileSourceId, ZipFileId, ZipActionId) {
    let centre_id = tracker.get_or_create_centre("ABCD", "A Centre").await.unwrap();
    let source_id = tracker
        .add_file_source(centre_id, "fake-host", SourceProtocol::Ftp, "/outgoing", None, None)
        .await
        .unwrap();
    let zip_file_id = tracker
        .get_or_create_zip_file(zip_filename, Some(centre_id), None)
        .await
        .unwrap();
    let zip_action_id = tracker
        .get_or_create_zip_action(zip_file_id, ProcessingType::Add)
        .await
        .unwrap();
    tracker
        .get_or_create_file_source_has_zip(source_id, zip_action_id)
        .await
        .unwrap();
    (centre_id, source_id, zip_file_id, zip_action_id)
}

#[allow(dead_code)]
pub fn tempdir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

#[allow(dead_code)]
pub fn unused_path_hint() -> PathBuf {
    PathBuf::new()
}
