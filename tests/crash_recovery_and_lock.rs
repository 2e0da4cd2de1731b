//! "Crash recovery" and "lock contention" end-to-end scenarios, exercised at the `Session`/
//! `Tracker` public seam rather than by re-testing `InstanceLock` directly (already covered
//! thoroughly by its own unit tests).

mod common;

use centre_crawler::config::{RuntimeConfig, ToolProperties};
use centre_crawler::db::Tracker;
use centre_crawler::error::{Error, LockError};
use centre_crawler::session::Session;
use centre_crawler::types::{Phase, ProcessingType, SourceProtocol, Status};
use serial_test::serial;

fn sample_config(data_dir: std::path::PathBuf, database_path: std::path::PathBuf) -> RuntimeConfig {
    RuntimeConfig {
        downloaders: 1,
        retries: 1,
        pool_size: 2,
        period: None,
        data_dir,
        report_email: None,
        database_path,
        tools: ToolProperties::default(),
        validator_bin: None,
        serializer_bin: None,
        context_builder_bin: None,
        overview_builder_bin: None,
        integrity_checker_bin: None,
        overview_database_name: None,
        tokenizer_zip_pattern: r"^([A-Z]+)_(\d{4})(\d{2})(\d{2})_(\d+)\.zip$".to_string(),
        tokenizer_xml_pattern: r"^([A-Z]+)_(\d{4})(\d{2})(\d{2})_(\d+)_(specimen|experiment)\.xml$"
            .to_string(),
        known_centres: vec!["ABCD".to_string()],
        smtp_relay_host: "localhost".to_string(),
    }
}

#[tokio::test]
async fn state_written_before_a_simulated_crash_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tracker.sqlite");

    let zip_action_id = {
        let tracker = Tracker::open(&db_path).await.unwrap();
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
        tracker.get_or_create_file_source_has_zip(source_id, zip_action_id).await.unwrap();
        tracker
            .escalate_zip_action(zip_action_id, Phase::Download, Status::Running)
            .await
            .unwrap();

        // Simulated crash: the tracker handle is dropped without an explicit `close()`.
        zip_action_id
    };

    let reopened = Tracker::open(&db_path).await.unwrap();
    let action = reopened.get_zip_action(zip_action_id).await.unwrap();
    assert_eq!((action.phase, action.status), (Phase::Download, Status::Running));

    let result = reopened
        .escalate_zip_action(zip_action_id, Phase::Download, Status::Failed)
        .await
        .unwrap();
    assert_eq!(result, (Phase::Download, Status::Failed));
}

#[tokio::test]
#[serial]
async fn second_session_fails_while_first_holds_the_lock_and_a_third_succeeds_after_an_unclean_exit() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("phenodcc.lock");
    let data_dir = dir.path().join("backup");
    let db_path = dir.path().join("tracker.sqlite");

    let first = Session::open(sample_config(data_dir.clone(), db_path.clone()), lock_path.clone())
        .await
        .unwrap();

    let second = Session::open(sample_config(data_dir.clone(), db_path.clone()), lock_path.clone()).await;
    assert!(matches!(second, Err(Error::Lock(LockError::AlreadyRunning(_)))));

    // Simulated unclean exit: drop the session without calling `close()`, same as a killed
    // process — the OS releases the file lock with it, but the lock file itself is left behind.
    drop(first);
    assert!(lock_path.exists());

    let third = Session::open(sample_config(data_dir, db_path), lock_path.clone()).await;
    assert!(third.is_ok());
    third.unwrap().close().await.unwrap();
    assert!(!lock_path.exists());
}
