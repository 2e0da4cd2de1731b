//! Tracker lifecycle and schema migrations.

use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use crate::error::TrackerError;
use crate::types::{Phase, ProcessingType, ResourceState, SourceProtocol, Status};

use super::Tracker;

impl Tracker {
    /// Open (creating if necessary) the tracker database at `path` and run migrations,
    /// including seeding the read-only enumeration rows (phase, a_status, processing_type,
    /// source_protocol, resource_state) listed in §3.
    pub async fn open(path: &Path) -> Result<Self, TrackerError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TrackerError::Query(sqlx::Error::Io(e)))?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await?;
        let tracker = Self { pool };
        tracker.run_migrations().await?;
        Ok(tracker)
    }

    /// Open an already-connected pool without re-running migrations. Used by tests that build
    /// the schema once and share a pool across assertions.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn run_migrations(&self) -> Result<(), TrackerError> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await?;
        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: create the full tracker schema and seed its enumeration rows.
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<(), TrackerError> {
        tracing::info!("applying tracker migration v1");

        sqlx::query("BEGIN").execute(&mut *conn).await?;

        let result = async {
            Self::create_enumeration_tables(conn).await?;
            Self::create_centre_and_source_tables(conn).await?;
            Self::create_zip_tables(conn).await?;
            Self::create_xml_tables(conn).await?;
            Self::create_log_tables(conn).await?;
            Self::create_session_tables(conn).await?;
            Self::seed_enumerations(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), TrackerError>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("tracker migration v1 complete");
        Ok(())
    }

    async fn create_enumeration_tables(conn: &mut SqliteConnection) -> Result<(), TrackerError> {
        for (table, extra) in [
            ("source_protocol", ""),
            ("resource_state", ""),
            ("processing_type", ""),
            ("phase", ""),
            ("a_status", ""),
        ] {
            let sql = format!(
                "CREATE TABLE {table} (id INTEGER PRIMARY KEY, name TEXT UNIQUE NOT NULL){extra}"
            );
            sqlx::query(&sql).execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn create_centre_and_source_tables(
        conn: &mut SqliteConnection,
    ) -> Result<(), TrackerError> {
        sqlx::query(
            r#"
            CREATE TABLE centre (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_name TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE file_source (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                centre_id INTEGER NOT NULL REFERENCES centre(id),
                hostname TEXT NOT NULL,
                protocol_id INTEGER NOT NULL REFERENCES source_protocol(id),
                base_path TEXT NOT NULL,
                username TEXT,
                password TEXT,
                resource_state_id INTEGER NOT NULL REFERENCES resource_state(id)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query("CREATE INDEX idx_file_source_centre ON file_source(centre_id)")
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn create_zip_tables(conn: &mut SqliteConnection) -> Result<(), TrackerError> {
        sqlx::query(
            r#"
            CREATE TABLE zip_file (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT UNIQUE NOT NULL,
                centre_id INTEGER REFERENCES centre(id),
                release_year INTEGER,
                release_month INTEGER,
                release_day INTEGER,
                increment INTEGER,
                size_bytes INTEGER
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE zip_action (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                zip_file_id INTEGER NOT NULL REFERENCES zip_file(id),
                processing_type_id INTEGER NOT NULL REFERENCES processing_type(id),
                phase_id INTEGER NOT NULL REFERENCES phase(id),
                status_id INTEGER NOT NULL REFERENCES a_status(id),
                UNIQUE(zip_file_id, processing_type_id)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query("CREATE INDEX idx_zip_action_phase_status ON zip_action(phase_id, status_id)")
            .execute(&mut *conn)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE file_source_has_zip (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_source_id INTEGER NOT NULL REFERENCES file_source(id),
                zip_action_id INTEGER NOT NULL REFERENCES zip_action(id),
                rating INTEGER NOT NULL DEFAULT 0,
                UNIQUE(file_source_id, zip_action_id)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "CREATE INDEX idx_file_source_has_zip_action ON file_source_has_zip(zip_action_id)",
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE zip_download (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_source_has_zip_id INTEGER NOT NULL REFERENCES file_source_has_zip(id),
                started_at INTEGER NOT NULL,
                last_received_at INTEGER,
                bytes_received INTEGER NOT NULL DEFAULT 0,
                phase_id INTEGER NOT NULL REFERENCES phase(id),
                status_id INTEGER NOT NULL REFERENCES a_status(id)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn create_xml_tables(conn: &mut SqliteConnection) -> Result<(), TrackerError> {
        sqlx::query(
            r#"
            CREATE TABLE xml_file (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                zip_download_id INTEGER NOT NULL REFERENCES zip_download(id),
                name TEXT NOT NULL,
                centre_id INTEGER REFERENCES centre(id),
                created_at INTEGER NOT NULL,
                increment INTEGER,
                size_bytes INTEGER,
                phase_id INTEGER NOT NULL REFERENCES phase(id),
                status_id INTEGER NOT NULL REFERENCES a_status(id),
                UNIQUE(zip_download_id, name)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query("CREATE INDEX idx_xml_file_phase_status ON xml_file(phase_id, status_id)")
            .execute(&mut *conn)
            .await?;

        sqlx::query("CREATE INDEX idx_xml_file_created ON xml_file(created_at)")
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn create_log_tables(conn: &mut SqliteConnection) -> Result<(), TrackerError> {
        sqlx::query(
            r#"
            CREATE TABLE an_exception (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_name TEXT UNIQUE NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE zip_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                zip_download_id INTEGER NOT NULL REFERENCES zip_download(id),
                exception_id INTEGER NOT NULL REFERENCES an_exception(id),
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE xml_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                xml_file_id INTEGER NOT NULL REFERENCES xml_file(id),
                exception_id INTEGER NOT NULL REFERENCES an_exception(id),
                message TEXT NOT NULL,
                line INTEGER,
                col INTEGER,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn create_session_tables(conn: &mut SqliteConnection) -> Result<(), TrackerError> {
        sqlx::query(
            r#"
            CREATE TABLE crawling_session (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                success INTEGER
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE session_task (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES crawling_session(id),
                phase_id INTEGER NOT NULL REFERENCES phase(id),
                started_at INTEGER NOT NULL,
                ended_at INTEGER,
                exit_status INTEGER,
                comment TEXT
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query("CREATE INDEX idx_session_task_session ON session_task(session_id)")
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn seed_enumerations(conn: &mut SqliteConnection) -> Result<(), TrackerError> {
        for protocol in [SourceProtocol::Ftp, SourceProtocol::Sftp, SourceProtocol::Http] {
            sqlx::query("INSERT INTO source_protocol (id, name) VALUES (?, ?)")
                .bind(protocol.id())
                .bind(format!("{protocol:?}").to_lowercase())
                .execute(&mut *conn)
                .await?;
        }

        for state in [
            ResourceState::Available,
            ResourceState::Maintenance,
            ResourceState::Removed,
        ] {
            sqlx::query("INSERT INTO resource_state (id, name) VALUES (?, ?)")
                .bind(state.id())
                .bind(format!("{state:?}").to_lowercase())
                .execute(&mut *conn)
                .await?;
        }

        for todo in ProcessingType::ALL {
            sqlx::query("INSERT INTO processing_type (id, name) VALUES (?, ?)")
                .bind(todo.id())
                .bind(todo.dir_name())
                .execute(&mut *conn)
                .await?;
        }

        for phase in Phase::ALL {
            sqlx::query("INSERT INTO phase (id, name) VALUES (?, ?)")
                .bind(phase.id())
                .bind(format!("{phase:?}"))
                .execute(&mut *conn)
                .await?;
        }

        for status in Status::ALL {
            sqlx::query("INSERT INTO a_status (id, name) VALUES (?, ?)")
                .bind(status.id())
                .bind(format!("{status:?}"))
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<(), TrackerError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_seeds_all_enumerations() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite"))
            .await
            .expect("tracker should open and migrate");

        let phase_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM phase")
            .fetch_one(tracker.pool())
            .await
            .unwrap();
        assert_eq!(phase_count, 11);

        let status_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM a_status")
            .fetch_one(tracker.pool())
            .await
            .unwrap();
        assert_eq!(status_count, 5);

        let protocol_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_protocol")
            .fetch_one(tracker.pool())
            .await
            .unwrap();
        assert_eq!(protocol_count, 3);
    }

    #[tokio::test]
    async fn phase_seed_order_matches_declared_ids() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite"))
            .await
            .unwrap();

        let name: String = sqlx::query_scalar("SELECT name FROM phase WHERE id = ?")
            .bind(Phase::Qc.id())
            .fetch_one(tracker.pool())
            .await
            .unwrap();
        assert_eq!(name, "Qc");
    }

    #[tokio::test]
    async fn reopening_an_existing_tracker_does_not_reseed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.sqlite");
        let first = Tracker::open(&path).await.unwrap();
        first.close().await;

        let second = Tracker::open(&path).await.expect("should reopen cleanly");
        let phase_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM phase")
            .fetch_one(second.pool())
            .await
            .unwrap();
        assert_eq!(phase_count, 11);
    }
}
