//! Centre / FileSource CRUD and enumeration lookups.

use sqlx::FromRow;

use crate::error::TrackerError;
use crate::types::{CentreId, FileSourceId, ResourceState, SourceProtocol};

use super::Tracker;

/// A contributing centre.
#[derive(Debug, Clone, FromRow)]
pub struct Centre {
    /// Row id.
    pub id: CentreId,
    /// Short identifier used in filenames and directory layout (e.g. `"ICS"`).
    pub short_name: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this centre is currently discovered.
    pub active: bool,
}

/// A remote endpoint owned by a centre.
#[derive(Debug, Clone)]
pub struct FileSource {
    /// Row id.
    pub id: FileSourceId,
    /// Owning centre.
    pub centre_id: CentreId,
    /// Remote hostname.
    pub hostname: String,
    /// Transport protocol.
    pub protocol: SourceProtocol,
    /// Base path on the remote host under which `add/`, `edit/`, `delete/` are discovered.
    pub base_path: String,
    /// Username, if the transport requires one.
    pub username: Option<String>,
    /// Password, if the transport requires one.
    pub password: Option<String>,
    /// Current availability.
    pub resource_state: ResourceState,
}

struct FileSourceRow {
    id: i64,
    centre_id: i64,
    hostname: String,
    protocol_id: i32,
    base_path: String,
    username: Option<String>,
    password: Option<String>,
    resource_state_id: i32,
}

impl FileSourceRow {
    fn into_file_source(self) -> Result<FileSource, TrackerError> {
        let protocol = SourceProtocol::from_id(self.protocol_id).ok_or_else(|| {
            TrackerError::MissingSeed(format!("source_protocol id {}", self.protocol_id))
        })?;
        let resource_state = ResourceState::from_id(self.resource_state_id).ok_or_else(|| {
            TrackerError::MissingSeed(format!("resource_state id {}", self.resource_state_id))
        })?;
        Ok(FileSource {
            id: self.id.into(),
            centre_id: self.centre_id.into(),
            hostname: self.hostname,
            protocol,
            base_path: self.base_path,
            username: self.username,
            password: self.password,
            resource_state,
        })
    }
}

impl Tracker {
    /// Look up a centre by its short name.
    pub async fn find_centre(&self, short_name: &str) -> Result<Option<Centre>, TrackerError> {
        let row = sqlx::query_as::<_, Centre>(
            "SELECT id, short_name, name, active FROM centre WHERE short_name = ?",
        )
        .bind(short_name)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Get-or-create a centre by short name. Idempotent under concurrent callers: the no-op
    /// upsert returns the winning row's id regardless of which caller's `INSERT` committed first.
    pub async fn get_or_create_centre(
        &self,
        short_name: &str,
        name: &str,
    ) -> Result<CentreId, TrackerError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO centre (short_name, name, active)
            VALUES (?, ?, 1)
            ON CONFLICT(short_name) DO UPDATE SET short_name = short_name
            RETURNING id
            "#,
        )
        .bind(short_name)
        .bind(name)
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// All active centres, in insertion order.
    pub async fn active_centres(&self) -> Result<Vec<Centre>, TrackerError> {
        let rows = sqlx::query_as::<_, Centre>(
            "SELECT id, short_name, name, active FROM centre WHERE active = 1 ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// All available (non-maintenance, non-removed) file sources for a centre.
    pub async fn available_file_sources(
        &self,
        centre_id: CentreId,
    ) -> Result<Vec<FileSource>, TrackerError> {
        let raw = sqlx::query(
            r#"
            SELECT id, centre_id, hostname, protocol_id, base_path, username, password, resource_state_id
            FROM file_source
            WHERE centre_id = ? AND resource_state_id = ?
            ORDER BY id
            "#,
        )
        .bind(centre_id.get())
        .bind(ResourceState::Available.id())
        .fetch_all(self.pool())
        .await?;

        use sqlx::Row;
        raw.into_iter()
            .map(|r| {
                FileSourceRow {
                    id: r.try_get("id")?,
                    centre_id: r.try_get("centre_id")?,
                    hostname: r.try_get("hostname")?,
                    protocol_id: r.try_get("protocol_id")?,
                    base_path: r.try_get("base_path")?,
                    username: r.try_get("username")?,
                    password: r.try_get("password")?,
                    resource_state_id: r.try_get("resource_state_id")?,
                }
                .into_file_source()
            })
            .collect()
    }

    /// Register a new file source for a centre.
    pub async fn add_file_source(
        &self,
        centre_id: CentreId,
        hostname: &str,
        protocol: SourceProtocol,
        base_path: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<FileSourceId, TrackerError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO file_source
                (centre_id, hostname, protocol_id, base_path, username, password, resource_state_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(centre_id.get())
        .bind(hostname)
        .bind(protocol.id())
        .bind(base_path)
        .bind(username)
        .bind(password)
        .bind(ResourceState::Available.id())
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_test_tracker() -> (Tracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::open(&dir.path().join("tracker.sqlite"))
            .await
            .unwrap();
        (tracker, dir)
    }

    #[tokio::test]
    async fn get_or_create_centre_is_idempotent() {
        let (tracker, _dir) = open_test_tracker().await;

        let first = tracker.get_or_create_centre("ICS", "Institut Clinique").await.unwrap();
        let second = tracker.get_or_create_centre("ICS", "Institut Clinique").await.unwrap();
        assert_eq!(first, second);

        let centres = tracker.active_centres().await.unwrap();
        assert_eq!(centres.len(), 1);
    }

    #[tokio::test]
    async fn add_and_list_file_sources() {
        let (tracker, _dir) = open_test_tracker().await;
        let centre_id = tracker.get_or_create_centre("ICS", "Institut Clinique").await.unwrap();

        tracker
            .add_file_source(
                centre_id,
                "ftp.ics.example.org",
                SourceProtocol::Ftp,
                "/outgoing",
                Some("anonymous"),
                None,
            )
            .await
            .unwrap();

        let sources = tracker.available_file_sources(centre_id).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].hostname, "ftp.ics.example.org");
        assert!(matches!(sources[0].protocol, SourceProtocol::Ftp));
    }
}
