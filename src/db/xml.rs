//! XmlFile CRUD, phase/status escalation, and the append-only validation log tables
//! (`xml_log`, `zip_log`, and the lazily-interned `an_exception` short-names).

use crate::error::TrackerError;
use crate::tokenizer::XmlTokens;
use crate::types::{CentreId, ExceptionId, Phase, Status, XmlFileId, XmlLogId, ZipDownloadId, ZipLogId};

use super::Tracker;

/// An inner document discovered inside a downloaded archive.
#[derive(Debug, Clone)]
pub struct XmlFile {
    /// Row id.
    pub id: XmlFileId,
    /// The download this document was extracted from.
    pub zip_download_id: ZipDownloadId,
    /// Exact filename as discovered inside the archive.
    pub name: String,
    /// Owning centre, once tokenized.
    pub centre_id: Option<CentreId>,
    /// Discovery (extraction) time, Unix seconds.
    pub created_at: i64,
    /// Tokenized per-day increment.
    pub increment: Option<i32>,
    /// Document size in bytes.
    pub size_bytes: Option<i64>,
    /// Current pipeline phase.
    pub phase: Phase,
    /// Current status within that phase.
    pub status: Status,
}

/// An interned exception short-name, shared by `zip_log` and `xml_log` rows.
#[derive(Debug, Clone)]
pub struct AnException {
    /// Row id.
    pub id: ExceptionId,
    /// Short, stable name (e.g. `"XsdValidationError"`).
    pub short_name: String,
}

/// A log entry anchored to an `XmlFile`, recording a validation or pipeline failure.
#[derive(Debug, Clone)]
pub struct XmlLog {
    /// Row id.
    pub id: XmlLogId,
    /// The document this entry concerns.
    pub xml_file_id: XmlFileId,
    /// Which interned exception this entry is an instance of.
    pub exception_id: ExceptionId,
    /// Free-text detail (e.g. the schema validator's message).
    pub message: String,
    /// Source line, if the failure came from a line-oriented validator.
    pub line: Option<i32>,
    /// Source column, if available.
    pub column: Option<i32>,
    /// When the entry was recorded, Unix seconds.
    pub created_at: i64,
}

impl Tracker {
    /// Get-or-create an `XmlFile` row by (download, name), recording tokenized fields the first
    /// time it is seen.
    pub async fn get_or_create_xml_file(
        &self,
        zip_download_id: ZipDownloadId,
        name: &str,
        centre_id: Option<CentreId>,
        tokens: Option<&XmlTokens>,
        size_bytes: i64,
    ) -> Result<XmlFileId, TrackerError> {
        let now = chrono::Utc::now().timestamp();
        let increment = tokens.map(|t| t.increment);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO xml_file
                (zip_download_id, name, centre_id, created_at, increment, size_bytes, phase_id, status_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(zip_download_id, name) DO UPDATE SET name = name
            RETURNING id
            "#,
        )
        .bind(zip_download_id.get())
        .bind(name)
        .bind(centre_id.map(|c| c.get()))
        .bind(now)
        .bind(increment)
        .bind(size_bytes)
        .bind(Phase::XmlName.id())
        .bind(Status::Pending.id())
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// Apply the escalation matrix to an `XmlFile`'s (phase, status), persisting only the
    /// winning pair.
    pub async fn escalate_xml_file(
        &self,
        xml_file_id: XmlFileId,
        new_phase: Phase,
        new_status: Status,
    ) -> Result<(Phase, Status), TrackerError> {
        let row: (i32, i32) =
            sqlx::query_as("SELECT phase_id, status_id FROM xml_file WHERE id = ?")
                .bind(xml_file_id.get())
                .fetch_optional(self.pool())
                .await?
                .ok_or(TrackerError::NotFound {
                    kind: "xml_file",
                    id: xml_file_id.get(),
                })?;

        let old_phase = Phase::from_id(row.0)
            .ok_or_else(|| TrackerError::MissingSeed(format!("phase id {}", row.0)))?;
        let old_status = Status::from_id(row.1)
            .ok_or_else(|| TrackerError::MissingSeed(format!("status id {}", row.1)))?;

        let (phase, status) =
            super::matrix::escalate((old_phase, old_status), (new_phase, new_status));

        sqlx::query("UPDATE xml_file SET phase_id = ?, status_id = ? WHERE id = ?")
            .bind(phase.id())
            .bind(status.id())
            .bind(xml_file_id.get())
            .execute(self.pool())
            .await?;

        Ok((phase, status))
    }

    /// Fetch an xml file row by id.
    pub async fn get_xml_file(&self, xml_file_id: XmlFileId) -> Result<XmlFile, TrackerError> {
        let row: (i64, i64, String, Option<i64>, i64, Option<i32>, Option<i64>, i32, i32) =
            sqlx::query_as(
                r#"
                SELECT id, zip_download_id, name, centre_id, created_at, increment, size_bytes,
                       phase_id, status_id
                FROM xml_file
                WHERE id = ?
                "#,
            )
            .bind(xml_file_id.get())
            .fetch_optional(self.pool())
            .await?
            .ok_or(TrackerError::NotFound {
                kind: "xml_file",
                id: xml_file_id.get(),
            })?;

        let phase = Phase::from_id(row.7)
            .ok_or_else(|| TrackerError::MissingSeed(format!("phase id {}", row.7)))?;
        let status = Status::from_id(row.8)
            .ok_or_else(|| TrackerError::MissingSeed(format!("status id {}", row.8)))?;

        Ok(XmlFile {
            id: row.0.into(),
            zip_download_id: row.1.into(),
            name: row.2,
            centre_id: row.3.map(Into::into),
            created_at: row.4,
            increment: row.5,
            size_bytes: row.6,
            phase,
            status,
        })
    }

    /// All `XmlFile` rows currently sitting at (phase, status), ordered by ascending creation
    /// time. Used by the post-ingest driver (§4.9) to pick up each stage's work queue; callers
    /// split the result into specimens-then-experiments themselves via [`XmlFile::name`].
    pub async fn xml_files_by_phase_status(
        &self,
        phase: Phase,
        status: Status,
    ) -> Result<Vec<XmlFile>, TrackerError> {
        let rows: Vec<(i64, i64, String, Option<i64>, i64, Option<i32>, Option<i64>, i32, i32)> =
            sqlx::query_as(
                r#"
                SELECT id, zip_download_id, name, centre_id, created_at, increment, size_bytes,
                       phase_id, status_id
                FROM xml_file
                WHERE phase_id = ? AND status_id = ?
                ORDER BY created_at ASC, id ASC
                "#,
            )
            .bind(phase.id())
            .bind(status.id())
            .fetch_all(self.pool())
            .await?;

        rows.into_iter()
            .map(|row| {
                let phase = Phase::from_id(row.7)
                    .ok_or_else(|| TrackerError::MissingSeed(format!("phase id {}", row.7)))?;
                let status = Status::from_id(row.8)
                    .ok_or_else(|| TrackerError::MissingSeed(format!("status id {}", row.8)))?;
                Ok(XmlFile {
                    id: row.0.into(),
                    zip_download_id: row.1.into(),
                    name: row.2,
                    centre_id: row.3.map(Into::into),
                    created_at: row.4,
                    increment: row.5,
                    size_bytes: row.6,
                    phase,
                    status,
                })
            })
            .collect()
    }

    /// Get-or-create an interned exception short-name.
    pub async fn get_or_create_exception(
        &self,
        short_name: &str,
    ) -> Result<ExceptionId, TrackerError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO an_exception (short_name)
            VALUES (?)
            ON CONFLICT(short_name) DO UPDATE SET short_name = short_name
            RETURNING id
            "#,
        )
        .bind(short_name)
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// Append a log entry anchored to an `XmlFile`.
    pub async fn append_xml_log(
        &self,
        xml_file_id: XmlFileId,
        exception_short_name: &str,
        message: &str,
        line: Option<i32>,
        column: Option<i32>,
    ) -> Result<XmlLogId, TrackerError> {
        let exception_id = self.get_or_create_exception(exception_short_name).await?;
        let now = chrono::Utc::now().timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO xml_log (xml_file_id, exception_id, message, line, col, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(xml_file_id.get())
        .bind(exception_id.get())
        .bind(message)
        .bind(line)
        .bind(column)
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// Append a log entry anchored to a `ZipDownload`.
    pub async fn append_zip_log(
        &self,
        zip_download_id: ZipDownloadId,
        exception_short_name: &str,
        message: &str,
    ) -> Result<ZipLogId, TrackerError> {
        let exception_id = self.get_or_create_exception(exception_short_name).await?;
        let now = chrono::Utc::now().timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO zip_log (zip_download_id, exception_id, message, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(zip_download_id.get())
        .bind(exception_id.get())
        .bind(message)
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// All log entries recorded against an `XmlFile`, oldest first.
    pub async fn xml_logs_for(&self, xml_file_id: XmlFileId) -> Result<Vec<XmlLog>, TrackerError> {
        let rows: Vec<(i64, i64, i64, String, Option<i32>, Option<i32>, i64)> = sqlx::query_as(
            r#"
            SELECT id, xml_file_id, exception_id, message, line, col, created_at
            FROM xml_log
            WHERE xml_file_id = ?
            ORDER BY id
            "#,
        )
        .bind(xml_file_id.get())
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| XmlLog {
                id: r.0.into(),
                xml_file_id: r.1.into(),
                exception_id: r.2.into(),
                message: r.3,
                line: r.4,
                column: r.5,
                created_at: r.6,
            })
            .collect())
    }
}
