//! ZipFile / ZipAction / FileSourceHasZip: archives, their processing actions, and the
//! hosting relation between a `FileSource` and an action — plus the atomic `take-download-job`
//! claim protocol (§4.1, §4.2).

use crate::error::TrackerError;
use crate::tokenizer::ZipTokens;
use crate::types::{
    CentreId, FileSourceHasZipId, FileSourceId, Phase, ProcessingType, Status, ZipActionId,
    ZipFileId,
};

use super::Tracker;

/// An archive ever seen, unique by filename.
#[derive(Debug, Clone)]
pub struct ZipFile {
    /// Row id.
    pub id: ZipFileId,
    /// Exact filename as discovered.
    pub filename: String,
    /// Owning centre, once tokenized.
    pub centre_id: Option<CentreId>,
    /// Tokenized release date, year component.
    pub release_year: Option<i32>,
    /// Tokenized release date, month component.
    pub release_month: Option<i32>,
    /// Tokenized release date, day component.
    pub release_day: Option<i32>,
    /// Tokenized per-day increment.
    pub increment: Option<i32>,
    /// Archive size in bytes, once known.
    pub size_bytes: Option<i64>,
}

/// A (`ZipFile`, `ProcessingType`) pair — the unit the escalation matrix tracks.
#[derive(Debug, Clone)]
pub struct ZipAction {
    /// Row id.
    pub id: ZipActionId,
    /// The archive this action concerns.
    pub zip_file_id: ZipFileId,
    /// Which sub-directory it was discovered under.
    pub processing_type: ProcessingType,
    /// Current pipeline phase.
    pub phase: Phase,
    /// Current status within that phase.
    pub status: Status,
}

/// A `FileSource` known to host a given `ZipAction`, with its current preference rating.
#[derive(Debug, Clone)]
pub struct FileSourceHasZip {
    /// Row id.
    pub id: FileSourceHasZipId,
    /// The hosting file source.
    pub file_source_id: FileSourceId,
    /// The hosted action.
    pub zip_action_id: ZipActionId,
    /// Source-selection rating (§5, `rating.rs`).
    pub rating: i64,
}

impl Tracker {
    /// Get-or-create a `ZipFile` row by filename, recording tokenized fields the first time it is
    /// seen. Idempotent: a second call with the same filename is a no-op update that still
    /// returns the same id.
    pub async fn get_or_create_zip_file(
        &self,
        filename: &str,
        centre_id: Option<CentreId>,
        tokens: Option<&ZipTokens>,
    ) -> Result<ZipFileId, TrackerError> {
        let (year, month, day, increment) = match tokens {
            Some(t) => (
                Some(t.year as i32),
                Some(t.month as i32),
                Some(t.day as i32),
                Some(t.increment as i32),
            ),
            None => (None, None, None, None),
        };

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO zip_file (filename, centre_id, release_year, release_month, release_day, increment)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(filename) DO UPDATE SET filename = filename
            RETURNING id
            "#,
        )
        .bind(filename)
        .bind(centre_id.map(|c| c.get()))
        .bind(year)
        .bind(month)
        .bind(day)
        .bind(increment)
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// Record the archive's size once it is known (after a completed download).
    pub async fn set_zip_file_size(
        &self,
        zip_file_id: ZipFileId,
        size_bytes: i64,
    ) -> Result<(), TrackerError> {
        sqlx::query("UPDATE zip_file SET size_bytes = ? WHERE id = ?")
            .bind(size_bytes)
            .bind(zip_file_id.get())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Get-or-create a `ZipAction` for a (zip file, processing type) pair, starting at
    /// `(Phase::Download, Status::Pending)`.
    pub async fn get_or_create_zip_action(
        &self,
        zip_file_id: ZipFileId,
        processing_type: ProcessingType,
    ) -> Result<ZipActionId, TrackerError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO zip_action (zip_file_id, processing_type_id, phase_id, status_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(zip_file_id, processing_type_id) DO UPDATE SET zip_file_id = zip_file_id
            RETURNING id
            "#,
        )
        .bind(zip_file_id.get())
        .bind(processing_type.id())
        .bind(Phase::Download.id())
        .bind(Status::Pending.id())
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// Get-or-create the hosting relation between a `FileSource` and a `ZipAction`, seeding the
    /// rating at zero; `rating.rs` updates it afterwards.
    pub async fn get_or_create_file_source_has_zip(
        &self,
        file_source_id: FileSourceId,
        zip_action_id: ZipActionId,
    ) -> Result<FileSourceHasZipId, TrackerError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO file_source_has_zip (file_source_id, zip_action_id, rating)
            VALUES (?, ?, 0)
            ON CONFLICT(file_source_id, zip_action_id) DO UPDATE SET file_source_id = file_source_id
            RETURNING id
            "#,
        )
        .bind(file_source_id.get())
        .bind(zip_action_id.get())
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// Update a hosting relation's preference rating.
    pub async fn set_rating(
        &self,
        file_source_has_zip_id: FileSourceHasZipId,
        rating: i64,
    ) -> Result<(), TrackerError> {
        sqlx::query("UPDATE file_source_has_zip SET rating = ? WHERE id = ?")
            .bind(rating)
            .bind(file_source_has_zip_id.get())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Apply the escalation matrix to a `ZipAction`'s (phase, status), persisting only the
    /// winning pair.
    pub async fn escalate_zip_action(
        &self,
        zip_action_id: ZipActionId,
        new_phase: Phase,
        new_status: Status,
    ) -> Result<(Phase, Status), TrackerError> {
        let row: (i32, i32) =
            sqlx::query_as("SELECT phase_id, status_id FROM zip_action WHERE id = ?")
                .bind(zip_action_id.get())
                .fetch_optional(self.pool())
                .await?
                .ok_or(TrackerError::NotFound {
                    kind: "zip_action",
                    id: zip_action_id.get(),
                })?;

        let old_phase = Phase::from_id(row.0)
            .ok_or_else(|| TrackerError::MissingSeed(format!("phase id {}", row.0)))?;
        let old_status = Status::from_id(row.1)
            .ok_or_else(|| TrackerError::MissingSeed(format!("status id {}", row.1)))?;

        let (phase, status) = super::matrix::escalate((old_phase, old_status), (new_phase, new_status));

        sqlx::query("UPDATE zip_action SET phase_id = ?, status_id = ? WHERE id = ?")
            .bind(phase.id())
            .bind(status.id())
            .bind(zip_action_id.get())
            .execute(self.pool())
            .await?;

        Ok((phase, status))
    }

    /// Fetch a `ZipFile` row by id.
    pub async fn get_zip_file(&self, zip_file_id: ZipFileId) -> Result<ZipFile, TrackerError> {
        let row: (i64, String, Option<i64>, Option<i32>, Option<i32>, Option<i32>, Option<i32>, Option<i64>) =
            sqlx::query_as(
                r#"
                SELECT id, filename, centre_id, release_year, release_month, release_day, increment, size_bytes
                FROM zip_file WHERE id = ?
                "#,
            )
            .bind(zip_file_id.get())
            .fetch_optional(self.pool())
            .await?
            .ok_or(TrackerError::NotFound {
                kind: "zip_file",
                id: zip_file_id.get(),
            })?;

        Ok(ZipFile {
            id: row.0.into(),
            filename: row.1,
            centre_id: row.2.map(Into::into),
            release_year: row.3,
            release_month: row.4,
            release_day: row.5,
            increment: row.6,
            size_bytes: row.7,
        })
    }

    /// Fetch a `FileSourceHasZip` row by id, e.g. to walk back from a `ZipDownload` to its
    /// owning `ZipAction` (post-ingest needs the archive's on-disk path, §4.9).
    pub async fn get_file_source_has_zip(
        &self,
        file_source_has_zip_id: FileSourceHasZipId,
    ) -> Result<FileSourceHasZip, TrackerError> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT id, file_source_id, zip_action_id, rating FROM file_source_has_zip WHERE id = ?",
        )
        .bind(file_source_has_zip_id.get())
        .fetch_optional(self.pool())
        .await?
        .ok_or(TrackerError::NotFound {
            kind: "file_source_has_zip",
            id: file_source_has_zip_id.get(),
        })?;

        Ok(FileSourceHasZip {
            id: row.0.into(),
            file_source_id: row.1.into(),
            zip_action_id: row.2.into(),
            rating: row.3,
        })
    }

    /// Fetch a `ZipAction` row by id.
    pub async fn get_zip_action(&self, zip_action_id: ZipActionId) -> Result<ZipAction, TrackerError> {
        let row: (i64, i64, i32, i32, i32) = sqlx::query_as(
            "SELECT id, zip_file_id, processing_type_id, phase_id, status_id FROM zip_action WHERE id = ?",
        )
        .bind(zip_action_id.get())
        .fetch_optional(self.pool())
        .await?
        .ok_or(TrackerError::NotFound {
            kind: "zip_action",
            id: zip_action_id.get(),
        })?;

        let processing_type = ProcessingType::from_id(row.2)
            .ok_or_else(|| TrackerError::MissingSeed(format!("processing_type id {}", row.2)))?;
        let phase = Phase::from_id(row.3)
            .ok_or_else(|| TrackerError::MissingSeed(format!("phase id {}", row.3)))?;
        let status = Status::from_id(row.4)
            .ok_or_else(|| TrackerError::MissingSeed(format!("status id {}", row.4)))?;

        Ok(ZipAction {
            id: row.0.into(),
            zip_file_id: row.1.into(),
            processing_type,
            phase,
            status,
        })
    }

    /// All `FileSourceHasZip` candidates hosting `zip_action_id`, joined with their owning
    /// `FileSource` row, for the download worker's rating/retry loop (§4.3, §4.7).
    pub async fn candidate_sources_for_action(
        &self,
        zip_action_id: ZipActionId,
    ) -> Result<Vec<(FileSourceHasZip, super::centre::FileSource)>, TrackerError> {
        use sqlx::Row;

        let raw = sqlx::query(
            r#"
            SELECT fshz.id AS fshz_id, fshz.rating AS rating,
                   fs.id AS fs_id, fs.centre_id AS centre_id, fs.hostname AS hostname,
                   fs.protocol_id AS protocol_id, fs.base_path AS base_path,
                   fs.username AS username, fs.password AS password,
                   fs.resource_state_id AS resource_state_id
            FROM file_source_has_zip fshz
            JOIN file_source fs ON fs.id = fshz.file_source_id
            WHERE fshz.zip_action_id = ?
            ORDER BY fshz.id
            "#,
        )
        .bind(zip_action_id.get())
        .fetch_all(self.pool())
        .await?;

        raw.into_iter()
            .map(|r| {
                let fshz_id: i64 = r.try_get("fshz_id")?;
                let rating: i64 = r.try_get("rating")?;
                let fs_id: i64 = r.try_get("fs_id")?;
                let centre_id: i64 = r.try_get("centre_id")?;
                let hostname: String = r.try_get("hostname")?;
                let protocol_id: i32 = r.try_get("protocol_id")?;
                let base_path: String = r.try_get("base_path")?;
                let username: Option<String> = r.try_get("username")?;
                let password: Option<String> = r.try_get("password")?;
                let resource_state_id: i32 = r.try_get("resource_state_id")?;

                let protocol = crate::types::SourceProtocol::from_id(protocol_id).ok_or_else(|| {
                    TrackerError::MissingSeed(format!("source_protocol id {protocol_id}"))
                })?;
                let resource_state = crate::types::ResourceState::from_id(resource_state_id)
                    .ok_or_else(|| {
                        TrackerError::MissingSeed(format!("resource_state id {resource_state_id}"))
                    })?;

                Ok((
                    FileSourceHasZip {
                        id: fshz_id.into(),
                        file_source_id: fs_id.into(),
                        zip_action_id,
                        rating,
                    },
                    super::centre::FileSource {
                        id: fs_id.into(),
                        centre_id: centre_id.into(),
                        hostname,
                        protocol,
                        base_path,
                        username,
                        password,
                        resource_state,
                    },
                ))
            })
            .collect()
    }

    /// Atomically claim the next download job for a worker, ordered by source rating.
    ///
    /// Per §4.1's claim protocol: a `ZipAction` is claimable while it sits at
    /// `(zip_name, done)` — discovery's terminal state for a successfully tokenized entry —
    /// and a successful claim moves it to `(download, running)`. Exploits SQLite's
    /// serialized-writer guarantee: the `UPDATE ... WHERE` only succeeds for exactly one
    /// concurrent caller, checked via `rows_affected() == 1` rather than any explicit row lock.
    /// If another worker wins the race for the top candidate, retries against the next
    /// candidate internally (§4.7 step 2) rather than reporting an empty queue to the caller;
    /// only a genuinely empty queue returns `Ok(None)`.
    pub async fn take_download_job(
        &self,
    ) -> Result<Option<(FileSourceHasZipId, FileSourceId, ZipActionId)>, TrackerError> {
        loop {
            let candidate: Option<(i64, i64, i64)> = sqlx::query_as(
                r#"
                SELECT fshz.id, fshz.file_source_id, fshz.zip_action_id
                FROM file_source_has_zip fshz
                JOIN zip_action za ON za.id = fshz.zip_action_id
                WHERE za.phase_id = ? AND za.status_id = ?
                ORDER BY fshz.rating DESC, fshz.id ASC
                LIMIT 1
                "#,
            )
            .bind(Phase::ZipName.id())
            .bind(Status::Done.id())
            .fetch_optional(self.pool())
            .await?;

            let Some((fshz_id, file_source_id, zip_action_id)) = candidate else {
                return Ok(None);
            };

            let claimed = sqlx::query(
                "UPDATE zip_action SET phase_id = ?, status_id = ? WHERE id = ? AND phase_id = ? AND status_id = ?",
            )
            .bind(Phase::Download.id())
            .bind(Status::Running.id())
            .bind(zip_action_id)
            .bind(Phase::ZipName.id())
            .bind(Status::Done.id())
            .execute(self.pool())
            .await?;

            if claimed.rows_affected() != 1 {
                // Another worker won the race for this action; retry against the next
                // candidate instead of reporting the queue as empty.
                continue;
            }

            return Ok(Some((fshz_id.into(), file_source_id.into(), zip_action_id.into())));
        }
    }
}
