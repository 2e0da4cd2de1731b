//! ZipDownload CRUD and progress updates (C7's tracker-facing half of §4.4).

use crate::error::TrackerError;
use crate::progress::ProgressSink;
use crate::types::{FileSourceHasZipId, Phase, Status, ZipDownloadId};

use super::Tracker;

/// One attempt to download an archive from a specific hosting file source.
#[derive(Debug, Clone)]
pub struct ZipDownload {
    /// Row id.
    pub id: ZipDownloadId,
    /// The hosting relation this attempt is against.
    pub file_source_has_zip_id: FileSourceHasZipId,
    /// Attempt start time, Unix seconds.
    pub started_at: i64,
    /// Last time a progress update was recorded, Unix seconds.
    pub last_received_at: Option<i64>,
    /// Bytes received so far.
    pub bytes_received: i64,
    /// Current pipeline phase (mirrors the owning `ZipAction` at creation time).
    pub phase: Phase,
    /// Current status.
    pub status: Status,
}

impl Tracker {
    /// Start a new download attempt row.
    pub async fn start_download(
        &self,
        file_source_has_zip_id: FileSourceHasZipId,
    ) -> Result<ZipDownloadId, TrackerError> {
        let now = chrono::Utc::now().timestamp();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO zip_download
                (file_source_has_zip_id, started_at, bytes_received, phase_id, status_id)
            VALUES (?, ?, 0, ?, ?)
            RETURNING id
            "#,
        )
        .bind(file_source_has_zip_id.get())
        .bind(now)
        .bind(Phase::Download.id())
        .bind(Status::Running.id())
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// Record a progress update. Called from the download worker's [`ProgressSink`] adapter.
    pub async fn record_download_progress(
        &self,
        zip_download_id: ZipDownloadId,
        bytes_received: u64,
    ) -> Result<(), TrackerError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE zip_download SET bytes_received = ?, last_received_at = ? WHERE id = ?",
        )
        .bind(bytes_received as i64)
        .bind(now)
        .bind(zip_download_id.get())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Finish a download attempt, recording its terminal phase and status. Unlike
    /// [`Tracker::escalate_download`], this sets the pair unconditionally — correct for a
    /// download's single terminal write, where there is no prior sibling state to protect.
    pub async fn finish_download(
        &self,
        zip_download_id: ZipDownloadId,
        phase: Phase,
        status: Status,
    ) -> Result<(), TrackerError> {
        sqlx::query("UPDATE zip_download SET phase_id = ?, status_id = ? WHERE id = ?")
            .bind(phase.id())
            .bind(status.id())
            .bind(zip_download_id.get())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Apply the escalation matrix to a `ZipDownload`'s (phase, status), persisting only the
    /// winning pair. Used by extraction (§4.8) to fold multiple inner documents' outcomes back
    /// onto their shared download row.
    pub async fn escalate_download(
        &self,
        zip_download_id: ZipDownloadId,
        new_phase: Phase,
        new_status: Status,
    ) -> Result<(Phase, Status), TrackerError> {
        let row: (i32, i32) =
            sqlx::query_as("SELECT phase_id, status_id FROM zip_download WHERE id = ?")
                .bind(zip_download_id.get())
                .fetch_optional(self.pool())
                .await?
                .ok_or(TrackerError::NotFound {
                    kind: "zip_download",
                    id: zip_download_id.get(),
                })?;

        let old_phase = Phase::from_id(row.0)
            .ok_or_else(|| TrackerError::MissingSeed(format!("phase id {}", row.0)))?;
        let old_status = Status::from_id(row.1)
            .ok_or_else(|| TrackerError::MissingSeed(format!("status id {}", row.1)))?;

        let (phase, status) =
            super::matrix::escalate((old_phase, old_status), (new_phase, new_status));

        sqlx::query("UPDATE zip_download SET phase_id = ?, status_id = ? WHERE id = ?")
            .bind(phase.id())
            .bind(status.id())
            .bind(zip_download_id.get())
            .execute(self.pool())
            .await?;

        Ok((phase, status))
    }

    /// Fetch a download row by id.
    pub async fn get_download(
        &self,
        zip_download_id: ZipDownloadId,
    ) -> Result<ZipDownload, TrackerError> {
        let row: (i64, i64, i64, Option<i64>, i64, i32, i32) = sqlx::query_as(
            r#"
            SELECT id, file_source_has_zip_id, started_at, last_received_at, bytes_received,
                   phase_id, status_id
            FROM zip_download
            WHERE id = ?
            "#,
        )
        .bind(zip_download_id.get())
        .fetch_optional(self.pool())
        .await?
        .ok_or(TrackerError::NotFound {
            kind: "zip_download",
            id: zip_download_id.get(),
        })?;

        let phase = Phase::from_id(row.5)
            .ok_or_else(|| TrackerError::MissingSeed(format!("phase id {}", row.5)))?;
        let status = Status::from_id(row.6)
            .ok_or_else(|| TrackerError::MissingSeed(format!("status id {}", row.6)))?;

        Ok(ZipDownload {
            id: row.0.into(),
            file_source_has_zip_id: row.1.into(),
            started_at: row.2,
            last_received_at: row.3,
            bytes_received: row.4,
            phase,
            status,
        })
    }
}

/// Adapts a [`Tracker`] handle and a target [`ZipDownloadId`] into a [`ProgressSink`], so the
/// download worker's progress meter can persist byte-crossing updates without knowing about the
/// tracker's schema. `on_progress` itself is synchronous (the meter calls it inline during a
/// transfer), so updates are handed off over an unbounded channel to a background task that
/// performs the actual write; a lagging or dead receiver only delays a progress row, never the
/// transfer.
pub struct TrackerProgressSink {
    sender: tokio::sync::mpsc::UnboundedSender<u64>,
}

impl TrackerProgressSink {
    /// Build a sink writing progress for `zip_download_id` through `tracker`, spawning the
    /// background writer task on the current Tokio runtime.
    pub fn new(tracker: Tracker, zip_download_id: ZipDownloadId) -> Self {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel::<u64>();

        tokio::spawn(async move {
            while let Some(bytes_so_far) = receiver.recv().await {
                if let Err(e) = tracker
                    .record_download_progress(zip_download_id, bytes_so_far)
                    .await
                {
                    tracing::warn!(error = %e, "failed to persist download progress");
                }
            }
        });

        Self { sender }
    }
}

impl ProgressSink for TrackerProgressSink {
    fn on_progress(&self, bytes_so_far: u64) -> Result<(), String> {
        self.sender
            .send(bytes_so_far)
            .map_err(|_| "progress writer task has shut down".to_string())
    }
}
