//! CrawlingSession / SessionTask lifecycle: one row pair per pipeline invocation and per
//! subprocess stage within it (§4.5, §6).

use crate::error::TrackerError;
use crate::types::{Phase, SessionId, SessionTaskId};

use super::Tracker;

/// One pipeline invocation, from lock acquisition to shutdown.
#[derive(Debug, Clone)]
pub struct CrawlingSession {
    /// Row id.
    pub id: SessionId,
    /// Start time, Unix seconds.
    pub started_at: i64,
    /// End time, Unix seconds, once the session has closed.
    pub ended_at: Option<i64>,
    /// Whether the session completed without a structural fault. `None` while still open.
    pub success: Option<bool>,
}

/// One subprocess invocation inside a session (upload, integrity-and-context, overview).
#[derive(Debug, Clone)]
pub struct SessionTask {
    /// Row id.
    pub id: SessionTaskId,
    /// Owning session.
    pub session_id: SessionId,
    /// Pipeline phase this task advanced.
    pub phase: Phase,
    /// Start time, Unix seconds.
    pub started_at: i64,
    /// End time, Unix seconds, once the task has finished.
    pub ended_at: Option<i64>,
    /// Raw process exit status, if the task ran to completion.
    pub exit_status: Option<i32>,
    /// Free-text detail (stderr tail, interpreted error).
    pub comment: Option<String>,
}

impl Tracker {
    /// Open a new session row.
    pub async fn open_session(&self) -> Result<SessionId, TrackerError> {
        let now = chrono::Utc::now().timestamp();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO crawling_session (started_at) VALUES (?) RETURNING id",
        )
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// Close a session row with its final aggregate outcome.
    pub async fn close_session(&self, session_id: SessionId, success: bool) -> Result<(), TrackerError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE crawling_session SET ended_at = ?, success = ? WHERE id = ?")
            .bind(now)
            .bind(success)
            .bind(session_id.get())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Start a session task row for a subprocess invocation.
    pub async fn start_session_task(
        &self,
        session_id: SessionId,
        phase: Phase,
    ) -> Result<SessionTaskId, TrackerError> {
        let now = chrono::Utc::now().timestamp();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO session_task (session_id, phase_id, started_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(session_id.get())
        .bind(phase.id())
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        Ok(id.into())
    }

    /// Finish a session task row with its subprocess outcome.
    pub async fn finish_session_task(
        &self,
        session_task_id: SessionTaskId,
        exit_status: i32,
        comment: Option<&str>,
    ) -> Result<(), TrackerError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE session_task SET ended_at = ?, exit_status = ?, comment = ? WHERE id = ?",
        )
        .bind(now)
        .bind(exit_status)
        .bind(comment)
        .bind(session_task_id.get())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All tasks recorded for a session, in start order.
    pub async fn session_tasks(&self, session_id: SessionId) -> Result<Vec<SessionTask>, TrackerError> {
        let rows: Vec<(i64, i64, i32, i64, Option<i64>, Option<i32>, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT id, session_id, phase_id, started_at, ended_at, exit_status, comment
                FROM session_task
                WHERE session_id = ?
                ORDER BY id
                "#,
            )
            .bind(session_id.get())
            .fetch_all(self.pool())
            .await?;

        rows.into_iter()
            .map(|r| {
                let phase = Phase::from_id(r.2)
                    .ok_or_else(|| TrackerError::MissingSeed(format!("phase id {}", r.2)))?;
                Ok(SessionTask {
                    id: r.0.into(),
                    session_id: r.1.into(),
                    phase,
                    started_at: r.3,
                    ended_at: r.4,
                    exit_status: r.5,
                    comment: r.6,
                })
            })
            .collect()
    }
}
