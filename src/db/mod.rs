//! Tracker store (C1): persistent state of every package, action, download, and inner
//! document; the source of truth and work queue for the rest of the pipeline.
//!
//! ## Submodules
//!
//! Methods on [`Tracker`] are organized by domain:
//! - [`migrations`] — schema lifecycle, versioned migrations, enumeration seeding
//! - [`matrix`] — the phase-status escalation algorithm (§4.1)
//! - [`centre`] — Centre / FileSource CRUD and enumeration lookups
//! - [`zip`] — ZipFile / ZipAction / FileSourceHasZip, get-or-create, `take-download-job`
//! - [`download`] — ZipDownload CRUD and progress updates
//! - [`xml`] — XmlFile CRUD and the inner validation log rows
//! - [`session`] — CrawlingSession / SessionTask lifecycle

use sqlx::sqlite::SqlitePool;

mod centre;
mod download;
mod matrix;
mod migrations;
mod session;
mod xml;
mod zip;

pub use centre::{Centre, FileSource};
pub use download::{TrackerProgressSink, ZipDownload};
pub use matrix::escalate;
pub use session::{CrawlingSession, SessionTask};
pub use xml::{AnException, XmlFile, XmlLog};
pub use zip::{FileSourceHasZip, ZipAction, ZipFile};

/// Connection retry policy for acquiring a tracker connection (§4.1: "Entity-manager
/// lifetime"). Fixed by the spec, not user-configurable.
#[derive(Clone, Copy, Debug)]
pub struct ConnectRetryPolicy {
    /// Initial wait before the first retry.
    pub initial_wait: std::time::Duration,
    /// Multiplier applied to the wait after each failed attempt.
    pub multiplier: u32,
    /// Maximum number of attempts before giving up fatally.
    pub max_attempts: u32,
}

impl Default for ConnectRetryPolicy {
    fn default() -> Self {
        Self {
            initial_wait: std::time::Duration::from_secs(5 * 60),
            multiplier: 5,
            max_attempts: 5,
        }
    }
}

/// Handle to the relational tracker. Each operation acquires a short-lived connection from the
/// pool, performs its transaction, and releases it — there is no long-lived entity-manager
/// session held across network I/O.
#[derive(Clone)]
pub struct Tracker {
    pool: SqlitePool,
}

impl Tracker {
    /// The underlying connection pool, for submodules.
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the tracker's connection pool.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
