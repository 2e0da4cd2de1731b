//! Error types for centre-crawler.

use thiserror::Error;

/// Result type alias for centre-crawler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the tracker store (C1).
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Could not obtain a pooled connection after exhausting the configured back-off.
    #[error("tracker connection exhausted after {attempts} attempts: {source}")]
    ConnectionExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Underlying database error from the final attempt.
        source: sqlx::Error,
    },
    /// A query failed for a reason other than connectivity.
    #[error("tracker query failed: {0}")]
    Query(#[from] sqlx::Error),
    /// A required enumeration row (phase, status, protocol, ...) was missing from a freshly
    /// opened tracker. Indicates the seed migration did not run or was tampered with.
    #[error("missing required seed row: {0}")]
    MissingSeed(String),
    /// A row expected to exist by id was not found.
    #[error("no such {kind} with id {id}")]
    NotFound {
        /// Human-readable entity kind, e.g. "zip_action".
        kind: &'static str,
        /// The id that was looked up.
        id: i64,
    },
}

/// Errors from a remote file-source driver (FTP/SFTP).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish a connection to the remote host.
    #[error("connect to {host} failed: {message}")]
    Connect {
        /// Hostname being connected to.
        host: String,
        /// Driver-reported failure reason.
        message: String,
    },
    /// Authentication was rejected by the remote host.
    #[error("authentication to {host} failed: {message}")]
    Auth {
        /// Hostname being authenticated against.
        host: String,
        /// Driver-reported failure reason.
        message: String,
    },
    /// Directory listing failed.
    #[error("listing {path} on {host} failed: {message}")]
    List {
        /// Hostname being listed.
        host: String,
        /// Remote path that was being listed.
        path: String,
        /// Driver-reported failure reason.
        message: String,
    },
    /// Streaming a remote file failed partway through.
    #[error("fetching {path} from {host} failed: {message}")]
    Fetch {
        /// Hostname the fetch was from.
        host: String,
        /// Remote path being fetched.
        path: String,
        /// Driver-reported failure reason.
        message: String,
    },
    /// The source's protocol has no registered driver (e.g. `http`, per the design-notes open
    /// questions).
    #[error("no discovery driver registered for protocol {0}")]
    UnsupportedProtocol(String),
}

/// Single-instance lock outcomes and failures (C5).
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock path exists but is not a regular file.
    #[error("lock path {0} exists but is not a regular file")]
    Invalid(std::path::PathBuf),
    /// Another process already holds the lock.
    #[error("another instance already holds the lock at {0}")]
    AlreadyRunning(std::path::PathBuf),
    /// Underlying I/O failure acquiring or releasing the lock.
    #[error("lock I/O error on {path}: {source}")]
    Io {
        /// Lock file path.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Top-level crate error.
///
/// Per the propagation policy: transient and per-artifact errors (transport, name-convention,
/// schema validation, subprocess) are recovered locally by the worker that hits them and never
/// surface here. Only structural faults reach the session orchestrator as an `Error`.
#[derive(Debug, Error)]
pub enum Error {
    /// Tracker store failure (connection exhaustion, missing seed data).
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    /// Remote transport failure escalated past the retry budget.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Single-instance lock failure.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Malformed or missing configuration (CLI bounds, properties file).
    #[error("configuration error: {0}")]
    Config(String),
    /// A subprocess stage exited with a non-zero, uninterpreted status and no retry applies.
    #[error("subprocess for phase {phase:?} exited with status {exit_code}")]
    Subprocess {
        /// Pipeline phase the subprocess was invoked for.
        phase: crate::types::Phase,
        /// Raw process exit code, or -1 if terminated by signal.
        exit_code: i32,
    },
    /// Generic I/O failure (filesystem layout, extraction, properties files).
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Archive reading/extraction failure.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    /// JSON (de)serialization failure, used for the `-r` run-report payload.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    /// Any other condition that terminates the process at startup.
    #[error("{0}")]
    Other(String),
}

/// Classifies whether an error is worth retrying. Per §7, only transport failures are retried
/// within a download attempt; everything else is either non-fatal-and-recorded or fatal.
pub trait IsRetryable {
    /// Returns `true` if another attempt of the same operation might succeed.
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect { .. }
            | TransportError::Fetch { .. }
            | TransportError::List { .. } => true,
            // A rejected credential will not start working on the next attempt.
            TransportError::Auth { .. } => false,
            TransportError::UnsupportedProtocol(_) => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(t) if t.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_connect_and_fetch_are_retryable() {
        let err = TransportError::Connect {
            host: "ftp.example.org".into(),
            message: "timed out".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn transport_auth_is_not_retryable() {
        let err = TransportError::Auth {
            host: "ftp.example.org".into(),
            message: "bad password".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn unsupported_protocol_is_not_retryable() {
        let err = TransportError::UnsupportedProtocol("http".into());
        assert!(!err.is_retryable());
    }
}
