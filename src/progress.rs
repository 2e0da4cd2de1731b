//! Progress meter (C4): streams byte counters into the tracker during long transfers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One mebibyte, the boundary at which a progress update is pushed.
const BOUNDARY_BYTES: u64 = 1024 * 1024;

/// Callback invoked when a write crosses a reporting boundary. Receives `bytes_so_far`. Errors
/// are logged by the meter and never propagate — a tracker hiccup must never fail a download.
pub trait ProgressSink: Send + Sync {
    /// Push an update. Returning `Err` only causes a logged warning.
    fn on_progress(&self, bytes_so_far: u64) -> Result<(), String>;
}

/// Tracks cumulative bytes transferred and decides when to push an update.
///
/// Wraps a byte sink conceptually — callers invoke [`ProgressMeter::advance`] after each write
/// they perform, rather than the meter owning the I/O itself, which keeps it usable from both
/// the async download path and, in tests, from a plain loop over byte chunks.
pub struct ProgressMeter {
    bytes_so_far: AtomicU64,
    total_bytes: u64,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressMeter {
    /// Create a meter for a transfer of `total_bytes` (0 if unknown), reporting through `sink`.
    pub fn new(total_bytes: u64, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            bytes_so_far: AtomicU64::new(0),
            total_bytes,
            sink,
        }
    }

    /// Record that `n` additional bytes were written. Pushes an update if this write just
    /// crossed a 1 MiB boundary, or reached the declared total size. Never fails: a sink error
    /// is logged and swallowed.
    pub fn advance(&self, n: u64) {
        if n == 0 {
            return;
        }
        let before = self.bytes_so_far.fetch_add(n, Ordering::SeqCst);
        let after = before + n;

        let crossed_boundary = before / BOUNDARY_BYTES != after / BOUNDARY_BYTES;
        let reached_total = self.total_bytes > 0 && after >= self.total_bytes && before < self.total_bytes;

        if crossed_boundary || reached_total {
            if let Err(e) = self.sink.on_progress(after) {
                tracing::warn!(error = %e, bytes_so_far = after, "progress update failed, continuing transfer");
            }
        }
    }

    /// Bytes transferred so far.
    pub fn bytes_so_far(&self) -> u64 {
        self.bytes_so_far.load(Ordering::SeqCst)
    }

    /// Declared total size, 0 if unknown.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Fraction complete in `[0.0, 1.0]`, or 0.0 if the total is unknown.
    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_so_far() as f64 / self.total_bytes as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        updates: Mutex<Vec<u64>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&self, bytes_so_far: u64) -> Result<(), String> {
            self.updates.lock().unwrap().push(bytes_so_far);
            Ok(())
        }
    }

    struct FailingSink;

    impl ProgressSink for FailingSink {
        fn on_progress(&self, _bytes_so_far: u64) -> Result<(), String> {
            Err("tracker unreachable".into())
        }
    }

    #[test]
    fn pushes_update_on_mebibyte_boundary() {
        let sink = Arc::new(RecordingSink {
            updates: Mutex::new(Vec::new()),
        });
        let meter = ProgressMeter::new(10 * 1024 * 1024, sink.clone());

        meter.advance(512 * 1024);
        assert!(sink.updates.lock().unwrap().is_empty());

        meter.advance(600 * 1024); // crosses the first MiB boundary
        assert_eq!(sink.updates.lock().unwrap().len(), 1);
    }

    #[test]
    fn pushes_final_update_on_reaching_total() {
        let sink = Arc::new(RecordingSink {
            updates: Mutex::new(Vec::new()),
        });
        let meter = ProgressMeter::new(100, sink.clone());

        meter.advance(60);
        meter.advance(40);

        let updates = sink.updates.lock().unwrap();
        assert_eq!(*updates.last().unwrap(), 100);
    }

    #[test]
    fn sink_failure_is_swallowed() {
        let meter = ProgressMeter::new(1024 * 1024, Arc::new(FailingSink));
        meter.advance(1024 * 1024);
        assert_eq!(meter.bytes_so_far(), 1024 * 1024);
    }

    #[test]
    fn percent_complete_tracks_progress() {
        let sink = Arc::new(RecordingSink {
            updates: Mutex::new(Vec::new()),
        });
        let meter = ProgressMeter::new(200, sink);
        meter.advance(50);
        assert!((meter.percent_complete() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_total_never_reports_complete() {
        let sink = Arc::new(RecordingSink {
            updates: Mutex::new(Vec::new()),
        });
        let meter = ProgressMeter::new(0, sink);
        meter.advance(5 * 1024 * 1024);
        assert_eq!(meter.percent_complete(), 0.0);
    }
}
