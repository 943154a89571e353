//! Progress publication.
//!
//! A single watch channel carries the latest [`CompilationProgress`].
//! Runs publish through [`ProgressTracker::publish`], which checks the
//! run's cancel token while holding the channel's lock: once a run is
//! cancelled, nothing it publishes can land after a reset.

use std::sync::atomic::{AtomicU64, Ordering};

use dayreel_common::CancelToken;
use dayreel_model::CompilationProgress;
use tokio::sync::watch;

#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<CompilationProgress>,
    regressions: AtomicU64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CompilationProgress::idle());
        Self {
            tx,
            regressions: AtomicU64::new(0),
        }
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> CompilationProgress {
        self.tx.borrow().clone()
    }

    /// Receiver that observes every future publication.
    pub fn subscribe(&self) -> watch::Receiver<CompilationProgress> {
        self.tx.subscribe()
    }

    /// Open a run owned by `token` with its `Loading` snapshot.
    ///
    /// Replaces whatever is current, including the last snapshot of a
    /// superseded run, so the percent baseline belongs to the new run.
    pub fn begin_run(&self, token: &CancelToken, total_clips: usize) -> bool {
        self.tx.send_if_modified(|current| {
            if token.is_cancelled() {
                return false;
            }
            tracing::trace!(total_clips, "Progress baseline");
            *current = CompilationProgress::loading_started(total_clips);
            true
        })
    }

    /// Publish `next` on behalf of the run owning `token`.
    ///
    /// Dropped if the run is cancelled or if `next` would move the
    /// percentage backwards within the run. Returns whether it was
    /// published.
    pub fn publish(&self, token: &CancelToken, next: CompilationProgress) -> bool {
        self.tx.send_if_modified(|current| {
            if token.is_cancelled() {
                return false;
            }
            if !current.permits(&next) {
                self.regressions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    from = current.percent_complete,
                    to = next.percent_complete,
                    "Ignoring regressing progress update"
                );
                return false;
            }
            tracing::trace!(
                stage = ?next.stage,
                percent = next.percent_complete,
                message = %next.status_message,
                "Progress"
            );
            *current = next;
            true
        })
    }

    /// Updates dropped so far for moving the percent backwards.
    pub fn regressions(&self) -> u64 {
        self.regressions.load(Ordering::Relaxed)
    }

    /// Return to the initial idle snapshot. Returns whether anything
    /// changed.
    pub fn reset(&self) -> bool {
        self.tx.send_if_modified(|current| {
            let idle = CompilationProgress::idle();
            if *current == idle {
                return false;
            }
            *current = idle;
            true
        })
    }
}
