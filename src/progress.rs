//! Progress-callback trait for conversion job lifecycle events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to observe
//! every job a [`crate::job::Converter`] runs: submission, each stage
//! transition, and the terminal outcome.
//!
//! The trait is `Send + Sync` because jobs run on Tokio worker threads and
//! several jobs may report at once.
//!
//! # Example
//!
//! ```rust
//! use pdf2epub::{ConversionConfig, JobId, JobProgressCallback, JobStatus};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     stages: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for StageCounter {
//!     fn on_stage(&self, _job: &JobId, status: JobStatus) {
//!         self.stages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("now {status}");
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(StageCounter { stages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::JobError;
use crate::job::{ArtifactRef, JobId, JobStatus};
use std::sync::Arc;

/// Called by the orchestrator as a job moves through its state machine.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Calls for one job are ordered; calls for different
/// jobs may interleave across threads.
pub trait JobProgressCallback: Send + Sync {
    /// Called once the upload passed validation and the job is `Pending`.
    fn on_job_submitted(&self, job: &JobId, filename: &str) {
        let _ = (job, filename);
    }

    /// Called on entry to `Extracting`, `Segmenting` and `Packaging`.
    fn on_stage(&self, job: &JobId, status: JobStatus) {
        let _ = (job, status);
    }

    /// Called after the artifact is written and temp input removed.
    ///
    /// # Arguments
    /// * `chapters` — number of chapters in the package
    fn on_job_done(&self, job: &JobId, artifact: &ArtifactRef, chapters: usize) {
        let _ = (job, artifact, chapters);
    }

    /// Called after a stage failed and temp input was removed.
    fn on_job_failed(&self, job: &JobId, error: &JobError) {
        let _ = (job, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct TrackingCallback {
        stages: AtomicUsize,
        done: AtomicUsize,
        failed: AtomicUsize,
    }

    impl JobProgressCallback for TrackingCallback {
        fn on_stage(&self, _job: &JobId, _status: JobStatus) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_done(&self, _job: &JobId, _artifact: &ArtifactRef, _chapters: usize) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_failed(&self, _job: &JobId, _error: &JobError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let id = JobId::new();
        cb.on_job_submitted(&id, "book.pdf");
        cb.on_stage(&id, JobStatus::Extracting);
        cb.on_job_failed(
            &id,
            &JobError {
                kind: ErrorKind::ExtractionError,
                stage: "extracting".into(),
                message: "bad".into(),
            },
        );
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let id = JobId::new();
        tracker.on_stage(&id, JobStatus::Extracting);
        tracker.on_stage(&id, JobStatus::Segmenting);
        tracker.on_stage(&id, JobStatus::Packaging);
        let artifact = ArtifactRef {
            id: Uuid::new_v4(),
            path: PathBuf::from("out.epub"),
        };
        tracker.on_job_done(&id, &artifact, 3);

        assert_eq!(tracker.stages.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.done.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_job_submitted(&JobId::new(), "x.pdf");
    }
}
