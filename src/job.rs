//! Background conversion jobs.
//!
//! A [`Converter`] owns every job it accepted. `submit` validates the upload
//! synchronously and returns a handle at once; the conversion itself runs on
//! a Tokio task that walks the job through
//!
//! ```text
//! Pending ─▶ Extracting ─▶ Segmenting ─▶ Packaging ─▶ Done
//!               │              │             │
//!               └──────────────┴─────────────┴──────▶ Failed
//! ```
//!
//! Stage failures are classified into a [`JobError`] and stored in the job's
//! report; they never surface as a panic or an `Err` from the task. Terminal
//! jobs are removed the first time their report is retrieved, or once the
//! retention window has elapsed.

use crate::config::ConversionConfig;
use crate::convert::run_pipeline;
use crate::error::{JobError, Pdf2EpubError};
use crate::output::{ConversionStats, DocumentMetadata, ResolvedMetadata};
use crate::pipeline::extract::{self, TextExtractor};
use crate::pipeline::input::{self, Upload};
use crate::progress::JobProgressCallback;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extension of every artifact in the output directory.
const ARTIFACT_EXT: &str = "epub";

// ── Identifiers and reports ──────────────────────────────────────────────

/// Opaque job identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = Pdf2EpubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Pdf2EpubError::JobNotFound { id: s.to_string() })
    }
}

/// What callers hold on to between `submit` and `job_result`.
pub type JobHandle = JobId;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Extracting,
    Segmenting,
    Packaging,
    Done,
    Failed,
}

impl JobStatus {
    /// `Done` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Extracting => "extracting",
            JobStatus::Segmenting => "segmenting",
            JobStatus::Packaging => "packaging",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A finished package in the output directory, named `{id}.epub`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: Uuid,
    pub path: PathBuf,
}

impl ArtifactRef {
    /// File name an artifact with `id` is stored under.
    pub fn file_name(id: Uuid) -> String {
        format!("{id}.{ARTIFACT_EXT}")
    }

    /// Recognise `path` as an artifact: `{uuid}.epub` and nothing else.
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.extension()? != ARTIFACT_EXT {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let id = Uuid::parse_str(stem).ok()?;
        // Reject alternative spellings (braced, urn:, uppercase) of the same id.
        if stem != id.to_string() {
            return None;
        }
        Some(Self {
            id,
            path: path.to_path_buf(),
        })
    }
}

/// Snapshot of a job, as returned by [`Converter::job_result`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: JobId,
    pub status: JobStatus,
    /// Set when `status` is `Done`.
    pub artifact: Option<ArtifactRef>,
    /// Set when `status` is `Done`.
    pub metadata: Option<ResolvedMetadata>,
    /// Set when `status` is `Done`.
    pub stats: Option<ConversionStats>,
    /// Set when `status` is `Failed`.
    pub error: Option<JobError>,
}

struct JobEntry {
    report: JobReport,
    finished_at: Option<Instant>,
    status_tx: watch::Sender<JobStatus>,
}

// ── Orchestrator ─────────────────────────────────────────────────────────

struct Inner {
    config: ConversionConfig,
    extractor: Arc<dyn TextExtractor>,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl Inner {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, id: JobId, status: JobStatus) {
        if let Some(entry) = self.jobs().get_mut(&id) {
            entry.report.status = status;
            entry.status_tx.send_replace(status);
        }
        debug!(job = %id, %status, "Job stage");
        self.notify(id, |cb| cb.on_stage(&id, status));
    }

    /// Deliver one progress event. A panicking callback is logged and does
    /// not affect the job.
    fn notify(&self, id: JobId, event: impl FnOnce(&dyn JobProgressCallback)) {
        if let Some(ref cb) = self.config.progress_callback {
            if panic::catch_unwind(AssertUnwindSafe(|| event(cb.as_ref()))).is_err() {
                warn!(job = %id, "Progress callback panicked");
            }
        }
    }

    /// Publish a terminal report. The caller has already removed temp input.
    ///
    /// Callbacks fire before the state is published, so anyone woken by
    /// [`Converter::wait`] observes them as already delivered.
    fn finish(&self, id: JobId, outcome: Result<Completed, JobError>) {
        let status = match &outcome {
            Ok(done) => {
                info!(
                    job = %id,
                    artifact = %done.artifact.path.display(),
                    chapters = done.stats.chapter_count,
                    "Job done"
                );
                self.notify(id, |cb| {
                    cb.on_job_done(&id, &done.artifact, done.stats.chapter_count)
                });
                JobStatus::Done
            }
            Err(e) => {
                warn!(job = %id, kind = %e.kind, stage = %e.stage, "Job failed: {}", e.message);
                self.notify(id, |cb| cb.on_job_failed(&id, e));
                JobStatus::Failed
            }
        };

        let mut jobs = self.jobs();
        if let Some(entry) = jobs.get_mut(&id) {
            let report = &mut entry.report;
            report.status = status;
            match outcome {
                Ok(done) => {
                    report.artifact = Some(done.artifact);
                    report.metadata = Some(done.metadata);
                    report.stats = Some(done.stats);
                }
                Err(e) => report.error = Some(e),
            }
            entry.finished_at = Some(Instant::now());
            entry.status_tx.send_replace(status);
        }
    }
}

struct Completed {
    artifact: ArtifactRef,
    metadata: ResolvedMetadata,
    stats: ConversionStats,
}

/// Accepts uploads, runs conversions in the background, and manages the
/// artifacts they produce.
///
/// Cloning is cheap; clones share the same job table.
///
/// # Example
/// ```rust,no_run
/// use pdf2epub::{ConversionConfig, Converter, DocumentMetadata, JobStatus, Upload};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let converter = Converter::new(ConversionConfig::default());
/// let bytes = std::fs::read("walden.pdf")?;
/// let handle = converter.submit(Upload::pdf(bytes, "walden.pdf"), DocumentMetadata::default())?;
///
/// let report = converter.wait(&handle).await?;
/// if report.status == JobStatus::Done {
///     println!("wrote {}", report.artifact.unwrap().path.display());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Converter {
    inner: Arc<Inner>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.inner.config)
            .field("extractor", &self.inner.extractor.name())
            .field("jobs", &self.inner.jobs().len())
            .finish()
    }
}

impl Converter {
    /// A converter using the default text extraction backend.
    pub fn new(config: ConversionConfig) -> Self {
        Self::with_extractor(config, extract::default_extractor())
    }

    /// A converter using a specific text extraction backend.
    pub fn with_extractor(config: ConversionConfig, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                extractor,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.inner.config
    }

    /// Accept an upload and start converting it in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// `InvalidInput` kinds when the declared media type is not accepted, the
    /// payload is empty, or it exceeds `max_upload_bytes`. Nothing is written
    /// to disk in that case.
    pub fn submit(
        &self,
        upload: Upload,
        metadata: DocumentMetadata,
    ) -> Result<JobHandle, Pdf2EpubError> {
        self.sweep_expired();
        input::validate_upload(&upload, &self.inner.config)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Pdf2EpubError::Internal(format!("submit needs a Tokio runtime: {e}")))?;

        let id = JobId::new();
        let (status_tx, _) = watch::channel(JobStatus::Pending);
        self.inner.jobs().insert(
            id,
            JobEntry {
                report: JobReport {
                    id,
                    status: JobStatus::Pending,
                    artifact: None,
                    metadata: None,
                    stats: None,
                    error: None,
                },
                finished_at: None,
                status_tx,
            },
        );

        info!(job = %id, file = %upload.filename, bytes = upload.bytes.len(), "Job submitted");
        self.inner
            .notify(id, |cb| cb.on_job_submitted(&id, &upload.filename));

        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            let outcome = AssertUnwindSafe(execute(&inner, id, upload, metadata))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(JobError::panicked(payload.as_ref())));
            inner.finish(id, outcome);
        });

        Ok(id)
    }

    /// Current report for a job. A terminal report is handed out once: the
    /// job is forgotten as soon as it is returned.
    ///
    /// # Errors
    /// `NotFound` for a handle that was never issued, was already retrieved
    /// in a terminal state, or expired.
    pub fn job_result(&self, handle: &JobHandle) -> Result<JobReport, Pdf2EpubError> {
        self.sweep_expired();
        let mut jobs = self.inner.jobs();
        let entry = jobs.get(handle).ok_or_else(|| Pdf2EpubError::JobNotFound {
            id: handle.to_string(),
        })?;

        if entry.report.status.is_terminal() {
            let report = jobs
                .remove(handle)
                .map(|e| e.report)
                .ok_or_else(|| Pdf2EpubError::Internal("job vanished under lock".into()))?;
            debug!(job = %handle, status = %report.status, "Terminal report retrieved");
            Ok(report)
        } else {
            Ok(entry.report.clone())
        }
    }

    /// Wait until a job reaches a terminal state, then retrieve its report
    /// as [`Converter::job_result`] does.
    pub async fn wait(&self, handle: &JobHandle) -> Result<JobReport, Pdf2EpubError> {
        let mut rx = {
            let jobs = self.inner.jobs();
            let entry = jobs.get(handle).ok_or_else(|| Pdf2EpubError::JobNotFound {
                id: handle.to_string(),
            })?;
            entry.status_tx.subscribe()
        };

        // The sender lives in the job entry; losing it means the entry was
        // removed by someone else.
        rx.wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| Pdf2EpubError::JobNotFound {
                id: handle.to_string(),
            })?;

        self.job_result(handle)
    }

    /// Current status without consuming a terminal report.
    pub fn status(&self, handle: &JobHandle) -> Option<JobStatus> {
        self.inner.jobs().get(handle).map(|e| e.report.status)
    }

    /// Number of jobs currently held (any state).
    pub fn job_count(&self) -> usize {
        self.inner.jobs().len()
    }

    /// Drop terminal jobs older than the retention window. Returns how many
    /// were removed.
    pub fn sweep_expired(&self) -> usize {
        let retention = self.inner.config.retention();
        let mut jobs = self.inner.jobs();
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.finished_at {
            Some(t) if entry.report.status.is_terminal() => t.elapsed() < retention,
            _ => true,
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!("Swept {} expired jobs", removed);
        }
        removed
    }

    // ── Artifacts ────────────────────────────────────────────────────────

    /// Artifacts currently in the output directory, sorted by id. A missing
    /// directory holds no artifacts.
    pub async fn list_artifacts(&self) -> Result<Vec<ArtifactRef>, Pdf2EpubError> {
        let dir = &self.inner.config.output_dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Pdf2EpubError::Internal(format!("{}: {e}", dir.display()))),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Pdf2EpubError::Internal(format!("{}: {e}", dir.display())))?
        {
            if let Some(artifact) = ArtifactRef::from_path(&entry.path()) {
                artifacts.push(artifact);
            }
        }
        artifacts.sort_by_key(|a| a.id);
        Ok(artifacts)
    }

    /// Look up one artifact by id.
    pub async fn artifact(&self, id: Uuid) -> Result<ArtifactRef, Pdf2EpubError> {
        let path = self.artifact_path(id);
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(ArtifactRef { id, path }),
            _ => Err(Pdf2EpubError::ArtifactNotFound { id: id.to_string() }),
        }
    }

    /// Delete an artifact. The ref must name a file this converter would
    /// have produced.
    pub async fn delete_artifact(&self, artifact: &ArtifactRef) -> Result<(), Pdf2EpubError> {
        let expected = self.artifact_path(artifact.id);
        if artifact.path != expected {
            return Err(Pdf2EpubError::ArtifactNotFound {
                id: artifact.path.display().to_string(),
            });
        }
        self.delete_artifact_by_id(artifact.id).await
    }

    /// Delete the artifact stored as `{id}.epub`.
    pub async fn delete_artifact_by_id(&self, id: Uuid) -> Result<(), Pdf2EpubError> {
        let path = self.artifact_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(artifact = %id, "Deleted artifact");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Pdf2EpubError::ArtifactNotFound { id: id.to_string() })
            }
            Err(e) => Err(Pdf2EpubError::OutputWriteFailed { path, source: e }),
        }
    }

    fn artifact_path(&self, id: Uuid) -> PathBuf {
        self.inner.config.output_dir.join(ArtifactRef::file_name(id))
    }
}

/// The body of one job task.
async fn execute(
    inner: &Arc<Inner>,
    id: JobId,
    upload: Upload,
    metadata: DocumentMetadata,
) -> Result<Completed, JobError> {
    let config = &inner.config;
    let prefix = format!("job-{id}-");

    let output = run_pipeline(
        &prefix,
        upload,
        &metadata,
        config,
        Arc::clone(&inner.extractor),
        |status| inner.set_status(id, status),
    )
    .await
    .map_err(|failure| JobError::from_stage(failure.stage, &failure.error))?;

    let artifact = write_artifact(&config.output_dir, &output.epub)
        .await
        .map_err(|e| JobError::from_stage("writing", &e))?;

    Ok(Completed {
        artifact,
        metadata: output.metadata,
        stats: output.stats,
    })
}

/// Write `bytes` to `dir/{uuid}.epub` atomically (temp name + rename).
async fn write_artifact(dir: &Path, bytes: &[u8]) -> Result<ArtifactRef, Pdf2EpubError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Pdf2EpubError::ArtifactWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let id = Uuid::new_v4();
    let path = dir.join(ArtifactRef::file_name(id));
    let tmp_path = path.with_extension("epub.tmp");

    if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Pdf2EpubError::ArtifactWriteFailed { path, source: e });
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Pdf2EpubError::ArtifactWriteFailed { path, source: e });
    }

    debug!("Wrote artifact {} ({} bytes)", path.display(), bytes.len());
    Ok(ArtifactRef { id, path })
}
