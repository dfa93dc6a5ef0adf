//! Error types for the pdf2epub library.
//!
//! Two distinct error types reflect two distinct audiences:
//!
//! * [`Pdf2EpubError`] — returned as `Err` from synchronous entry points
//!   (upload validation, artifact management, calibration loading, the eager
//!   `convert_*` helpers).
//!
//! * [`JobError`] — the serialisable record of why a background job failed.
//!   Stage failures inside a job are caught, classified, and stored in the
//!   job's terminal [`crate::job::JobReport`]; they never escape the job task.
//!
//! Both expose an [`ErrorKind`] so callers can branch on the category without
//! matching every variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Machine-checkable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Wrong media type, oversized payload, missing metadata, bad calibration data.
    InvalidInput,
    /// The source document is unreadable or corrupt.
    ExtractionError,
    /// The output package could not be finalized.
    PackagingError,
    /// Unknown job, artifact, or calibration table.
    NotFound,
    /// A sync query against an empty table. Soft: the mapper still answers
    /// with the global estimate, so this kind never appears in an `Err`.
    OutOfRangeQuery,
    /// Unexpected internal failure (I/O, task panic).
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ExtractionError => "extraction_error",
            ErrorKind::PackagingError => "packaging_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::OutOfRangeQuery => "out_of_range_query",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// All errors returned by the pdf2epub library.
#[derive(Debug, Error)]
pub enum Pdf2EpubError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The upload declares a media type other than the accepted one.
    #[error("Unsupported media type '{found}': only {expected} documents can be converted")]
    UnsupportedMediaType { found: String, expected: String },

    /// The upload exceeds the configured size ceiling.
    #[error("Upload of {size} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The upload contains no bytes at all.
    #[error("Upload is empty")]
    EmptyPayload,

    /// Required package metadata is missing or blank.
    #[error("Missing required metadata field '{field}'")]
    MissingMetadata { field: &'static str },

    /// Calibration data violates a table invariant.
    #[error("Invalid calibration table '{title_key}': {reason}")]
    InvalidCalibration { title_key: String, reason: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("Document is not a readable PDF: {detail}")]
    CorruptPdf { detail: String },

    /// PDF is encrypted; text cannot be extracted without a password.
    #[error("Document is encrypted and its text cannot be extracted")]
    EncryptedPdf,

    /// The PDF parsed but has no pages to read text from.
    #[error("Document contains no pages with extractable text")]
    NoPages,

    /// Could not bind to a pdfium library (`pdfium` feature only).
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Place libpdfium in the working directory or on the system library path."
    )]
    PdfiumBindingFailed(String),

    // ── Packaging errors ──────────────────────────────────────────────────
    /// The package writer refused a chapter list.
    #[error("Cannot package an empty chapter list")]
    NoChapters,

    /// The zip container could not be written or finalized.
    #[error("Failed to finalize package: {detail}")]
    ContainerWriteFailed { detail: String },

    /// The finished package could not be stored in the output directory.
    #[error("Failed to store package at '{path}': {source}")]
    ArtifactWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A package produced elsewhere could not be read back.
    #[error("Malformed package: {detail}")]
    MalformedPackage { detail: String },

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// Job handle is unknown (never issued, already retrieved, or expired).
    #[error("Job '{id}' not found")]
    JobNotFound { id: String },

    /// Artifact reference does not name an existing artifact.
    #[error("Artifact '{id}' not found")]
    ArtifactNotFound { id: String },

    /// No calibration table is loaded under this key.
    #[error("No calibration table loaded for '{title_key}'")]
    TableNotFound { title_key: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2EpubError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        use Pdf2EpubError::*;
        match self {
            FileNotFound { .. }
            | PermissionDenied { .. }
            | InvalidInput { .. }
            | DownloadFailed { .. }
            | DownloadTimeout { .. }
            | UnsupportedMediaType { .. }
            | PayloadTooLarge { .. }
            | EmptyPayload
            | MissingMetadata { .. }
            | InvalidCalibration { .. }
            | InvalidConfig(_) => ErrorKind::InvalidInput,
            CorruptPdf { .. } | EncryptedPdf | NoPages | PdfiumBindingFailed(_) => {
                ErrorKind::ExtractionError
            }
            NoChapters
            | ContainerWriteFailed { .. }
            | ArtifactWriteFailed { .. }
            | MalformedPackage { .. } => ErrorKind::PackagingError,
            JobNotFound { .. } | ArtifactNotFound { .. } | TableNotFound { .. } => {
                ErrorKind::NotFound
            }
            OutputWriteFailed { .. } | Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Why a background conversion job failed.
///
/// Stored in the job's terminal report. `message` is suitable for display to
/// an end user; `stage` names the pipeline step that was running.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{stage} failed ({kind}): {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub stage: String,
    pub message: String,
}

impl JobError {
    /// Wrap a library error raised while `stage` was running.
    pub fn from_stage(stage: impl Into<String>, err: &Pdf2EpubError) -> Self {
        Self {
            kind: err.kind(),
            stage: stage.into(),
            message: err.to_string(),
        }
    }

    /// A job task that unwound instead of returning.
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        Self {
            kind: ErrorKind::Internal,
            stage: "running".to_string(),
            message: format!("Conversion task panicked: {detail}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_too_large_display() {
        let e = Pdf2EpubError::PayloadTooLarge {
            size: 2048,
            limit: 1024,
        };
        let msg = e.to_string();
        assert!(msg.contains("2048"), "got: {msg}");
        assert!(msg.contains("1024"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn extraction_variants_share_a_kind() {
        assert_eq!(
            Pdf2EpubError::CorruptPdf { detail: "xref".into() }.kind(),
            ErrorKind::ExtractionError
        );
        assert_eq!(Pdf2EpubError::EncryptedPdf.kind(), ErrorKind::ExtractionError);
        assert_eq!(Pdf2EpubError::NoPages.kind(), ErrorKind::ExtractionError);
    }

    #[test]
    fn artifact_write_failure_is_packaging() {
        let e = Pdf2EpubError::ArtifactWriteFailed {
            path: PathBuf::from("/out/x.epub"),
            source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "File exists"),
        };
        assert_eq!(e.kind(), ErrorKind::PackagingError);
        assert_eq!(JobError::from_stage("writing", &e).kind, ErrorKind::PackagingError);
    }

    #[test]
    fn panic_payloads_become_internal_job_errors() {
        let from_str = JobError::panicked(&"boom");
        assert_eq!(from_str.kind, ErrorKind::Internal);
        assert!(from_str.message.contains("boom"));

        let from_string = JobError::panicked(&String::from("bang"));
        assert!(from_string.message.contains("bang"));
        assert!(JobError::panicked(&42u8).message.contains("unknown cause"));
    }

    #[test]
    fn lookup_variants_are_not_found() {
        let e = Pdf2EpubError::ArtifactNotFound { id: "abc".into() };
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert!(e.to_string().contains("abc"));
    }

    #[test]
    fn job_error_carries_stage_and_kind() {
        let err = Pdf2EpubError::ContainerWriteFailed {
            detail: "disk full".into(),
        };
        let job = JobError::from_stage("packaging", &err);
        assert_eq!(job.kind, ErrorKind::PackagingError);
        assert!(job.to_string().contains("packaging"));
        assert!(job.message.contains("disk full"));
    }

    #[test]
    fn error_kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::OutOfRangeQuery).unwrap();
        assert_eq!(json, "\"out_of_range_query\"");
    }
}
