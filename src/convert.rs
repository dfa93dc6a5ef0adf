//! Eager (inline) conversion entry points.
//!
//! These helpers run the whole pipeline in the caller's task and return the
//! finished package in memory. [`crate::job::Converter`] runs the very same
//! stages in a background task, writes the result to the output directory,
//! and records the outcome as a job report. Use the helpers for one-shot
//! conversions and the `Converter` when uploads arrive concurrently.

use crate::config::ConversionConfig;
use crate::error::Pdf2EpubError;
use crate::job::JobStatus;
use crate::output::{ConversionOutput, ConversionStats, DocumentMetadata};
use crate::pipeline::extract::{self, TextExtractor};
use crate::pipeline::input::{self, Upload};
use crate::pipeline::package;
use crate::pipeline::segment::{self, SegmentOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert PDF bytes held in memory.
///
/// `filename` is only used for the fallback title.
///
/// # Example
/// ```rust,no_run
/// use pdf2epub::{convert_bytes, ConversionConfig, DocumentMetadata};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("walden.pdf")?;
/// let meta = DocumentMetadata::default().with_author("Henry David Thoreau");
/// let output = convert_bytes(bytes, "walden.pdf", &meta, &ConversionConfig::default()).await?;
/// std::fs::write("walden.epub", &output.epub)?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// - `InvalidInput` kinds when the upload fails validation
/// - `ExtractionError` kinds when the bytes are not a readable PDF
/// - `PackagingError` kinds when the container cannot be built
pub async fn convert_bytes(
    bytes: impl Into<Vec<u8>>,
    filename: impl Into<String>,
    metadata: &DocumentMetadata,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2EpubError> {
    let upload = Upload::pdf(bytes, filename);
    input::validate_upload(&upload, config)?;
    run_pipeline(
        "convert-",
        upload,
        metadata,
        config,
        extract::default_extractor(),
        |_| {},
    )
    .await
    .map_err(|failure| failure.error)
}

/// Convert a local PDF file.
///
/// The file's extension decides its declared media type, exactly as for
/// uploads, so a PDF saved as `.bin` is rejected.
pub async fn convert_file(
    path: impl AsRef<Path>,
    metadata: &DocumentMetadata,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2EpubError> {
    let path = path.as_ref();
    let upload = input::resolve_input(&path.to_string_lossy(), config).await?;
    input::validate_upload(&upload, config)?;
    run_pipeline(
        "convert-",
        upload,
        metadata,
        config,
        extract::default_extractor(),
        |_| {},
    )
    .await
    .map_err(|failure| failure.error)
}

/// Synchronous wrapper around [`convert_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_file_sync(
    path: impl AsRef<Path>,
    metadata: &DocumentMetadata,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2EpubError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2EpubError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_file(path, metadata, config))
}

/// A stage error, tagged with the stage that raised it.
#[derive(Debug)]
pub(crate) struct StageFailure {
    pub stage: &'static str,
    pub error: Pdf2EpubError,
}

impl StageFailure {
    fn at(stage: &'static str) -> impl FnOnce(Pdf2EpubError) -> Self {
        move |error| Self { stage, error }
    }
}

/// Persist → extract → segment → package, reporting each stage entry
/// through `on_stage`. The upload must already be validated.
///
/// The temp copy of the input is gone by the time this returns, on every
/// path.
pub(crate) async fn run_pipeline(
    temp_prefix: &str,
    upload: Upload,
    metadata: &DocumentMetadata,
    config: &ConversionConfig,
    extractor: Arc<dyn TextExtractor>,
    mut on_stage: impl FnMut(JobStatus),
) -> Result<ConversionOutput, StageFailure> {
    let total_start = Instant::now();
    let resolved = metadata.resolve(&upload, &config.default_author, &config.default_language);
    info!("Starting conversion: {} ({} bytes)", upload.filename, upload.bytes.len());

    // ── Step 1: Persist payload ──────────────────────────────────────────
    let temp_dir = config.resolved_temp_dir();
    let prefix = temp_prefix.to_string();
    let bytes = upload.bytes;
    let temp_input = tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&temp_dir).map_err(|e| Pdf2EpubError::OutputWriteFailed {
            path: temp_dir.clone(),
            source: e,
        })?;
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".pdf")
            .tempfile_in(&temp_dir)
            .map_err(|e| Pdf2EpubError::OutputWriteFailed {
                path: temp_dir.clone(),
                source: e,
            })?;
        let path = file.path().to_path_buf();
        file.write_all(&bytes)
            .and_then(|_| file.flush())
            .map_err(|e| Pdf2EpubError::OutputWriteFailed { path, source: e })?;
        Ok::<_, Pdf2EpubError>(file)
    })
    .await
    .map_err(|e| Pdf2EpubError::Internal(format!("Persist task panicked: {e}")))
    .and_then(|r| r)
    .map_err(StageFailure::at("persisting"))?;
    debug!("Persisted input to {}", temp_input.path().display());

    // ── Step 2: Extract text ─────────────────────────────────────────────
    on_stage(JobStatus::Extracting);
    let extract_start = Instant::now();
    // On error `temp_input` drops here and the file is removed.
    let extracted = extract::extract_file(extractor, temp_input.path())
        .await
        .map_err(StageFailure::at("extracting"))?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

    if let Err(e) = temp_input.close() {
        warn!("Failed to remove temp input: {}", e);
    }

    if extracted.is_empty() {
        warn!(
            "No text extracted from {} pages; emitting placeholder chapter",
            extracted.page_count
        );
    }

    // ── Step 3: Segment into chapters ────────────────────────────────────
    on_stage(JobStatus::Segmenting);
    let chapters = segment::segment(&extracted.text, &SegmentOptions::from(config));
    info!("Segmented into {} chapters", chapters.len());

    // ── Step 4: Build package ────────────────────────────────────────────
    on_stage(JobStatus::Packaging);
    let package_start = Instant::now();
    let meta = resolved.clone();
    let (epub, chapters) = tokio::task::spawn_blocking(move || {
        let epub = package::build_package(&chapters, &meta, chrono::Utc::now())?;
        Ok::<_, Pdf2EpubError>((epub, chapters))
    })
    .await
    .map_err(|e| Pdf2EpubError::ContainerWriteFailed {
        detail: format!("package writer crashed: {e}"),
    })
    .and_then(|r| r)
    .map_err(StageFailure::at("packaging"))?;
    let package_duration_ms = package_start.elapsed().as_millis() as u64;

    // ── Step 5: Compute stats ────────────────────────────────────────────
    let stats = ConversionStats {
        page_count: extracted.page_count,
        unreadable_pages: extracted.unreadable_pages.len(),
        extracted_chars: extracted.text.chars().count(),
        chapter_count: chapters.len(),
        package_bytes: epub.len(),
        extract_duration_ms,
        package_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Conversion complete: {} pages → {} chapters, {}ms total",
        stats.page_count, stats.chapter_count, stats.total_duration_ms
    );

    Ok(ConversionOutput {
        epub,
        metadata: resolved,
        chapters,
        stats,
    })
}
