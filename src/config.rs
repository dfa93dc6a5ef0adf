//! Configuration types for conversion jobs and position sync.
//!
//! Conversion behaviour is controlled through [`ConversionConfig`] and the
//! sync policy constants through [`SyncConfig`]. Both are built via a builder
//! whose setters clamp obviously-bad values and whose `build()` rejects the
//! rest, so a config that exists is a config that is usable.

use crate::error::Pdf2EpubError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Media type accepted for conversion.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Author written into packages when the caller supplies none.
pub const DEFAULT_AUTHOR: &str = "Unknown Author";

/// Label returned when no calibration point qualifies.
pub const UNKNOWN_CHAPTER: &str = "Unknown Chapter";

/// Configuration for PDF-to-EPUB conversion jobs.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2epub::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .output_dir("/var/lib/pdf2epub")
///     .max_upload_bytes(20 * 1024 * 1024)
///     .min_chapter_chars(80)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Largest accepted upload in bytes. Default: 50 MiB.
    ///
    /// Checked before anything touches the filesystem.
    pub max_upload_bytes: usize,

    /// Declared media type an upload must carry. Default: `application/pdf`.
    pub accepted_media_type: String,

    /// Blocks shorter than this many characters are dropped as noise
    /// (running headers, page numbers, stray whitespace). Default: 50.
    pub min_chapter_chars: usize,

    /// Directory that receives finished `{uuid}.epub` artifacts.
    /// Default: `./epub-output`.
    pub output_dir: PathBuf,

    /// Directory for per-job temporary input files.
    /// `None` uses the platform temp directory.
    pub temp_dir: Option<PathBuf>,

    /// How long a finished job's report is kept if nobody retrieves it.
    /// Default: 1 hour.
    pub retention_secs: u64,

    /// Author used when the caller supplies none. Default: `"Unknown Author"`.
    pub default_author: String,

    /// `dc:language` used when the caller supplies none. Default: `"en"`.
    pub default_language: String,

    /// Title of the synthetic chapter emitted when no block survives
    /// segmentation. Default: `"Document"`.
    pub fallback_chapter_title: String,

    /// Body of the synthetic fallback chapter.
    pub fallback_chapter_body: String,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional observer for job lifecycle events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            accepted_media_type: PDF_MEDIA_TYPE.to_string(),
            min_chapter_chars: 50,
            output_dir: PathBuf::from("epub-output"),
            temp_dir: None,
            retention_secs: 3600,
            default_author: DEFAULT_AUTHOR.to_string(),
            default_language: "en".to_string(),
            fallback_chapter_title: "Document".to_string(),
            fallback_chapter_body: "No readable text could be extracted from this document."
                .to_string(),
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("accepted_media_type", &self.accepted_media_type)
            .field("min_chapter_chars", &self.min_chapter_chars)
            .field("output_dir", &self.output_dir)
            .field("temp_dir", &self.temp_dir)
            .field("retention_secs", &self.retention_secs)
            .field("default_author", &self.default_author)
            .field("default_language", &self.default_language)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retention window as a `Duration`.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Directory in which per-job temp files are created.
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn accepted_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.config.accepted_media_type = media_type.into();
        self
    }

    pub fn min_chapter_chars(mut self, n: usize) -> Self {
        self.config.min_chapter_chars = n;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn retention_secs(mut self, secs: u64) -> Self {
        self.config.retention_secs = secs;
        self
    }

    pub fn default_author(mut self, author: impl Into<String>) -> Self {
        self.config.default_author = author.into();
        self
    }

    pub fn default_language(mut self, lang: impl Into<String>) -> Self {
        self.config.default_language = lang.into();
        self
    }

    pub fn fallback_chapter(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.config.fallback_chapter_title = title.into();
        self.config.fallback_chapter_body = body.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2EpubError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(Pdf2EpubError::InvalidConfig(
                "max_upload_bytes must be ≥ 1".into(),
            ));
        }
        if c.accepted_media_type.trim().is_empty() {
            return Err(Pdf2EpubError::InvalidConfig(
                "accepted_media_type must not be empty".into(),
            ));
        }
        if c.default_author.trim().is_empty() {
            return Err(Pdf2EpubError::InvalidConfig(
                "default_author must not be empty".into(),
            ));
        }
        if c.fallback_chapter_title.trim().is_empty() {
            return Err(Pdf2EpubError::InvalidConfig(
                "fallback chapter title must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Sync policy ──────────────────────────────────────────────────────────

/// What to do when a calibration table's timestamps decrease as pages increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonotonicityPolicy {
    /// Load the table and log every inversion. (default)
    #[default]
    Tolerate,
    /// Refuse to load the table.
    Reject,
}

/// Policy constants for the position mapper.
///
/// Every number here is a tuning knob rather than a derived value; the
/// defaults match hand-authored calibration tables for narrated books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds of narration per page used for extrapolation. Default: 12.
    pub avg_seconds_per_page: f64,

    /// A timestamp within this many seconds of a point matches it exactly.
    /// Default: 5.
    pub exact_time_tolerance_secs: f64,

    /// `chapter_label_at` only reports a point within this many seconds.
    /// Default: 30.
    pub label_time_tolerance_secs: f64,

    /// Page count for the global estimate when a table has none. Default: 149.
    pub fallback_total_pages: u32,

    /// Narration length for the global estimate when a table has none.
    /// Default: 5400 s.
    pub fallback_total_duration_secs: f64,

    /// Treatment of non-monotonic tables at load time.
    pub monotonicity: MonotonicityPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            avg_seconds_per_page: 12.0,
            exact_time_tolerance_secs: 5.0,
            label_time_tolerance_secs: 30.0,
            fallback_total_pages: 149,
            fallback_total_duration_secs: 5400.0,
            monotonicity: MonotonicityPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Create a new builder for `SyncConfig`.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check the constraints the mapper relies on. Run by
    /// [`SyncConfigBuilder::build`] and by every consumer of a `SyncConfig`.
    pub fn validate(&self) -> Result<(), Pdf2EpubError> {
        if !(self.avg_seconds_per_page.is_finite() && self.avg_seconds_per_page > 0.0) {
            return Err(Pdf2EpubError::InvalidConfig(format!(
                "avg_seconds_per_page must be a positive number, got {}",
                self.avg_seconds_per_page
            )));
        }
        if self.fallback_total_pages == 0 {
            return Err(Pdf2EpubError::InvalidConfig(
                "fallback_total_pages must be ≥ 1".into(),
            ));
        }
        if !(self.fallback_total_duration_secs.is_finite() && self.fallback_total_duration_secs > 0.0) {
            return Err(Pdf2EpubError::InvalidConfig(format!(
                "fallback_total_duration_secs must be a positive number, got {}",
                self.fallback_total_duration_secs
            )));
        }
        for (name, secs) in [
            ("exact_time_tolerance_secs", self.exact_time_tolerance_secs),
            ("label_time_tolerance_secs", self.label_time_tolerance_secs),
        ] {
            if !(secs.is_finite() && secs >= 0.0) {
                return Err(Pdf2EpubError::InvalidConfig(format!(
                    "{name} must be a finite number ≥ 0, got {secs}"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`SyncConfig`].
#[derive(Debug)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn avg_seconds_per_page(mut self, secs: f64) -> Self {
        self.config.avg_seconds_per_page = secs;
        self
    }

    pub fn exact_time_tolerance_secs(mut self, secs: f64) -> Self {
        self.config.exact_time_tolerance_secs = secs.max(0.0);
        self
    }

    pub fn label_time_tolerance_secs(mut self, secs: f64) -> Self {
        self.config.label_time_tolerance_secs = secs.max(0.0);
        self
    }

    pub fn fallback_totals(mut self, pages: u32, duration_secs: f64) -> Self {
        self.config.fallback_total_pages = pages;
        self.config.fallback_total_duration_secs = duration_secs;
        self
    }

    pub fn monotonicity(mut self, policy: MonotonicityPolicy) -> Self {
        self.config.monotonicity = policy;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SyncConfig, Pdf2EpubError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
