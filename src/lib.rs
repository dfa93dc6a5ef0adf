//! # pdf2epub
//!
//! Convert PDF documents into chapterized EPUB packages, and map reading
//! positions in those documents to timestamps in their narrated audio.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Validate  media type, emptiness, size ceiling (synchronous)
//!  ├─ 2. Persist   temp file per job
//!  ├─ 3. Extract   flat text via lopdf (or pdfium), spawn_blocking
//!  ├─ 4. Segment   blank-line blocks → "Chapter N" (placeholder if empty)
//!  ├─ 5. Package   EPUB 3 container (OPF, nav, NCX, one XHTML per chapter)
//!  └─ 6. Publish   atomic write to {output_dir}/{uuid}.epub
//! ```
//!
//! [`Converter`] runs these steps as background jobs with a queryable
//! lifecycle; [`convert_bytes`] and [`convert_file`] run them inline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2epub::{ConversionConfig, Converter, DocumentMetadata, Upload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(ConversionConfig::default());
//!     let bytes = std::fs::read("document.pdf")?;
//!     let handle = converter.submit(
//!         Upload::pdf(bytes, "document.pdf"),
//!         DocumentMetadata::default().with_author("A. Writer"),
//!     )?;
//!     let report = converter.wait(&handle).await?;
//!     println!("{:?}: {:?}", report.status, report.artifact);
//!     Ok(())
//! }
//! ```
//!
//! ## Position sync
//!
//! ```rust
//! use pdf2epub::{CalibrationPoint, CalibrationRegistry, SyncConfig, SyncPrecision};
//!
//! let registry = CalibrationRegistry::new(SyncConfig::default()).unwrap();
//! let table = registry.load_table("walden", vec![
//!     CalibrationPoint::new(1, 0.0, "Economy"),
//!     CalibrationPoint::new(12, 125.0, "Where I Lived"),
//!     CalibrationPoint::new(149, 3500.0, "Conclusion"),
//! ]).unwrap();
//!
//! let r = table.page_to_time(200);
//! assert_eq!(r.timestamp, 4112.0);
//! assert_eq!(r.precision, SyncPrecision::Extrapolated);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `pdf2epub` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `pdfium` | off     | Extract text through pdfium instead of lopdf (needs libpdfium at runtime) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2epub = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod sync;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionConfig, ConversionConfigBuilder, MonotonicityPolicy, SyncConfig, SyncConfigBuilder,
};
pub use convert::{convert_bytes, convert_file, convert_file_sync};
pub use error::{ErrorKind, JobError, Pdf2EpubError};
pub use job::{ArtifactRef, Converter, JobHandle, JobId, JobReport, JobStatus};
pub use output::{ConversionOutput, ConversionStats, DocumentMetadata, ResolvedMetadata};
pub use pipeline::extract::{ExtractedText, LopdfExtractor, TextExtractor};
pub use pipeline::input::Upload;
pub use pipeline::segment::Chapter;
pub use pipeline::unpack::{read_package, PackageSummary};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use sync::{
    CalibrationFile, CalibrationPoint, CalibrationRegistry, CalibrationTable, PositionMapper,
    SyncPrecision, SyncQuery, SyncResult, TableHandle,
};
