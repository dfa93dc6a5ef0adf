//! End-to-end tests for pdf2epub.
//!
//! Every PDF is generated in memory with lopdf, so these tests need neither
//! fixture files nor a pdfium library.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use pdf2epub::{
    read_package, CalibrationPoint, CalibrationRegistry, ConversionConfig, Converter,
    DocumentMetadata, ErrorKind, JobStatus, MonotonicityPolicy, SyncConfig, SyncPrecision,
    SyncQuery, Upload,
};
use std::path::Path;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// A PDF with one page per entry; each page shows its paragraphs as lines,
/// with an empty line rendered between paragraphs.
fn make_pdf(pages: &[&[&str]]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for lines in pages {
        let mut ops = Vec::new();
        if !lines.is_empty() {
            ops.push(Operation::new("BT", vec![]));
            ops.push(Operation::new("Tf", vec!["F1".into(), 11.into()]));
            ops.push(Operation::new("Td", vec![72.into(), 720.into()]));
            for line in lines.iter() {
                ops.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
                ops.push(Operation::new("Td", vec![0.into(), (-14).into()]));
            }
            ops.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations: ops };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

struct Fixture {
    dir: TempDir,
    converter: Converter,
}

impl Fixture {
    fn new() -> Self {
        Self::with(|b| b)
    }

    fn with(
        customise: impl FnOnce(pdf2epub::ConversionConfigBuilder) -> pdf2epub::ConversionConfigBuilder,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let builder = ConversionConfig::builder()
            .temp_dir(dir.path().join("tmp"))
            .output_dir(dir.path().join("out"));
        let converter = Converter::new(customise(builder).build().unwrap());
        Self { dir, converter }
    }

    fn temp_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("tmp")
    }

    fn out_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("out")
    }
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

const LONG_A: &str = "It was the best of times, it was the worst of times, it was the age of wisdom.";
const LONG_B: &str = "There were a king with a large jaw and a queen with a plain face, on the throne.";

// ── Job lifecycle ────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_pdf_converts_to_epub() {
    let fx = Fixture::new();
    let pdf = make_pdf(&[&[LONG_A], &[LONG_B]]);

    let handle = fx
        .converter
        .submit(
            Upload::pdf(pdf, "two-cities.pdf"),
            DocumentMetadata::default().with_author("Charles Dickens"),
        )
        .unwrap();
    let report = fx.converter.wait(&handle).await.unwrap();

    assert_eq!(report.status, JobStatus::Done, "error: {:?}", report.error);
    let artifact = report.artifact.expect("artifact");
    assert_eq!(artifact.path.parent(), Some(fx.out_dir().as_path()));
    assert_eq!(
        artifact.path.file_name().unwrap().to_string_lossy(),
        format!("{}.epub", artifact.id)
    );

    let metadata = report.metadata.unwrap();
    assert_eq!(metadata.title, "two-cities");
    assert_eq!(metadata.author, "Charles Dickens");

    let bytes = std::fs::read(&artifact.path).unwrap();
    let summary = read_package(&bytes).unwrap();
    assert_eq!(summary.title.as_deref(), Some("two-cities"));
    assert_eq!(summary.author.as_deref(), Some("Charles Dickens"));
    assert_eq!(summary.chapter_titles, vec!["Chapter 1", "Chapter 2"]);

    assert_eq!(file_count(&fx.temp_dir()), 0, "temp input must be removed");
}

#[tokio::test]
async fn unparseable_upload_fails_with_extraction_error() {
    let fx = Fixture::new();
    let handle = fx
        .converter
        .submit(
            Upload::pdf(b"%PDF-1.4\nthis is not really a pdf".to_vec(), "broken.pdf"),
            DocumentMetadata::default(),
        )
        .unwrap();
    let report = fx.converter.wait(&handle).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    let error = report.error.expect("job error");
    assert_eq!(error.kind, ErrorKind::ExtractionError);
    assert_eq!(error.stage, "extracting");
    assert!(report.artifact.is_none());
    assert_eq!(file_count(&fx.temp_dir()), 0, "temp input must be removed");
    assert_eq!(file_count(&fx.out_dir()), 0);
}

#[tokio::test]
async fn blank_pages_give_one_placeholder_chapter() {
    let fx = Fixture::new();
    let handle = fx
        .converter
        .submit(Upload::pdf(make_pdf(&[&[], &[], &[]]), "scan.pdf"), DocumentMetadata::default())
        .unwrap();
    let report = fx.converter.wait(&handle).await.unwrap();

    assert_eq!(report.status, JobStatus::Done);
    assert_eq!(report.stats.as_ref().unwrap().chapter_count, 1);
    assert_eq!(report.stats.unwrap().page_count, 3);

    let bytes = std::fs::read(report.artifact.unwrap().path).unwrap();
    assert_eq!(read_package(&bytes).unwrap().chapter_titles, vec!["Document"]);
}

#[tokio::test]
async fn short_blocks_are_dropped() {
    let fx = Fixture::new();
    let pdf = make_pdf(&[&["Page 1"], &[LONG_A], &["Page 3"]]);
    let handle = fx
        .converter
        .submit(Upload::pdf(pdf, "headers.pdf"), DocumentMetadata::default())
        .unwrap();
    let report = fx.converter.wait(&handle).await.unwrap();
    assert_eq!(report.stats.unwrap().chapter_count, 1);
}

#[tokio::test]
async fn caller_title_wins_over_filename() {
    let fx = Fixture::new();
    let handle = fx
        .converter
        .submit(
            Upload::pdf(make_pdf(&[&[LONG_A]]), "scan_0001.pdf"),
            DocumentMetadata::default()
                .with_title("A Tale of Two Cities")
                .with_language("en-GB"),
        )
        .unwrap();
    let report = fx.converter.wait(&handle).await.unwrap();
    let metadata = report.metadata.unwrap();
    assert_eq!(metadata.title, "A Tale of Two Cities");
    assert_eq!(metadata.author, "Unknown Author");
    assert_eq!(metadata.language, "en-GB");
}

// ── Synchronous rejection ────────────────────────────────────────────────────

#[tokio::test]
async fn wrong_media_type_is_rejected_before_any_io() {
    let fx = Fixture::new();
    let err = fx
        .converter
        .submit(
            Upload::new(make_pdf(&[&[LONG_A]]), "book.txt", "text/plain"),
            DocumentMetadata::default(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(!fx.temp_dir().exists());
    assert!(!fx.out_dir().exists());
    assert_eq!(fx.converter.job_count(), 0);
}

#[tokio::test]
async fn oversized_and_empty_uploads_are_rejected() {
    let fx = Fixture::with(|b| b.max_upload_bytes(1024));
    let err = fx
        .converter
        .submit(Upload::pdf(vec![b'%'; 1025], "big.pdf"), DocumentMetadata::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = fx
        .converter
        .submit(Upload::pdf(Vec::new(), "empty.pdf"), DocumentMetadata::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert!(!fx.temp_dir().exists());
    assert_eq!(fx.converter.job_count(), 0);
}

// ── Lookup ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_handles_and_artifacts_are_not_found() {
    let fx = Fixture::new();

    let err = fx.converter.job_result(&pdf2epub::JobId::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = fx
        .converter
        .delete_artifact_by_id(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn terminal_report_is_handed_out_once() {
    let fx = Fixture::new();
    let handle = fx
        .converter
        .submit(Upload::pdf(make_pdf(&[&[LONG_A]]), "once.pdf"), DocumentMetadata::default())
        .unwrap();
    fx.converter.wait(&handle).await.unwrap();

    assert_eq!(fx.converter.job_result(&handle).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(fx.converter.wait(&handle).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn polling_sees_progress_then_terminal_state() {
    let fx = Fixture::new();
    let handle = fx
        .converter
        .submit(Upload::pdf(make_pdf(&[&[LONG_A]]), "poll.pdf"), DocumentMetadata::default())
        .unwrap();

    let report = loop {
        let report = fx.converter.job_result(&handle).unwrap();
        if report.status.is_terminal() {
            break report;
        }
        assert!(report.artifact.is_none());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    };
    assert_eq!(report.status, JobStatus::Done);
}

// ── Artifacts ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_and_delete_artifacts() {
    let fx = Fixture::new();
    assert!(fx.converter.list_artifacts().await.unwrap().is_empty());

    let handle = fx
        .converter
        .submit(Upload::pdf(make_pdf(&[&[LONG_A]]), "keep.pdf"), DocumentMetadata::default())
        .unwrap();
    let artifact = fx.converter.wait(&handle).await.unwrap().artifact.unwrap();

    // Foreign files in the output directory are ignored.
    std::fs::write(fx.out_dir().join("notes.epub"), b"x").unwrap();

    assert_eq!(fx.converter.list_artifacts().await.unwrap(), vec![artifact.clone()]);

    fx.converter.delete_artifact(&artifact).await.unwrap();
    assert!(!artifact.path.exists());
    assert_eq!(
        fx.converter.delete_artifact(&artifact).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(fx.out_dir().join("notes.epub").exists());
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_jobs_are_independent() {
    let fx = Fixture::new();

    let mut handles = Vec::new();
    for i in 0..8 {
        let upload = if i % 2 == 0 {
            Upload::pdf(make_pdf(&[&[LONG_A], &[LONG_B]]), format!("good-{i}.pdf"))
        } else {
            Upload::pdf(b"%PDF-1.7 garbage".to_vec(), format!("bad-{i}.pdf"))
        };
        handles.push((i, fx.converter.submit(upload, DocumentMetadata::default()).unwrap()));
    }

    let reports = futures::future::join_all(handles.iter().map(|(_, h)| fx.converter.wait(h))).await;

    let mut ids = std::collections::HashSet::new();
    for ((i, _), report) in handles.iter().zip(reports) {
        let report = report.unwrap();
        if i % 2 == 0 {
            assert_eq!(report.status, JobStatus::Done);
            assert_eq!(report.metadata.unwrap().title, format!("good-{i}"));
            assert!(ids.insert(report.artifact.unwrap().id));
        } else {
            assert_eq!(report.status, JobStatus::Failed);
        }
    }

    assert_eq!(fx.converter.list_artifacts().await.unwrap().len(), 4);
    assert_eq!(file_count(&fx.temp_dir()), 0);
    assert_eq!(fx.converter.job_count(), 0);
}

// ── Eager helpers ────────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_file_writes_nothing_to_output_dir() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inline.pdf");
    std::fs::write(&path, make_pdf(&[&[LONG_A]])).unwrap();

    let config = ConversionConfig::builder()
        .temp_dir(dir.path().join("tmp"))
        .output_dir(dir.path().join("out"))
        .build()
        .unwrap();
    let output = pdf2epub::convert_file(&path, &DocumentMetadata::default(), &config)
        .await
        .unwrap();

    assert_eq!(output.metadata.title, "inline");
    assert_eq!(output.chapters.len(), 1);
    assert!(read_package(&output.epub).is_ok());
    assert!(!dir.path().join("out").exists());
}

// ── Position sync ────────────────────────────────────────────────────────────

fn sample_registry() -> CalibrationRegistry {
    let registry = CalibrationRegistry::new(SyncConfig::default()).unwrap();
    registry
        .load_table(
            "sample",
            vec![
                CalibrationPoint::new(1, 0.0, "Opening"),
                CalibrationPoint::new(12, 125.0, "Chapter 2"),
                CalibrationPoint::new(149, 3500.0, "Epilogue"),
            ],
        )
        .unwrap();
    registry
}

#[test]
fn sync_fallback_ladder() {
    let table = sample_registry().get("sample").unwrap();

    let r = table.page_to_time(6);
    assert!((r.timestamp - 56.82).abs() < 0.01);
    assert_eq!(r.precision, SyncPrecision::Interpolated);

    let r = table.page_to_time(200);
    assert_eq!(r.timestamp, 4112.0);
    assert_eq!(r.precision, SyncPrecision::Extrapolated);

    for page in [1, 12, 149] {
        let t = table.page_to_time(page);
        assert_eq!(t.precision, SyncPrecision::Exact);
        assert_eq!(table.time_to_page(t.timestamp).page, page);
    }
}

#[test]
fn sync_empty_table_estimates() {
    let registry = CalibrationRegistry::new(SyncConfig::default()).unwrap();
    let table = registry.load_table("empty", vec![]).unwrap();

    assert_eq!(table.time_to_page(0.0).page, 0);
    let r = table.mapper().query(SyncQuery::ByTime(2700.0));
    assert_eq!(r.page, 74);
    assert_eq!(r.precision, SyncPrecision::Estimated);
    assert_eq!(r.label, "Unknown Chapter");
}

#[test]
fn sync_page_to_time_is_monotonic() {
    let table = sample_registry().get("sample").unwrap();
    let times: Vec<f64> = (1..=250).map(|p| table.page_to_time(p).timestamp).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn sync_strict_policy_rejects_inversions() {
    let config = SyncConfig::builder()
        .monotonicity(MonotonicityPolicy::Reject)
        .build()
        .unwrap();
    let registry = CalibrationRegistry::new(config).unwrap();
    let err = registry
        .load_table(
            "bad",
            vec![CalibrationPoint::new(1, 500.0, "a"), CalibrationPoint::new(2, 10.0, "b")],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(registry.get("bad").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn sync_config_from_json_is_checked_before_use() {
    let config: SyncConfig = serde_json::from_str(r#"{"avg_seconds_per_page": 0}"#).unwrap();
    let err = CalibrationRegistry::new(config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let registry = sample_registry();
    let table = registry
        .load_table("one-point", vec![CalibrationPoint::new(1, 0.0, "Start")])
        .unwrap();
    let r = table.time_to_page(600.0);
    assert_eq!(r.page, 51);
    assert_eq!(r.precision, SyncPrecision::Extrapolated);
}
