//! Text extraction: decode a PDF into one flat text stream.
//!
//! ## Failure vs. empty
//!
//! The extractor distinguishes two outcomes downstream code treats very
//! differently:
//!
//! * **Failure** — the bytes are not a PDF, the cross-reference table is
//!   broken, the document is encrypted, or it has no pages at all. This aborts
//!   the job with an extraction error.
//! * **Empty but valid** — the document parsed but its pages carry no text
//!   layer (scans, image-only slides). This returns an empty string and the
//!   segmenter emits a single placeholder chapter.
//!
//! ## Why spawn_blocking?
//!
//! Parsing and content-stream decoding are CPU-bound and synchronous.
//! [`extract_file`] moves the work onto Tokio's blocking pool so a large
//! document never stalls the async worker threads.

use crate::error::Pdf2EpubError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Text decoded from one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    /// Page texts joined by blank lines, in page order.
    pub text: String,
    /// Number of pages in the document.
    pub page_count: usize,
    /// Pages whose text could not be decoded (1-indexed).
    pub unreadable_pages: Vec<usize>,
    /// `/Title` from the document information dictionary, if any.
    pub title: Option<String>,
    /// `/Author` from the document information dictionary, if any.
    pub author: Option<String>,
}

impl ExtractedText {
    /// True when no page produced any non-whitespace text.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A PDF decoding backend.
pub trait TextExtractor: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Extract text from an in-memory document.
    fn extract_bytes(&self, bytes: &[u8]) -> Result<ExtractedText, Pdf2EpubError>;

    /// Extract text from a document on disk.
    fn extract_path(&self, path: &Path) -> Result<ExtractedText, Pdf2EpubError> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Pdf2EpubError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => Pdf2EpubError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Pdf2EpubError::Internal(format!("read {}: {e}", path.display())),
        })?;
        self.extract_bytes(&bytes)
    }
}

/// The backend selected by cargo features: pdfium when the `pdfium` feature
/// is enabled, pure-Rust lopdf otherwise.
pub fn default_extractor() -> Arc<dyn TextExtractor> {
    #[cfg(feature = "pdfium")]
    {
        Arc::new(pdfium_backend::PdfiumExtractor)
    }
    #[cfg(not(feature = "pdfium"))]
    {
        Arc::new(LopdfExtractor)
    }
}

/// Extract text from a file on Tokio's blocking pool.
pub async fn extract_file(
    extractor: Arc<dyn TextExtractor>,
    path: &Path,
) -> Result<ExtractedText, Pdf2EpubError> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let extracted = extractor.extract_path(&path)?;
        info!(
            backend = extractor.name(),
            pages = extracted.page_count,
            chars = extracted.text.len(),
            "Extracted text"
        );
        Ok(extracted)
    })
    .await
    .map_err(|e| Pdf2EpubError::CorruptPdf {
        detail: format!("extractor crashed: {e}"),
    })?
}

/// Verify the `%PDF-` header within the first KiB, as readers are allowed
/// to tolerate leading junk before it.
pub fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(1024)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// Pure-Rust backend built on `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract_bytes(&self, bytes: &[u8]) -> Result<ExtractedText, Pdf2EpubError> {
        if !has_pdf_header(bytes) {
            let mut magic = [0u8; 4];
            let n = bytes.len().min(4);
            magic[..n].copy_from_slice(&bytes[..n]);
            return Err(Pdf2EpubError::CorruptPdf {
                detail: format!("missing %PDF header (first bytes: {magic:?})"),
            });
        }

        let document = lopdf::Document::load_mem(bytes).map_err(|e| {
            let detail = e.to_string();
            if detail.to_lowercase().contains("decrypt") || detail.to_lowercase().contains("encrypt") {
                Pdf2EpubError::EncryptedPdf
            } else {
                Pdf2EpubError::CorruptPdf { detail }
            }
        })?;

        if document.is_encrypted() {
            return Err(Pdf2EpubError::EncryptedPdf);
        }

        let pages = document.get_pages();
        if pages.is_empty() {
            return Err(Pdf2EpubError::NoPages);
        }

        let mut texts = Vec::with_capacity(pages.len());
        let mut unreadable = Vec::new();
        for &page_num in pages.keys() {
            match document.extract_text(&[page_num]) {
                Ok(text) => {
                    let text = text.trim();
                    debug!("Page {} → {} chars", page_num, text.len());
                    if !text.is_empty() {
                        texts.push(text.to_string());
                    }
                }
                Err(e) => {
                    warn!("Skipping page {}: text could not be decoded: {}", page_num, e);
                    unreadable.push(page_num as usize);
                }
            }
        }

        Ok(ExtractedText {
            text: texts.join("\n\n"),
            page_count: pages.len(),
            unreadable_pages: unreadable,
            title: info_string(&document, b"Title"),
            author: info_string(&document, b"Author"),
        })
    }
}

/// Read a string entry from the document information dictionary.
fn info_string(document: &lopdf::Document, key: &[u8]) -> Option<String> {
    let info = document.trailer.get(b"Info").ok()?;
    let dict = match info.as_reference() {
        Ok(id) => document.get_dictionary(id).ok()?,
        Err(_) => info.as_dict().ok()?,
    };
    let raw = dict.get(key).ok()?.as_str().ok()?;
    let value = decode_pdf_text_string(raw);
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Decode a PDF text string: UTF-16BE when it carries a BOM, otherwise
/// treat each byte as a Latin-1 code point (close enough to PDFDocEncoding
/// for metadata display).
fn decode_pdf_text_string(raw: &[u8]) -> String {
    if raw.len() >= 2 && raw[0] == 0xFE && raw[1] == 0xFF {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}

#[cfg(feature = "pdfium")]
mod pdfium_backend {
    use super::{ExtractedText, TextExtractor};
    use crate::error::Pdf2EpubError;
    use pdfium_render::prelude::*;
    use std::path::Path;
    use tracing::warn;

    /// Backend that drives the pdfium engine.
    pub struct PdfiumExtractor;

    /// Bind pdfium from the working directory, falling back to the system
    /// library path.
    fn bind() -> Result<Pdfium, Pdf2EpubError> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| Pdf2EpubError::PdfiumBindingFailed(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }

    fn read_document(document: &PdfDocument<'_>) -> Result<ExtractedText, Pdf2EpubError> {
        let pages = document.pages();
        let page_count = pages.len() as usize;
        if page_count == 0 {
            return Err(Pdf2EpubError::NoPages);
        }

        let mut texts = Vec::with_capacity(page_count);
        let mut unreadable = Vec::new();
        for (idx, page) in pages.iter().enumerate() {
            match page.text() {
                Ok(text) => {
                    let all = text.all();
                    let all = all.trim();
                    if !all.is_empty() {
                        texts.push(all.to_string());
                    }
                }
                Err(e) => {
                    warn!("Skipping page {}: {:?}", idx + 1, e);
                    unreadable.push(idx + 1);
                }
            }
        }

        let metadata = document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata
                .get(tag)
                .map(|t| t.value().trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(ExtractedText {
            text: texts.join("\n\n"),
            page_count,
            unreadable_pages: unreadable,
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
        })
    }

    fn map_load_error(e: PdfiumError) -> Pdf2EpubError {
        let detail = format!("{e:?}");
        if detail.to_lowercase().contains("password") {
            Pdf2EpubError::EncryptedPdf
        } else {
            Pdf2EpubError::CorruptPdf { detail }
        }
    }

    impl TextExtractor for PdfiumExtractor {
        fn name(&self) -> &'static str {
            "pdfium"
        }

        fn extract_bytes(&self, bytes: &[u8]) -> Result<ExtractedText, Pdf2EpubError> {
            let pdfium = bind()?;
            let document = pdfium
                .load_pdf_from_byte_slice(bytes, None)
                .map_err(map_load_error)?;
            read_document(&document)
        }

        fn extract_path(&self, path: &Path) -> Result<ExtractedText, Pdf2EpubError> {
            let pdfium = bind()?;
            let document = pdfium
                .load_pdf_from_file(path, None)
                .map_err(map_load_error)?;
            read_document(&document)
        }
    }
}
