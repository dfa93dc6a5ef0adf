//! Input resolution: turn a user-supplied path or URL into an [`Upload`].
//!
//! The orchestrator only ever sees an `Upload`: raw bytes, the original
//! filename (used as the fallback title), and the media type the source
//! *declared*. For local files the declaration comes from the extension; for
//! URLs it comes from the `Content-Type` header, falling back to the URL's
//! extension. Content sniffing is deliberately not used to override a
//! declaration, so a `.txt` file that happens to start with `%PDF` is still
//! rejected as the wrong type.

use crate::config::{ConversionConfig, PDF_MEDIA_TYPE};
use crate::error::Pdf2EpubError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A document submitted for conversion.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Raw document bytes.
    pub bytes: Vec<u8>,
    /// Caller-visible filename, e.g. `"moby-dick.pdf"`.
    pub filename: String,
    /// Declared media type, e.g. `"application/pdf"`.
    pub media_type: String,
}

impl Upload {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        filename: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            media_type: media_type.into(),
        }
    }

    /// An upload declared as `application/pdf`.
    pub fn pdf(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self::new(bytes, filename, PDF_MEDIA_TYPE)
    }

    /// Filename without directory or extension; `None` when nothing is left.
    pub fn file_stem(&self) -> Option<String> {
        Path::new(&self.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Check an upload against the configured media type and size ceiling.
///
/// Runs before anything touches the filesystem. Media-type parameters
/// (`; charset=...`) and case are ignored.
pub fn validate_upload(upload: &Upload, config: &ConversionConfig) -> Result<(), Pdf2EpubError> {
    let declared = upload
        .media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    if !declared.eq_ignore_ascii_case(&config.accepted_media_type) {
        return Err(Pdf2EpubError::UnsupportedMediaType {
            found: upload.media_type.clone(),
            expected: config.accepted_media_type.clone(),
        });
    }
    if upload.bytes.is_empty() {
        return Err(Pdf2EpubError::EmptyPayload);
    }
    if upload.bytes.len() > config.max_upload_bytes {
        return Err(Pdf2EpubError::PayloadTooLarge {
            size: upload.bytes.len(),
            limit: config.max_upload_bytes,
        });
    }
    Ok(())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Media type implied by a filename's extension.
pub fn media_type_from_name(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => PDF_MEDIA_TYPE,
        "epub" => "application/epub+zip",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}

/// Resolve the input string to an in-memory upload.
///
/// If the input is a URL, download it. If it is a local file, read it.
/// Neither is buffered past `config.max_upload_bytes`.
pub async fn resolve_input(input: &str, config: &ConversionConfig) -> Result<Upload, Pdf2EpubError> {
    let limit = config.max_upload_bytes;
    if is_url(input) {
        download_url(input, config.download_timeout_secs, limit).await
    } else if input.trim().is_empty() {
        Err(Pdf2EpubError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        read_local(input, limit).await
    }
}

/// Fail with `PayloadTooLarge` once `size` passes `limit`.
fn check_size(size: u64, limit: usize) -> Result<(), Pdf2EpubError> {
    if size > limit as u64 {
        return Err(Pdf2EpubError::PayloadTooLarge {
            size: usize::try_from(size).unwrap_or(usize::MAX),
            limit,
        });
    }
    Ok(())
}

/// Read a local file, mapping I/O failures onto input errors.
async fn read_local(path_str: &str, limit: usize) -> Result<Upload, Pdf2EpubError> {
    let path = PathBuf::from(path_str);

    if let Ok(meta) = tokio::fs::metadata(&path).await {
        check_size(meta.len(), limit)?;
    }

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Pdf2EpubError::PermissionDenied { path: path.clone() },
        _ => Pdf2EpubError::FileNotFound { path: path.clone() },
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string());
    let media_type = media_type_from_name(&filename);

    debug!("Read local input: {} ({} bytes, {})", path.display(), bytes.len(), media_type);
    Ok(Upload::new(bytes, filename, media_type))
}

/// Download a URL into memory.
async fn download_url(
    url: &str,
    timeout_secs: u64,
    limit: usize,
) -> Result<Upload, Pdf2EpubError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2EpubError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let mut response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2EpubError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2EpubError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Pdf2EpubError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);
    let declared = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_lowercase())
        .filter(|v| !v.is_empty() && v != "application/octet-stream");
    let media_type = declared.unwrap_or_else(|| media_type_from_name(&filename).to_string());

    if let Some(declared_len) = response.content_length() {
        check_size(declared_len, limit)?;
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Pdf2EpubError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?
    {
        check_size((bytes.len() + chunk.len()) as u64, limit)?;
        bytes.extend_from_slice(&chunk);
    }

    info!("Downloaded {} bytes ({})", bytes.len(), media_type);
    Ok(Upload::new(bytes, filename, media_type))
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
