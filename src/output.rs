//! Metadata and result types shared by the eager helpers and the job
//! orchestrator.

use crate::pipeline::input::Upload;
use crate::pipeline::segment::Chapter;
use serde::{Deserialize, Serialize};

/// Metadata supplied by the caller. Every field is optional; missing values
/// are resolved by [`DocumentMetadata::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
}

impl DocumentMetadata {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Fill gaps: title falls back to the upload's filename without its
    /// extension (then `"Untitled"`), author and language to the configured
    /// defaults. Blank strings count as missing.
    pub fn resolve(
        &self,
        upload: &Upload,
        default_author: &str,
        default_language: &str,
    ) -> ResolvedMetadata {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        ResolvedMetadata {
            title: present(&self.title)
                .or_else(|| upload.file_stem())
                .unwrap_or_else(|| "Untitled".to_string()),
            author: present(&self.author).unwrap_or_else(|| default_author.to_string()),
            description: present(&self.description),
            language: present(&self.language).unwrap_or_else(|| default_language.to_string()),
        }
    }
}

/// Metadata written into a package, after fallbacks were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMetadata {
    pub title: String,
    pub author: String,
    pub description: Option<String>,
    pub language: String,
}

impl ResolvedMetadata {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            description: None,
            language: "en".to_string(),
        }
    }
}

/// Timing and size figures for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub page_count: usize,
    pub unreadable_pages: usize,
    pub extracted_chars: usize,
    pub chapter_count: usize,
    pub package_bytes: usize,
    pub extract_duration_ms: u64,
    pub package_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of an eager conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// The finished EPUB.
    pub epub: Vec<u8>,
    pub metadata: ResolvedMetadata,
    pub chapters: Vec<Chapter>,
    pub stats: ConversionStats,
}
