//! Chapter segmentation: split flat text into an ordered, non-empty list of
//! chapters.
//!
//! ## Rules (applied in order)
//!
//! 1. Normalise line endings (CRLF/CR → LF)
//! 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 3. Split on blank-line boundaries: a newline, optional horizontal
//!    whitespace, and another newline
//! 4. Trim each block and drop blocks shorter than the noise threshold
//!    (running headers, page numbers, stray whitespace)
//! 5. Number survivors from 1 as `"Chapter {n}"` and wrap them in minimal
//!    XHTML markup
//!
//! Chapter boundaries are a heuristic, not a property of the source format,
//! so segmentation never fails: when nothing survives, a single placeholder
//! chapter is returned instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One chapter of the packaged output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub plain_text: String,
    /// `<h2>title</h2><p>content</p>` with both parts XML-escaped.
    pub markup: String,
}

impl Chapter {
    /// Build a chapter, deriving its markup.
    pub fn new(title: impl Into<String>, plain_text: impl Into<String>) -> Self {
        let title = title.into();
        let plain_text = plain_text.into();
        let markup = format!(
            "<h2>{}</h2><p>{}</p>",
            escape_xml(&title),
            escape_xml(&plain_text)
        );
        Self {
            title,
            plain_text,
            markup,
        }
    }
}

/// Segmentation knobs, normally taken from [`crate::config::ConversionConfig`].
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    /// Minimum block length in characters. Default: 50.
    pub min_chars: usize,
    pub fallback_title: String,
    pub fallback_body: String,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        let config = crate::config::ConversionConfig::default();
        Self::from(&config)
    }
}

impl From<&crate::config::ConversionConfig> for SegmentOptions {
    fn from(config: &crate::config::ConversionConfig) -> Self {
        Self {
            min_chars: config.min_chapter_chars,
            fallback_title: config.fallback_chapter_title.clone(),
            fallback_body: config.fallback_chapter_body.clone(),
        }
    }
}

static RE_BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t\f\v]*\n\s*").unwrap());

/// Split `text` into chapters. The result is never empty.
pub fn segment(text: &str, options: &SegmentOptions) -> Vec<Chapter> {
    let text = normalise_line_endings(text);
    let text = remove_invisible_chars(&text);

    let mut chapters = Vec::new();
    let mut dropped = 0usize;
    for block in RE_BLANK_LINE.split(&text) {
        let block = block.trim();
        if block.chars().count() < options.min_chars.max(1) {
            dropped += 1;
            continue;
        }
        let title = format!("Chapter {}", chapters.len() + 1);
        chapters.push(Chapter::new(title, block));
    }

    debug!(
        "Segmented {} chapters ({} blocks dropped as noise)",
        chapters.len(),
        dropped
    );

    if chapters.is_empty() {
        debug!("No block survived segmentation; emitting placeholder chapter");
        chapters.push(Chapter::new(
            options.fallback_title.clone(),
            options.fallback_body.clone(),
        ));
    }

    chapters
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
            )
        })
        .collect()
}

/// Escape the five XML special characters. Control characters other than
/// tab and newline are not allowed in XML 1.0 and are dropped.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}
