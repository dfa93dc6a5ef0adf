//! Calibration tables: sparse page ↔ timestamp anchors for one title.
//!
//! A table is validated once, at construction, and is immutable afterwards.
//! Points are sorted by page; duplicate pages, page 0, and negative or
//! non-finite timestamps are rejected. Timestamps that *decrease* as pages
//! increase are handled according to [`MonotonicityPolicy`]: tolerated with a
//! warning by default, or rejected outright.

use crate::config::MonotonicityPolicy;
use crate::error::Pdf2EpubError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One authored anchor: "page N starts at T seconds into the narration".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub page: u32,
    /// Seconds from the start of the narration.
    pub timestamp: f64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CalibrationPoint {
    pub fn new(page: u32, timestamp: f64, label: impl Into<String>) -> Self {
        Self {
            page,
            timestamp,
            label: label.into(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// On-disk form of a table: one JSON document per title.
///
/// ```json
/// {
///   "title_key": "moby-dick",
///   "total_pages": 612,
///   "total_duration_secs": 77400,
///   "points": [
///     { "page": 1, "timestamp": 0, "label": "Loomings" },
///     { "page": 9, "timestamp": 1130.5, "label": "The Carpet-Bag" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub title_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_secs: Option<f64>,
    #[serde(default)]
    pub points: Vec<CalibrationPoint>,
}

/// A validated, page-sorted set of calibration points.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    title_key: String,
    points: Vec<CalibrationPoint>,
    total_pages: Option<u32>,
    total_duration_secs: Option<f64>,
    inversions: usize,
}

impl CalibrationTable {
    /// Validate and sort `points` into a table.
    pub fn new(
        title_key: impl Into<String>,
        mut points: Vec<CalibrationPoint>,
        policy: MonotonicityPolicy,
    ) -> Result<Self, Pdf2EpubError> {
        let title_key = title_key.into();
        let invalid = |reason: String| Pdf2EpubError::InvalidCalibration {
            title_key: title_key.clone(),
            reason,
        };

        if title_key.trim().is_empty() {
            return Err(invalid("title key must not be empty".into()));
        }

        for p in &points {
            if p.page == 0 {
                return Err(invalid("pages are 1-indexed; found page 0".into()));
            }
            if !p.timestamp.is_finite() || p.timestamp < 0.0 {
                return Err(invalid(format!(
                    "page {} has invalid timestamp {}",
                    p.page, p.timestamp
                )));
            }
        }

        points.sort_by_key(|p| p.page);

        if let Some(w) = points.windows(2).find(|w| w[0].page == w[1].page) {
            return Err(invalid(format!("page {} appears more than once", w[0].page)));
        }

        let mut inversions = 0;
        for w in points.windows(2) {
            if w[1].timestamp < w[0].timestamp {
                inversions += 1;
                match policy {
                    MonotonicityPolicy::Reject => {
                        return Err(invalid(format!(
                            "timestamp decreases from page {} ({}s) to page {} ({}s)",
                            w[0].page, w[0].timestamp, w[1].page, w[1].timestamp
                        )));
                    }
                    MonotonicityPolicy::Tolerate => {
                        warn!(
                            title = %title_key,
                            from_page = w[0].page,
                            to_page = w[1].page,
                            "Calibration timestamps decrease between pages"
                        );
                    }
                }
            }
        }

        Ok(Self {
            title_key,
            points,
            total_pages: None,
            total_duration_secs: None,
            inversions,
        })
    }

    /// Attach table-level totals used by the last-resort global estimate.
    pub fn with_totals(
        mut self,
        total_pages: Option<u32>,
        total_duration_secs: Option<f64>,
    ) -> Result<Self, Pdf2EpubError> {
        if total_pages == Some(0) {
            return Err(Pdf2EpubError::InvalidCalibration {
                title_key: self.title_key,
                reason: "total_pages must be ≥ 1".into(),
            });
        }
        if let Some(d) = total_duration_secs {
            if !d.is_finite() || d <= 0.0 {
                return Err(Pdf2EpubError::InvalidCalibration {
                    title_key: self.title_key,
                    reason: format!("total_duration_secs must be positive, got {d}"),
                });
            }
        }
        self.total_pages = total_pages;
        self.total_duration_secs = total_duration_secs;
        Ok(self)
    }

    /// Build a table from its on-disk form.
    pub fn from_file(file: CalibrationFile, policy: MonotonicityPolicy) -> Result<Self, Pdf2EpubError> {
        Self::new(file.title_key, file.points, policy)?
            .with_totals(file.total_pages, file.total_duration_secs)
    }

    /// Parse a table from JSON.
    pub fn from_json(json: &str, policy: MonotonicityPolicy) -> Result<Self, Pdf2EpubError> {
        let file: CalibrationFile =
            serde_json::from_str(json).map_err(|e| Pdf2EpubError::InvalidCalibration {
                title_key: "<unparsed>".into(),
                reason: e.to_string(),
            })?;
        Self::from_file(file, policy)
    }

    pub fn title_key(&self) -> &str {
        &self.title_key
    }

    /// Points in ascending page order.
    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.total_pages
    }

    pub fn total_duration_secs(&self) -> Option<f64> {
        self.total_duration_secs
    }

    /// Number of adjacent pairs whose timestamps decrease.
    pub fn inversions(&self) -> usize {
        self.inversions
    }

    /// The point anchored at exactly `page`.
    pub fn point_at_page(&self, page: u32) -> Option<&CalibrationPoint> {
        self.points
            .binary_search_by_key(&page, |p| p.page)
            .ok()
            .map(|i| &self.points[i])
    }

    /// Nearest points with a strictly smaller and strictly larger page.
    pub fn page_neighbours(
        &self,
        page: u32,
    ) -> (Option<&CalibrationPoint>, Option<&CalibrationPoint>) {
        let lower = self.points.partition_point(|p| p.page < page);
        let upper = self.points.partition_point(|p| p.page <= page);
        let before = lower.checked_sub(1).map(|i| &self.points[i]);
        let after = self.points.get(upper);
        (before, after)
    }

    /// File form of this table, for writing back to disk.
    pub fn to_file(&self) -> CalibrationFile {
        CalibrationFile {
            title_key: self.title_key.clone(),
            total_pages: self.total_pages,
            total_duration_secs: self.total_duration_secs,
            points: self.points.clone(),
        }
    }
}
