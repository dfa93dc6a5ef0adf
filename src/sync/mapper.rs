//! Page ↔ time translation over one calibration table.
//!
//! The mapper never fails. Each query walks a fallback ladder and reports
//! which rung answered through [`SyncPrecision`]:
//!
//! 1. **Exact**: the page (or a timestamp within tolerance) is a stored point.
//! 2. **Interpolated**: linear between the two bracketing points.
//! 3. **Extrapolated**: one-sided, at `avg_seconds_per_page`.
//! 4. **Estimated**: the table is empty; a global proportion of
//!    total pages over total duration. Logged as an out-of-range query.

use crate::config::{SyncConfig, UNKNOWN_CHAPTER};
use crate::error::{ErrorKind, Pdf2EpubError};
use crate::sync::calibration::{CalibrationPoint, CalibrationTable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which rung of the fallback ladder produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPrecision {
    Exact,
    Interpolated,
    Extrapolated,
    /// Global proportion over an empty table. Low precision.
    Estimated,
}

impl fmt::Display for SyncPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPrecision::Exact => "exact",
            SyncPrecision::Interpolated => "interpolated",
            SyncPrecision::Extrapolated => "extrapolated",
            SyncPrecision::Estimated => "estimated",
        };
        f.write_str(s)
    }
}

/// A position query in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncQuery {
    ByPage(u32),
    ByTime(f64),
}

/// A resolved reading/listening position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub page: u32,
    /// Seconds from the start of the narration.
    pub timestamp: f64,
    /// Chapter label for `page`.
    pub label: String,
    pub precision: SyncPrecision,
}

/// Stateless translator over one immutable table.
#[derive(Debug, Clone)]
pub struct PositionMapper {
    table: Arc<CalibrationTable>,
    config: SyncConfig,
}

impl PositionMapper {
    /// # Errors
    /// `InvalidConfig` when `config` fails [`SyncConfig::validate`].
    pub fn new(table: Arc<CalibrationTable>, config: SyncConfig) -> Result<Self, Pdf2EpubError> {
        config.validate()?;
        Ok(Self { table, config })
    }

    /// For a config that has already passed validation.
    pub(crate) fn with_valid_config(table: Arc<CalibrationTable>, config: SyncConfig) -> Self {
        Self { table, config }
    }

    pub fn table(&self) -> &CalibrationTable {
        &self.table
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Answer either kind of query.
    pub fn query(&self, query: SyncQuery) -> SyncResult {
        match query {
            SyncQuery::ByPage(page) => self.page_to_time(page),
            SyncQuery::ByTime(t) => self.time_to_page(t),
        }
    }

    /// Narration timestamp at which `page` starts.
    pub fn page_to_time(&self, page: u32) -> SyncResult {
        let rate = self.config.avg_seconds_per_page;

        if self.table.is_empty() {
            let (pages, duration) = self.totals();
            self.log_estimate("page_to_time", f64::from(page));
            return SyncResult {
                page,
                timestamp: f64::from(page) / f64::from(pages) * duration,
                label: UNKNOWN_CHAPTER.to_string(),
                precision: SyncPrecision::Estimated,
            };
        }

        let (timestamp, precision) = if let Some(p) = self.table.point_at_page(page) {
            (p.timestamp, SyncPrecision::Exact)
        } else {
            match self.table.page_neighbours(page) {
                (Some(b), Some(a)) => {
                    let frac = f64::from(page - b.page) / f64::from(a.page - b.page);
                    (b.timestamp + (a.timestamp - b.timestamp) * frac, SyncPrecision::Interpolated)
                }
                (Some(b), None) => (
                    b.timestamp + f64::from(page - b.page) * rate,
                    SyncPrecision::Extrapolated,
                ),
                (None, Some(a)) => (
                    (a.timestamp - f64::from(a.page - page) * rate).max(0.0),
                    SyncPrecision::Extrapolated,
                ),
                // Non-empty table always yields at least one neighbour.
                (None, None) => (0.0, SyncPrecision::Estimated),
            }
        };

        debug!(title = self.table.title_key(), page, timestamp, %precision, "page_to_time");
        SyncResult {
            page,
            timestamp,
            label: self.chapter_label(page).to_string(),
            precision,
        }
    }

    /// Page being narrated at `t` seconds. Negative or non-finite input is
    /// treated as 0.
    pub fn time_to_page(&self, t: f64) -> SyncResult {
        let t = sanitize(t);
        let rate = self.config.avg_seconds_per_page;

        if self.table.is_empty() {
            let (pages, duration) = self.totals();
            self.log_estimate("time_to_page", t);
            let page = (t / duration * f64::from(pages)).floor() as u32;
            return SyncResult {
                page,
                timestamp: t,
                label: UNKNOWN_CHAPTER.to_string(),
                precision: SyncPrecision::Estimated,
            };
        }

        let points = self.table.points();

        let (page, precision) = if let Some(p) =
            nearest_by_time(points, t).filter(|p| (p.timestamp - t).abs() <= self.config.exact_time_tolerance_secs)
        {
            (p.page, SyncPrecision::Exact)
        } else {
            // Bracket by timestamp rather than by position: a tolerated
            // inversion must not pick a "before" that lies after `t`.
            let before = points
                .iter()
                .filter(|p| p.timestamp < t)
                .max_by(|x, y| x.timestamp.total_cmp(&y.timestamp));
            let after = points
                .iter()
                .filter(|p| p.timestamp > t)
                .min_by(|x, y| x.timestamp.total_cmp(&y.timestamp));

            let (raw, precision) = match (before, after) {
                (Some(b), Some(a)) => {
                    let frac = (t - b.timestamp) / (a.timestamp - b.timestamp);
                    let span = f64::from(a.page) - f64::from(b.page);
                    (f64::from(b.page) + span * frac, SyncPrecision::Interpolated)
                }
                (Some(b), None) => (
                    f64::from(b.page) + (t - b.timestamp) / rate,
                    SyncPrecision::Extrapolated,
                ),
                (None, Some(a)) => (
                    f64::from(a.page) - (a.timestamp - t) / rate,
                    SyncPrecision::Extrapolated,
                ),
                (None, None) => (1.0, SyncPrecision::Estimated),
            };
            // `as` saturates, so huge times cannot wrap.
            (raw.round().max(1.0) as u32, precision)
        };

        debug!(title = self.table.title_key(), t, page, %precision, "time_to_page");
        SyncResult {
            page,
            timestamp: t,
            label: self.chapter_label(page).to_string(),
            precision,
        }
    }

    /// Label of the point at `page`, else of the nearest point by page
    /// distance (ties go to the lower page).
    pub fn chapter_label(&self, page: u32) -> &str {
        if let Some(p) = self.table.point_at_page(page) {
            return &p.label;
        }
        match self.table.page_neighbours(page) {
            (Some(b), Some(a)) => {
                if page - b.page <= a.page - page {
                    &b.label
                } else {
                    &a.label
                }
            }
            (Some(p), None) | (None, Some(p)) => &p.label,
            (None, None) => UNKNOWN_CHAPTER,
        }
    }

    /// Label of the point nearest to `t`, if one lies within
    /// `label_time_tolerance_secs`.
    pub fn chapter_label_at(&self, t: f64) -> &str {
        let t = sanitize(t);
        nearest_by_time(self.table.points(), t)
            .filter(|p| (p.timestamp - t).abs() <= self.config.label_time_tolerance_secs)
            .map(|p| p.label.as_str())
            .unwrap_or(UNKNOWN_CHAPTER)
    }

    fn totals(&self) -> (u32, f64) {
        (
            self.table
                .total_pages()
                .unwrap_or(self.config.fallback_total_pages),
            self.table
                .total_duration_secs()
                .unwrap_or(self.config.fallback_total_duration_secs),
        )
    }

    fn log_estimate(&self, op: &str, input: f64) {
        warn!(
            title = self.table.title_key(),
            op,
            input,
            kind = %ErrorKind::OutOfRangeQuery,
            "Calibration table is empty; using global estimate"
        );
    }
}

fn sanitize(t: f64) -> f64 {
    if t.is_finite() {
        t.max(0.0)
    } else {
        0.0
    }
}

/// Point with the smallest timestamp distance to `t`; ties go to the lower page.
fn nearest_by_time(points: &[CalibrationPoint], t: f64) -> Option<&CalibrationPoint> {
    let mut best: Option<&CalibrationPoint> = None;
    for p in points {
        match best {
            Some(b) if (b.timestamp - t).abs() <= (p.timestamp - t).abs() => {}
            _ => best = Some(p),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonotonicityPolicy;
    use crate::sync::calibration::CalibrationPoint;

    fn mapper(raw: &[(u32, f64, &str)]) -> PositionMapper {
        let points = raw
            .iter()
            .map(|&(page, ts, label)| CalibrationPoint::new(page, ts, label))
            .collect();
        let table = CalibrationTable::new("test", points, MonotonicityPolicy::Tolerate).unwrap();
        PositionMapper::new(Arc::new(table), SyncConfig::default()).unwrap()
    }

    fn sample() -> PositionMapper {
        mapper(&[(1, 0.0, "Opening"), (12, 125.0, "Chapter 2"), (149, 3500.0, "Epilogue")])
    }

    #[test]
    fn stored_pages_are_exact() {
        let m = sample();
        for p in m.table().points() {
            let r = m.page_to_time(p.page);
            assert_eq!(r.timestamp, p.timestamp);
            assert_eq!(r.precision, SyncPrecision::Exact);
            assert_eq!(r.label, p.label);
            assert_eq!(m.time_to_page(r.timestamp).page, p.page);
        }
    }

    #[test]
    fn interpolates_between_points() {
        let r = sample().page_to_time(6);
        assert!((r.timestamp - 56.818).abs() < 0.01, "got {}", r.timestamp);
        assert_eq!(r.precision, SyncPrecision::Interpolated);
        assert_eq!(r.label, "Opening");
    }

    #[test]
    fn extrapolates_past_last_point() {
        let r = sample().page_to_time(200);
        assert_eq!(r.timestamp, 4112.0);
        assert_eq!(r.precision, SyncPrecision::Extrapolated);
        assert_eq!(r.label, "Epilogue");
    }

    #[test]
    fn backward_extrapolation_clamps_at_zero() {
        let m = mapper(&[(10, 30.0, "Later")]);
        assert_eq!(m.page_to_time(9).timestamp, 18.0);
        assert_eq!(m.page_to_time(1).timestamp, 0.0);
    }

    #[test]
    fn page_to_time_is_monotonic() {
        let m = sample();
        let mut last = -1.0;
        for page in 1..=300 {
            let t = m.page_to_time(page).timestamp;
            assert!(t >= last, "page {page}: {t} < {last}");
            last = t;
        }
    }

    #[test]
    fn empty_table_uses_global_estimate() {
        let m = mapper(&[]);
        let r = m.time_to_page(0.0);
        assert_eq!(r.page, 0);
        assert_eq!(r.precision, SyncPrecision::Estimated);
        assert_eq!(m.time_to_page(2700.0).page, 74);
        assert_eq!(m.page_to_time(149).timestamp, 5400.0);
        assert_eq!(r.label, UNKNOWN_CHAPTER);
    }

    #[test]
    fn table_totals_override_defaults() {
        let table = CalibrationTable::new("t", vec![], MonotonicityPolicy::Tolerate)
            .unwrap()
            .with_totals(Some(100), Some(1000.0))
            .unwrap();
        let m = PositionMapper::new(Arc::new(table), SyncConfig::default()).unwrap();
        assert_eq!(m.time_to_page(500.0).page, 50);
    }

    #[test]
    fn time_to_page_matches_within_tolerance() {
        let m = sample();
        let r = m.time_to_page(128.0);
        assert_eq!(r.page, 12);
        assert_eq!(r.precision, SyncPrecision::Exact);
    }

    #[test]
    fn time_to_page_interpolates_and_extrapolates() {
        let m = sample();
        // Halfway between page 12 (125 s) and page 149 (3500 s).
        let r = m.time_to_page(1812.5);
        assert_eq!(r.page, 81);
        assert_eq!(r.precision, SyncPrecision::Interpolated);

        let r = m.time_to_page(4112.0);
        assert_eq!(r.page, 200);
        assert_eq!(r.precision, SyncPrecision::Extrapolated);
    }

    #[test]
    fn time_to_page_clamps_to_first_page() {
        let m = mapper(&[(3, 600.0, "Late start")]);
        let r = m.time_to_page(0.0);
        assert_eq!(r.page, 1);
        assert_eq!(r.precision, SyncPrecision::Extrapolated);
    }

    #[test]
    fn bad_times_are_treated_as_zero() {
        let m = sample();
        assert_eq!(m.time_to_page(-50.0).page, 1);
        assert_eq!(m.time_to_page(f64::NAN).page, 1);
        assert_eq!(m.time_to_page(f64::NAN).timestamp, 0.0);
    }

    #[test]
    fn chapter_label_ties_go_to_lower_page() {
        let m = mapper(&[(10, 0.0, "Ten"), (20, 100.0, "Twenty")]);
        assert_eq!(m.chapter_label(15), "Ten");
        assert_eq!(m.chapter_label(16), "Twenty");
        assert_eq!(m.chapter_label(2), "Ten");
        assert_eq!(mapper(&[]).chapter_label(5), UNKNOWN_CHAPTER);
    }

    #[test]
    fn chapter_label_at_respects_window() {
        let m = sample();
        assert_eq!(m.chapter_label_at(150.0), "Chapter 2");
        assert_eq!(m.chapter_label_at(1000.0), UNKNOWN_CHAPTER);
    }

    #[test]
    fn query_dispatches() {
        let m = sample();
        assert_eq!(m.query(SyncQuery::ByPage(12)).timestamp, 125.0);
        assert_eq!(m.query(SyncQuery::ByTime(125.0)).page, 12);
    }

    #[test]
    fn invalid_config_is_refused() {
        let table = CalibrationTable::new(
            "one",
            vec![CalibrationPoint::new(1, 0.0, "Start")],
            MonotonicityPolicy::Tolerate,
        )
        .unwrap();
        let zero_rate: SyncConfig =
            serde_json::from_str(r#"{"avg_seconds_per_page": 0}"#).unwrap();
        let err = PositionMapper::new(Arc::new(table), zero_rate).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn one_point_extrapolation_stays_in_range() {
        let m = mapper(&[(1, 0.0, "Start")]);
        let r = m.time_to_page(600.0);
        assert_eq!(r.page, 51);
        assert_eq!(r.precision, SyncPrecision::Extrapolated);
    }
}
