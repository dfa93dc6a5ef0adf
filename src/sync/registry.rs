//! Keyed store of loaded calibration tables.
//!
//! Tables are immutable once loaded; the registry only guards its map. A
//! [`TableHandle`] stays valid after its key is replaced or removed, since it
//! owns an `Arc` to the table it was issued for.

use crate::config::SyncConfig;
use crate::error::Pdf2EpubError;
use crate::sync::calibration::{CalibrationFile, CalibrationPoint, CalibrationTable};
use crate::sync::mapper::{PositionMapper, SyncResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Shared reference to one loaded table, ready for queries.
#[derive(Debug, Clone)]
pub struct TableHandle {
    mapper: Arc<PositionMapper>,
}

impl TableHandle {
    pub fn title_key(&self) -> &str {
        self.mapper.table().title_key()
    }

    pub fn table(&self) -> &CalibrationTable {
        self.mapper.table()
    }

    pub fn mapper(&self) -> &PositionMapper {
        &self.mapper
    }

    pub fn page_to_time(&self, page: u32) -> SyncResult {
        self.mapper.page_to_time(page)
    }

    pub fn time_to_page(&self, t: f64) -> SyncResult {
        self.mapper.time_to_page(t)
    }
}

/// Registry of calibration tables keyed by title.
///
/// # Example
/// ```rust
/// use pdf2epub::{CalibrationPoint, CalibrationRegistry, SyncConfig};
///
/// let registry = CalibrationRegistry::new(SyncConfig::default()).unwrap();
/// let handle = registry
///     .load_table(
///         "walden",
///         vec![
///             CalibrationPoint::new(1, 0.0, "Economy"),
///             CalibrationPoint::new(12, 125.0, "Where I Lived"),
///         ],
///     )
///     .unwrap();
/// assert_eq!(handle.page_to_time(12).timestamp, 125.0);
/// ```
#[derive(Debug, Default)]
pub struct CalibrationRegistry {
    config: SyncConfig,
    tables: RwLock<HashMap<String, TableHandle>>,
}

impl CalibrationRegistry {
    /// # Errors
    /// `InvalidConfig` when `config` fails [`SyncConfig::validate`].
    pub fn new(config: SyncConfig) -> Result<Self, Pdf2EpubError> {
        config.validate()?;
        Ok(Self {
            config,
            tables: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Validate `points` and store them under `title_key`, replacing any
    /// table already loaded for that key.
    pub fn load_table(
        &self,
        title_key: &str,
        points: Vec<CalibrationPoint>,
    ) -> Result<TableHandle, Pdf2EpubError> {
        let table = CalibrationTable::new(title_key, points, self.config.monotonicity)?;
        Ok(self.insert(table))
    }

    /// Store an already-validated table.
    pub fn insert(&self, table: CalibrationTable) -> TableHandle {
        let key = table.title_key().to_string();
        info!(
            title = %key,
            points = table.len(),
            inversions = table.inversions(),
            "Loaded calibration table"
        );
        let handle = TableHandle {
            mapper: Arc::new(PositionMapper::with_valid_config(Arc::new(table), self.config.clone())),
        };
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, handle.clone());
        handle
    }

    /// Load one JSON calibration resource.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<TableHandle, Pdf2EpubError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Pdf2EpubError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => Pdf2EpubError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Pdf2EpubError::Internal(format!("{}: {e}", path.display())),
        })?;
        let file: CalibrationFile =
            serde_json::from_str(&json).map_err(|e| Pdf2EpubError::InvalidCalibration {
                title_key: path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(path = %path.display(), title = %file.title_key, "Parsed calibration resource");
        let table = CalibrationTable::from_file(file, self.config.monotonicity)?;
        Ok(self.insert(table))
    }

    /// Load every `*.json` file in `dir`, in file-name order. Stops at the
    /// first invalid resource.
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<Vec<TableHandle>, Pdf2EpubError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|_| Pdf2EpubError::FileNotFound {
            path: dir.to_path_buf(),
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        paths.iter().map(|p| self.load_file(p)).collect()
    }

    /// Handle for a loaded table.
    pub fn get(&self, title_key: &str) -> Result<TableHandle, Pdf2EpubError> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(title_key)
            .cloned()
            .ok_or_else(|| Pdf2EpubError::TableNotFound {
                title_key: title_key.to_string(),
            })
    }

    /// Drop a table. Outstanding handles keep working.
    pub fn remove(&self, title_key: &str) -> bool {
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(title_key)
            .is_some()
    }

    /// Loaded keys, sorted.
    pub fn titles(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonotonicityPolicy;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn points() -> Vec<CalibrationPoint> {
        vec![
            CalibrationPoint::new(1, 0.0, "Opening"),
            CalibrationPoint::new(12, 125.0, "Chapter 2"),
            CalibrationPoint::new(149, 3500.0, "Epilogue"),
        ]
    }

    #[test]
    fn load_and_get() {
        let registry = CalibrationRegistry::default();
        registry.load_table("book", points()).unwrap();
        let handle = registry.get("book").unwrap();
        assert_eq!(handle.title_key(), "book");
        assert_eq!(handle.table().len(), 3);
        assert_eq!(handle.page_to_time(149).timestamp, 3500.0);
    }

    #[test]
    fn unknown_key_is_not_found() {
        let err = CalibrationRegistry::default().get("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn reload_replaces_but_old_handle_survives() {
        let registry = CalibrationRegistry::default();
        let old = registry.load_table("book", points()).unwrap();
        registry
            .load_table("book", vec![CalibrationPoint::new(1, 10.0, "New")])
            .unwrap();

        assert_eq!(registry.get("book").unwrap().table().len(), 1);
        assert_eq!(old.table().len(), 3);

        assert!(registry.remove("book"));
        assert!(!registry.remove("book"));
        assert_eq!(old.time_to_page(125.0).page, 12);
    }

    #[test]
    fn invalid_points_are_rejected() {
        let registry = CalibrationRegistry::default();
        let err = registry
            .load_table("book", vec![CalibrationPoint::new(0, 0.0, "x")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(registry.titles().is_empty());
    }

    #[test]
    fn unvalidated_config_is_refused() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"fallback_total_duration_secs": 0}"#).unwrap();
        let err = CalibrationRegistry::new(config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn reject_policy_applies_to_loads() {
        let config = SyncConfig::builder()
            .monotonicity(MonotonicityPolicy::Reject)
            .build()
            .unwrap();
        let registry = CalibrationRegistry::new(config).unwrap();
        let err = registry
            .load_table(
                "book",
                vec![
                    CalibrationPoint::new(1, 100.0, "a"),
                    CalibrationPoint::new(2, 50.0, "b"),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, Pdf2EpubError::InvalidCalibration { .. }));
    }

    #[test]
    fn loads_json_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"title_key":"alpha","points":[{"page":1,"timestamp":0,"label":"One"}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{"title_key":"beta","total_pages":10,"total_duration_secs":600,"points":[]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = CalibrationRegistry::default();
        let handles = registry.load_dir(dir.path()).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(registry.titles(), vec!["alpha", "beta"]);
        assert_eq!(registry.get("beta").unwrap().time_to_page(300.0).page, 5);
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = CalibrationRegistry::default().load_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = CalibrationRegistry::default()
            .load_file(dir.path().join("absent.json"))
            .unwrap_err();
        assert!(matches!(err, Pdf2EpubError::FileNotFound { .. }));
    }
}
