//! Read/listen position sync: map document pages to narration timestamps.
//!
//! ```text
//! CalibrationFile (JSON) ──▶ CalibrationTable ──▶ CalibrationRegistry
//!                                                   │
//!                              TableHandle ◀────────┘
//!                                  │
//!                                  ▼
//!                            PositionMapper ──▶ SyncResult { page, timestamp, label, precision }
//! ```

pub mod calibration;
pub mod mapper;
pub mod registry;

pub use calibration::{CalibrationFile, CalibrationPoint, CalibrationTable};
pub use mapper::{PositionMapper, SyncPrecision, SyncQuery, SyncResult};
pub use registry::{CalibrationRegistry, TableHandle};
