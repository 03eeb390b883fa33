#![forbid(unsafe_code)]

//! Persisted layout schema v1 with versioning and migration scaffolding.
//!
//! A [`LayoutSnapshot`] wraps the ordered widget records with a schema
//! version and a forward-compatible extension bag. The on-disk document is
//!
//! ```json
//! {"schema_version": 1, "widgets": [{"id": "w1", "title": "Sales",
//!   "geometry": {"x": 0, "y": 0, "w": 4, "h": 3},
//!   "content": {"kind": "line", "payload": null}, "order": 0}]}
//! ```
//!
//! # Schema Versioning Policy
//!
//! - **Additive fields** may be carried in `extensions` without a version bump.
//! - **Breaking changes** require incrementing [`LAYOUT_SCHEMA_VERSION`] and
//!   adding a migration path in [`migrate_layout`].
//! - A bare JSON array is read as schema v0 (the pre-envelope format, whose
//!   entries may lack positions) and migrated.
//!
//! # Usage
//!
//! ```
//! use gridboard_layout::snapshot::{LayoutSnapshot, LAYOUT_SCHEMA_VERSION};
//!
//! let snapshot = LayoutSnapshot::from_json_str(
//!     r#"[{"id":"w1","title":"Sales","geometry":{"x":0,"y":0,"w":4,"h":3}}]"#,
//! )
//! .unwrap();
//! assert_eq!(snapshot.schema_version, LAYOUT_SCHEMA_VERSION);
//! assert_eq!(snapshot.widgets[0].title, "Sales");
//! assert!(snapshot.validate(12).is_ok());
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{DEFAULT_GRID_COLUMNS, WidgetGeometry, first_free_slot};
use crate::widget::{ContentDescriptor, WidgetId, WidgetRecord};

/// Current layout schema version.
pub const LAYOUT_SCHEMA_VERSION: u16 = 1;

/// Size given to legacy entries that carry no size.
const LEGACY_DEFAULT_SIZE: (u16, u16) = (4, 3);

// =========================================================================
// Core schema types
// =========================================================================

/// Persisted layout state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    #[serde(default = "default_layout_version")]
    pub schema_version: u16,
    pub widgets: Vec<WidgetRecord>,
    /// Forward-compatible extension bag.
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

fn default_layout_version() -> u16 {
    LAYOUT_SCHEMA_VERSION
}

impl LayoutSnapshot {
    #[must_use]
    pub fn new(widgets: Vec<WidgetRecord>) -> Self {
        Self {
            schema_version: LAYOUT_SCHEMA_VERSION,
            widgets,
            extensions: BTreeMap::new(),
        }
    }

    /// Validate against schema and structural invariants for a grid with
    /// `columns` columns.
    pub fn validate(&self, columns: u16) -> Result<(), SnapshotValidationError> {
        if self.schema_version != LAYOUT_SCHEMA_VERSION {
            return Err(SnapshotValidationError::UnsupportedVersion {
                found: self.schema_version,
                expected: LAYOUT_SCHEMA_VERSION,
            });
        }
        let mut seen = HashSet::new();
        for record in &self.widgets {
            if record.id.is_empty() {
                return Err(SnapshotValidationError::EmptyId);
            }
            if !seen.insert(record.id.clone()) {
                return Err(SnapshotValidationError::DuplicateId {
                    id: record.id.clone(),
                });
            }
            if record.geometry.is_empty() {
                return Err(SnapshotValidationError::EmptyGeometry {
                    id: record.id.clone(),
                });
            }
            if record.geometry.right() > u32::from(columns) {
                return Err(SnapshotValidationError::OutOfBounds {
                    id: record.id.clone(),
                    geometry: record.geometry,
                    columns,
                });
            }
        }
        Ok(())
    }

    /// Repair what [`validate`](Self::validate) would reject, returning one
    /// note per repair. Duplicate and empty ids are dropped (first wins),
    /// geometry is clamped into the grid, and records are put in `order`.
    pub fn sanitize(&mut self, columns: u16) -> Vec<SanitizeNote> {
        let mut notes = Vec::new();
        self.canonicalize();
        let mut seen = HashSet::new();
        self.widgets.retain(|record| {
            if record.id.is_empty() {
                notes.push(SanitizeNote::DroppedEmptyId);
                return false;
            }
            if !seen.insert(record.id.clone()) {
                notes.push(SanitizeNote::DroppedDuplicate {
                    id: record.id.clone(),
                });
                return false;
            }
            true
        });
        for record in &mut self.widgets {
            let clamped = record.geometry.clamp_to_columns(columns);
            if clamped != record.geometry {
                notes.push(SanitizeNote::ClampedGeometry {
                    id: record.id.clone(),
                    from: record.geometry,
                    to: clamped,
                });
                record.geometry = clamped;
            }
        }
        self.renumber();
        notes
    }

    /// Sort by `order` (stable) and renumber densely.
    pub fn canonicalize(&mut self) {
        self.widgets.sort_by_key(|record| record.order);
        self.renumber();
    }

    fn renumber(&mut self) {
        for (index, record) in self.widgets.iter_mut().enumerate() {
            record.order = u32::try_from(index).unwrap_or(u32::MAX);
        }
    }

    /// Ids in document order.
    #[must_use]
    pub fn ids(&self) -> Vec<WidgetId> {
        self.widgets.iter().map(|r| r.id.clone()).collect()
    }

    /// Serialize as a pretty-printed v1 document.
    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Encode {
            reason: e.to_string(),
        })
    }

    /// Parse a document of any supported version, migrating as needed.
    pub fn from_json_str(input: &str) -> Result<Self, SnapshotError> {
        let raw: serde_json::Value =
            serde_json::from_str(input).map_err(|e| SnapshotError::Decode {
                reason: e.to_string(),
            })?;
        Ok(migrate_layout(raw)?.snapshot)
    }
}

/// One repair made by [`LayoutSnapshot::sanitize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeNote {
    DroppedEmptyId,
    DroppedDuplicate {
        id: WidgetId,
    },
    ClampedGeometry {
        id: WidgetId,
        from: WidgetGeometry,
        to: WidgetGeometry,
    },
}

impl fmt::Display for SanitizeNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DroppedEmptyId => write!(f, "dropped widget with empty id"),
            Self::DroppedDuplicate { id } => write!(f, "dropped duplicate widget {id}"),
            Self::ClampedGeometry { id, from, to } => {
                write!(f, "clamped widget {id} geometry {from} -> {to}")
            }
        }
    }
}

// =========================================================================
// Errors
// =========================================================================

/// Errors from snapshot validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotValidationError {
    UnsupportedVersion {
        found: u16,
        expected: u16,
    },
    EmptyId,
    DuplicateId {
        id: WidgetId,
    },
    EmptyGeometry {
        id: WidgetId,
    },
    OutOfBounds {
        id: WidgetId,
        geometry: WidgetGeometry,
        columns: u16,
    },
}

impl fmt::Display for SnapshotValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { found, expected } => write!(
                f,
                "unsupported layout schema version {found} (expected {expected})"
            ),
            Self::EmptyId => write!(f, "widget id must not be empty"),
            Self::DuplicateId { id } => write!(f, "duplicate widget id {id}"),
            Self::EmptyGeometry { id } => write!(f, "widget {id} has zero width or height"),
            Self::OutOfBounds {
                id,
                geometry,
                columns,
            } => write!(
                f,
                "widget {id} at {geometry} does not fit in {columns} columns"
            ),
        }
    }
}

impl std::error::Error for SnapshotValidationError {}

/// Errors from workspace migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotMigrationError {
    /// Version is newer than this build understands.
    UnsupportedVersion { version: u16 },
    /// Migration from the given version is not implemented.
    NoMigrationPath { from: u16, to: u16 },
    /// The document shape is not recognized.
    Malformed { reason: String },
}

impl fmt::Display for SnapshotMigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported layout schema version {version}")
            }
            Self::NoMigrationPath { from, to } => {
                write!(f, "no migration path from v{from} to v{to}")
            }
            Self::Malformed { reason } => write!(f, "malformed layout document: {reason}"),
        }
    }
}

impl std::error::Error for SnapshotMigrationError {}

/// Encode/decode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    Decode { reason: String },
    Encode { reason: String },
    Migration(SnapshotMigrationError),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode { reason } => write!(f, "failed to decode layout: {reason}"),
            Self::Encode { reason } => write!(f, "failed to encode layout: {reason}"),
            Self::Migration(e) => write!(f, "layout migration failed: {e}"),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::Migration(error) = self {
            return Some(error);
        }
        None
    }
}

impl From<SnapshotMigrationError> for SnapshotError {
    fn from(err: SnapshotMigrationError) -> Self {
        Self::Migration(err)
    }
}

// =========================================================================
// Migration scaffolding
// =========================================================================

/// Result of migrating a raw document to the current schema version.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub snapshot: LayoutSnapshot,
    pub from_version: u16,
    pub to_version: u16,
    pub warnings: Vec<String>,
}

/// Pre-envelope entry: positions and content were optional.
#[derive(Debug, Deserialize)]
struct LegacyWidgetEntry {
    id: WidgetId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    geometry: Option<WidgetGeometry>,
    #[serde(default)]
    x: Option<u16>,
    #[serde(default)]
    y: Option<u16>,
    #[serde(default)]
    w: Option<u16>,
    #[serde(default)]
    h: Option<u16>,
    #[serde(default)]
    content: Option<ContentDescriptor>,
}

/// Migrate a raw JSON document to [`LAYOUT_SCHEMA_VERSION`].
pub fn migrate_layout(raw: serde_json::Value) -> Result<MigrationResult, SnapshotMigrationError> {
    match raw {
        serde_json::Value::Array(entries) => migrate_v0(entries),
        serde_json::Value::Object(ref map) => {
            let version = map
                .get("schema_version")
                .and_then(serde_json::Value::as_u64)
                .map_or(LAYOUT_SCHEMA_VERSION, |v| {
                    u16::try_from(v).unwrap_or(u16::MAX)
                });
            match version {
                LAYOUT_SCHEMA_VERSION => {
                    let snapshot: LayoutSnapshot = serde_json::from_value(raw).map_err(|e| {
                        SnapshotMigrationError::Malformed {
                            reason: e.to_string(),
                        }
                    })?;
                    Ok(MigrationResult {
                        snapshot,
                        from_version: LAYOUT_SCHEMA_VERSION,
                        to_version: LAYOUT_SCHEMA_VERSION,
                        warnings: Vec::new(),
                    })
                }
                v if v > LAYOUT_SCHEMA_VERSION => {
                    Err(SnapshotMigrationError::UnsupportedVersion { version: v })
                }
                v => Err(SnapshotMigrationError::NoMigrationPath {
                    from: v,
                    to: LAYOUT_SCHEMA_VERSION,
                }),
            }
        }
        other => Err(SnapshotMigrationError::Malformed {
            reason: format!("expected an array or object, found {other}"),
        }),
    }
}

fn migrate_v0(entries: Vec<serde_json::Value>) -> Result<MigrationResult, SnapshotMigrationError> {
    let mut warnings = Vec::new();
    let mut widgets: Vec<WidgetRecord> = Vec::with_capacity(entries.len());
    let mut placed: Vec<WidgetGeometry> = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let legacy: LegacyWidgetEntry =
            serde_json::from_value(entry).map_err(|e| SnapshotMigrationError::Malformed {
                reason: format!("entry {index}: {e}"),
            })?;
        let geometry = match (legacy.geometry, legacy.x, legacy.y) {
            (Some(geometry), _, _) => geometry,
            (None, Some(x), Some(y)) => WidgetGeometry::new(
                x,
                y,
                legacy.w.unwrap_or(LEGACY_DEFAULT_SIZE.0),
                legacy.h.unwrap_or(LEGACY_DEFAULT_SIZE.1),
            ),
            (None, _, _) => {
                warnings.push(format!("widget {} had no position; flow-placed", legacy.id));
                first_free_slot(
                    &placed,
                    legacy.w.unwrap_or(LEGACY_DEFAULT_SIZE.0),
                    legacy.h.unwrap_or(LEGACY_DEFAULT_SIZE.1),
                    DEFAULT_GRID_COLUMNS,
                )
            }
        };
        placed.push(geometry);
        let title = legacy.title.unwrap_or_else(|| legacy.id.to_string());
        let content = legacy
            .content
            .unwrap_or_else(|| ContentDescriptor::chart("line"));
        let mut record = WidgetRecord::new(legacy.id, title, geometry, content);
        record.order = u32::try_from(index).unwrap_or(u32::MAX);
        widgets.push(record);
    }
    Ok(MigrationResult {
        snapshot: LayoutSnapshot::new(widgets),
        from_version: 0,
        to_version: LAYOUT_SCHEMA_VERSION,
        warnings,
    })
}

// =========================================================================
// Tests
// =========================================================================
