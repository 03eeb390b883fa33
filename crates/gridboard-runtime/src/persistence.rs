#![forbid(unsafe_code)]

//! Durable layout storage and save coalescing.
//!
//! The controller never calls a [`PersistenceAdapter`] directly. Settles
//! hand snapshots to a [`PersistenceScheduler`], which keeps only the
//! latest one, and the host flushes it once at the end of its task. A
//! failed save is reported through [`PersistenceStatus`] and retried with
//! whatever the next settle produces; it never rolls back layout.
//!
//! # File Format
//!
//! ```json
//! {
//!   "schema_version": 1,
//!   "widgets": [
//!     { "id": "w1", "title": "Sales", "geometry": { "x": 0, "y": 0, "w": 4, "h": 3 },
//!       "content": { "kind": "line", "payload": null }, "order": 0 }
//!   ],
//!   "extensions": {}
//! }
//! ```
//!
//! # Atomic Writes
//!
//! [`FileStorage`] writes to a temp file and renames it into place.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gridboard_layout::{LayoutSnapshot, WidgetRecord};
use serde::{Deserialize, Serialize};
use web_time::SystemTime;

use crate::config::ControllerConfig;
use crate::error::PersistenceError;

/// Durable snapshot storage.
pub trait PersistenceAdapter {
    /// Store the full ordered snapshot, replacing whatever was stored.
    fn save(&mut self, snapshot: &[WidgetRecord]) -> Result<(), PersistenceError>;

    /// The stored snapshot, if any.
    fn load(&mut self) -> Result<Option<LayoutSnapshot>, PersistenceError> {
        Ok(None)
    }
}

impl<P: PersistenceAdapter + ?Sized> PersistenceAdapter for Box<P> {
    fn save(&mut self, snapshot: &[WidgetRecord]) -> Result<(), PersistenceError> {
        (**self).save(snapshot)
    }

    fn load(&mut self) -> Result<Option<LayoutSnapshot>, PersistenceError> {
        (**self).load()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceStatus {
    #[default]
    Idle,
    /// A snapshot is waiting for the next flush.
    Pending,
    Saved,
    /// The last `attempts` flushes in a row failed.
    Failed { attempts: u32 },
}

/// Result of one [`PersistenceScheduler::flush`].
#[derive(Debug)]
pub enum FlushOutcome {
    NothingPending,
    /// Held back while a gesture is live; the snapshot stays pending.
    Deferred,
    Saved { widgets: usize },
    Failed {
        attempts: u32,
        error: PersistenceError,
    },
}

/// Holds at most one pending snapshot; the latest schedule wins.
#[derive(Debug, Clone, Default)]
pub struct PersistenceScheduler {
    pending: Option<Vec<WidgetRecord>>,
    status: PersistenceStatus,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_saved_at: Option<SystemTime>,
    saves: u64,
    failures: u64,
    coalesced: u64,
}

impl PersistenceScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `snapshot`, replacing any snapshot not yet flushed.
    pub fn schedule(&mut self, snapshot: Vec<WidgetRecord>) {
        if self.pending.replace(snapshot).is_some() {
            self.coalesced = self.coalesced.saturating_add(1);
        }
        self.status = PersistenceStatus::Pending;
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn pending(&self) -> Option<&[WidgetRecord]> {
        self.pending.as_deref()
    }

    #[must_use]
    pub const fn status(&self) -> PersistenceStatus {
        self.status
    }

    /// Message of the most recent failure, kept until the next success.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub const fn last_saved_at(&self) -> Option<SystemTime> {
        self.last_saved_at
    }

    #[must_use]
    pub const fn saves(&self) -> u64 {
        self.saves
    }

    #[must_use]
    pub const fn failures(&self) -> u64 {
        self.failures
    }

    /// Schedules absorbed by a later one before flushing.
    #[must_use]
    pub const fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Hand the pending snapshot to `adapter`. On failure the snapshot is
    /// dropped; the next settle schedules a fresh one.
    pub fn flush<P: PersistenceAdapter + ?Sized>(&mut self, adapter: &mut P) -> FlushOutcome {
        let Some(snapshot) = self.pending.take() else {
            return FlushOutcome::NothingPending;
        };
        match adapter.save(&snapshot) {
            Ok(()) => {
                self.saves = self.saves.saturating_add(1);
                self.consecutive_failures = 0;
                self.last_error = None;
                self.last_saved_at = Some(SystemTime::now());
                self.status = PersistenceStatus::Saved;
                FlushOutcome::Saved {
                    widgets: snapshot.len(),
                }
            }
            Err(error) => {
                self.failures = self.failures.saturating_add(1);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_error = Some(error.to_string());
                self.status = PersistenceStatus::Failed {
                    attempts: self.consecutive_failures,
                };
                FlushOutcome::Failed {
                    attempts: self.consecutive_failures,
                    error,
                }
            }
        }
    }
}

// =============================================================================
// Storages
// =============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    document: Option<String>,
    saves: Vec<Vec<WidgetRecord>>,
    fail_remaining: u32,
}

/// In-memory storage. Clones share the same backing store, so a test can
/// keep a handle while the controller owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Rc<RefCell<MemoryInner>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with a raw document, as if written earlier.
    #[must_use]
    pub fn with_document(document: impl Into<String>) -> Self {
        let storage = Self::default();
        storage.inner.borrow_mut().document = Some(document.into());
        storage
    }

    /// Make the next `count` saves fail.
    pub fn fail_next(&self, count: u32) {
        self.inner.borrow_mut().fail_remaining = count;
    }

    #[must_use]
    pub fn save_count(&self) -> usize {
        self.inner.borrow().saves.len()
    }

    /// Every successfully saved snapshot, oldest first.
    #[must_use]
    pub fn saves(&self) -> Vec<Vec<WidgetRecord>> {
        self.inner.borrow().saves.clone()
    }

    #[must_use]
    pub fn latest(&self) -> Option<Vec<WidgetRecord>> {
        self.inner.borrow().saves.last().cloned()
    }

    /// The stored document text.
    #[must_use]
    pub fn document(&self) -> Option<String> {
        self.inner.borrow().document.clone()
    }
}

impl PersistenceAdapter for MemoryStorage {
    fn save(&mut self, snapshot: &[WidgetRecord]) -> Result<(), PersistenceError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_remaining > 0 {
            inner.fail_remaining -= 1;
            return Err(PersistenceError::backend("storage unavailable"));
        }
        let document = LayoutSnapshot::new(snapshot.to_vec()).to_json_pretty()?;
        inner.document = Some(document);
        inner.saves.push(snapshot.to_vec());
        Ok(())
    }

    fn load(&mut self) -> Result<Option<LayoutSnapshot>, PersistenceError> {
        let inner = self.inner.borrow();
        let Some(document) = inner.document.as_deref() else {
            return Ok(None);
        };
        Ok(Some(LayoutSnapshot::from_json_str(document)?))
    }
}

/// One JSON document on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<storage_key>.json`.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>, storage_key: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{storage_key}.json")))
    }

    /// [`in_dir`](Self::in_dir) with the configured storage key.
    #[must_use]
    pub fn from_config(dir: impl AsRef<Path>, config: &ControllerConfig) -> Self {
        Self::in_dir(dir, &config.storage_key)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceAdapter for FileStorage {
    fn save(&mut self, snapshot: &[WidgetRecord]) -> Result<(), PersistenceError> {
        let document = LayoutSnapshot::new(snapshot.to_vec()).to_json_pretty()?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, document)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    /// A missing file is `Ok(None)`, not an error.
    fn load(&mut self) -> Result<Option<LayoutSnapshot>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(Some(LayoutSnapshot::from_json_str(&contents)?))
    }
}

#[cfg(test)]
mod tests {
    use gridboard_layout::{ContentDescriptor, WidgetGeometry};

    use super::*;

    fn snapshot(title: &str) -> Vec<WidgetRecord> {
        vec![WidgetRecord::new(
            "w1",
            title,
            WidgetGeometry::new(0, 0, 4, 3),
            ContentDescriptor::chart("line"),
        )]
    }

    #[test]
    fn latest_schedule_wins() {
        let mut scheduler = PersistenceScheduler::new();
        let mut storage = MemoryStorage::new();
        scheduler.schedule(snapshot("a"));
        scheduler.schedule(snapshot("b"));
        assert_eq!(scheduler.coalesced(), 1);
        assert!(matches!(
            scheduler.flush(&mut storage),
            FlushOutcome::Saved { widgets: 1 }
        ));
        assert_eq!(storage.save_count(), 1);
        assert_eq!(storage.latest().unwrap()[0].title, "b");
        assert!(matches!(
            scheduler.flush(&mut storage),
            FlushOutcome::NothingPending
        ));
        assert_eq!(scheduler.status(), PersistenceStatus::Saved);
        assert!(scheduler.last_saved_at().is_some());
    }

    #[test]
    fn failure_counts_attempts_until_success() {
        let mut scheduler = PersistenceScheduler::new();
        let mut storage = MemoryStorage::new();
        storage.fail_next(2);
        for attempt in 1..=2 {
            scheduler.schedule(snapshot("a"));
            let outcome = scheduler.flush(&mut storage);
            assert!(matches!(outcome, FlushOutcome::Failed { attempts, .. } if attempts == attempt));
            assert!(!scheduler.has_pending());
        }
        assert_eq!(scheduler.status(), PersistenceStatus::Failed { attempts: 2 });
        assert!(scheduler.last_error().unwrap().contains("unavailable"));
        scheduler.schedule(snapshot("a"));
        scheduler.flush(&mut storage);
        assert_eq!(scheduler.status(), PersistenceStatus::Saved);
        assert_eq!(scheduler.last_error(), None);
        assert_eq!(scheduler.failures(), 2);
        assert_eq!(scheduler.saves(), 1);
    }

    #[test]
    fn memory_storage_round_trips_through_document() {
        let mut storage = MemoryStorage::new();
        storage.save(&snapshot("Sales")).unwrap();
        assert!(storage.document().unwrap().contains("\"schema_version\": 1"));
        let loaded = storage.load().unwrap().unwrap();
        assert_eq!(loaded.widgets, snapshot("Sales"));
    }

    #[test]
    fn corrupt_document_is_flagged() {
        let mut storage = MemoryStorage::with_document("{oops");
        let err = storage.load().unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn file_storage_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::in_dir(dir.path(), "gridstack-echarts-dashboard-v1");
        assert!(storage.load().unwrap().is_none());
        assert!(
            storage
                .path()
                .ends_with("gridstack-echarts-dashboard-v1.json")
        );
    }
}
