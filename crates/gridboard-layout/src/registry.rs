#![forbid(unsafe_code)]

//! Canonical ordered collection of widget records.
//!
//! The registry is the source of truth for *intended* geometry and widget
//! metadata. It never talks to a surface; every mutation that changes
//! something queues a [`RegistryNotification`] tagged with the
//! [`ChangeOrigin`] that caused it, and consumers drain them with
//! [`WidgetRegistry::drain_changes`].
//!
//! Mutations on a missing id are no-ops reported through the returned
//! outcome rather than errors.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::geometry::WidgetGeometry;
use crate::widget::{PatchEffect, WidgetId, WidgetPatch, WidgetRecord};

/// Who caused a registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// Business logic (toolbar, query results, programmatic edits).
    Registry,
    /// Write-back of geometry/order observed on the surface.
    Surface,
}

/// One registry change.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    Added { id: WidgetId },
    /// Carries the removed record so consumers keep its last known state.
    Removed { record: WidgetRecord },
    Updated { id: WidgetId, effect: PatchEffect },
    Reordered { ids: Vec<WidgetId> },
}

/// A change plus its origin and a monotonically increasing sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryNotification {
    pub sequence: u64,
    pub origin: ChangeOrigin,
    pub change: RegistryChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The id is already registered; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(WidgetRecord),
    Missing,
}

impl RemoveOutcome {
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        matches!(self, Self::Removed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated(PatchEffect),
    Unchanged,
    Missing,
}

/// Ordered, id-keyed widget collection.
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    records: FxHashMap<WidgetId, WidgetRecord>,
    order: Vec<WidgetId>,
    pending: Vec<RegistryNotification>,
    sequence: u64,
}

impl WidgetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Reads ----

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &WidgetId) -> bool {
        self.records.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &WidgetId) -> Option<&WidgetRecord> {
        self.records.get(id)
    }

    /// Ids in registry order.
    #[must_use]
    pub fn ids(&self) -> &[WidgetId] {
        &self.order
    }

    /// Records in registry order.
    pub fn records(&self) -> impl Iterator<Item = &WidgetRecord> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Owned, ordered copy of every record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WidgetRecord> {
        self.records().cloned().collect()
    }

    /// Geometry of every record, in order.
    #[must_use]
    pub fn geometries(&self) -> Vec<WidgetGeometry> {
        self.records().map(|r| r.geometry).collect()
    }

    // ---- Business-logic mutations ----

    /// Append a record. Its `order` is set to its position.
    pub fn add(&mut self, record: WidgetRecord) -> AddOutcome {
        self.add_as(ChangeOrigin::Registry, record)
    }

    pub fn remove(&mut self, id: &WidgetId) -> RemoveOutcome {
        let Some(record) = self.records.remove(id) else {
            return RemoveOutcome::Missing;
        };
        self.order.retain(|existing| existing != id);
        self.renumber();
        self.push(
            ChangeOrigin::Registry,
            RegistryChange::Removed {
                record: record.clone(),
            },
        );
        RemoveOutcome::Removed(record)
    }

    pub fn update(&mut self, id: &WidgetId, patch: &WidgetPatch) -> UpdateOutcome {
        self.update_as(ChangeOrigin::Registry, id, patch)
    }

    /// Reorder by id. Unknown ids are ignored; registered ids that are not
    /// named stay at their previous index. Returns whether the order changed.
    pub fn reorder(&mut self, ids: &[WidgetId]) -> bool {
        self.reorder_as(ChangeOrigin::Registry, ids)
    }

    /// Remove every record, one `Removed` notification per record.
    pub fn clear(&mut self) -> usize {
        let ids = self.order.clone();
        for id in &ids {
            let _ = self.remove(id);
        }
        ids.len()
    }

    // ---- Surface write-backs ----

    /// Record geometry observed on the surface.
    pub fn apply_surface_geometry(
        &mut self,
        id: &WidgetId,
        geometry: WidgetGeometry,
    ) -> UpdateOutcome {
        self.update_as(ChangeOrigin::Surface, id, &WidgetPatch::geometry(geometry))
    }

    /// Record order observed on the surface.
    pub fn apply_surface_order(&mut self, ids: &[WidgetId]) -> bool {
        self.reorder_as(ChangeOrigin::Surface, ids)
    }

    /// Take every queued notification, oldest first.
    pub fn drain_changes(&mut self) -> Vec<RegistryNotification> {
        std::mem::take(&mut self.pending)
    }

    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    // ---- Internals ----

    fn add_as(&mut self, origin: ChangeOrigin, mut record: WidgetRecord) -> AddOutcome {
        if self.records.contains_key(&record.id) {
            return AddOutcome::Duplicate;
        }
        record.order = u32::try_from(self.order.len()).unwrap_or(u32::MAX);
        let id = record.id.clone();
        self.order.push(id.clone());
        self.records.insert(id.clone(), record);
        self.push(origin, RegistryChange::Added { id });
        AddOutcome::Added
    }

    fn update_as(
        &mut self,
        origin: ChangeOrigin,
        id: &WidgetId,
        patch: &WidgetPatch,
    ) -> UpdateOutcome {
        let Some(record) = self.records.get_mut(id) else {
            return UpdateOutcome::Missing;
        };
        let effect = patch.apply(record);
        if !effect.any() {
            return UpdateOutcome::Unchanged;
        }
        self.push(
            origin,
            RegistryChange::Updated {
                id: id.clone(),
                effect,
            },
        );
        UpdateOutcome::Updated(effect)
    }

    fn reorder_as(&mut self, origin: ChangeOrigin, ids: &[WidgetId]) -> bool {
        let next = merge_order(&self.order, ids, |id| self.records.contains_key(id));
        if next == self.order {
            return false;
        }
        self.order = next;
        self.renumber();
        self.push(
            origin,
            RegistryChange::Reordered {
                ids: self.order.clone(),
            },
        );
        true
    }

    fn renumber(&mut self) {
        for (index, id) in self.order.iter().enumerate() {
            if let Some(record) = self.records.get_mut(id) {
                record.order = u32::try_from(index).unwrap_or(u32::MAX);
            }
        }
    }

    fn push(&mut self, origin: ChangeOrigin, change: RegistryChange) {
        self.sequence = self.sequence.saturating_add(1);
        self.pending.push(RegistryNotification {
            sequence: self.sequence,
            origin,
            change,
        });
    }
}

/// Merge a requested order against the current one.
///
/// Requested ids come first (deduplicated, filtered by `known`); current
/// ids the request does not name are re-inserted at their previous index
/// rather than appended, so a partial enumeration never drops or shuffles
/// an id it happens to omit.
#[must_use]
pub fn merge_order(
    current: &[WidgetId],
    requested: &[WidgetId],
    known: impl Fn(&WidgetId) -> bool,
) -> Vec<WidgetId> {
    let mut merged: Vec<WidgetId> = Vec::with_capacity(current.len());
    for id in requested {
        if known(id) && !merged.contains(id) {
            merged.push(id.clone());
        }
    }
    for (index, id) in current.iter().enumerate() {
        if !merged.contains(id) {
            let at = index.min(merged.len());
            merged.insert(at, id.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::ContentDescriptor;

    fn record(id: &str, title: &str) -> WidgetRecord {
        WidgetRecord::new(
            id,
            title,
            WidgetGeometry::new(0, 0, 4, 3),
            ContentDescriptor::chart("line"),
        )
    }

    fn ids(list: &[&str]) -> Vec<WidgetId> {
        list.iter().map(|s| WidgetId::from(*s)).collect()
    }

    // ---- Add / remove ----

    #[test]
    fn add_assigns_order_and_notifies() {
        let mut reg = WidgetRegistry::new();
        assert_eq!(reg.add(record("w1", "Sales")), AddOutcome::Added);
        assert_eq!(reg.add(record("w2", "Expenses")), AddOutcome::Added);
        assert_eq!(reg.get(&"w2".into()).unwrap().order, 1);
        let changes = reg.drain_changes();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.origin == ChangeOrigin::Registry));
        assert!(changes[0].sequence < changes[1].sequence);
    }

    #[test]
    fn duplicate_add_is_rejected_silently() {
        let mut reg = WidgetRegistry::new();
        reg.add(record("w1", "Sales"));
        reg.drain_changes();
        assert_eq!(reg.add(record("w1", "Other")), AddOutcome::Duplicate);
        assert_eq!(reg.get(&"w1".into()).unwrap().title, "Sales");
        assert!(!reg.has_pending_changes());
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut reg = WidgetRegistry::new();
        assert_eq!(reg.remove(&"nope".into()), RemoveOutcome::Missing);
        assert!(!reg.has_pending_changes());
    }

    #[test]
    fn remove_renumbers_and_carries_record() {
        let mut reg = WidgetRegistry::new();
        reg.add(record("w1", "Sales"));
        reg.add(record("w2", "Expenses"));
        reg.drain_changes();
        assert!(reg.remove(&"w1".into()).is_removed());
        assert_eq!(reg.get(&"w2".into()).unwrap().order, 0);
        let changes = reg.drain_changes();
        assert!(matches!(
            &changes[0].change,
            RegistryChange::Removed { record } if record.title == "Sales"
        ));
    }

    #[test]
    fn clear_emits_one_removal_per_record() {
        let mut reg = WidgetRegistry::new();
        reg.add(record("w1", "Sales"));
        reg.add(record("w2", "Expenses"));
        reg.drain_changes();
        assert_eq!(reg.clear(), 2);
        assert!(reg.is_empty());
        assert_eq!(reg.drain_changes().len(), 2);
    }

    // ---- Update ----

    #[test]
    fn update_missing_is_noop() {
        let mut reg = WidgetRegistry::new();
        assert_eq!(
            reg.update(&"w9".into(), &WidgetPatch::title("x")),
            UpdateOutcome::Missing
        );
    }

    #[test]
    fn update_without_change_is_silent() {
        let mut reg = WidgetRegistry::new();
        reg.add(record("w1", "Sales"));
        reg.drain_changes();
        assert_eq!(
            reg.update(&"w1".into(), &WidgetPatch::title("Sales")),
            UpdateOutcome::Unchanged
        );
        assert!(!reg.has_pending_changes());
    }

    #[test]
    fn surface_writes_are_tagged() {
        let mut reg = WidgetRegistry::new();
        reg.add(record("w1", "Sales"));
        reg.drain_changes();
        reg.apply_surface_geometry(&"w1".into(), WidgetGeometry::new(4, 0, 4, 3));
        let changes = reg.drain_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].origin, ChangeOrigin::Surface);
    }

    // ---- Reorder ----

    #[test]
    fn reorder_touches_only_order() {
        let mut reg = WidgetRegistry::new();
        reg.add(record("w1", "Sales"));
        reg.add(record("w2", "Expenses"));
        reg.add(record("w3", "Traffic"));
        let before: Vec<_> = reg.records().map(|r| (r.id.clone(), r.geometry)).collect();
        assert!(reg.reorder(&ids(&["w3", "w1", "w2"])));
        assert_eq!(reg.ids(), ids(&["w3", "w1", "w2"]).as_slice());
        for (id, geometry) in before {
            assert_eq!(reg.get(&id).unwrap().geometry, geometry);
        }
        assert_eq!(reg.get(&"w3".into()).unwrap().order, 0);
    }

    #[test]
    fn reorder_same_order_is_silent() {
        let mut reg = WidgetRegistry::new();
        reg.add(record("w1", "Sales"));
        reg.drain_changes();
        assert!(!reg.reorder(&ids(&["w1"])));
        assert!(!reg.has_pending_changes());
    }

    #[test]
    fn merge_order_keeps_missing_ids_in_place() {
        let current = ids(&["a", "b", "c", "d"]);
        let merged = merge_order(&current, &ids(&["d", "a", "c", "zz"]), |id| {
            current.contains(id)
        });
        assert_eq!(merged, ids(&["d", "b", "a", "c"]));
    }

    #[test]
    fn merge_order_with_empty_request_is_identity() {
        let current = ids(&["a", "b"]);
        assert_eq!(merge_order(&current, &[], |_| true), current);
    }
}
