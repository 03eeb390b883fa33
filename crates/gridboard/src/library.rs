#![forbid(unsafe_code)]

//! Saved dashboards.
//!
//! A [`DashboardLibrary`] holds named layouts and tracks which one is
//! active. It consumes settled snapshots from a controller: every settle
//! overwrites the active dashboard's widgets. Timestamps are replaced by a
//! library-wide generation counter that increases on every mutation.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use gridboard_layout::{SpatialSurface, WidgetRecord};
use gridboard_runtime::{PersistenceAdapter, ReconciliationController};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stable dashboard identifier (`d1`, `d2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DashboardId(String);

impl DashboardId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DashboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DashboardId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One saved layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: DashboardId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub widgets: Vec<WidgetRecord>,
    pub created_generation: u64,
    pub updated_generation: u64,
}

/// Named dashboards plus the active selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardLibrary {
    dashboards: Vec<Dashboard>,
    #[serde(default)]
    active: Option<DashboardId>,
    #[serde(default)]
    generation: u64,
    #[serde(default)]
    next_id: u64,
}

impl DashboardLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dashboards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dashboards.is_empty()
    }

    /// Current generation; the last mutation's stamp.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dashboard> + '_ {
        self.dashboards.iter()
    }

    #[must_use]
    pub fn get(&self, id: &DashboardId) -> Option<&Dashboard> {
        self.dashboards.iter().find(|d| &d.id == id)
    }

    #[must_use]
    pub fn active_id(&self) -> Option<&DashboardId> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn active(&self) -> Option<&Dashboard> {
        self.active.as_ref().and_then(|id| self.get(id))
    }

    /// Create an empty dashboard and make it active.
    pub fn create(&mut self, name: impl Into<String>) -> DashboardId {
        let id = self.next_dashboard_id();
        let generation = self.bump();
        let name = name.into();
        debug!(dashboard_id = %id, name = %name, "dashboard created");
        self.dashboards.push(Dashboard {
            id: id.clone(),
            name,
            description: None,
            widgets: Vec::new(),
            created_generation: generation,
            updated_generation: generation,
        });
        self.active = Some(id.clone());
        id
    }

    pub fn rename(&mut self, id: &DashboardId, name: impl Into<String>) -> bool {
        let name = name.into();
        self.modify(id, |dashboard| dashboard.name = name)
    }

    pub fn set_description(&mut self, id: &DashboardId, description: Option<String>) -> bool {
        self.modify(id, |dashboard| dashboard.description = description)
    }

    /// Remove a dashboard. Deleting the active one leaves nothing active.
    pub fn delete(&mut self, id: &DashboardId) -> Option<Dashboard> {
        let index = self.dashboards.iter().position(|d| &d.id == id)?;
        let removed = self.dashboards.remove(index);
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        self.bump();
        debug!(dashboard_id = %id, "dashboard deleted");
        Some(removed)
    }

    /// Select the active dashboard; `None` clears the selection. Unknown
    /// ids are rejected and leave the selection unchanged.
    pub fn set_active(&mut self, id: Option<&DashboardId>) -> bool {
        match id {
            Some(id) if self.get(id).is_none() => false,
            Some(id) => {
                self.active = Some(id.clone());
                true
            }
            None => {
                self.active = None;
                true
            }
        }
    }

    /// Overwrite the active dashboard's widgets with a settled snapshot.
    /// Returns `false` when nothing is active.
    pub fn record_settle(&mut self, records: &[WidgetRecord]) -> bool {
        let Some(id) = self.active.clone() else {
            return false;
        };
        self.modify(&id, |dashboard| dashboard.widgets = records.to_vec())
    }

    /// Keep `library` updated from every settle of `controller`.
    pub fn follow<S, P>(library: &Rc<RefCell<Self>>, controller: &mut ReconciliationController<S, P>)
    where
        S: SpatialSurface,
        P: PersistenceAdapter,
    {
        let library = Rc::clone(library);
        controller.on_layout_settled(move |records| {
            library.borrow_mut().record_settle(records);
        });
    }

    fn modify(&mut self, id: &DashboardId, f: impl FnOnce(&mut Dashboard)) -> bool {
        let Some(index) = self.dashboards.iter().position(|d| &d.id == id) else {
            return false;
        };
        let generation = self.bump();
        let dashboard = &mut self.dashboards[index];
        f(dashboard);
        dashboard.updated_generation = generation;
        true
    }

    fn bump(&mut self) -> u64 {
        self.generation = self.generation.saturating_add(1);
        self.generation
    }

    fn next_dashboard_id(&mut self) -> DashboardId {
        loop {
            self.next_id = self.next_id.saturating_add(1);
            let id = DashboardId(format!("d{}", self.next_id));
            if self.get(&id).is_none() {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use gridboard_layout::{ContentDescriptor, WidgetGeometry};
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(id: &str) -> WidgetRecord {
        WidgetRecord::new(
            id,
            "Sales",
            WidgetGeometry::new(0, 0, 4, 3),
            ContentDescriptor::chart("line"),
        )
    }

    #[test]
    fn create_activates_and_stamps() {
        let mut library = DashboardLibrary::new();
        let first = library.create("Ops");
        let second = library.create("Sales");
        assert_eq!(first.as_str(), "d1");
        assert_eq!(library.active_id(), Some(&second));
        let dashboard = library.get(&second).unwrap();
        assert_eq!(dashboard.created_generation, 2);
        assert_eq!(dashboard.updated_generation, 2);
    }

    #[test]
    fn record_settle_updates_only_active() {
        let mut library = DashboardLibrary::new();
        let ops = library.create("Ops");
        let sales = library.create("Sales");
        assert!(library.record_settle(&[record("w1")]));
        assert_eq!(library.get(&sales).unwrap().widgets.len(), 1);
        assert!(library.get(&ops).unwrap().widgets.is_empty());
        assert_eq!(library.get(&sales).unwrap().updated_generation, 3);

        library.set_active(None);
        assert!(!library.record_settle(&[]));
    }

    #[test]
    fn delete_active_clears_selection() {
        let mut library = DashboardLibrary::new();
        let id = library.create("Ops");
        let removed = library.delete(&id).unwrap();
        assert_eq!(removed.name, "Ops");
        assert!(library.active().is_none());
        assert!(library.delete(&id).is_none());
        assert!(library.is_empty());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut library = DashboardLibrary::new();
        let id = library.create("Ops");
        let before = library.generation();
        let ghost = DashboardId::from("d9");
        assert!(!library.set_active(Some(&ghost)));
        assert!(!library.rename(&ghost, "x"));
        assert_eq!(library.active_id(), Some(&id));
        assert_eq!(library.generation(), before);
    }

    #[test]
    fn rename_and_describe() {
        let mut library = DashboardLibrary::new();
        let id = library.create("Ops");
        assert!(library.rename(&id, "Operations"));
        assert!(library.set_description(&id, Some("Pager view".into())));
        let dashboard = library.get(&id).unwrap();
        assert_eq!(dashboard.name, "Operations");
        assert_eq!(dashboard.description.as_deref(), Some("Pager view"));
        assert_eq!(dashboard.updated_generation, 3);
        assert_eq!(dashboard.created_generation, 1);
    }
}
