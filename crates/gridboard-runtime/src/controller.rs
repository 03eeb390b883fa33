#![forbid(unsafe_code)]

//! Bidirectional reconciliation between the widget registry and a spatial
//! surface.
//!
//! # Per-widget lifecycle
//!
//! ```text
//! Absent -> PendingAdd -> Synced <-> Dragging|Resizing -> Synced
//!                           \-> PendingRemove -> Absent
//! ```
//!
//! The registry is truth for intended geometry and metadata; the surface is
//! truth for instantaneous geometry while a gesture is live. Registry
//! changes are tagged with their [`ChangeOrigin`], and only
//! `ChangeOrigin::Registry` changes are pushed to the surface, so write-backs
//! from the surface never echo back into it.
//!
//! # Driving the controller
//!
//! A host calls inbound operations (`add_widget`, `remove_widget`, ...),
//! then [`pump`](ReconciliationController::pump) to process surface events
//! and run a pending settle,
//! [`on_animation_frame`](ReconciliationController::on_animation_frame) once
//! per frame, and
//! [`flush_persistence`](ReconciliationController::flush_persistence) at the
//! end of its task.
//!
//! ```
//! use gridboard_layout::{ContentDescriptor, GridSurface};
//! use gridboard_runtime::{
//!     ContentRenderer, ContentView, ControllerConfig, MemoryStorage, MountTarget,
//!     ReconciliationController, RendererRegistry,
//! };
//! use gridboard_layout::{PixelBox, WidgetId};
//!
//! struct Blank;
//! impl ContentRenderer for Blank {
//!     fn render(&mut self, _: ContentView<'_>) {}
//!     fn reflow(&mut self, _: PixelBox) {}
//!     fn dispose(&mut self) {}
//! }
//!
//! let renderers = RendererRegistry::with_fallback(|_: &WidgetId, _: &MountTarget| {
//!     Box::new(Blank) as Box<dyn ContentRenderer>
//! });
//! let storage = MemoryStorage::new();
//! let mut controller = ReconciliationController::new(
//!     ControllerConfig::default(),
//!     GridSurface::default(),
//!     renderers,
//!     storage.clone(),
//! )
//! .unwrap();
//!
//! let id = controller.add_widget("Sales", ContentDescriptor::chart("line"));
//! controller.pump();
//! controller.flush_persistence();
//! assert_eq!(id.as_str(), "w1");
//! assert_eq!(storage.save_count(), 1);
//! ```

use std::fmt;

use gridboard_layout::{
    AddOutcome, ChangeOrigin, ContentDescriptor, GestureKind, GesturePhase, GridSurface,
    LayoutSnapshot,
    PatchEffect, RegistryChange, RemoveOutcome, SanitizeNote, SpatialSurface, SurfaceError,
    SurfaceEvent, UpdateOutcome, WidgetGeometry, WidgetId, WidgetPatch, WidgetRecord,
    WidgetRegistry, first_free_slot,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::config::ControllerConfig;
use crate::error::{ControllerError, MountError, Result};
use crate::mount::{ContentMountManager, ContentView, MountStats, MountTarget, RendererRegistry};
use crate::persistence::{
    FlushOutcome, PersistenceAdapter, PersistenceScheduler, PersistenceStatus,
};
use crate::throttle::ReflowThrottle;

/// Titles of the sample widgets created by `reset_to_defaults`.
pub const DEFAULT_WIDGET_TITLES: [&str; 3] = ["Sales", "Expenses", "Traffic"];

/// Reconciliation state of one widget id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Absent,
    /// `add_node` issued, confirmation outstanding.
    PendingAdd,
    Synced,
    Dragging,
    Resizing,
    /// Content unmounted and `remove_node` issued, confirmation outstanding.
    PendingRemove,
}

impl SyncState {
    /// Registry and surface both hold the widget.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Synced | Self::Dragging | Self::Resizing)
    }

    #[must_use]
    pub const fn is_gesture(self) -> bool {
        matches!(self, Self::Dragging | Self::Resizing)
    }
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub settles: u64,
    pub saves: u64,
    pub save_failures: u64,
    /// Adds for an id already registered, coalesced silently.
    pub duplicate_adds: u64,
    pub orphans_removed: u64,
    pub lost_recovered: u64,
    /// Reflows issued immediately at settle or programmatic update.
    pub immediate_reflows: u64,
    /// Reflows issued from the per-frame throttle.
    pub frame_reflows: u64,
}

/// What one [`ReconciliationController::pump`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub events: usize,
    pub settles: usize,
    /// The round limit was hit with work still queued.
    pub exhausted: bool,
}

/// How [`ReconciliationController::restore_from_storage`] seeded the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored {
        widgets: usize,
        notes: Vec<SanitizeNote>,
    },
    /// Nothing stored; sample widgets created.
    Defaults,
    /// Stored layout unreadable; sample widgets created.
    CorruptFallback,
}

type SettleListener = Box<dyn FnMut(&[WidgetRecord])>;

/// Keeps a [`WidgetRegistry`] and a [`SpatialSurface`] in sync and drives
/// content mounting and persistence from the result.
pub struct ReconciliationController<S: SpatialSurface, P: PersistenceAdapter> {
    config: ControllerConfig,
    registry: WidgetRegistry,
    surface: S,
    mounts: ContentMountManager,
    throttle: ReflowThrottle,
    scheduler: PersistenceScheduler,
    adapter: P,
    states: FxHashMap<WidgetId, SyncState>,
    /// Content refresh waiting for the surface to confirm an update.
    pending_refresh: FxHashMap<WidgetId, PatchEffect>,
    /// Ids removed and re-added before the removal was confirmed.
    readd_after_remove: FxHashSet<WidgetId>,
    ended_gestures: Vec<WidgetId>,
    settle_requested: bool,
    listeners: Vec<SettleListener>,
    stats: ControllerStats,
    next_id: u64,
}

impl<S: SpatialSurface, P: PersistenceAdapter> fmt::Debug for ReconciliationController<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationController")
            .field("widgets", &self.registry.len())
            .field("states", &self.states)
            .field("settle_requested", &self.settle_requested)
            .field("persistence", &self.scheduler.status())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<P: PersistenceAdapter> ReconciliationController<GridSurface, P> {
    /// Controller over a [`GridSurface`] built from `config`.
    pub fn with_grid_surface(
        config: ControllerConfig,
        renderers: RendererRegistry,
        adapter: P,
    ) -> Result<Self> {
        let surface = config
            .build_surface()
            .map_err(|e| ControllerError::InvalidConfig(vec![e.to_string()]))?;
        Self::new(config, surface, renderers, adapter)
    }
}

impl<S: SpatialSurface, P: PersistenceAdapter> ReconciliationController<S, P> {
    pub fn new(
        config: ControllerConfig,
        surface: S,
        renderers: RendererRegistry,
        adapter: P,
    ) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ControllerError::InvalidConfig(errors));
        }
        Ok(Self {
            config,
            registry: WidgetRegistry::new(),
            surface,
            mounts: ContentMountManager::new(renderers),
            throttle: ReflowThrottle::new(),
            scheduler: PersistenceScheduler::new(),
            adapter,
            states: FxHashMap::default(),
            pending_refresh: FxHashMap::default(),
            readd_after_remove: FxHashSet::default(),
            ended_gestures: Vec::new(),
            settle_requested: false,
            listeners: Vec::new(),
            stats: ControllerStats::default(),
            next_id: 0,
        })
    }

    // ---- Reads ----

    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &WidgetRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn surface(&self) -> &S {
        &self.surface
    }

    /// For feeding pointer input into the surface. Node mutations made
    /// here bypass reconciliation.
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    #[must_use]
    pub const fn mounts(&self) -> &ContentMountManager {
        &self.mounts
    }

    #[must_use]
    pub const fn mount_stats(&self) -> MountStats {
        self.mounts.stats()
    }

    #[must_use]
    pub const fn adapter(&self) -> &P {
        &self.adapter
    }

    #[must_use]
    pub const fn persistence(&self) -> &PersistenceScheduler {
        &self.scheduler
    }

    #[must_use]
    pub const fn persistence_status(&self) -> PersistenceStatus {
        self.scheduler.status()
    }

    #[must_use]
    pub const fn stats(&self) -> ControllerStats {
        self.stats
    }

    #[must_use]
    pub fn state_of(&self, id: &WidgetId) -> SyncState {
        self.states.get(id).copied().unwrap_or(SyncState::Absent)
    }

    /// Ordered copy of the registry.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WidgetRecord> {
        self.registry.snapshot()
    }

    /// A drag or resize is live (started and not yet ended), or a pointer
    /// is held on the surface.
    #[must_use]
    pub fn is_gesture_active(&self) -> bool {
        self.surface.is_interacting()
            || self
                .states
                .iter()
                .any(|(id, state)| state.is_gesture() && !self.ended_gestures.contains(id))
    }

    #[must_use]
    pub const fn is_settle_requested(&self) -> bool {
        self.settle_requested
    }

    /// Call `listener` with the full snapshot after every settle.
    pub fn on_layout_settled(&mut self, listener: impl FnMut(&[WidgetRecord]) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // ---- Inbound operations ----

    /// Add a widget at the first free slot with the default size.
    pub fn add_widget(&mut self, title: impl Into<String>, content: ContentDescriptor) -> WidgetId {
        let size = self.config.default_widget_size;
        let geometry = first_free_slot(
            &self.registry.geometries(),
            size.width,
            size.height,
            self.config.grid.columns,
        );
        self.add_widget_at(title, content, geometry)
    }

    pub fn add_widget_at(
        &mut self,
        title: impl Into<String>,
        content: ContentDescriptor,
        geometry: WidgetGeometry,
    ) -> WidgetId {
        let id = self.next_widget_id();
        let record = WidgetRecord::new(id.clone(), title, geometry, content);
        self.insert_widget(record);
        id
    }

    /// Add a fully formed record. An id that is already registered is
    /// coalesced: nothing changes and no node is created.
    pub fn insert_widget(&mut self, mut record: WidgetRecord) -> AddOutcome {
        record.geometry = self.clamp(record.geometry);
        let id = record.id.clone();
        let outcome = self.registry.add(record);
        if outcome == AddOutcome::Duplicate {
            self.stats.duplicate_adds += 1;
            debug!(widget_id = %id, state = ?self.state_of(&id), "duplicate add coalesced");
        }
        self.reconcile_registry();
        outcome
    }

    pub fn remove_widget(&mut self, id: &WidgetId) -> RemoveOutcome {
        let outcome = self.registry.remove(id);
        self.reconcile_registry();
        outcome
    }

    pub fn rename_widget(&mut self, id: &WidgetId, title: impl Into<String>) -> UpdateOutcome {
        self.update_widget(id, WidgetPatch::title(title))
    }

    /// Programmatic resize in cells; position is kept.
    pub fn resize_widget(&mut self, id: &WidgetId, width: u16, height: u16) -> UpdateOutcome {
        let Some(record) = self.registry.get(id) else {
            return UpdateOutcome::Missing;
        };
        let geometry = record.geometry.with_size(width, height);
        self.update_widget(id, WidgetPatch::geometry(geometry))
    }

    pub fn update_widget(&mut self, id: &WidgetId, mut patch: WidgetPatch) -> UpdateOutcome {
        patch.geometry = patch.geometry.map(|geometry| self.clamp(geometry));
        let outcome = self.registry.update(id, &patch);
        self.reconcile_registry();
        outcome
    }

    pub fn reorder_widgets(&mut self, ids: &[WidgetId]) -> bool {
        let changed = self.registry.reorder(ids);
        self.reconcile_registry();
        changed
    }

    /// Remove every widget.
    pub fn clear(&mut self) -> usize {
        let removed = self.registry.clear();
        self.reconcile_registry();
        removed
    }

    /// Replace the layout with `records`, diffing by id. Returns the
    /// repairs made to the input.
    pub fn load_snapshot(&mut self, records: Vec<WidgetRecord>) -> Vec<SanitizeNote> {
        let mut snapshot = LayoutSnapshot::new(records);
        let notes = snapshot.sanitize(self.config.grid.columns);
        for note in &notes {
            warn!(note = %note, "layout snapshot repaired on load");
        }

        let wanted: FxHashSet<&WidgetId> = snapshot.widgets.iter().map(|r| &r.id).collect();
        let stale: Vec<WidgetId> = self
            .registry
            .ids()
            .iter()
            .filter(|id| !wanted.contains(id))
            .cloned()
            .collect();
        for id in &stale {
            let _ = self.registry.remove(id);
        }
        for record in &snapshot.widgets {
            if self.registry.contains(&record.id) {
                let patch = WidgetPatch::title(record.title.clone())
                    .with_geometry(record.geometry)
                    .with_content(record.content.clone());
                let _ = self.registry.update(&record.id, &patch);
            } else {
                let _ = self.registry.add(record.clone());
            }
        }
        self.registry.reorder(&snapshot.ids());
        self.reconcile_registry();
        self.settle_requested = true;
        debug!(widgets = snapshot.widgets.len(), removed = stale.len(), "snapshot loaded");
        notes
    }

    /// Replace the layout with the sample widgets.
    pub fn reset_to_defaults(&mut self) {
        self.clear();
        for title in DEFAULT_WIDGET_TITLES {
            self.add_widget(title, ContentDescriptor::chart("line"));
        }
        self.settle_requested = true;
    }

    /// Settle now and save immediately.
    pub fn save_layout(&mut self) -> FlushOutcome {
        self.settle_requested = true;
        self.pump();
        self.flush_persistence()
    }

    /// Seed the layout from the adapter, falling back to the sample widgets
    /// when nothing is stored or the stored layout is unreadable.
    pub fn restore_from_storage(&mut self) -> Result<RestoreOutcome> {
        match self.adapter.load() {
            Ok(Some(snapshot)) => {
                let widgets = snapshot.widgets.len();
                let notes = self.load_snapshot(snapshot.widgets);
                info!(widgets, "layout restored from storage");
                Ok(RestoreOutcome::Restored { widgets, notes })
            }
            Ok(None) => {
                self.reset_to_defaults();
                Ok(RestoreOutcome::Defaults)
            }
            Err(error) if error.is_corrupt() => {
                warn!(error = %error, "stored layout unreadable; using defaults");
                self.reset_to_defaults();
                Ok(RestoreOutcome::CorruptFallback)
            }
            Err(error) => Err(error.into()),
        }
    }

    // ---- Host hooks ----

    /// Process surface events until quiet, then run at most one pending
    /// settle per quiet point. Settles wait while a gesture is live.
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        for _ in 0..self.config.max_pump_rounds {
            self.reconcile_registry();
            let events = self.surface.drain_events();
            if events.is_empty() {
                if self.settle_requested && !self.is_gesture_active() {
                    self.settle();
                    report.settles += 1;
                    continue;
                }
                return report;
            }
            report.events += events.len();
            for event in events {
                self.handle_event(event);
            }
        }
        report.exhausted = true;
        warn!(
            rounds = self.config.max_pump_rounds,
            "surface still busy after pump round limit"
        );
        report
    }

    /// Flush throttled reflows. Returns how many renderers reflowed.
    pub fn on_animation_frame(&mut self) -> usize {
        let mut reflowed = 0;
        for id in self.throttle.take_frame() {
            if self.state_of(&id).is_live() && self.resize_content(&id) {
                reflowed += 1;
            }
        }
        self.stats.frame_reflows += reflowed as u64;
        reflowed
    }

    /// Save the latest settled snapshot, if any. Deferred while a gesture is
    /// live.
    pub fn flush_persistence(&mut self) -> FlushOutcome {
        if self.is_gesture_active() {
            debug!("persistence flush deferred during gesture");
            return FlushOutcome::Deferred;
        }
        let outcome = self.scheduler.flush(&mut self.adapter);
        match &outcome {
            FlushOutcome::Saved { widgets } => {
                self.stats.saves += 1;
                info!(widgets = *widgets, "layout saved");
            }
            FlushOutcome::Failed { attempts, error } => {
                self.stats.save_failures += 1;
                warn!(attempts = *attempts, error = %error, "layout save failed; will retry at next settle");
            }
            FlushOutcome::NothingPending | FlushOutcome::Deferred => {}
        }
        outcome
    }

    // ---- Registry -> surface ----

    fn reconcile_registry(&mut self) {
        for notification in self.registry.drain_changes() {
            if notification.origin == ChangeOrigin::Surface {
                continue;
            }
            match notification.change {
                RegistryChange::Added { id } => self.on_registry_added(&id),
                RegistryChange::Removed { record } => self.on_registry_removed(&record.id),
                RegistryChange::Updated { id, effect } => self.on_registry_updated(&id, effect),
                RegistryChange::Reordered { .. } => self.settle_requested = true,
            }
        }
    }

    fn on_registry_added(&mut self, id: &WidgetId) {
        match self.state_of(id) {
            SyncState::Absent => self.start_add(id),
            SyncState::PendingRemove => {
                debug!(widget_id = %id, "re-add queued behind pending removal");
                self.readd_after_remove.insert(id.clone());
            }
            state => {
                self.stats.duplicate_adds += 1;
                debug!(widget_id = %id, state = ?state, "duplicate add coalesced");
            }
        }
    }

    fn on_registry_removed(&mut self, id: &WidgetId) {
        self.throttle.discard(id);
        self.pending_refresh.remove(id);
        self.readd_after_remove.remove(id);
        self.ended_gestures.retain(|ended| ended != id);
        match self.state_of(id) {
            SyncState::Absent | SyncState::PendingRemove => {}
            state => {
                self.mounts.unmount(id);
                self.states.insert(id.clone(), SyncState::PendingRemove);
                match self.surface.remove_node(id) {
                    Ok(()) => debug!(widget_id = %id, from = ?state, "node removal requested"),
                    Err(SurfaceError::UnknownNode { .. }) => {
                        self.states.remove(id);
                        debug!(widget_id = %id, "node already gone");
                    }
                    Err(error) => {
                        warn!(widget_id = %id, error = %error, "node removal failed");
                    }
                }
            }
        }
    }

    fn on_registry_updated(&mut self, id: &WidgetId, effect: PatchEffect) {
        match self.state_of(id) {
            SyncState::PendingAdd => {
                // The add confirmation mounts the latest record; only
                // geometry has to reach the surface now.
                if !effect.geometry_changed {
                    return;
                }
                let Some(geometry) = self.registry.get(id).map(|r| r.geometry) else {
                    return;
                };
                match self.surface.update_node(id, geometry) {
                    Ok(_) => debug!(
                        widget_id = %id,
                        geometry = %geometry,
                        "node update requested before add confirmation"
                    ),
                    Err(error) => warn!(widget_id = %id, error = %error, "node update failed"),
                }
            }
            SyncState::Synced => {
                if !effect.geometry_changed {
                    self.refresh_content(id, effect);
                    self.settle_requested = true;
                    return;
                }
                let Some(geometry) = self.registry.get(id).map(|r| r.geometry) else {
                    return;
                };
                match self.surface.update_node(id, geometry) {
                    Ok(_) => {
                        if effect.needs_remount() {
                            let entry = self.pending_refresh.entry(id.clone()).or_default();
                            entry.title_changed |= effect.title_changed;
                            entry.content_changed |= effect.content_changed;
                        }
                        debug!(widget_id = %id, geometry = %geometry, "node update requested");
                    }
                    Err(error) => {
                        warn!(widget_id = %id, error = %error, "node update failed");
                        self.refresh_content(id, effect);
                        self.settle_requested = true;
                    }
                }
            }
            SyncState::Dragging | SyncState::Resizing => {
                // Geometry is superseded by the settle write.
                self.refresh_content(id, effect);
            }
            SyncState::Absent | SyncState::PendingRemove => {}
        }
    }

    fn start_add(&mut self, id: &WidgetId) {
        let Some(geometry) = self.registry.get(id).map(|r| r.geometry) else {
            return;
        };
        self.states.insert(id.clone(), SyncState::PendingAdd);
        match self.surface.add_node(id, geometry) {
            Ok(_) => debug!(widget_id = %id, geometry = %geometry, "node add requested"),
            Err(SurfaceError::DuplicateNode { .. }) => {
                debug!(widget_id = %id, "surface already had node; adopting");
                self.states.insert(id.clone(), SyncState::Synced);
                self.mount_content(id);
                self.settle_requested = true;
            }
            Err(error) => {
                self.states.remove(id);
                warn!(widget_id = %id, error = %error, "node add failed");
            }
        }
    }

    // ---- Surface -> registry ----

    fn handle_event(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::NodeAdded { id, .. } => self.on_node_added(&id),
            SurfaceEvent::NodeRemoved { id } => self.on_node_removed(&id),
            SurfaceEvent::NodeUpdated { id, .. } => self.on_node_updated(&id),
            SurfaceEvent::GeometryChanged {
                id,
                geometry,
                gesture,
                phase,
            } => self.on_geometry_changed(&id, geometry, gesture, phase),
            SurfaceEvent::DragEnd { id } | SurfaceEvent::ResizeEnd { id } => {
                self.on_gesture_end(&id);
            }
            SurfaceEvent::OrderChanged { ids } => self.on_order_changed(&ids),
        }
    }

    fn on_node_added(&mut self, id: &WidgetId) {
        match self.state_of(id) {
            SyncState::PendingAdd => {
                self.states.insert(id.clone(), SyncState::Synced);
                self.mount_content(id);
                self.settle_requested = true;
                debug!(widget_id = %id, "node add confirmed");
            }
            SyncState::Absent if self.registry.contains(id) => {
                self.states.insert(id.clone(), SyncState::Synced);
                self.mount_content(id);
                self.settle_requested = true;
            }
            SyncState::Absent => self.remove_orphan(id),
            state => debug!(widget_id = %id, state = ?state, "stale add confirmation ignored"),
        }
    }

    fn on_node_removed(&mut self, id: &WidgetId) {
        match self.state_of(id) {
            SyncState::PendingRemove => {
                self.states.remove(id);
                self.settle_requested = true;
                debug!(widget_id = %id, "node removal confirmed");
                if self.readd_after_remove.remove(id) {
                    self.start_add(id);
                }
            }
            SyncState::Absent => {}
            _ => self.recover_lost(id),
        }
    }

    fn on_node_updated(&mut self, id: &WidgetId) {
        if !self.state_of(id).is_live() {
            return;
        }
        if let Some(effect) = self.pending_refresh.remove(id) {
            self.refresh_content(id, effect);
        }
        self.throttle.discard(id);
        if self.resize_content(id) {
            self.stats.immediate_reflows += 1;
        }
        self.settle_requested = true;
    }

    fn on_geometry_changed(
        &mut self,
        id: &WidgetId,
        geometry: WidgetGeometry,
        gesture: GestureKind,
        phase: GesturePhase,
    ) {
        let state = self.state_of(id);
        if !state.is_live() {
            debug!(widget_id = %id, state = ?state, "geometry report ignored");
            return;
        }
        let next = if gesture.is_resize() {
            SyncState::Resizing
        } else {
            SyncState::Dragging
        };
        if state != next {
            debug!(widget_id = %id, from = ?state, to = ?next, "gesture started");
            self.states.insert(id.clone(), next);
        }
        // A live report reopens a gesture whose end is still waiting for
        // the settle, as when a second drag starts before the next pump.
        if phase == GesturePhase::Live {
            self.ended_gestures.retain(|ended| ended != id);
        }
        let _ = self.registry.apply_surface_geometry(id, geometry);
        self.throttle.request(id);
    }

    fn on_gesture_end(&mut self, id: &WidgetId) {
        if self.state_of(id).is_gesture() && !self.ended_gestures.contains(id) {
            self.ended_gestures.push(id.clone());
        }
        self.settle_requested = true;
    }

    fn on_order_changed(&mut self, ids: &[WidgetId]) {
        if self.registry.apply_surface_order(ids) {
            self.settle_requested = true;
        }
        let missing: Vec<WidgetId> = self
            .registry
            .ids()
            .iter()
            .filter(|id| !ids.contains(id))
            .cloned()
            .collect();
        for id in missing {
            if self.state_of(&id).is_live() && self.surface.node(&id).is_none() {
                self.recover_lost(&id);
            }
        }
    }

    // ---- Settle ----

    fn settle(&mut self) {
        let started = Instant::now();
        self.settle_requested = false;
        let order_changed = self.config.compact_on_settle && self.surface.compact();
        let nodes = self.surface.nodes();

        for node in &nodes {
            if !self.registry.contains(&node.id)
                && self.state_of(&node.id) != SyncState::PendingRemove
            {
                self.remove_orphan(&node.id);
            }
        }

        let mut touched: Vec<WidgetId> = Vec::new();
        for node in &nodes {
            if self.state_of(&node.id).is_live()
                && let UpdateOutcome::Updated(_) =
                    self.registry.apply_surface_geometry(&node.id, node.geometry)
            {
                touched.push(node.id.clone());
            }
        }

        let live: FxHashSet<&WidgetId> = nodes.iter().map(|node| &node.id).collect();
        let lost: Vec<WidgetId> = self
            .registry
            .ids()
            .iter()
            .filter(|id| !live.contains(id))
            .filter(|id| matches!(self.state_of(id), SyncState::Absent) || self.state_of(id).is_live())
            .cloned()
            .collect();
        for id in &lost {
            self.recover_lost(id);
        }

        if order_changed {
            let order: Vec<WidgetId> = nodes.iter().map(|node| node.id.clone()).collect();
            self.registry.apply_surface_order(&order);
        }

        for id in std::mem::take(&mut self.ended_gestures) {
            if self.state_of(&id).is_gesture() {
                self.states.insert(id.clone(), SyncState::Synced);
                debug!(widget_id = %id, "gesture settled");
            }
            if !touched.contains(&id) {
                touched.push(id);
            }
        }

        for id in &touched {
            self.throttle.discard(id);
            if self.resize_content(id) {
                self.stats.immediate_reflows += 1;
            }
        }

        // Write-backs above are surface-origin; drain them.
        self.reconcile_registry();

        let snapshot = self.registry.snapshot();
        self.scheduler.schedule(snapshot.clone());
        for listener in &mut self.listeners {
            listener(&snapshot);
        }
        self.stats.settles += 1;
        info!(
            widgets = snapshot.len(),
            changed = touched.len(),
            recovered = lost.len(),
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "layout settled"
        );
    }

    // ---- Recovery ----

    fn remove_orphan(&mut self, id: &WidgetId) {
        match self.surface.remove_node(id) {
            Ok(()) | Err(SurfaceError::UnknownNode { .. }) => {
                self.stats.orphans_removed += 1;
                warn!(widget_id = %id, "orphan surface node removed");
            }
            Err(error) => warn!(widget_id = %id, error = %error, "orphan removal failed"),
        }
    }

    fn recover_lost(&mut self, id: &WidgetId) {
        let Some(geometry) = self.registry.get(id).map(|r| r.geometry) else {
            return;
        };
        self.mounts.unmount(id);
        self.throttle.discard(id);
        self.ended_gestures.retain(|ended| ended != id);
        self.states.remove(id);
        self.stats.lost_recovered += 1;
        warn!(widget_id = %id, geometry = %geometry, "lost surface node re-added at last known geometry");
        self.start_add(id);
    }

    // ---- Content ----

    fn mount_content(&mut self, id: &WidgetId) {
        let Some(record) = self.registry.get(id) else {
            return;
        };
        let (Some(node), Some(bounds)) = (self.surface.node(id), self.surface.pixel_box(id)) else {
            return;
        };
        let view = ContentView {
            title: &record.title,
            descriptor: &record.content,
        };
        match self.mounts.mount(id, view, &MountTarget { node, bounds }) {
            Ok(()) => {}
            Err(MountError::AlreadyMounted { .. }) => {
                let _ = self.mounts.remount(id, view);
            }
            Err(error) => warn!(widget_id = %id, error = %error, "content not mounted"),
        }
    }

    fn refresh_content(&mut self, id: &WidgetId, effect: PatchEffect) {
        if effect.content_changed {
            // A new descriptor may need a different renderer.
            self.mounts.unmount(id);
            self.mount_content(id);
        } else if effect.title_changed
            && let Some(record) = self.registry.get(id)
        {
            let view = ContentView {
                title: &record.title,
                descriptor: &record.content,
            };
            if let Err(error) = self.mounts.remount(id, view) {
                debug!(widget_id = %id, error = %error, "re-render skipped");
            }
        }
    }

    fn resize_content(&mut self, id: &WidgetId) -> bool {
        match self.surface.pixel_box(id) {
            Some(bounds) => self.mounts.resize(id, bounds),
            None => false,
        }
    }

    // ---- Helpers ----

    fn clamp(&self, geometry: WidgetGeometry) -> WidgetGeometry {
        geometry.clamp_to_columns(self.config.grid.columns)
    }

    fn next_widget_id(&mut self) -> WidgetId {
        loop {
            self.next_id = self.next_id.saturating_add(1);
            let id = WidgetId::sequential(self.next_id);
            if !self.registry.contains(&id) && !self.states.contains_key(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use gridboard_layout::{PixelBox, PointerPosition, ResizeHandle};

    use super::*;
    use crate::mount::ContentRenderer;
    use crate::persistence::MemoryStorage;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Probe {
        id: WidgetId,
        log: Log,
    }

    impl ContentRenderer for Probe {
        fn render(&mut self, view: ContentView<'_>) {
            self.log
                .borrow_mut()
                .push(format!("render {} {}", self.id, view.title));
        }

        fn reflow(&mut self, _: PixelBox) {
            self.log.borrow_mut().push(format!("reflow {}", self.id));
        }

        fn dispose(&mut self) {
            self.log.borrow_mut().push(format!("dispose {}", self.id));
        }
    }

    type Controller = ReconciliationController<GridSurface, MemoryStorage>;

    fn controller() -> (Controller, Log, MemoryStorage) {
        let log = Log::default();
        let factory_log = Rc::clone(&log);
        let renderers = RendererRegistry::with_fallback(move |id: &WidgetId, _: &MountTarget| {
            Box::new(Probe {
                id: id.clone(),
                log: Rc::clone(&factory_log),
            }) as Box<dyn ContentRenderer>
        });
        let storage = MemoryStorage::new();
        let controller =
            Controller::with_grid_surface(ControllerConfig::default(), renderers, storage.clone())
                .unwrap();
        (controller, log, storage)
    }

    fn count(log: &Log, prefix: &str) -> usize {
        log.borrow().iter().filter(|l| l.starts_with(prefix)).count()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ControllerConfig {
            max_pump_rounds: 0,
            ..ControllerConfig::default()
        };
        let err = Controller::with_grid_surface(config, RendererRegistry::new(), MemoryStorage::new())
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn add_confirms_mounts_and_settles() {
        let (mut controller, log, _) = controller();
        let id = controller.add_widget("Sales", ContentDescriptor::chart("line"));
        assert_eq!(controller.state_of(&id), SyncState::PendingAdd);
        let report = controller.pump();
        assert_eq!(report.settles, 1);
        assert_eq!(controller.state_of(&id), SyncState::Synced);
        assert_eq!(*log.borrow(), vec!["render w1 Sales".to_string()]);
        assert_eq!(controller.stats().settles, 1);
    }

    #[test]
    fn generated_ids_skip_existing() {
        let (mut controller, _, _) = controller();
        controller.insert_widget(WidgetRecord::new(
            "w1",
            "Loaded",
            WidgetGeometry::new(0, 0, 4, 3),
            ContentDescriptor::chart("line"),
        ));
        let id = controller.add_widget("Fresh", ContentDescriptor::chart("bar"));
        assert_eq!(id.as_str(), "w2");
        assert_eq!(
            controller.registry().get(&id).unwrap().geometry,
            WidgetGeometry::new(4, 0, 4, 3)
        );
    }

    #[test]
    fn rename_rerenders_without_surface_round_trip() {
        let (mut controller, log, _) = controller();
        let id = controller.add_widget("Sales", ContentDescriptor::chart("line"));
        controller.pump();
        controller.rename_widget(&id, "Revenue");
        assert_eq!(controller.surface().pending_events(), 0);
        assert_eq!(count(&log, "render w1 Revenue"), 1);
    }

    #[test]
    fn programmatic_resize_waits_for_confirmation() {
        let (mut controller, log, _) = controller();
        let id = controller.add_widget("Sales", ContentDescriptor::chart("line"));
        controller.pump();
        controller.update_widget(
            &id,
            WidgetPatch::title("Revenue").with_geometry(WidgetGeometry::new(0, 0, 6, 3)),
        );
        assert_eq!(count(&log, "render w1 Revenue"), 0);
        controller.pump();
        assert_eq!(count(&log, "render w1 Revenue"), 1);
        assert_eq!(count(&log, "reflow w1"), 1);
        assert_eq!(
            controller.surface().node(&id).unwrap().geometry,
            WidgetGeometry::new(0, 0, 6, 3)
        );
    }

    #[test]
    fn settle_waits_for_gesture_end() {
        let (mut controller, _, storage) = controller();
        let id = controller.add_widget("Sales", ContentDescriptor::chart("line"));
        controller.pump();
        controller.flush_persistence();
        let surface = controller.surface_mut();
        surface
            .pointer_down(
                &id,
                GestureKind::Resize(ResizeHandle::SouthEast),
                1,
                PointerPosition::new(390, 230),
            )
            .unwrap();
        surface.pointer_move(1, PointerPosition::new(590, 230));
        controller.pump();
        assert_eq!(controller.state_of(&id), SyncState::Resizing);
        assert!(controller.is_gesture_active());
        assert!(matches!(controller.flush_persistence(), FlushOutcome::Deferred));

        controller
            .surface_mut()
            .pointer_up(1, PointerPosition::new(590, 230));
        let report = controller.pump();
        assert_eq!(report.settles, 1);
        assert_eq!(controller.state_of(&id), SyncState::Synced);
        controller.flush_persistence();
        assert_eq!(storage.save_count(), 2);
        assert_eq!(
            storage.latest().unwrap()[0].geometry,
            WidgetGeometry::new(0, 0, 6, 3)
        );
    }

    #[test]
    fn held_pointer_below_threshold_defers_settle() {
        let (mut controller, _, storage) = controller();
        let id = controller.add_widget("Sales", ContentDescriptor::chart("line"));
        controller.pump();
        controller.flush_persistence();
        controller
            .surface_mut()
            .pointer_down(&id, GestureKind::Drag, 1, PointerPosition::new(50, 50))
            .unwrap();
        controller.rename_widget(&id, "Revenue");

        assert_eq!(controller.pump().settles, 0);
        assert_eq!(controller.state_of(&id), SyncState::Synced);
        assert!(controller.is_gesture_active());
        assert!(matches!(controller.flush_persistence(), FlushOutcome::Deferred));

        controller
            .surface_mut()
            .pointer_up(1, PointerPosition::new(50, 50));
        assert_eq!(controller.pump().settles, 1);
        controller.flush_persistence();
        assert_eq!(storage.save_count(), 2);
        assert_eq!(storage.latest().unwrap()[0].title, "Revenue");
    }

    #[test]
    fn remove_then_readd_before_confirmation() {
        let (mut controller, log, _) = controller();
        let record = WidgetRecord::new(
            "w7",
            "Sales",
            WidgetGeometry::new(0, 0, 4, 3),
            ContentDescriptor::chart("line"),
        );
        controller.insert_widget(record.clone());
        controller.pump();
        controller.remove_widget(&record.id);
        assert_eq!(controller.state_of(&record.id), SyncState::PendingRemove);
        controller.insert_widget(record.clone());
        controller.pump();
        assert_eq!(controller.state_of(&record.id), SyncState::Synced);
        assert_eq!(count(&log, "dispose w7"), 1);
        assert_eq!(count(&log, "render w7"), 2);
        assert_eq!(controller.surface().len(), 1);
    }

    #[test]
    fn listeners_fire_once_per_settle() {
        let (mut controller, _, _) = controller();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        controller.on_layout_settled(move |records| sink.borrow_mut().push(records.len()));
        controller.add_widget("Sales", ContentDescriptor::chart("line"));
        controller.add_widget("Expenses", ContentDescriptor::chart("line"));
        controller.pump();
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn reset_to_defaults_creates_sample_row() {
        let (mut controller, _, _) = controller();
        controller.add_widget("Old", ContentDescriptor::chart("line"));
        controller.pump();
        controller.reset_to_defaults();
        controller.pump();
        let titles: Vec<String> = controller.snapshot().into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["Sales", "Expenses", "Traffic"]);
        let geometries = controller.registry().geometries();
        assert_eq!(geometries[2], WidgetGeometry::new(8, 0, 4, 3));
        assert_eq!(controller.mounts().len(), 3);
    }

    #[test]
    fn save_layout_settles_and_saves() {
        let (mut controller, _, storage) = controller();
        controller.add_widget("Sales", ContentDescriptor::chart("line"));
        assert!(matches!(
            controller.save_layout(),
            FlushOutcome::Saved { widgets: 1 }
        ));
        assert_eq!(storage.save_count(), 1);
    }
}
