#![forbid(unsafe_code)]

//! Spatial layout surface: the imperative engine that owns live nodes.
//!
//! [`SpatialSurface`] is the seam the reconciliation controller drives.
//! Mutations return immediately but are *confirmed* through the event
//! queue ([`SurfaceEvent::NodeAdded`] and friends), the same way an
//! embedded layout engine reports back through callbacks.
//!
//! [`GridSurface`] is the in-memory engine: a node list on a
//! [`GridSpec`], collision push-down on commit, vertical compaction, and a
//! pointer driver built on [`GestureMachine`].

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{GridSpec, PixelBox, WidgetGeometry};
use crate::gesture::{
    GestureEffect, GestureError, GestureKind, GestureMachine, GestureTransition, PointerPosition,
};
use crate::widget::WidgetId;

/// A live node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceNode {
    pub id: WidgetId,
    pub geometry: WidgetGeometry,
}

/// Whether a geometry report is mid-gesture or the final commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GesturePhase {
    Live,
    Commit,
}

/// Events reported by a surface, drained in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SurfaceEvent {
    NodeAdded {
        id: WidgetId,
        geometry: WidgetGeometry,
    },
    NodeRemoved {
        id: WidgetId,
    },
    NodeUpdated {
        id: WidgetId,
        geometry: WidgetGeometry,
    },
    GeometryChanged {
        id: WidgetId,
        geometry: WidgetGeometry,
        gesture: GestureKind,
        phase: GesturePhase,
    },
    DragEnd {
        id: WidgetId,
    },
    ResizeEnd {
        id: WidgetId,
    },
    OrderChanged {
        ids: Vec<WidgetId>,
    },
}

impl SurfaceEvent {
    /// The widget this event concerns; `None` for order changes.
    #[must_use]
    pub fn id(&self) -> Option<&WidgetId> {
        match self {
            Self::NodeAdded { id, .. }
            | Self::NodeRemoved { id }
            | Self::NodeUpdated { id, .. }
            | Self::GeometryChanged { id, .. }
            | Self::DragEnd { id }
            | Self::ResizeEnd { id } => Some(id),
            Self::OrderChanged { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    DuplicateNode {
        id: WidgetId,
    },
    UnknownNode {
        id: WidgetId,
    },
    InvalidGeometry {
        id: WidgetId,
        geometry: WidgetGeometry,
    },
    GestureInProgress {
        active: WidgetId,
    },
    Gesture(GestureError),
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNode { id } => write!(f, "surface already has a node for {id}"),
            Self::UnknownNode { id } => write!(f, "surface has no node for {id}"),
            Self::InvalidGeometry { id, geometry } => {
                write!(f, "invalid geometry {geometry} for node {id}")
            }
            Self::GestureInProgress { active } => {
                write!(f, "a gesture on {active} is already in progress")
            }
            Self::Gesture(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SurfaceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::Gesture(error) = self {
            return Some(error);
        }
        None
    }
}

impl From<GestureError> for SurfaceError {
    fn from(err: GestureError) -> Self {
        Self::Gesture(err)
    }
}

/// The imperative layout engine driven by the reconciliation controller.
pub trait SpatialSurface {
    /// Create a node. Confirmed by [`SurfaceEvent::NodeAdded`].
    fn add_node(
        &mut self,
        id: &WidgetId,
        geometry: WidgetGeometry,
    ) -> Result<SurfaceNode, SurfaceError>;

    /// Remove a node. Confirmed by [`SurfaceEvent::NodeRemoved`].
    fn remove_node(&mut self, id: &WidgetId) -> Result<(), SurfaceError>;

    /// Move/resize a node. Confirmed by [`SurfaceEvent::NodeUpdated`].
    fn update_node(
        &mut self,
        id: &WidgetId,
        geometry: WidgetGeometry,
    ) -> Result<SurfaceNode, SurfaceError>;

    /// Run the settle/compaction pass. Returns whether node order changed.
    fn compact(&mut self) -> bool;

    /// Live nodes in surface order.
    fn nodes(&self) -> Vec<SurfaceNode>;

    fn node(&self, id: &WidgetId) -> Option<SurfaceNode>;

    fn grid(&self) -> &GridSpec;

    /// Pixel box of a live node.
    fn pixel_box(&self, id: &WidgetId) -> Option<PixelBox> {
        self.node(id).map(|node| self.grid().pixel_box(node.geometry))
    }

    /// Take queued events, oldest first.
    fn drain_events(&mut self) -> Vec<SurfaceEvent>;

    /// A pointer is held on a node, whether or not it has moved far enough
    /// to report geometry yet.
    fn is_interacting(&self) -> bool {
        false
    }
}

/// In-memory grid engine.
#[derive(Debug, Clone)]
pub struct GridSurface {
    grid: GridSpec,
    nodes: Vec<SurfaceNode>,
    events: VecDeque<SurfaceEvent>,
    gesture: GestureMachine,
    /// Node most recently dropped by a gesture; it keeps its cell when
    /// overlaps are resolved.
    anchor: Option<WidgetId>,
}

impl Default for GridSurface {
    fn default() -> Self {
        Self::new(GridSpec::default())
    }
}

impl GridSurface {
    #[must_use]
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            nodes: Vec::new(),
            events: VecDeque::new(),
            gesture: GestureMachine::default(),
            anchor: None,
        }
    }

    /// Engine with a custom drag threshold in pixels.
    pub fn with_threshold(grid: GridSpec, threshold_px: u16) -> Result<Self, SurfaceError> {
        Ok(Self {
            gesture: GestureMachine::new(threshold_px)?,
            ..Self::new(grid)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn gesture(&self) -> &GestureMachine {
        &self.gesture
    }

    // ---- Pointer driver ----

    pub fn pointer_down(
        &mut self,
        id: &WidgetId,
        kind: GestureKind,
        pointer_id: u32,
        position: PointerPosition,
    ) -> Result<GestureTransition, SurfaceError> {
        if let Some(active) = self.gesture.state().target() {
            return Err(SurfaceError::GestureInProgress {
                active: active.clone(),
            });
        }
        let geometry = self
            .index_of(id)
            .map(|index| self.nodes[index].geometry)
            .ok_or_else(|| SurfaceError::UnknownNode { id: id.clone() })?;
        Ok(self
            .gesture
            .pointer_down(id, kind, pointer_id, position, geometry))
    }

    /// Every accepted move reports the live geometry.
    pub fn pointer_move(&mut self, pointer_id: u32, position: PointerPosition) -> GestureTransition {
        let transition = self.gesture.pointer_move(pointer_id, position, &self.grid);
        if let GestureEffect::Started {
            target,
            kind,
            geometry,
        }
        | GestureEffect::Updated {
            target,
            kind,
            geometry,
        } = &transition.effect
        {
            self.set_geometry(target, *geometry);
            self.events.push_back(SurfaceEvent::GeometryChanged {
                id: target.clone(),
                geometry: *geometry,
                gesture: *kind,
                phase: GesturePhase::Live,
            });
        }
        transition
    }

    pub fn pointer_up(&mut self, pointer_id: u32, position: PointerPosition) -> GestureTransition {
        let transition = self.gesture.pointer_up(pointer_id, position, &self.grid);
        if let GestureEffect::Committed {
            target,
            kind,
            geometry,
            ..
        } = &transition.effect
        {
            self.set_geometry(target, *geometry);
            self.anchor = Some(target.clone());
            self.resolve_collisions();
            self.finish_gesture(target, *kind, *geometry);
        }
        transition
    }

    /// Abort the gesture and put the node back where it started.
    pub fn pointer_cancel(&mut self) -> Option<GestureTransition> {
        let transition = self.gesture.cancel()?;
        if let GestureEffect::Canceled {
            target,
            kind,
            origin_geometry,
            was_active: true,
        } = &transition.effect
        {
            self.set_geometry(target, *origin_geometry);
            self.finish_gesture(target, *kind, *origin_geometry);
        }
        Some(transition)
    }

    // ---- Host hooks ----

    /// Queue an engine event as if the engine had reported it.
    pub fn inject_event(&mut self, event: SurfaceEvent) {
        self.events.push_back(event);
    }

    /// Drop a node without reporting it, as an engine losing a node would.
    pub fn forget_node(&mut self, id: &WidgetId) -> bool {
        match self.index_of(id) {
            Some(index) => {
                self.nodes.remove(index);
                true
            }
            None => false,
        }
    }

    /// Insert a node nobody asked for and report it.
    pub fn adopt_foreign_node(&mut self, id: &WidgetId, geometry: WidgetGeometry) -> bool {
        if self.index_of(id).is_some() {
            return false;
        }
        let geometry = geometry.clamp_to_columns(self.grid.columns);
        self.nodes.push(SurfaceNode {
            id: id.clone(),
            geometry,
        });
        self.events.push_back(SurfaceEvent::NodeAdded {
            id: id.clone(),
            geometry,
        });
        true
    }

    // ---- Internals ----

    fn index_of(&self, id: &WidgetId) -> Option<usize> {
        self.nodes.iter().position(|node| &node.id == id)
    }

    fn set_geometry(&mut self, id: &WidgetId, geometry: WidgetGeometry) {
        if let Some(index) = self.index_of(id) {
            self.nodes[index].geometry = geometry;
        }
    }

    fn finish_gesture(&mut self, id: &WidgetId, kind: GestureKind, geometry: WidgetGeometry) {
        self.events.push_back(SurfaceEvent::GeometryChanged {
            id: id.clone(),
            geometry,
            gesture: kind,
            phase: GesturePhase::Commit,
        });
        self.events.push_back(match kind {
            GestureKind::Drag => SurfaceEvent::DragEnd { id: id.clone() },
            GestureKind::Resize(_) => SurfaceEvent::ResizeEnd { id: id.clone() },
        });
    }

    /// Push every overlapping node below whatever it collides with. The
    /// anchor is placed first and never moves.
    fn resolve_collisions(&mut self) {
        let mut pending: Vec<usize> = (0..self.nodes.len()).collect();
        pending.sort_by_key(|&index| {
            let node = &self.nodes[index];
            let anchored = self.anchor.as_ref() == Some(&node.id);
            (!anchored, node.geometry.y, node.geometry.x)
        });
        let mut placed: Vec<WidgetGeometry> = Vec::with_capacity(pending.len());
        for index in pending {
            let mut geometry = self.nodes[index].geometry;
            let last_row = u32::from(u16::MAX - geometry.height);
            while let Some(bottom) = placed
                .iter()
                .filter(|other| other.intersects(&geometry))
                .map(WidgetGeometry::bottom)
                .max()
            {
                // Out of rows: leave the overlap rather than spin.
                if bottom > last_row || bottom <= u32::from(geometry.y) {
                    break;
                }
                geometry.y = u16::try_from(bottom).unwrap_or(u16::MAX);
            }
            self.nodes[index].geometry = geometry;
            placed.push(geometry);
        }
    }

    /// Vertical gravity in `(y, x)` order.
    fn apply_gravity(&mut self) {
        self.nodes
            .sort_by_key(|node| (node.geometry.y, node.geometry.x));
        let mut placed: Vec<WidgetGeometry> = Vec::with_capacity(self.nodes.len());
        for node in &mut self.nodes {
            let mut geometry = node.geometry;
            while geometry.y > 0 {
                let probe = geometry.with_position(geometry.x, geometry.y - 1);
                if placed.iter().any(|other| other.intersects(&probe)) {
                    break;
                }
                geometry = probe;
            }
            node.geometry = geometry;
            placed.push(geometry);
        }
        self.nodes
            .sort_by_key(|node| (node.geometry.y, node.geometry.x));
    }
}

impl SpatialSurface for GridSurface {
    fn add_node(
        &mut self,
        id: &WidgetId,
        geometry: WidgetGeometry,
    ) -> Result<SurfaceNode, SurfaceError> {
        if self.index_of(id).is_some() {
            return Err(SurfaceError::DuplicateNode { id: id.clone() });
        }
        if geometry.is_empty() {
            return Err(SurfaceError::InvalidGeometry {
                id: id.clone(),
                geometry,
            });
        }
        let node = SurfaceNode {
            id: id.clone(),
            geometry: geometry.clamp_to_columns(self.grid.columns),
        };
        self.nodes.push(node.clone());
        self.events.push_back(SurfaceEvent::NodeAdded {
            id: id.clone(),
            geometry: node.geometry,
        });
        Ok(node)
    }

    fn remove_node(&mut self, id: &WidgetId) -> Result<(), SurfaceError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| SurfaceError::UnknownNode { id: id.clone() })?;
        if self.gesture.state().target() == Some(id) {
            let _ = self.gesture.cancel();
        }
        if self.anchor.as_ref() == Some(id) {
            self.anchor = None;
        }
        self.nodes.remove(index);
        self.events
            .push_back(SurfaceEvent::NodeRemoved { id: id.clone() });
        Ok(())
    }

    fn update_node(
        &mut self,
        id: &WidgetId,
        geometry: WidgetGeometry,
    ) -> Result<SurfaceNode, SurfaceError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| SurfaceError::UnknownNode { id: id.clone() })?;
        if geometry.is_empty() {
            return Err(SurfaceError::InvalidGeometry {
                id: id.clone(),
                geometry,
            });
        }
        let geometry = geometry.clamp_to_columns(self.grid.columns);
        self.nodes[index].geometry = geometry;
        self.events.push_back(SurfaceEvent::NodeUpdated {
            id: id.clone(),
            geometry,
        });
        Ok(self.nodes[index].clone())
    }

    fn compact(&mut self) -> bool {
        let before: Vec<WidgetId> = self.nodes.iter().map(|node| node.id.clone()).collect();
        self.resolve_collisions();
        self.apply_gravity();
        let after: Vec<WidgetId> = self.nodes.iter().map(|node| node.id.clone()).collect();
        if before == after {
            return false;
        }
        self.events
            .push_back(SurfaceEvent::OrderChanged { ids: after });
        true
    }

    fn nodes(&self) -> Vec<SurfaceNode> {
        self.nodes.clone()
    }

    fn node(&self, id: &WidgetId) -> Option<SurfaceNode> {
        self.index_of(id).map(|index| self.nodes[index].clone())
    }

    fn grid(&self) -> &GridSpec {
        &self.grid
    }

    fn drain_events(&mut self) -> Vec<SurfaceEvent> {
        self.events.drain(..).collect()
    }

    fn is_interacting(&self) -> bool {
        self.gesture.is_engaged()
    }
}
