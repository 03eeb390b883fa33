#![forbid(unsafe_code)]

//! Pointer drag/resize lifecycle and the pointer-to-cell projection.
//!
//! All pointer math lives here. A surface feeds pointer samples into a
//! [`GestureMachine`], and the machine reports the projected cell geometry
//! through [`GestureEffect`]s. Nothing else in the workspace converts
//! pixels to cells.
//!
//! ```text
//! Idle -> Armed -> Active -> Idle
//!    \------> Idle (release/cancel from Armed)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{GridSpec, WidgetGeometry};
use crate::widget::WidgetId;

/// Default minimum pointer travel (px) before a press becomes a gesture.
pub const DEFAULT_DRAG_THRESHOLD_PX: u16 = 2;

/// Pointer position in container pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PointerPosition {
    pub x: i32,
    pub y: i32,
}

impl PointerPosition {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Corner grabbed for a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeHandle {
    SouthEast,
    SouthWest,
    NorthEast,
    NorthWest,
}

impl ResizeHandle {
    const fn moves_left_edge(self) -> bool {
        matches!(self, Self::SouthWest | Self::NorthWest)
    }

    const fn moves_top_edge(self) -> bool {
        matches!(self, Self::NorthEast | Self::NorthWest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "handle", rename_all = "snake_case")]
pub enum GestureKind {
    Drag,
    Resize(ResizeHandle),
}

impl GestureKind {
    #[must_use]
    pub const fn is_resize(&self) -> bool {
        matches!(self, Self::Resize(_))
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GestureState {
    Idle,
    Armed {
        target: WidgetId,
        kind: GestureKind,
        pointer_id: u32,
        origin: PointerPosition,
        origin_geometry: WidgetGeometry,
    },
    Active {
        target: WidgetId,
        kind: GestureKind,
        pointer_id: u32,
        origin: PointerPosition,
        origin_geometry: WidgetGeometry,
        geometry: WidgetGeometry,
    },
}

impl GestureState {
    /// Widget the gesture is bound to, if any.
    #[must_use]
    pub fn target(&self) -> Option<&WidgetId> {
        match self {
            Self::Idle => None,
            Self::Armed { target, .. } | Self::Active { target, .. } => Some(target),
        }
    }
}

/// Why an input was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureNoopReason {
    IdleWithoutActiveGesture,
    GestureAlreadyActive,
    PointerMismatch,
    ThresholdNotReached,
}

/// Effect of one lifecycle step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum GestureEffect {
    Armed {
        target: WidgetId,
        kind: GestureKind,
    },
    Started {
        target: WidgetId,
        kind: GestureKind,
        geometry: WidgetGeometry,
    },
    Updated {
        target: WidgetId,
        kind: GestureKind,
        geometry: WidgetGeometry,
    },
    Committed {
        target: WidgetId,
        kind: GestureKind,
        origin_geometry: WidgetGeometry,
        geometry: WidgetGeometry,
    },
    /// Pointer released before the threshold; nothing moved.
    Released {
        target: WidgetId,
        kind: GestureKind,
    },
    Canceled {
        target: WidgetId,
        kind: GestureKind,
        origin_geometry: WidgetGeometry,
        /// Whether the gesture had started moving the node.
        was_active: bool,
    },
    Noop {
        reason: GestureNoopReason,
    },
}

/// One machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureTransition {
    pub transition_id: u64,
    pub effect: GestureEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureError {
    InvalidThreshold { threshold: u16 },
}

impl fmt::Display for GestureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidThreshold { threshold } => {
                write!(f, "drag threshold must be > 0 (got {threshold})")
            }
        }
    }
}

impl std::error::Error for GestureError {}

/// Deterministic drag/resize lifecycle machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureMachine {
    state: GestureState,
    threshold_px: u16,
    transition_counter: u64,
}

impl Default for GestureMachine {
    fn default() -> Self {
        Self {
            state: GestureState::Idle,
            threshold_px: DEFAULT_DRAG_THRESHOLD_PX,
            transition_counter: 0,
        }
    }
}

impl GestureMachine {
    pub fn new(threshold_px: u16) -> Result<Self, GestureError> {
        if threshold_px == 0 {
            return Err(GestureError::InvalidThreshold {
                threshold: threshold_px,
            });
        }
        Ok(Self {
            threshold_px,
            ..Self::default()
        })
    }

    #[must_use]
    pub const fn state(&self) -> &GestureState {
        &self.state
    }

    #[must_use]
    pub const fn threshold_px(&self) -> u16 {
        self.threshold_px
    }

    /// Armed or Active.
    #[must_use]
    pub const fn is_engaged(&self) -> bool {
        !matches!(self.state, GestureState::Idle)
    }

    pub fn pointer_down(
        &mut self,
        target: &WidgetId,
        kind: GestureKind,
        pointer_id: u32,
        position: PointerPosition,
        origin_geometry: WidgetGeometry,
    ) -> GestureTransition {
        if self.is_engaged() {
            return self.noop(GestureNoopReason::GestureAlreadyActive);
        }
        self.state = GestureState::Armed {
            target: target.clone(),
            kind,
            pointer_id,
            origin: position,
            origin_geometry,
        };
        self.emit(GestureEffect::Armed {
            target: target.clone(),
            kind,
        })
    }

    pub fn pointer_move(
        &mut self,
        pointer_id: u32,
        position: PointerPosition,
        grid: &GridSpec,
    ) -> GestureTransition {
        match &self.state {
            GestureState::Idle => self.noop(GestureNoopReason::IdleWithoutActiveGesture),
            GestureState::Armed {
                pointer_id: active, ..
            }
            | GestureState::Active {
                pointer_id: active, ..
            } if *active != pointer_id => self.noop(GestureNoopReason::PointerMismatch),
            GestureState::Armed {
                target,
                kind,
                pointer_id,
                origin,
                origin_geometry,
            } => {
                if !crossed_threshold(*origin, position, self.threshold_px) {
                    return self.noop(GestureNoopReason::ThresholdNotReached);
                }
                let (target, kind, pointer_id, origin, origin_geometry) =
                    (target.clone(), *kind, *pointer_id, *origin, *origin_geometry);
                let (dx, dy) = delta(origin, position);
                let geometry = project(origin_geometry, kind, dx, dy, grid);
                self.state = GestureState::Active {
                    target: target.clone(),
                    kind,
                    pointer_id,
                    origin,
                    origin_geometry,
                    geometry,
                };
                self.emit(GestureEffect::Started {
                    target,
                    kind,
                    geometry,
                })
            }
            GestureState::Active {
                target,
                kind,
                origin,
                origin_geometry,
                ..
            } => {
                let (target, kind) = (target.clone(), *kind);
                let (dx, dy) = delta(*origin, position);
                let next = project(*origin_geometry, kind, dx, dy, grid);
                if let GestureState::Active { geometry, .. } = &mut self.state {
                    *geometry = next;
                }
                self.emit(GestureEffect::Updated {
                    target,
                    kind,
                    geometry: next,
                })
            }
        }
    }

    pub fn pointer_up(
        &mut self,
        pointer_id: u32,
        position: PointerPosition,
        grid: &GridSpec,
    ) -> GestureTransition {
        match &self.state {
            GestureState::Idle => self.noop(GestureNoopReason::IdleWithoutActiveGesture),
            GestureState::Armed {
                pointer_id: active, ..
            }
            | GestureState::Active {
                pointer_id: active, ..
            } if *active != pointer_id => self.noop(GestureNoopReason::PointerMismatch),
            GestureState::Armed { target, kind, .. } => {
                let effect = GestureEffect::Released {
                    target: target.clone(),
                    kind: *kind,
                };
                self.state = GestureState::Idle;
                self.emit(effect)
            }
            GestureState::Active {
                target,
                kind,
                origin,
                origin_geometry,
                ..
            } => {
                let (dx, dy) = delta(*origin, position);
                let effect = GestureEffect::Committed {
                    target: target.clone(),
                    kind: *kind,
                    origin_geometry: *origin_geometry,
                    geometry: project(*origin_geometry, *kind, dx, dy, grid),
                };
                self.state = GestureState::Idle;
                self.emit(effect)
            }
        }
    }

    /// Abort whatever is in progress. `None` when already idle.
    pub fn cancel(&mut self) -> Option<GestureTransition> {
        let effect = match std::mem::replace(&mut self.state, GestureState::Idle) {
            GestureState::Idle => return None,
            GestureState::Armed {
                target,
                kind,
                origin_geometry,
                ..
            } => GestureEffect::Canceled {
                target,
                kind,
                origin_geometry,
                was_active: false,
            },
            GestureState::Active {
                target,
                kind,
                origin_geometry,
                ..
            } => GestureEffect::Canceled {
                target,
                kind,
                origin_geometry,
                was_active: true,
            },
        };
        Some(self.emit(effect))
    }

    fn noop(&mut self, reason: GestureNoopReason) -> GestureTransition {
        self.emit(GestureEffect::Noop { reason })
    }

    fn emit(&mut self, effect: GestureEffect) -> GestureTransition {
        self.transition_counter = self.transition_counter.saturating_add(1);
        GestureTransition {
            transition_id: self.transition_counter,
            effect,
        }
    }
}

/// Cell geometry for `origin` after a pointer travel of `(dx, dy)` pixels.
///
/// Drags keep the size and clamp the box inside the columns and the last
/// addressable row. Resizes keep
/// the edges opposite the grabbed corner fixed and never shrink below one
/// cell.
#[must_use]
pub fn project(
    origin: WidgetGeometry,
    kind: GestureKind,
    dx: i32,
    dy: i32,
    grid: &GridSpec,
) -> WidgetGeometry {
    let origin = origin.clamp_to_columns(grid.columns);
    let columns = i64::from(grid.columns.max(1));
    let (cx, cy) = grid.cells_for_delta(dx, dy);
    let (cx, cy) = (i64::from(cx), i64::from(cy));
    let (x, y) = (i64::from(origin.x), i64::from(origin.y));
    let (w, h) = (i64::from(origin.width), i64::from(origin.height));
    let rows = i64::from(u16::MAX);

    match kind {
        GestureKind::Drag => WidgetGeometry::new(
            to_u16((x + cx).clamp(0, columns - w)),
            to_u16((y + cy).clamp(0, rows - h)),
            origin.width,
            origin.height,
        ),
        GestureKind::Resize(handle) => {
            let (new_x, new_w) = if handle.moves_left_edge() {
                let right = x + w;
                let left = (x + cx).clamp(0, right - 1);
                (left, right - left)
            } else {
                (x, (w + cx).clamp(1, (columns - x).max(1)))
            };
            let (new_y, new_h) = if handle.moves_top_edge() {
                let bottom = y + h;
                let top = (y + cy).clamp(0, bottom - 1);
                (top, bottom - top)
            } else {
                (y, (h + cy).clamp(1, (rows - y).max(1)))
            };
            WidgetGeometry::new(to_u16(new_x), to_u16(new_y), to_u16(new_w), to_u16(new_h))
        }
    }
}

fn to_u16(value: i64) -> u16 {
    u16::try_from(value.clamp(0, i64::from(u16::MAX))).unwrap_or(u16::MAX)
}

fn delta(origin: PointerPosition, current: PointerPosition) -> (i32, i32) {
    (
        current.x.saturating_sub(origin.x),
        current.y.saturating_sub(origin.y),
    )
}

fn crossed_threshold(origin: PointerPosition, current: PointerPosition, threshold: u16) -> bool {
    let (dx, dy) = delta(origin, current);
    let threshold = i64::from(threshold);
    let squared_distance = i64::from(dx) * i64::from(dx) + i64::from(dy) * i64::from(dy);
    squared_distance >= threshold * threshold
}
