#![forbid(unsafe_code)]

//! Layout primitives for Gridboard.
//!
//! Grid-cell geometry, widget records, the canonical [`WidgetRegistry`],
//! the persisted [`LayoutSnapshot`] schema, the pointer gesture machine,
//! and the [`SpatialSurface`] seam with its in-memory [`GridSurface`]
//! engine. Nothing here knows about rendering or persistence backends.

pub mod geometry;
pub mod gesture;
pub mod registry;
pub mod snapshot;
pub mod surface;
pub mod widget;

pub use geometry::{
    DEFAULT_CONTAINER_WIDTH_PX, DEFAULT_GRID_COLUMNS, DEFAULT_MARGIN_PX, DEFAULT_ROW_HEIGHT_PX,
    GridSpec, PixelBox, WidgetGeometry, first_free_slot,
};
pub use gesture::{
    DEFAULT_DRAG_THRESHOLD_PX, GestureEffect, GestureError, GestureKind, GestureMachine,
    GestureState, GestureTransition, PointerPosition, ResizeHandle,
};
pub use registry::{
    AddOutcome, ChangeOrigin, RegistryChange, RegistryNotification, RemoveOutcome, UpdateOutcome,
    WidgetRegistry, merge_order,
};
pub use snapshot::{
    LAYOUT_SCHEMA_VERSION, LayoutSnapshot, SanitizeNote, SnapshotError, SnapshotMigrationError,
    SnapshotValidationError, migrate_layout,
};
pub use surface::{
    GesturePhase, GridSurface, SpatialSurface, SurfaceError, SurfaceEvent, SurfaceNode,
};
pub use widget::{ContentDescriptor, PatchEffect, WidgetId, WidgetPatch, WidgetRecord};
