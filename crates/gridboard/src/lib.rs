#![forbid(unsafe_code)]

//! Gridboard public facade crate.
//!
//! Re-exports the layout primitives and the reconciliation runtime, adds a
//! [`DashboardLibrary`] of saved layouts, and offers a prelude for
//! day-to-day usage.
//!
//! ```
//! use gridboard::prelude::*;
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
//! let (dashboard, outcome) =
//!     gridboard::open(ControllerConfig::default(), renderers, MemoryStorage::new()).unwrap();
//! assert_eq!(outcome, RestoreOutcome::Defaults);
//! assert_eq!(dashboard.registry().len(), 3);
//! ```

pub mod library;

// --- Layout re-exports -----------------------------------------------------

pub use gridboard_layout::{
    ContentDescriptor, GestureKind, GridSpec, GridSurface, LayoutSnapshot, PixelBox,
    PointerPosition, ResizeHandle, SpatialSurface, SurfaceEvent, SurfaceNode, WidgetGeometry,
    WidgetId, WidgetPatch, WidgetRecord, WidgetRegistry,
};

// --- Runtime re-exports ----------------------------------------------------

pub use gridboard_runtime::{
    ContentRenderer, ContentView, ControllerConfig, ControllerError, ControllerStats, FileStorage,
    FlushOutcome, MemoryStorage, MountTarget, PersistenceAdapter, ReconciliationController,
    RendererRegistry, RestoreOutcome, Result, SyncState,
};

pub use library::{Dashboard, DashboardId, DashboardLibrary};

/// A controller over the in-memory grid surface.
pub type GridDashboard<P = MemoryStorage> = ReconciliationController<GridSurface, P>;

/// Build a dashboard from `config`, seed it from `storage`, and run it to
/// its first settle.
pub fn open<P: PersistenceAdapter>(
    config: ControllerConfig,
    renderers: RendererRegistry,
    storage: P,
) -> Result<(GridDashboard<P>, RestoreOutcome)> {
    let mut dashboard = GridDashboard::<P>::with_grid_surface(config, renderers, storage)?;
    let outcome = dashboard.restore_from_storage()?;
    dashboard.pump();
    Ok((dashboard, outcome))
}

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ContentDescriptor, ContentRenderer, ContentView, ControllerConfig, DashboardLibrary,
        FlushOutcome, GestureKind, GridDashboard, MemoryStorage, MountTarget, PixelBox,
        PointerPosition, RendererRegistry, ResizeHandle, RestoreOutcome, Result, SpatialSurface,
        WidgetGeometry, WidgetId, WidgetRecord,
    };

    pub use crate::{layout, runtime};
}

pub use gridboard_layout as layout;
pub use gridboard_runtime as runtime;
