#![forbid(unsafe_code)]

//! Gridboard runtime.
//!
//! [`ReconciliationController`] keeps the widget registry and a
//! [`SpatialSurface`](gridboard_layout::SpatialSurface) consistent in both
//! directions, mounts content through a [`RendererRegistry`], throttles
//! reflows per animation frame, and persists settled layouts through a
//! [`PersistenceAdapter`].
//!
//! # Features
//!
//! - `config-toml`: load [`ControllerConfig`] from TOML.
//! - `tracing-json`: [`logging::init_json_logging`] installs a JSON
//!   subscriber on stderr.

pub mod config;
pub mod controller;
pub mod error;
#[cfg(feature = "tracing-json")]
pub mod logging;
pub mod mount;
pub mod persistence;
pub mod throttle;

pub use config::{ControllerConfig, DEFAULT_MAX_PUMP_ROUNDS, DEFAULT_STORAGE_KEY};
pub use controller::{
    ControllerStats, DEFAULT_WIDGET_TITLES, PumpReport, ReconciliationController, RestoreOutcome,
    SyncState,
};
pub use error::{ConfigError, ControllerError, MountError, PersistenceError, Result};
pub use mount::{
    ContentMountManager, ContentRenderer, ContentView, MountStats, MountTarget, RendererFactory,
    RendererRegistry,
};
pub use persistence::{
    FileStorage, FlushOutcome, MemoryStorage, PersistenceAdapter, PersistenceScheduler,
    PersistenceStatus,
};
pub use throttle::ReflowThrottle;
