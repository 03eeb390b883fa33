#![forbid(unsafe_code)]

//! Configuration for the reconciliation controller.
//!
//! Every tunable lives in one [`ControllerConfig`] that can be loaded from
//! TOML or JSON at startup.
//!
//! ```toml
//! # gridboard.toml
//! storage_key = "ops-dashboard"
//! drag_threshold_px = 4
//!
//! [grid]
//! columns = 12
//! row_height_px = 60
//!
//! [default_widget_size]
//! w = 6
//! h = 4
//! ```
//!
//! ```rust,ignore
//! let config = ControllerConfig::from_toml_file("gridboard.toml")?;
//! let config = ControllerConfig::from_json_str(json)?;
//! ```
//!
//! `ControllerConfig::default()` is always valid.

use std::path::Path;

use gridboard_layout::{DEFAULT_DRAG_THRESHOLD_PX, GridSpec, GridSurface, WidgetGeometry};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "gridstack-echarts-dashboard-v1";

/// Upper bound on event-processing rounds in one `pump`.
pub const DEFAULT_MAX_PUMP_ROUNDS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Grid the surface lays widgets out on.
    pub grid: GridSpec,
    /// Size given to widgets added without explicit geometry (only `w`/`h`
    /// are used).
    pub default_widget_size: WidgetGeometry,
    /// Pointer travel in pixels before a press turns into a gesture.
    pub drag_threshold_px: u16,
    /// Run vertical compaction at every settle.
    pub compact_on_settle: bool,
    /// Key the layout document is stored under; see
    /// [`FileStorage::from_config`](crate::FileStorage::from_config).
    pub storage_key: String,
    /// Bound on drain/process rounds per `pump`, so a misbehaving surface
    /// that keeps emitting events cannot spin forever.
    pub max_pump_rounds: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            grid: GridSpec::default(),
            default_widget_size: WidgetGeometry::sized(4, 3),
            drag_threshold_px: DEFAULT_DRAG_THRESHOLD_PX,
            compact_on_settle: true,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            max_pump_rounds: DEFAULT_MAX_PUMP_ROUNDS,
        }
    }
}

impl ControllerConfig {
    /// Load from a TOML string.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Validate all parameters. An empty list means the config is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.grid.validate();

        if self.default_widget_size.is_empty() {
            errors.push(format!(
                "default_widget_size must be at least 1x1, got {}x{}",
                self.default_widget_size.width, self.default_widget_size.height
            ));
        }
        if self.default_widget_size.width > self.grid.columns {
            errors.push(format!(
                "default_widget_size.w ({}) exceeds grid.columns ({})",
                self.default_widget_size.width, self.grid.columns
            ));
        }
        if self.drag_threshold_px == 0 {
            errors.push("drag_threshold_px must be > 0".into());
        }
        if self.storage_key.trim().is_empty() {
            errors.push("storage_key must not be empty".into());
        }
        if self.max_pump_rounds == 0 {
            errors.push("max_pump_rounds must be > 0".into());
        }

        errors
    }

    /// Validate, returning the config or every problem found.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// A [`GridSurface`] matching this config.
    pub fn build_surface(&self) -> Result<GridSurface, ConfigError> {
        GridSurface::with_threshold(self.grid, self.drag_threshold_px)
            .map_err(|e| ConfigError::Validation(vec![e.to_string()]))
    }
}
