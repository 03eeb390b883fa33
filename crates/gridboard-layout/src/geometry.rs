#![forbid(unsafe_code)]

//! Grid-cell geometry and the grid spec that maps cells to pixels.
//!
//! Every surface instance uses one coordinate system: whole grid cells.
//! Pixel boxes are derived from a [`GridSpec`] and only ever handed to
//! renderers; records never store pixels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default number of grid columns.
pub const DEFAULT_GRID_COLUMNS: u16 = 12;

/// Default row height in pixels.
pub const DEFAULT_ROW_HEIGHT_PX: u32 = 80;

/// Default container width in pixels.
pub const DEFAULT_CONTAINER_WIDTH_PX: u32 = 1200;

/// Default inner margin in pixels applied on every side of a cell box.
pub const DEFAULT_MARGIN_PX: u32 = 8;

/// Placement of a widget in grid cells.
///
/// Serialized as `{x, y, w, h}`; `width`/`height` are accepted on input
/// and missing fields default to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetGeometry {
    pub x: u16,
    pub y: u16,
    #[serde(rename = "w", alias = "width")]
    pub width: u16,
    #[serde(rename = "h", alias = "height")]
    pub height: u16,
}

impl WidgetGeometry {
    #[must_use]
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A geometry of the given size anchored at the origin.
    #[must_use]
    pub const fn sized(width: u16, height: u16) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive right edge.
    #[must_use]
    pub const fn right(&self) -> u32 {
        self.x as u32 + self.width as u32
    }

    /// Exclusive bottom edge.
    #[must_use]
    pub const fn bottom(&self) -> u32 {
        self.y as u32 + self.height as u32
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the two boxes share at least one cell.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        u32::from(self.x) < other.right()
            && u32::from(other.x) < self.right()
            && u32::from(self.y) < other.bottom()
            && u32::from(other.y) < self.bottom()
    }

    #[must_use]
    pub const fn with_position(mut self, x: u16, y: u16) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    #[must_use]
    pub const fn with_size(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Clamp into a grid with `columns` columns: sizes are at least one
    /// cell, width never exceeds the column count, and the box is shifted
    /// left until it fits. It is shifted up until its bottom edge is
    /// addressable as a `u16` row.
    #[must_use]
    pub fn clamp_to_columns(self, columns: u16) -> Self {
        let columns = columns.max(1);
        let width = self.width.clamp(1, columns);
        let height = self.height.max(1);
        let x = self.x.min(columns - width);
        let y = self.y.min(u16::MAX - height);
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl fmt::Display for WidgetGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) {}x{}",
            self.x, self.y, self.width, self.height
        )
    }
}

/// A pixel-space box handed to renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelBox {
    #[must_use]
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Whether the two boxes have identical dimensions (position ignored).
    #[must_use]
    pub const fn same_size(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Grid configuration for one surface instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    /// Number of columns.
    pub columns: u16,
    /// Height of one row in pixels.
    pub row_height_px: u32,
    /// Width of the container the grid is laid out in.
    pub container_width_px: u32,
    /// Inner margin applied on every side of a widget box.
    pub margin_px: u32,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            columns: DEFAULT_GRID_COLUMNS,
            row_height_px: DEFAULT_ROW_HEIGHT_PX,
            container_width_px: DEFAULT_CONTAINER_WIDTH_PX,
            margin_px: DEFAULT_MARGIN_PX,
        }
    }
}

impl GridSpec {
    /// Width of one column in pixels (at least one pixel).
    #[must_use]
    pub fn column_width_px(&self) -> u32 {
        (self.container_width_px / u32::from(self.columns.max(1))).max(1)
    }

    /// Pixel box for a cell geometry, inset by the margin.
    #[must_use]
    pub fn pixel_box(&self, geometry: WidgetGeometry) -> PixelBox {
        let column = self.column_width_px();
        let row = self.row_height_px.max(1);
        let inset = self.margin_px.saturating_mul(2);
        PixelBox {
            left: u32::from(geometry.x) * column + self.margin_px,
            top: u32::from(geometry.y) * row + self.margin_px,
            width: (u32::from(geometry.width) * column).saturating_sub(inset),
            height: (u32::from(geometry.height) * row).saturating_sub(inset),
        }
    }

    /// Convert a pixel delta into a whole-cell delta, rounding to nearest.
    #[must_use]
    pub fn cells_for_delta(&self, delta_x: i32, delta_y: i32) -> (i32, i32) {
        let column = f64::from(self.column_width_px());
        let row = f64::from(self.row_height_px.max(1));
        (
            round_f64_to_i32(f64::from(delta_x) / column),
            round_f64_to_i32(f64::from(delta_y) / row),
        )
    }

    /// Structural problems with this spec; empty when valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.columns == 0 {
            errors.push("grid.columns must be > 0".to_string());
        }
        if self.row_height_px == 0 {
            errors.push("grid.row_height_px must be > 0".to_string());
        }
        if self.container_width_px < u32::from(self.columns) {
            errors.push(format!(
                "grid.container_width_px ({}) must be at least grid.columns ({})",
                self.container_width_px, self.columns
            ));
        }
        if u64::from(self.margin_px) * 2 >= u64::from(self.row_height_px.max(1)) {
            errors.push(format!(
                "grid.margin_px ({}) leaves no room inside a {}px row",
                self.margin_px, self.row_height_px
            ));
        }
        errors
    }
}

/// First non-overlapping slot for a `width`×`height` box, scanning rows
/// top to bottom and columns left to right.
#[must_use]
pub fn first_free_slot(
    occupied: &[WidgetGeometry],
    width: u16,
    height: u16,
    columns: u16,
) -> WidgetGeometry {
    let candidate = WidgetGeometry::sized(width, height).clamp_to_columns(columns);
    let max_x = columns.max(1) - candidate.width;
    let mut y: u16 = 0;
    loop {
        for x in 0..=max_x {
            let probe = candidate.with_position(x, y);
            if !occupied.iter().any(|g| g.intersects(&probe)) {
                return probe;
            }
        }
        // Below every occupied box the row is always free.
        if u32::from(y) > occupied.iter().map(WidgetGeometry::bottom).max().unwrap_or(0)
            || u32::from(y) + u32::from(candidate.height) >= u32::from(u16::MAX)
        {
            return candidate.with_position(0, y).clamp_to_columns(columns);
        }
        y = y.saturating_add(1);
    }
}

fn round_f64_to_i32(value: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    if value >= f64::from(i32::MAX) {
        return i32::MAX;
    }
    if value <= f64::from(i32::MIN) {
        return i32::MIN;
    }
    value.round() as i32
}
