#![forbid(unsafe_code)]

//! Widget identity, records, and the opaque content descriptor.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::WidgetGeometry;

/// Opaque, stable widget identifier.
///
/// The join key between registry records and surface nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(String);

impl WidgetId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generated id of the form `w<n>`.
    #[must_use]
    pub fn sequential(n: u64) -> Self {
        Self(format!("w{n}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WidgetId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for WidgetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for WidgetId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Payload handed to a renderer.
///
/// `kind` selects a renderer (chart type); `payload` carries whatever the
/// renderer needs (dimension/metric keys, dataset, chart options). Layout
/// code stores and forwards descriptors without looking inside.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentDescriptor {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ContentDescriptor {
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// A descriptor with an empty payload.
    #[must_use]
    pub fn chart(kind: impl Into<String>) -> Self {
        Self::new(kind, serde_json::Value::Null)
    }
}

/// Canonical widget record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetRecord {
    pub id: WidgetId,
    pub title: String,
    pub geometry: WidgetGeometry,
    #[serde(default)]
    pub content: ContentDescriptor,
    /// Position in the registry ordering; renumbered densely on reorder.
    #[serde(default)]
    pub order: u32,
}

impl WidgetRecord {
    #[must_use]
    pub fn new(
        id: impl Into<WidgetId>,
        title: impl Into<String>,
        geometry: WidgetGeometry,
        content: ContentDescriptor,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            geometry,
            content,
            order: 0,
        }
    }
}

/// Partial update applied by [`crate::WidgetRegistry::update`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WidgetPatch {
    pub title: Option<String>,
    pub geometry: Option<WidgetGeometry>,
    pub content: Option<ContentDescriptor>,
}

impl WidgetPatch {
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn geometry(geometry: WidgetGeometry) -> Self {
        Self {
            geometry: Some(geometry),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn content(content: ContentDescriptor) -> Self {
        Self {
            content: Some(content),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_geometry(mut self, geometry: WidgetGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: ContentDescriptor) -> Self {
        self.content = Some(content);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.geometry.is_none() && self.content.is_none()
    }

    /// Apply to `record`, reporting which fields actually changed.
    pub fn apply(&self, record: &mut WidgetRecord) -> PatchEffect {
        let mut effect = PatchEffect::default();
        if let Some(title) = &self.title
            && *title != record.title
        {
            record.title.clone_from(title);
            effect.title_changed = true;
        }
        if let Some(geometry) = self.geometry
            && geometry != record.geometry
        {
            record.geometry = geometry;
            effect.geometry_changed = true;
        }
        if let Some(content) = &self.content
            && *content != record.content
        {
            record.content = content.clone();
            effect.content_changed = true;
        }
        effect
    }
}

/// Which fields a patch changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatchEffect {
    pub title_changed: bool,
    pub geometry_changed: bool,
    pub content_changed: bool,
}

impl PatchEffect {
    #[must_use]
    pub const fn any(&self) -> bool {
        self.title_changed || self.geometry_changed || self.content_changed
    }

    /// Whether mounted content must re-render.
    #[must_use]
    pub const fn needs_remount(&self) -> bool {
        self.title_changed || self.content_changed
    }
}
