#![forbid(unsafe_code)]

//! Content mounting: one independently-lifecycled renderer per widget.
//!
//! [`ContentMountManager`] is the only owner of renderer instances. It maps
//! widget ids to live [`ContentRenderer`]s created through a
//! [`RendererRegistry`] keyed by the descriptor `kind`, and guarantees each
//! instance is disposed exactly once.

use std::fmt;

use gridboard_layout::{ContentDescriptor, PixelBox, SurfaceNode, WidgetId};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::MountError;

/// What a renderer draws: the widget title plus its opaque descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentView<'a> {
    pub title: &'a str,
    pub descriptor: &'a ContentDescriptor,
}

/// The node a renderer is bound to and its current pixel box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTarget {
    pub node: SurfaceNode,
    pub bounds: PixelBox,
}

/// A live rendering instance.
pub trait ContentRenderer {
    /// Draw (or redraw in place) the view.
    fn render(&mut self, view: ContentView<'_>);

    /// Recompute internal layout for new pixel dimensions.
    fn reflow(&mut self, bounds: PixelBox);

    /// Release everything the instance registered. Called once.
    fn dispose(&mut self);
}

/// Builds renderer instances for one content kind.
pub trait RendererFactory {
    fn create(&self, id: &WidgetId, target: &MountTarget) -> Box<dyn ContentRenderer>;
}

impl<F> RendererFactory for F
where
    F: Fn(&WidgetId, &MountTarget) -> Box<dyn ContentRenderer>,
{
    fn create(&self, id: &WidgetId, target: &MountTarget) -> Box<dyn ContentRenderer> {
        self(id, target)
    }
}

/// Factories keyed by [`ContentDescriptor::kind`].
#[derive(Default)]
pub struct RendererRegistry {
    factories: FxHashMap<String, Box<dyn RendererFactory>>,
    fallback: Option<Box<dyn RendererFactory>>,
}

impl fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("RendererRegistry")
            .field("kinds", &kinds)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl RendererRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry where every kind goes to `factory`.
    #[must_use]
    pub fn with_fallback(factory: impl RendererFactory + 'static) -> Self {
        Self {
            factories: FxHashMap::default(),
            fallback: Some(Box::new(factory)),
        }
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, factory: impl RendererFactory + 'static) {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn set_fallback(&mut self, factory: impl RendererFactory + 'static) {
        self.fallback = Some(Box::new(factory));
    }

    #[must_use]
    pub fn supports(&self, kind: &str) -> bool {
        self.factories.contains_key(kind) || self.fallback.is_some()
    }

    fn factory_for(&self, kind: &str) -> Option<&dyn RendererFactory> {
        self.factories
            .get(kind)
            .or(self.fallback.as_ref())
            .map(|factory| &**factory)
    }
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountStats {
    pub mounts: u64,
    pub remounts: u64,
    pub unmounts: u64,
    pub reflows: u64,
    /// `resize` calls skipped because dimensions were unchanged.
    pub reflows_skipped: u64,
}

struct MountedContent {
    renderer: Box<dyn ContentRenderer>,
    last_bounds: PixelBox,
}

/// Owner of every mounted renderer.
pub struct ContentMountManager {
    renderers: RendererRegistry,
    mounted: FxHashMap<WidgetId, MountedContent>,
    stats: MountStats,
}

impl fmt::Debug for ContentMountManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentMountManager")
            .field("renderers", &self.renderers)
            .field("mounted", &self.mounted.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ContentMountManager {
    #[must_use]
    pub fn new(renderers: RendererRegistry) -> Self {
        Self {
            renderers,
            mounted: FxHashMap::default(),
            stats: MountStats::default(),
        }
    }

    #[must_use]
    pub fn is_mounted(&self, id: &WidgetId) -> bool {
        self.mounted.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mounted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mounted.is_empty()
    }

    /// Ids with mounted content, sorted.
    #[must_use]
    pub fn mounted_ids(&self) -> Vec<WidgetId> {
        let mut ids: Vec<WidgetId> = self.mounted.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub const fn stats(&self) -> MountStats {
        self.stats
    }

    /// Create and render an instance bound to `target`.
    pub fn mount(
        &mut self,
        id: &WidgetId,
        view: ContentView<'_>,
        target: &MountTarget,
    ) -> Result<(), MountError> {
        if self.mounted.contains_key(id) {
            return Err(MountError::AlreadyMounted { id: id.clone() });
        }
        let factory = self
            .renderers
            .factory_for(&view.descriptor.kind)
            .ok_or_else(|| MountError::NoRenderer {
                kind: view.descriptor.kind.clone(),
            })?;
        let mut renderer = factory.create(id, target);
        renderer.render(view);
        self.mounted.insert(
            id.clone(),
            MountedContent {
                renderer,
                last_bounds: target.bounds,
            },
        );
        self.stats.mounts += 1;
        debug!(widget_id = %id, kind = %view.descriptor.kind, "content mounted");
        Ok(())
    }

    /// Re-render in place; the instance is kept.
    pub fn remount(&mut self, id: &WidgetId, view: ContentView<'_>) -> Result<(), MountError> {
        let content = self
            .mounted
            .get_mut(id)
            .ok_or_else(|| MountError::NotMounted { id: id.clone() })?;
        content.renderer.render(view);
        self.stats.remounts += 1;
        debug!(widget_id = %id, "content re-rendered");
        Ok(())
    }

    /// Dispose the instance. `false` when nothing was mounted.
    pub fn unmount(&mut self, id: &WidgetId) -> bool {
        let Some(mut content) = self.mounted.remove(id) else {
            return false;
        };
        content.renderer.dispose();
        self.stats.unmounts += 1;
        debug!(widget_id = %id, "content unmounted");
        true
    }

    /// Reflow to `bounds` unless the dimensions are unchanged. Returns
    /// whether the renderer was asked to reflow.
    pub fn resize(&mut self, id: &WidgetId, bounds: PixelBox) -> bool {
        let Some(content) = self.mounted.get_mut(id) else {
            return false;
        };
        if content.last_bounds.same_size(&bounds) {
            content.last_bounds = bounds;
            self.stats.reflows_skipped += 1;
            return false;
        }
        content.renderer.reflow(bounds);
        content.last_bounds = bounds;
        self.stats.reflows += 1;
        true
    }

    /// Dispose every instance, returning how many were disposed.
    pub fn unmount_all(&mut self) -> usize {
        let ids = self.mounted_ids();
        ids.iter().filter(|id| self.unmount(id)).count()
    }
}

impl Drop for ContentMountManager {
    fn drop(&mut self) {
        for (_, mut content) in self.mounted.drain() {
            content.renderer.dispose();
        }
    }
}
