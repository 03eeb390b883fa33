//! Shared harness for controller integration tests.
//!
//! Wraps [`GridSurface`] in a surface that records every mutation call, and
//! installs a renderer factory that records every content call, so tests can
//! assert exact call counts.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use gridboard_layout::{
    ContentDescriptor, GestureKind, GridSpec, GridSurface, PixelBox, PointerPosition,
    SpatialSurface, SurfaceError, SurfaceEvent, SurfaceNode, WidgetGeometry, WidgetId,
};
use gridboard_runtime::{
    ContentRenderer, ContentView, ControllerConfig, MemoryStorage, MountTarget,
    ReconciliationController, RendererRegistry,
};

// ── Call logs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCall {
    /// Renderer instance created for the widget.
    Mount(WidgetId),
    Render(WidgetId, String),
    Reflow(WidgetId, PixelBox),
    Dispose(WidgetId),
}

impl ContentCall {
    pub fn id(&self) -> &WidgetId {
        match self {
            Self::Mount(id) | Self::Render(id, _) | Self::Reflow(id, _) | Self::Dispose(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Add(WidgetId),
    Remove(WidgetId),
    Update(WidgetId, WidgetGeometry),
    Compact,
}

pub type Log<T> = Rc<RefCell<Vec<T>>>;

// ── Recording renderer ──────────────────────────────────────────────────

struct RecordingRenderer {
    id: WidgetId,
    log: Log<ContentCall>,
}

impl ContentRenderer for RecordingRenderer {
    fn render(&mut self, view: ContentView<'_>) {
        self.log
            .borrow_mut()
            .push(ContentCall::Render(self.id.clone(), view.title.to_owned()));
    }

    fn reflow(&mut self, bounds: PixelBox) {
        self.log
            .borrow_mut()
            .push(ContentCall::Reflow(self.id.clone(), bounds));
    }

    fn dispose(&mut self) {
        self.log
            .borrow_mut()
            .push(ContentCall::Dispose(self.id.clone()));
    }
}

pub fn recording_renderers(log: &Log<ContentCall>) -> RendererRegistry {
    let log = Rc::clone(log);
    RendererRegistry::with_fallback(move |id: &WidgetId, _: &MountTarget| {
        log.borrow_mut().push(ContentCall::Mount(id.clone()));
        Box::new(RecordingRenderer {
            id: id.clone(),
            log: Rc::clone(&log),
        }) as Box<dyn ContentRenderer>
    })
}

// ── Recording surface ───────────────────────────────────────────────────

/// A [`GridSurface`] that logs mutation calls. Pointer input goes through
/// `inner`.
#[derive(Debug)]
pub struct RecordingSurface {
    pub inner: GridSurface,
    pub calls: Log<SurfaceCall>,
}

impl SpatialSurface for RecordingSurface {
    fn add_node(
        &mut self,
        id: &WidgetId,
        geometry: WidgetGeometry,
    ) -> Result<SurfaceNode, SurfaceError> {
        self.calls.borrow_mut().push(SurfaceCall::Add(id.clone()));
        self.inner.add_node(id, geometry)
    }

    fn remove_node(&mut self, id: &WidgetId) -> Result<(), SurfaceError> {
        self.calls.borrow_mut().push(SurfaceCall::Remove(id.clone()));
        self.inner.remove_node(id)
    }

    fn update_node(
        &mut self,
        id: &WidgetId,
        geometry: WidgetGeometry,
    ) -> Result<SurfaceNode, SurfaceError> {
        self.calls
            .borrow_mut()
            .push(SurfaceCall::Update(id.clone(), geometry));
        self.inner.update_node(id, geometry)
    }

    fn compact(&mut self) -> bool {
        self.calls.borrow_mut().push(SurfaceCall::Compact);
        self.inner.compact()
    }

    fn nodes(&self) -> Vec<SurfaceNode> {
        self.inner.nodes()
    }

    fn node(&self, id: &WidgetId) -> Option<SurfaceNode> {
        self.inner.node(id)
    }

    fn grid(&self) -> &GridSpec {
        self.inner.grid()
    }

    fn drain_events(&mut self) -> Vec<SurfaceEvent> {
        self.inner.drain_events()
    }

    fn is_interacting(&self) -> bool {
        self.inner.is_interacting()
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

pub type Controller = ReconciliationController<RecordingSurface, MemoryStorage>;

pub struct Harness {
    pub controller: Controller,
    pub content: Log<ContentCall>,
    pub surface_calls: Log<SurfaceCall>,
    pub storage: MemoryStorage,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(ControllerConfig::default(), MemoryStorage::new())
    }

    pub fn with_storage(config: ControllerConfig, storage: MemoryStorage) -> Self {
        let content = Log::default();
        let surface_calls = Log::default();
        let surface = RecordingSurface {
            inner: config.build_surface().expect("valid config"),
            calls: Rc::clone(&surface_calls),
        };
        let controller = Controller::new(
            config,
            surface,
            recording_renderers(&content),
            storage.clone(),
        )
        .expect("controller");
        Self {
            controller,
            content,
            surface_calls,
            storage,
        }
    }

    pub fn add(&mut self, title: &str) -> WidgetId {
        self.controller
            .add_widget(title, ContentDescriptor::chart("line"))
    }

    pub fn add_at(&mut self, title: &str, geometry: WidgetGeometry) -> WidgetId {
        self.controller
            .add_widget_at(title, ContentDescriptor::chart("line"), geometry)
    }

    /// Pump, flush persistence, and forget earlier calls.
    pub fn settle_and_reset_logs(&mut self) {
        self.controller.pump();
        self.controller.flush_persistence();
        self.content.borrow_mut().clear();
        self.surface_calls.borrow_mut().clear();
    }

    pub fn surface(&mut self) -> &mut GridSurface {
        &mut self.controller.surface_mut().inner
    }

    pub fn press(&mut self, id: &WidgetId, kind: GestureKind, x: i32, y: i32) {
        self.surface()
            .pointer_down(id, kind, 1, PointerPosition::new(x, y))
            .expect("pointer down");
    }

    pub fn move_to(&mut self, x: i32, y: i32) {
        self.surface().pointer_move(1, PointerPosition::new(x, y));
    }

    pub fn release(&mut self, x: i32, y: i32) {
        self.surface().pointer_up(1, PointerPosition::new(x, y));
    }

    pub fn content_calls(&self, pred: impl Fn(&ContentCall) -> bool) -> usize {
        self.content.borrow().iter().filter(|call| pred(call)).count()
    }

    pub fn mounts_of(&self, id: &WidgetId) -> usize {
        self.content_calls(|call| matches!(call, ContentCall::Mount(m) if m == id))
    }

    pub fn reflows_of(&self, id: &WidgetId) -> usize {
        self.content_calls(|call| matches!(call, ContentCall::Reflow(r, _) if r == id))
    }

    pub fn disposes_of(&self, id: &WidgetId) -> usize {
        self.content_calls(|call| matches!(call, ContentCall::Dispose(d) if d == id))
    }

    pub fn surface_adds(&self) -> usize {
        self.surface_calls
            .borrow()
            .iter()
            .filter(|call| matches!(call, SurfaceCall::Add(_)))
            .count()
    }

    /// Ids the registry holds and ids with a live surface node, each sorted.
    pub fn id_sets(&self) -> (Vec<WidgetId>, Vec<WidgetId>) {
        let mut registry: Vec<WidgetId> = self.controller.registry().ids().to_vec();
        let mut surface: Vec<WidgetId> = self
            .controller
            .surface()
            .nodes()
            .into_iter()
            .map(|node| node.id)
            .collect();
        registry.sort();
        surface.sort();
        (registry, surface)
    }
}
