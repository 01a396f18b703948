//! The view: frame orchestration and event routing for one widget tree.
//!
//! A [`View`] owns a [`WidgetTree`], a root widget sized to the view, and a
//! paint context obtained lazily from its [`PaintBackend`]. Each frame it
//! runs the same fixed sequence: a will-render pass over the full tree,
//! visibility resolution into a render list, repaint of dirty offscreen
//! caches, the onscreen pass with nested save/translate/scale/scissor
//! scopes, and a did-render pass over the full tree.
//!
//! Rendering and tree mutation are confined to one thread. Redraw requests
//! may come from any thread through the view's coalescer handle; the paint
//! itself always runs on the requesting thread that wins the busy flag.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::geometry::{Color, Point, Size};
use crate::paint::{PaintBackend, Painter};
use crate::redraw::RedrawCoalescer;
use crate::render_list::{self, RenderItem};
use crate::tree::{WidgetId, WidgetTree};
use crate::widget::{Event, EventResponse, Widget};

/// Unique identifier for a view, used for widget back-references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(u64);

impl ViewId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where the view stands in its rendering lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// No paint context yet; created lazily on the first frame.
    Uninitialized,
    /// Context exists, no frame in flight.
    ContextReady,
    /// Frame-start pass over the full tree.
    WillRender,
    /// Visibility and clipping resolved into the render list.
    ListPopulated,
    /// Dirty offscreen caches repainting.
    OffscreenPass,
    /// Visible widgets painting to the screen.
    OnscreenPass,
    /// Frame-end pass over the full tree.
    DidRender,
    /// Context torn down; the view no longer renders.
    Disposed,
}

/// Hook invoked at a fixed point of the view lifecycle.
pub type ViewCallback = Box<dyn FnMut()>;

/// The root of the widget tree. Carries no behavior of its own; its bounds
/// track the view and its opacity and background color are the view's.
struct RootWidget;

impl Widget for RootWidget {}

/// One render surface and the widget tree shown on it.
pub struct View<B: PaintBackend> {
    id: ViewId,
    backend: B,
    context: Option<B::Context>,
    tree: WidgetTree,
    root: WidgetId,
    size: Size,
    phase: FramePhase,
    coalescer: RedrawCoalescer,
    responder: Option<WidgetId>,
    on_context_created: Option<ViewCallback>,
    on_will_render: Option<ViewCallback>,
    on_did_render: Option<ViewCallback>,
}

impl<B: PaintBackend> View<B> {
    pub fn new(backend: B) -> Self {
        let id = ViewId::next();
        let mut tree = WidgetTree::new();
        let root = tree.insert(Box::new(RootWidget));
        tree.set_owning_view(root, Some(id));

        Self {
            id,
            backend,
            context: None,
            tree,
            root,
            size: Size::zero(),
            phase: FramePhase::Uninitialized,
            coalescer: RedrawCoalescer::new(),
            responder: None,
            on_context_created: None,
            on_will_render: None,
            on_did_render: None,
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn root(&self) -> WidgetId {
        self.root
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn tree(&self) -> &WidgetTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut WidgetTree {
        &mut self.tree
    }

    /// Insert a widget and attach it directly under the root.
    pub fn add_widget(&mut self, widget: Box<dyn Widget>) -> WidgetId {
        let id = self.tree.insert(widget);
        // A freshly inserted widget is unparented, so linking cannot fail.
        if let Err(error) = self.tree.add_child(self.root, id) {
            log::error!("failed to attach widget to root: {error}");
        }
        id
    }

    /// Resize the view. The root widget always covers the full view.
    pub fn set_bounds(&mut self, width: f32, height: f32) {
        self.size = Size::new(width, height);
        self.tree.set_bounds(self.root, 0.0, 0.0, width, height);
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// An opaque view clears to the root's background color; a transparent
    /// one clears to transparent so the surface below shows through.
    pub fn is_opaque(&self) -> bool {
        self.tree.is_opaque(self.root)
    }

    pub fn set_opaque(&mut self, opaque: bool) {
        self.tree.set_opaque(self.root, opaque);
    }

    pub fn set_background_color(&mut self, color: Color) {
        self.tree.set_background_color(self.root, color);
    }

    /// True while any widget in the tree holds an animation request.
    pub fn is_animating(&self) -> bool {
        self.tree.has_animating_widgets()
    }

    pub fn set_on_context_created(&mut self, callback: ViewCallback) {
        self.on_context_created = Some(callback);
    }

    pub fn set_on_will_render(&mut self, callback: ViewCallback) {
        self.on_will_render = Some(callback);
    }

    pub fn set_on_did_render(&mut self, callback: ViewCallback) {
        self.on_did_render = Some(callback);
    }

    // ---- rendering -------------------------------------------------------

    /// Request a frame. Safe to call from any thread holding a clone of the
    /// view's coalescer, and from widget code during dispatch; requests that
    /// land while a frame is in flight collapse into one follow-up frame.
    pub fn redraw(&mut self) {
        let coalescer = self.coalescer.clone();
        coalescer.redraw(|| self.render());
    }

    /// Clone-able handle other threads can use to schedule work through the
    /// same busy/pending flags this view's [`redraw`](View::redraw) uses.
    pub fn redraw_coalescer(&self) -> RedrawCoalescer {
        self.coalescer.clone()
    }

    /// Render one frame synchronously.
    pub fn render(&mut self) {
        if self.phase == FramePhase::Disposed {
            log::warn!("render requested on a disposed view");
            return;
        }
        if self.size.is_empty() {
            return;
        }

        if self.context.is_none() {
            self.context = Some(self.backend.create_context());
            log::debug!("paint context created for view {:?}", self.id);
            self.phase = FramePhase::ContextReady;
            if let Some(callback) = self.on_context_created.as_mut() {
                callback();
            }
        }

        if let Some(callback) = self.on_will_render.as_mut() {
            callback();
        }

        let pixel_ratio = self.backend.device_pixel_ratio();
        let Some(context) = self.context.as_mut() else {
            return;
        };
        let painter: &mut dyn Painter = context;

        // Surfaces orphaned by tree mutation since the last frame.
        for framebuffer in self.tree.drain_retired_framebuffers() {
            painter.delete_framebuffer(framebuffer);
        }

        // Every widget gets a chance to adjust itself before visibility is
        // resolved, whether or not it ends up in the frame.
        self.phase = FramePhase::WillRender;
        self.tree.notify_view_will_render(self.root, painter);

        self.phase = FramePhase::ListPopulated;
        let list = render_list::populate(&mut self.tree, self.root, self.size);

        // All offscreen repaints complete before the onscreen pass begins.
        self.phase = FramePhase::OffscreenPass;
        for item in &list {
            if self.tree.caches_rendering(item.widget) && self.tree.cache_is_dirty(item.widget) {
                self.tree.render_cache(item.widget, painter, pixel_ratio);
            }
        }

        self.phase = FramePhase::OnscreenPass;
        let clear_color = if self.tree.is_opaque(self.root) {
            self.tree.background_color(self.root)
        } else {
            Color::TRANSPARENT
        };
        painter.clear(clear_color);
        painter.begin_frame(self.size.width, self.size.height, pixel_ratio);
        Self::paint_list(&mut self.tree, &list, painter);
        painter.end_frame();

        self.phase = FramePhase::DidRender;
        self.tree.notify_view_did_render(self.root, painter);
        self.phase = FramePhase::ContextReady;

        if let Some(callback) = self.on_did_render.as_mut() {
            callback();
        }
    }

    /// Walk the render list in order, opening a transform/clip scope per
    /// item and closing scopes in LIFO order as the walk leaves a subtree.
    fn paint_list(tree: &mut WidgetTree, list: &[RenderItem], painter: &mut dyn Painter) {
        // Indices into `list` whose scopes are still open.
        let mut open_scopes: Vec<usize> = Vec::new();

        for (index, item) in list.iter().enumerate() {
            while let Some(&scope_index) = open_scopes.last() {
                if list[scope_index].level < item.level {
                    break;
                }
                open_scopes.pop();
                Self::finalize_scope(tree, list[scope_index].widget, painter);
            }

            painter.save();
            if item.origin != Point::ZERO {
                painter.translate(item.origin.x, item.origin.y);
            }
            if item.scale != 1.0 {
                painter.scale(item.scale);
            }
            painter.intersect_scissor(0.0, 0.0, item.size.width, item.size.height);

            if let Some(widget) = tree.widget_mut(item.widget) {
                widget.will_render(painter);
            }

            // Transform state the paint routine changes must not leak into
            // the children, so it runs in a scope of its own.
            painter.save();
            tree.render_on_demand(item.widget, painter, item.size);
            painter.restore();

            open_scopes.push(index);
        }

        while let Some(scope_index) = open_scopes.pop() {
            Self::finalize_scope(tree, list[scope_index].widget, painter);
        }
    }

    fn finalize_scope(tree: &mut WidgetTree, widget: WidgetId, painter: &mut dyn Painter) {
        if let Some(widget) = tree.widget_mut(widget) {
            widget.did_render(painter);
        }
        painter.restore();
    }

    /// Tear down the paint context. Widgets are notified first and every
    /// offscreen surface is released. The next [`render`](View::render)
    /// starts over with a fresh context.
    pub fn reset_context(&mut self) {
        if let Some(mut context) = self.context.take() {
            log::debug!("tearing down paint context for view {:?}", self.id);
            let painter: &mut dyn Painter = &mut context;
            self.tree.notify_context_will_change(painter);
            for framebuffer in self.tree.drain_retired_framebuffers() {
                painter.delete_framebuffer(framebuffer);
            }
            self.backend.destroy_context(context);
        }
        self.phase = FramePhase::Uninitialized;
    }

    /// Permanently stop rendering and release the paint context.
    pub fn dispose(&mut self) {
        if self.phase == FramePhase::Disposed {
            return;
        }
        self.reset_context();
        self.phase = FramePhase::Disposed;
    }

    // ---- event routing ----------------------------------------------------

    /// Find the widget that claims a point, in view coordinates. Descendants
    /// win over ancestors and later siblings (painted on top) win over
    /// earlier ones. The root widget itself never claims events.
    pub fn hit_test(&mut self, point: Point) -> Option<WidgetId> {
        let children: Vec<WidgetId> = self.tree.children(self.root).to_vec();
        for child in children.into_iter().rev() {
            if let Some(hit) = self.hit_test_subtree(child, point) {
                return Some(hit);
            }
        }
        None
    }

    fn hit_test_subtree(&mut self, widget: WidgetId, point: Point) -> Option<WidgetId> {
        if self.tree.is_hidden(widget) {
            return None;
        }
        let children: Vec<WidgetId> = self.tree.children(widget).to_vec();
        for child in children.into_iter().rev() {
            if let Some(hit) = self.hit_test_subtree(child, point) {
                return Some(hit);
            }
        }
        let bounds = self.tree.measured_bounds(widget);
        let claims = self
            .tree
            .widget(widget)
            .map(|candidate| candidate.should_handle_event(point, bounds))
            .unwrap_or(false);
        claims.then_some(widget)
    }

    /// Route an event. A pointer-down selects the responder by hit test;
    /// subsequent events go to the responder only. There is no bubbling: a
    /// responder that ignores an event drops it, and the interaction ends.
    /// A responder detached from this view is silently retired.
    pub fn dispatch_event(&mut self, event: &Event) {
        if let Event::PointerDown { x, y } = *event {
            self.responder = self.hit_test(Point::new(x, y));
        }

        let Some(responder) = self.responder else {
            return;
        };
        if self.tree.owning_view(responder) != Some(self.id) {
            self.responder = None;
            return;
        }

        let response = self
            .tree
            .widget_mut(responder)
            .map(|widget| widget.handle_event(event));
        if response != Some(EventResponse::Handled) {
            self.responder = None;
            return;
        }
        if matches!(event, Event::PointerUp { .. } | Event::PointerCancel) {
            self.responder = None;
        }
    }

    /// The widget currently receiving pointer events, if any.
    pub fn responder(&self) -> Option<WidgetId> {
        self.responder
    }
}

impl<B: PaintBackend> Drop for View<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}
