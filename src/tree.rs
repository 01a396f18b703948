//! Arena-based widget tree storage and attribute resolution.
//!
//! All widgets of a view live in one [`WidgetTree`]: a sparse-set arena with
//! generational indices, so a [`WidgetId`] held after its slot was reused is
//! detected as stale instead of aliasing a new widget. The tree owns the
//! boxed widget behaviors; parent/child links are ids, never references.
//!
//! The tree also owns every per-node attribute the renderer needs: geometry
//! as (unit, value) pairs with alignment anchors, the widget's own scale and
//! the cached measured scale, visibility and opacity flags, the optional
//! bound render function, and the optional offscreen cache.
//!
//! Tree mutation and attribute setters are confined to the view's rendering
//! thread; only cache invalidation (via [`crate::cache::CacheInvalidator`])
//! crosses threads.

use bitflags::bitflags;
use thiserror::Error;

use crate::cache::{CacheInvalidator, FrameCache};
use crate::geometry::{Color, Point, Rect, Size};
use crate::paint::{FramebufferId, Painter};
use crate::view::ViewId;
use crate::widget::Widget;

/// Unit for geometry values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Logical points.
    Point,
    /// Percent of the parent's resolved dimension (0-100).
    Percent,
}

/// Anchor for horizontal positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalAlignment {
    Left,
    Center,
    Right,
}

/// Anchor for vertical positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalAlignment {
    Top,
    Middle,
    Bottom,
}

/// A paint routine bound to a node, replacing the widget's `paint` method.
pub type RenderFn = Box<dyn FnMut(&mut dyn Painter, Size)>;

/// Structural tree-mutation misuse, reported to the caller.
///
/// Geometric exclusion (hidden, empty, fully clipped) is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("widget is not a child of the given parent")]
    NotAChild,
    #[error("widget has no parent")]
    NoParent,
    #[error("widget already has a parent")]
    AlreadyParented,
    #[error("linking would create a cycle")]
    WouldCycle,
    #[error("stale or unknown widget id")]
    StaleWidget,
}

bitflags! {
    /// Boolean attributes of a node.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct WidgetFlags: u8 {
        /// Skipped by the resolver, together with the whole subtree.
        const HIDDEN = 0b001;
        /// Background color is filled before painting.
        const OPAQUE = 0b010;
        /// Paint output is memoized in an offscreen surface.
        const CACHES_RENDERING = 0b100;
    }
}

/// Unique identifier for a widget in the tree.
///
/// Generational index: `index` addresses a sparse slot (reusable after
/// removal), `generation` increments on reuse so stale ids never resolve.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WidgetId {
    index: u32,
    generation: u32,
}

impl WidgetId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

struct SparseEntry {
    dense_index: usize,
    generation: u32,
}

#[derive(Clone, Copy)]
struct Dimension {
    unit: Unit,
    value: f32,
}

impl Dimension {
    const ZERO: Dimension = Dimension {
        unit: Unit::Point,
        value: 0.0,
    };
}

struct Node {
    widget: Box<dyn Widget>,
    parent: Option<WidgetId>,
    /// Z-order: last child paints topmost.
    children: Vec<WidgetId>,
    /// Owning view. Set only through the tree's crate-private linkage paths.
    view: Option<ViewId>,
    x_alignment: HorizontalAlignment,
    x: Dimension,
    y_alignment: VerticalAlignment,
    y: Dimension,
    width: Dimension,
    height: Dimension,
    /// Own render scale, strictly positive.
    scale: f32,
    /// Cached own scale times product of ancestor scales. `None` when stale.
    measured_scale: Option<f32>,
    flags: WidgetFlags,
    background_color: Color,
    /// Paint-time translation applied before the paint routine runs.
    rendering_offset: Point,
    /// Greater than zero while the widget is animating.
    animation_count: u32,
    render_fn: Option<RenderFn>,
    cache: Option<FrameCache>,
    /// Back-pointer into the sparse array, for swap-remove fixup.
    sparse_index: u32,
}

/// Central widget storage for one view.
pub struct WidgetTree {
    dense: Vec<Node>,
    sparse: Vec<Option<SparseEntry>>,
    free_indices: Vec<u32>,
    /// Generation to assign when a freed sparse slot is reused.
    next_generations: Vec<u32>,
    /// Framebuffers orphaned by node removal or cache opt-out, waiting for
    /// the view to delete them on the render thread.
    retired_framebuffers: Vec<FramebufferId>,
}

impl WidgetTree {
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            sparse: Vec::new(),
            free_indices: Vec::new(),
            next_generations: Vec::new(),
            retired_framebuffers: Vec::new(),
        }
    }

    /// Store a widget in the arena and return its id. The widget starts
    /// detached: link it with [`add_child`](WidgetTree::add_child).
    pub fn insert(&mut self, widget: Box<dyn Widget>) -> WidgetId {
        let (sparse_index, generation) = if let Some(index) = self.free_indices.pop() {
            let next_generation = self.next_generations[index as usize];
            (index, next_generation)
        } else {
            let index = self.sparse.len() as u32;
            self.sparse.push(None);
            self.next_generations.push(0);
            (index, 0)
        };

        let dense_index = self.dense.len();
        self.dense.push(Node {
            widget,
            parent: None,
            children: Vec::new(),
            view: None,
            x_alignment: HorizontalAlignment::Left,
            x: Dimension::ZERO,
            y_alignment: VerticalAlignment::Top,
            y: Dimension::ZERO,
            width: Dimension::ZERO,
            height: Dimension::ZERO,
            scale: 1.0,
            measured_scale: None,
            flags: WidgetFlags::OPAQUE,
            background_color: Color::WHITE,
            rendering_offset: Point::ZERO,
            animation_count: 0,
            render_fn: None,
            cache: None,
            sparse_index,
        });
        self.sparse[sparse_index as usize] = Some(SparseEntry {
            dense_index,
            generation,
        });

        WidgetId::new(sparse_index, generation)
    }

    /// Remove a widget and all of its descendants, dropping their boxed
    /// behaviors. Offscreen surfaces they held are queued for deletion on
    /// the render thread.
    pub fn remove_subtree(&mut self, id: WidgetId) -> Result<(), TreeError> {
        if self.get_dense_index(id).is_none() {
            return Err(TreeError::StaleWidget);
        }
        if self.parent(id).is_some() {
            self.remove_from_parent(id)?;
        }

        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            pending.extend_from_slice(self.children(current));
            self.unregister(current);
        }
        Ok(())
    }

    fn unregister(&mut self, id: WidgetId) {
        let Some(dense_index) = self.get_dense_index(id) else {
            return;
        };

        let last_dense_index = self.dense.len() - 1;
        let mut removed = self.dense.swap_remove(dense_index);

        // Fix up the sparse entry of the node that moved into the hole.
        if dense_index != last_dense_index {
            let moved_sparse = self.dense[dense_index].sparse_index;
            if let Some(entry) = self.sparse[moved_sparse as usize].as_mut() {
                entry.dense_index = dense_index;
            }
        }

        self.sparse[id.index as usize] = None;
        self.next_generations[id.index as usize] = id.generation.wrapping_add(1);
        self.free_indices.push(id.index);

        if let Some(cache) = removed.cache.take() {
            if let Some(framebuffer) = cache.framebuffer() {
                self.retired_framebuffers.push(framebuffer);
            }
        }
    }

    fn get_dense_index(&self, id: WidgetId) -> Option<usize> {
        self.sparse
            .get(id.index as usize)
            .and_then(|entry| entry.as_ref())
            .filter(|entry| entry.generation == id.generation)
            .map(|entry| entry.dense_index)
    }

    fn node(&self, id: WidgetId) -> Option<&Node> {
        self.get_dense_index(id).map(|index| &self.dense[index])
    }

    fn node_mut(&mut self, id: WidgetId) -> Option<&mut Node> {
        self.get_dense_index(id)
            .map(move |index| &mut self.dense[index])
    }

    pub fn contains(&self, id: WidgetId) -> bool {
        self.get_dense_index(id).is_some()
    }

    pub fn widget_count(&self) -> usize {
        self.dense.len()
    }

    pub fn widget(&self, id: WidgetId) -> Option<&dyn Widget> {
        self.node(id).map(|node| &*node.widget)
    }

    pub fn widget_mut(&mut self, id: WidgetId) -> Option<&mut dyn Widget> {
        match self.node_mut(id) {
            Some(node) => Some(&mut *node.widget),
            None => None,
        }
    }

    // ---- structure -----------------------------------------------------

    pub fn parent(&self, id: WidgetId) -> Option<WidgetId> {
        self.node(id).and_then(|node| node.parent)
    }

    /// Children in z-order (last paints topmost). Empty for stale ids.
    pub fn children(&self, id: WidgetId) -> &[WidgetId] {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Append `child` to `parent`'s child list (topmost position).
    ///
    /// A widget that already has a parent is rejected: unlink it first with
    /// [`remove_from_parent`](WidgetTree::remove_from_parent). The child
    /// subtree inherits the parent's owning view, and its measured scales
    /// are invalidated since its ancestor chain changed.
    pub fn add_child(&mut self, parent: WidgetId, child: WidgetId) -> Result<(), TreeError> {
        if self.get_dense_index(child).is_none() || self.get_dense_index(parent).is_none() {
            return Err(TreeError::StaleWidget);
        }
        if self.parent(child).is_some() {
            return Err(TreeError::AlreadyParented);
        }
        // `child` is unparented, so a cycle is only possible if it is the
        // root of `parent`'s ancestor chain.
        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(TreeError::WouldCycle);
            }
            ancestor = self.parent(current);
        }

        let view = self.node(parent).and_then(|node| node.view);
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        self.update_subtree_view(child, view);
        self.invalidate_measured_scale(child);
        Ok(())
    }

    /// Move an existing child to the end of the list so it paints on top of
    /// its siblings.
    pub fn bring_child_to_front(
        &mut self,
        parent: WidgetId,
        child: WidgetId,
    ) -> Result<(), TreeError> {
        let node = self.node_mut(parent).ok_or(TreeError::StaleWidget)?;
        let position = node
            .children
            .iter()
            .position(|candidate| *candidate == child)
            .ok_or(TreeError::NotAChild)?;
        let child = node.children.remove(position);
        node.children.push(child);
        Ok(())
    }

    /// Unlink a widget from its parent. The subtree stays in the arena but
    /// loses its owning-view back-reference, which also retires it as the
    /// view's responder at the next dispatch.
    pub fn remove_from_parent(&mut self, id: WidgetId) -> Result<(), TreeError> {
        let parent = self
            .node(id)
            .ok_or(TreeError::StaleWidget)?
            .parent
            .ok_or(TreeError::NoParent)?;

        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.retain(|child| *child != id);
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = None;
        }
        self.update_subtree_view(id, None);
        self.invalidate_measured_scale(id);
        Ok(())
    }

    // ---- owning view ----------------------------------------------------

    pub fn owning_view(&self, id: WidgetId) -> Option<ViewId> {
        self.node(id).and_then(|node| node.view)
    }

    /// Set the owning view for a widget and its descendants. Reserved for
    /// the view that manages this tree.
    pub(crate) fn set_owning_view(&mut self, id: WidgetId, view: Option<ViewId>) {
        self.update_subtree_view(id, view);
    }

    fn update_subtree_view(&mut self, id: WidgetId, view: Option<ViewId>) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.node_mut(current) {
                node.view = view;
            }
            pending.extend_from_slice(self.children(current));
        }
    }

    // ---- geometry ---------------------------------------------------------

    /// Set the horizontal position relative to the parent.
    pub fn set_x(&mut self, id: WidgetId, alignment: HorizontalAlignment, unit: Unit, value: f32) {
        if let Some(node) = self.node_mut(id) {
            node.x_alignment = alignment;
            node.x = Dimension { unit, value };
        }
    }

    /// Set the vertical position relative to the parent.
    pub fn set_y(&mut self, id: WidgetId, alignment: VerticalAlignment, unit: Unit, value: f32) {
        if let Some(node) = self.node_mut(id) {
            node.y_alignment = alignment;
            node.y = Dimension { unit, value };
        }
    }

    pub fn set_width(&mut self, id: WidgetId, unit: Unit, value: f32) {
        if let Some(node) = self.node_mut(id) {
            node.width = Dimension { unit, value };
        }
    }

    pub fn set_height(&mut self, id: WidgetId, unit: Unit, value: f32) {
        if let Some(node) = self.node_mut(id) {
            node.height = Dimension { unit, value };
        }
    }

    /// Point-unit, left/top-aligned shorthand for position and size.
    pub fn set_bounds(&mut self, id: WidgetId, x: f32, y: f32, width: f32, height: f32) {
        self.set_x(id, HorizontalAlignment::Left, Unit::Point, x);
        self.set_y(id, VerticalAlignment::Top, Unit::Point, y);
        self.set_width(id, Unit::Point, width);
        self.set_height(id, Unit::Point, height);
    }

    /// Resolved width in points. Percent units resolve against the parent's
    /// resolved width at call time; with no parent they resolve to 0, which
    /// geometrically excludes the widget.
    pub fn resolved_width(&self, id: WidgetId) -> f32 {
        let Some(node) = self.node(id) else { return 0.0 };
        match node.width.unit {
            Unit::Point => node.width.value,
            Unit::Percent => {
                let parent_width = node
                    .parent
                    .map(|parent| self.resolved_width(parent))
                    .unwrap_or(0.0);
                parent_width * node.width.value / 100.0
            }
        }
    }

    pub fn resolved_height(&self, id: WidgetId) -> f32 {
        let Some(node) = self.node(id) else { return 0.0 };
        match node.height.unit {
            Unit::Point => node.height.value,
            Unit::Percent => {
                let parent_height = node
                    .parent
                    .map(|parent| self.resolved_height(parent))
                    .unwrap_or(0.0);
                parent_height * node.height.value / 100.0
            }
        }
    }

    pub fn resolved_size(&self, id: WidgetId) -> Size {
        Size::new(self.resolved_width(id), self.resolved_height(id))
    }

    /// Resolved horizontal position in points, relative to the parent's
    /// left edge. Size resolves first because the center and right anchors
    /// depend on the resolved width.
    pub fn resolved_x(&self, id: WidgetId) -> f32 {
        let Some(node) = self.node(id) else { return 0.0 };
        let parent_width = node
            .parent
            .map(|parent| self.resolved_width(parent))
            .unwrap_or(0.0);
        let offset = match node.x.unit {
            Unit::Point => node.x.value,
            Unit::Percent => parent_width * node.x.value / 100.0,
        };
        match node.x_alignment {
            HorizontalAlignment::Left => offset,
            HorizontalAlignment::Center => (parent_width - self.resolved_width(id)) / 2.0 + offset,
            HorizontalAlignment::Right => parent_width - self.resolved_width(id) - offset,
        }
    }

    pub fn resolved_y(&self, id: WidgetId) -> f32 {
        let Some(node) = self.node(id) else { return 0.0 };
        let parent_height = node
            .parent
            .map(|parent| self.resolved_height(parent))
            .unwrap_or(0.0);
        let offset = match node.y.unit {
            Unit::Point => node.y.value,
            Unit::Percent => parent_height * node.y.value / 100.0,
        };
        match node.y_alignment {
            VerticalAlignment::Top => offset,
            VerticalAlignment::Middle => (parent_height - self.resolved_height(id)) / 2.0 + offset,
            VerticalAlignment::Bottom => parent_height - self.resolved_height(id) - offset,
        }
    }

    // ---- scale --------------------------------------------------------------

    pub fn scale(&self, id: WidgetId) -> f32 {
        self.node(id).map(|node| node.scale).unwrap_or(1.0)
    }

    /// Set the widget's own render scale. Must be strictly positive;
    /// non-positive values are ignored. Invalidates the cached measured
    /// scale of the widget and all descendants.
    pub fn set_scale(&mut self, id: WidgetId, scale: f32) {
        if scale <= 0.0 {
            log::warn!("ignoring non-positive scale {scale}");
            return;
        }
        if self.node_mut(id).map(|node| node.scale = scale).is_some() {
            self.invalidate_measured_scale(id);
        }
    }

    /// The widget's scale in view coordinates: own scale times the product
    /// of all ancestor scales. Cached; recomputed only after a scale change
    /// anywhere on the ancestor path.
    pub fn measured_scale(&mut self, id: WidgetId) -> f32 {
        let Some(node) = self.node(id) else { return 1.0 };
        if let Some(cached) = node.measured_scale {
            return cached;
        }
        let own_scale = node.scale;
        let parent_scale = match node.parent {
            Some(parent) => self.measured_scale(parent),
            None => 1.0,
        };
        let measured = own_scale * parent_scale;
        if let Some(node) = self.node_mut(id) {
            node.measured_scale = Some(measured);
        }
        measured
    }

    fn invalidate_measured_scale(&mut self, id: WidgetId) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.node_mut(current) {
                node.measured_scale = None;
            }
            pending.extend_from_slice(self.children(current));
        }
    }

    /// The widget's origin and size in view coordinates: positions scaled
    /// by the ancestors' cumulative scale and accumulated from the root,
    /// size scaled by the widget's own measured scale.
    pub fn measured_bounds(&mut self, id: WidgetId) -> Rect {
        let origin = self.measured_origin(id);
        let measured_scale = self.measured_scale(id);
        Rect::new(
            origin.x,
            origin.y,
            self.resolved_width(id) * measured_scale,
            self.resolved_height(id) * measured_scale,
        )
    }

    fn measured_origin(&mut self, id: WidgetId) -> Point {
        match self.parent(id) {
            Some(parent) => {
                let parent_origin = self.measured_origin(parent);
                let ancestor_scale = self.measured_scale(parent);
                Point::new(
                    parent_origin.x + self.resolved_x(id) * ancestor_scale,
                    parent_origin.y + self.resolved_y(id) * ancestor_scale,
                )
            }
            None => Point::new(self.resolved_x(id), self.resolved_y(id)),
        }
    }

    // ---- visual attributes ----------------------------------------------

    pub fn is_hidden(&self, id: WidgetId) -> bool {
        self.node(id)
            .map(|node| node.flags.contains(WidgetFlags::HIDDEN))
            .unwrap_or(false)
    }

    pub fn set_hidden(&mut self, id: WidgetId, hidden: bool) {
        if let Some(node) = self.node_mut(id) {
            node.flags.set(WidgetFlags::HIDDEN, hidden);
        }
    }

    pub fn is_opaque(&self, id: WidgetId) -> bool {
        self.node(id)
            .map(|node| node.flags.contains(WidgetFlags::OPAQUE))
            .unwrap_or(false)
    }

    pub fn set_opaque(&mut self, id: WidgetId, opaque: bool) {
        if let Some(node) = self.node_mut(id) {
            node.flags.set(WidgetFlags::OPAQUE, opaque);
        }
    }

    pub fn background_color(&self, id: WidgetId) -> Color {
        self.node(id)
            .map(|node| node.background_color)
            .unwrap_or_default()
    }

    pub fn set_background_color(&mut self, id: WidgetId, color: Color) {
        if let Some(node) = self.node_mut(id) {
            node.background_color = color;
        }
    }

    pub fn rendering_offset(&self, id: WidgetId) -> Point {
        self.node(id)
            .map(|node| node.rendering_offset)
            .unwrap_or(Point::ZERO)
    }

    /// Offset the widget's own paint output relative to its origin without
    /// moving the widget or its children.
    pub fn set_rendering_offset(&mut self, id: WidgetId, offset: Point) {
        if let Some(node) = self.node_mut(id) {
            node.rendering_offset = offset;
        }
    }

    // ---- animation ----------------------------------------------------------

    /// Register an animation request. Each call must be balanced by
    /// [`stop_animation`](WidgetTree::stop_animation).
    pub fn start_animation(&mut self, id: WidgetId) {
        if let Some(node) = self.node_mut(id) {
            node.animation_count += 1;
        }
    }

    pub fn stop_animation(&mut self, id: WidgetId) {
        if let Some(node) = self.node_mut(id) {
            if node.animation_count == 0 {
                log::warn!("stop_animation without matching start_animation");
            } else {
                node.animation_count -= 1;
            }
        }
    }

    pub fn is_animating(&self, id: WidgetId) -> bool {
        self.node(id)
            .map(|node| node.animation_count > 0)
            .unwrap_or(false)
    }

    pub(crate) fn has_animating_widgets(&self) -> bool {
        self.dense.iter().any(|node| node.animation_count > 0)
    }

    // ---- paint routine and cache ----------------------------------------

    /// Bind a paint routine, replacing the widget's `paint` method (and any
    /// previously bound routine).
    pub fn bind_render_fn(&mut self, id: WidgetId, render_fn: RenderFn) {
        if let Some(node) = self.node_mut(id) {
            node.render_fn = Some(render_fn);
        }
    }

    pub fn unbind_render_fn(&mut self, id: WidgetId) {
        if let Some(node) = self.node_mut(id) {
            node.render_fn = None;
        }
    }

    pub fn has_render_fn(&self, id: WidgetId) -> bool {
        self.node(id)
            .map(|node| node.render_fn.is_some())
            .unwrap_or(false)
    }

    /// Opt a widget in or out of cached rendering. Opting out queues the
    /// existing surface for deletion on the render thread.
    pub fn set_caches_rendering(&mut self, id: WidgetId, caches: bool) {
        let mut retired = None;
        if let Some(node) = self.node_mut(id) {
            if caches {
                node.flags.insert(WidgetFlags::CACHES_RENDERING);
                if node.cache.is_none() {
                    node.cache = Some(FrameCache::new());
                }
            } else {
                node.flags.remove(WidgetFlags::CACHES_RENDERING);
                if let Some(cache) = node.cache.take() {
                    retired = cache.framebuffer();
                }
            }
        }
        if let Some(framebuffer) = retired {
            self.retired_framebuffers.push(framebuffer);
        }
    }

    pub fn caches_rendering(&self, id: WidgetId) -> bool {
        self.node(id)
            .map(|node| node.flags.contains(WidgetFlags::CACHES_RENDERING))
            .unwrap_or(false)
    }

    /// Mark a cached widget's offscreen surface stale from the render
    /// thread. Other threads use the handle from
    /// [`cache_invalidator`](WidgetTree::cache_invalidator).
    pub fn mark_cache_dirty(&self, id: WidgetId) {
        if let Some(cache) = self.node(id).and_then(|node| node.cache.as_ref()) {
            cache.mark_dirty();
        }
    }

    /// Clone-able, cross-thread handle for invalidating this widget's
    /// cached rendering. `None` if the widget does not cache.
    pub fn cache_invalidator(&self, id: WidgetId) -> Option<CacheInvalidator> {
        self.node(id)
            .and_then(|node| node.cache.as_ref())
            .map(|cache| cache.invalidator())
    }

    pub(crate) fn cache_is_dirty(&self, id: WidgetId) -> bool {
        self.node(id)
            .and_then(|node| node.cache.as_ref())
            .map(|cache| cache.is_dirty())
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn clear_cache_dirty(&self, id: WidgetId) {
        if let Some(cache) = self.node(id).and_then(|node| node.cache.as_ref()) {
            cache.clear_dirty();
        }
    }

    /// Repaint a cached widget's offscreen surface. The surface is sized at
    /// the widget's measured scale times the device pixel ratio, so blits
    /// stay sharp under ancestor scaling.
    pub(crate) fn render_cache(
        &mut self,
        id: WidgetId,
        painter: &mut dyn Painter,
        pixel_ratio: f32,
    ) {
        let size = self.resolved_size(id);
        if size.is_empty() {
            return;
        }
        let scale_factor = pixel_ratio * self.measured_scale(id);
        let pixel_width = (size.width * scale_factor).ceil() as u32;
        let pixel_height = (size.height * scale_factor).ceil() as u32;

        let Some(node) = self.node_mut(id) else { return };
        let Some(cache) = node.cache.as_mut() else { return };
        let Some(framebuffer) = cache.ensure_surface(painter, pixel_width, pixel_height) else {
            // Allocation failed; stay dirty and paint directly this frame.
            return;
        };

        painter.bind_framebuffer(framebuffer);
        painter.begin_frame(size.width, size.height, scale_factor);
        self.execute_paint(id, painter, size);
        painter.end_frame();
        painter.unbind_framebuffer();

        if let Some(cache) = self.node(id).and_then(|node| node.cache.as_ref()) {
            cache.clear_dirty();
        }
    }

    /// Paint a visible widget inside its already-pushed scope: blit the
    /// cached surface when one exists, otherwise run the paint routine.
    pub(crate) fn render_on_demand(&mut self, id: WidgetId, painter: &mut dyn Painter, size: Size) {
        let cached = self
            .node(id)
            .filter(|node| node.flags.contains(WidgetFlags::CACHES_RENDERING))
            .and_then(|node| node.cache.as_ref())
            .and_then(|cache| cache.framebuffer());
        match cached {
            Some(framebuffer) => painter.draw_framebuffer(framebuffer, Rect::from_size(size)),
            None => self.execute_paint(id, painter, size),
        }
    }

    /// Fill the background if opaque, apply the rendering offset, then run
    /// the bound render function or the widget's paint method.
    fn execute_paint(&mut self, id: WidgetId, painter: &mut dyn Painter, size: Size) {
        let Some(node) = self.node_mut(id) else { return };
        if node.flags.contains(WidgetFlags::OPAQUE) {
            painter.fill_rect(Rect::from_size(size), node.background_color);
        }
        let offset = node.rendering_offset;
        if offset != Point::ZERO {
            painter.translate(offset.x, offset.y);
        }
        match node.render_fn.as_mut() {
            Some(render_fn) => render_fn(painter, size),
            None => node.widget.paint(painter, size),
        }
    }

    /// Frame-start pass over the whole subtree under `root` in preorder,
    /// visible or not. Runs before visibility resolution so widgets may
    /// still adjust their geometry.
    pub(crate) fn notify_view_will_render(&mut self, root: WidgetId, painter: &mut dyn Painter) {
        let mut pending = vec![root];
        while let Some(current) = pending.pop() {
            let children: Vec<WidgetId> = self.children(current).to_vec();
            if let Some(widget) = self.widget_mut(current) {
                widget.view_will_render(painter);
            }
            pending.extend(children.into_iter().rev());
        }
    }

    /// Frame-end counterpart of
    /// [`notify_view_will_render`](WidgetTree::notify_view_will_render).
    pub(crate) fn notify_view_did_render(&mut self, root: WidgetId, painter: &mut dyn Painter) {
        let mut pending = vec![root];
        while let Some(current) = pending.pop() {
            let children: Vec<WidgetId> = self.children(current).to_vec();
            if let Some(widget) = self.widget_mut(current) {
                widget.view_did_render(painter);
            }
            pending.extend(children.into_iter().rev());
        }
    }

    /// Notify every widget that the paint context is about to change and
    /// release all offscreen surfaces bound to it.
    pub(crate) fn notify_context_will_change(&mut self, painter: &mut dyn Painter) {
        for node in &mut self.dense {
            node.widget.context_will_change();
            if let Some(cache) = node.cache.as_mut() {
                cache.release(painter);
            }
        }
    }

    /// Surfaces orphaned since the last frame, to be deleted by the view.
    pub(crate) fn drain_retired_framebuffers(&mut self) -> Vec<FramebufferId> {
        std::mem::take(&mut self.retired_framebuffers)
    }
}

impl Default for WidgetTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockWidget;
    impl Widget for MockWidget {}

    fn tree_with(count: usize) -> (WidgetTree, Vec<WidgetId>) {
        let mut tree = WidgetTree::new();
        let ids = (0..count)
            .map(|_| tree.insert(Box::new(MockWidget)))
            .collect();
        (tree, ids)
    }

    #[test]
    fn test_insert_remove() {
        let (mut tree, ids) = tree_with(1);
        assert!(tree.contains(ids[0]));
        tree.remove_subtree(ids[0]).unwrap();
        assert!(!tree.contains(ids[0]));
        assert_eq!(tree.remove_subtree(ids[0]), Err(TreeError::StaleWidget));
    }

    #[test]
    fn test_generational_index_rejects_stale_id() {
        let mut tree = WidgetTree::new();
        let first = tree.insert(Box::new(MockWidget));
        tree.remove_subtree(first).unwrap();

        // The slot is reused with a bumped generation.
        let second = tree.insert(Box::new(MockWidget));
        assert!(!tree.contains(first));
        assert!(tree.contains(second));
        assert_eq!(first.index, second.index);
        assert_ne!(first.generation, second.generation);
    }

    #[test]
    fn test_add_child_and_z_order() {
        let (mut tree, ids) = tree_with(3);
        tree.add_child(ids[0], ids[1]).unwrap();
        tree.add_child(ids[0], ids[2]).unwrap();

        assert_eq!(tree.children(ids[0]), &[ids[1], ids[2]]);
        assert_eq!(tree.parent(ids[1]), Some(ids[0]));
    }

    #[test]
    fn test_add_child_rejects_already_parented() {
        let (mut tree, ids) = tree_with(3);
        tree.add_child(ids[0], ids[2]).unwrap();
        assert_eq!(
            tree.add_child(ids[1], ids[2]),
            Err(TreeError::AlreadyParented)
        );
        // Unlinking first makes the reparent legal.
        tree.remove_from_parent(ids[2]).unwrap();
        tree.add_child(ids[1], ids[2]).unwrap();
        assert_eq!(tree.parent(ids[2]), Some(ids[1]));
    }

    #[test]
    fn test_add_child_rejects_cycle() {
        let (mut tree, ids) = tree_with(2);
        tree.add_child(ids[0], ids[1]).unwrap();
        assert_eq!(tree.add_child(ids[1], ids[0]), Err(TreeError::WouldCycle));
        assert_eq!(tree.add_child(ids[0], ids[0]), Err(TreeError::WouldCycle));
    }

    #[test]
    fn test_bring_child_to_front() {
        let (mut tree, ids) = tree_with(3);
        tree.add_child(ids[0], ids[1]).unwrap();
        tree.add_child(ids[0], ids[2]).unwrap();

        tree.bring_child_to_front(ids[0], ids[1]).unwrap();
        assert_eq!(tree.children(ids[0]), &[ids[2], ids[1]]);

        assert_eq!(
            tree.bring_child_to_front(ids[1], ids[2]),
            Err(TreeError::NotAChild)
        );
    }

    #[test]
    fn test_remove_from_parent_requires_parent() {
        let (mut tree, ids) = tree_with(2);
        assert_eq!(tree.remove_from_parent(ids[0]), Err(TreeError::NoParent));

        tree.add_child(ids[0], ids[1]).unwrap();
        tree.remove_from_parent(ids[1]).unwrap();
        assert_eq!(tree.parent(ids[1]), None);
        assert!(tree.children(ids[0]).is_empty());
    }

    #[test]
    fn test_remove_subtree_drops_descendants() {
        let (mut tree, ids) = tree_with(3);
        tree.add_child(ids[0], ids[1]).unwrap();
        tree.add_child(ids[1], ids[2]).unwrap();

        tree.remove_subtree(ids[1]).unwrap();
        assert!(tree.contains(ids[0]));
        assert!(!tree.contains(ids[1]));
        assert!(!tree.contains(ids[2]));
        assert!(tree.children(ids[0]).is_empty());
    }

    #[test]
    fn test_measured_scale_caches_and_invalidates() {
        let (mut tree, ids) = tree_with(3);
        tree.add_child(ids[0], ids[1]).unwrap();
        tree.add_child(ids[1], ids[2]).unwrap();

        tree.set_scale(ids[0], 2.0);
        tree.set_scale(ids[1], 3.0);
        assert_eq!(tree.measured_scale(ids[2]), 6.0);
        assert_eq!(tree.measured_scale(ids[1]), 6.0);

        // An ancestor change must be visible immediately, not a stale read.
        tree.set_scale(ids[0], 4.0);
        assert_eq!(tree.measured_scale(ids[2]), 12.0);
        assert_eq!(tree.measured_scale(ids[0]), 4.0);
    }

    #[test]
    fn test_measured_scale_invalidated_by_reparent() {
        let (mut tree, ids) = tree_with(3);
        tree.set_scale(ids[0], 2.0);
        tree.set_scale(ids[1], 5.0);

        tree.add_child(ids[0], ids[2]).unwrap();
        assert_eq!(tree.measured_scale(ids[2]), 2.0);

        tree.remove_from_parent(ids[2]).unwrap();
        assert_eq!(tree.measured_scale(ids[2]), 1.0);

        tree.add_child(ids[1], ids[2]).unwrap();
        assert_eq!(tree.measured_scale(ids[2]), 5.0);
    }

    #[test]
    fn test_non_positive_scale_ignored() {
        let (mut tree, ids) = tree_with(1);
        tree.set_scale(ids[0], 0.0);
        assert_eq!(tree.scale(ids[0]), 1.0);
        tree.set_scale(ids[0], -2.0);
        assert_eq!(tree.scale(ids[0]), 1.0);
    }

    #[test]
    fn test_percent_resolution_follows_parent() {
        let (mut tree, ids) = tree_with(2);
        tree.add_child(ids[0], ids[1]).unwrap();
        tree.set_width(ids[0], Unit::Point, 200.0);
        tree.set_width(ids[1], Unit::Percent, 50.0);

        let resolved = tree.resolved_width(ids[1]);
        assert_eq!(resolved, 100.0);

        // The previously captured value does not move; a fresh resolution
        // pass picks up the parent's new size.
        tree.set_width(ids[0], Unit::Point, 300.0);
        assert_eq!(resolved, 100.0);
        assert_eq!(tree.resolved_width(ids[1]), 150.0);
    }

    #[test]
    fn test_percent_without_parent_resolves_to_zero() {
        let (mut tree, ids) = tree_with(1);
        tree.set_width(ids[0], Unit::Percent, 50.0);
        assert_eq!(tree.resolved_width(ids[0]), 0.0);
    }

    #[test]
    fn test_alignment_resolution() {
        let (mut tree, ids) = tree_with(2);
        tree.add_child(ids[0], ids[1]).unwrap();
        tree.set_bounds(ids[0], 0.0, 0.0, 200.0, 100.0);
        tree.set_width(ids[1], Unit::Point, 40.0);
        tree.set_height(ids[1], Unit::Point, 20.0);

        tree.set_x(ids[1], HorizontalAlignment::Right, Unit::Point, 10.0);
        assert_eq!(tree.resolved_x(ids[1]), 150.0); // 200 - 40 - 10

        tree.set_x(ids[1], HorizontalAlignment::Center, Unit::Point, 0.0);
        assert_eq!(tree.resolved_x(ids[1]), 80.0);

        tree.set_y(ids[1], VerticalAlignment::Bottom, Unit::Point, 5.0);
        assert_eq!(tree.resolved_y(ids[1]), 75.0); // 100 - 20 - 5
    }

    #[test]
    fn test_measured_bounds_accumulates_scale() {
        let (mut tree, ids) = tree_with(3);
        tree.add_child(ids[0], ids[1]).unwrap();
        tree.add_child(ids[1], ids[2]).unwrap();
        tree.set_bounds(ids[0], 0.0, 0.0, 100.0, 100.0);
        tree.set_bounds(ids[1], 10.0, 10.0, 50.0, 50.0);
        tree.set_bounds(ids[2], 5.0, 5.0, 20.0, 20.0);
        tree.set_scale(ids[1], 2.0);

        // The child's origin is unscaled (its ancestors have scale 1); the
        // grandchild's origin and size pick up the child's scale.
        assert_eq!(
            tree.measured_bounds(ids[1]),
            Rect::new(10.0, 10.0, 100.0, 100.0)
        );
        assert_eq!(
            tree.measured_bounds(ids[2]),
            Rect::new(20.0, 20.0, 40.0, 40.0)
        );
    }

    #[test]
    fn test_animation_counter() {
        let (mut tree, ids) = tree_with(1);
        assert!(!tree.is_animating(ids[0]));

        tree.start_animation(ids[0]);
        tree.start_animation(ids[0]);
        assert!(tree.is_animating(ids[0]));

        tree.stop_animation(ids[0]);
        assert!(tree.is_animating(ids[0]));
        tree.stop_animation(ids[0]);
        assert!(!tree.is_animating(ids[0]));
        assert!(!tree.has_animating_widgets());
    }

    #[test]
    fn test_render_fn_binding() {
        let (mut tree, ids) = tree_with(1);
        assert!(!tree.has_render_fn(ids[0]));

        tree.bind_render_fn(ids[0], Box::new(|_painter, _size| {}));
        assert!(tree.has_render_fn(ids[0]));

        tree.unbind_render_fn(ids[0]);
        assert!(!tree.has_render_fn(ids[0]));
    }

    #[test]
    fn test_cache_opt_in_out() {
        let (mut tree, ids) = tree_with(1);
        assert!(!tree.caches_rendering(ids[0]));
        assert!(tree.cache_invalidator(ids[0]).is_none());

        tree.set_caches_rendering(ids[0], true);
        assert!(tree.caches_rendering(ids[0]));
        assert!(tree.cache_is_dirty(ids[0]));

        let invalidator = tree.cache_invalidator(ids[0]).unwrap();
        tree.clear_cache_dirty(ids[0]);
        assert!(!tree.cache_is_dirty(ids[0]));
        invalidator.invalidate();
        assert!(tree.cache_is_dirty(ids[0]));

        tree.set_caches_rendering(ids[0], false);
        assert!(!tree.caches_rendering(ids[0]));
    }
}
