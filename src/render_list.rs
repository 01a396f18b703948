//! Per-frame visibility and clip resolution.
//!
//! Every frame, the widget tree is flattened into a preorder list of
//! [`RenderItem`]s holding everything the paint pass needs: resolved local
//! origin and size, the scale to apply, and the widget's visible region in
//! view coordinates (its scissor rect, the intersection of its own extent
//! with every ancestor's). A widget that is hidden, has an empty resolved
//! size, or falls entirely outside its ancestors' scissor or the view is
//! excluded together with its whole subtree.
//!
//! The list is a snapshot: it is rebuilt from scratch on each frame and
//! never outlives it.

use crate::geometry::{Point, Size};
use crate::tree::{WidgetId, WidgetTree};

/// One visible widget in a frame, in preorder position.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem {
    pub widget: WidgetId,
    /// Tree depth, root item at 0. Drives scope finalization order.
    pub level: u32,
    /// Index of the parent's item in the same list. `None` for the root.
    pub parent: Option<usize>,
    /// Resolved origin in the parent's (unscaled) coordinate space.
    pub origin: Point,
    /// Resolved size in the widget's own coordinate space.
    pub size: Size,
    /// Own scale, applied when the widget's scope is pushed.
    pub scale: f32,
    /// Origin in view coordinates, ancestor scales applied.
    pub translated_origin: Point,
    /// Top-left of the visible region in view coordinates.
    pub scissor_origin: Point,
    /// Extent of the visible region in view coordinates.
    pub scissor_width: f32,
    pub scissor_height: f32,
}

/// Flatten the subtree under `root` into the frame's render list.
///
/// The root widget occupies the full view: its clip is the view rect and
/// its translated origin is (0, 0) regardless of its position attributes.
pub fn populate(tree: &mut WidgetTree, root: WidgetId, view_size: Size) -> Vec<RenderItem> {
    let mut list = Vec::new();
    visit(tree, view_size, &mut list, root, None, 0);
    list
}

fn visit(
    tree: &mut WidgetTree,
    view_size: Size,
    list: &mut Vec<RenderItem>,
    widget: WidgetId,
    parent_index: Option<usize>,
    level: u32,
) {
    if tree.is_hidden(widget) {
        return;
    }
    let size = tree.resolved_size(widget);
    if size.is_empty() {
        return;
    }

    let item = match parent_index {
        None => RenderItem {
            widget,
            level,
            parent: None,
            origin: Point::ZERO,
            size,
            scale: tree.scale(widget),
            translated_origin: Point::ZERO,
            scissor_origin: Point::ZERO,
            scissor_width: view_size.width,
            scissor_height: view_size.height,
        },
        Some(parent_index) => {
            let parent = list[parent_index].clone();
            let ancestor_scale = tree.measured_scale(parent.widget);
            let measured_scale = tree.measured_scale(widget);

            let origin = Point::new(tree.resolved_x(widget), tree.resolved_y(widget));
            let translated_origin = Point::new(
                parent.translated_origin.x + origin.x * ancestor_scale,
                parent.translated_origin.y + origin.y * ancestor_scale,
            );
            let scaled_width = size.width * measured_scale;
            let scaled_height = size.height * measured_scale;

            // The widget's clip starts where its own extent and the
            // parent's clip both begin.
            let scissor_origin = Point::new(
                translated_origin.x.max(parent.scissor_origin.x),
                translated_origin.y.max(parent.scissor_origin.y),
            );
            if scissor_origin.x >= view_size.width || scissor_origin.y >= view_size.height {
                return;
            }
            // Far edges are inclusive: a widget whose last column or row
            // sits before the clip origin contributes nothing.
            if translated_origin.x + scaled_width - 1.0 < scissor_origin.x
                || translated_origin.y + scaled_height - 1.0 < scissor_origin.y
            {
                return;
            }

            let scissor_width = (parent.scissor_origin.x + parent.scissor_width
                - scissor_origin.x)
                .min(translated_origin.x + scaled_width - scissor_origin.x);
            let scissor_height = (parent.scissor_origin.y + parent.scissor_height
                - scissor_origin.y)
                .min(translated_origin.y + scaled_height - scissor_origin.y);
            if scissor_width <= 0.0 || scissor_height <= 0.0 {
                return;
            }
            if scissor_origin.x + scissor_width - 1.0 < 0.0
                || scissor_origin.y + scissor_height - 1.0 < 0.0
            {
                return;
            }

            RenderItem {
                widget,
                level,
                parent: Some(parent_index),
                origin,
                size,
                scale: tree.scale(widget),
                translated_origin,
                scissor_origin,
                scissor_width,
                scissor_height,
            }
        }
    };

    list.push(item);
    let item_index = list.len() - 1;

    let children: Vec<WidgetId> = tree.children(widget).to_vec();
    for child in children {
        visit(tree, view_size, list, child, Some(item_index), level + 1);
    }
}
