//! The widget behavior trait and the pointer event model.
//!
//! Geometry and visual attributes live in the tree arena (see
//! [`crate::tree::WidgetTree`]); a widget implementation only supplies
//! behavior. Every method has a no-op default body, so implementors
//! override exactly what they need.

use crate::geometry::{Point, Rect, Size};
use crate::paint::Painter;

/// Pointer input routed by the view's event router.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// Pointer pressed.
    PointerDown { x: f32, y: f32 },
    /// Pointer moved while tracked.
    PointerMove { x: f32, y: f32 },
    /// Pointer released.
    PointerUp { x: f32, y: f32 },
    /// The interaction was cancelled by the environment.
    PointerCancel,
}

impl Event {
    /// Get the coordinates from this event, if any.
    pub fn coords(&self) -> Option<Point> {
        match self {
            Event::PointerDown { x, y } | Event::PointerMove { x, y } | Event::PointerUp { x, y } => {
                Some(Point::new(*x, *y))
            }
            Event::PointerCancel => None,
        }
    }
}

/// Whether the responder consumed an event. A declined event is dropped;
/// there is no ancestor bubbling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    Ignored,
    Handled,
}

/// Behavior hooks for a widget in the tree.
///
/// The view invokes these during the frame pipeline and event dispatch:
///
/// - [`view_will_render`](Widget::view_will_render) /
///   [`view_did_render`](Widget::view_did_render) fire for every attached
///   widget each frame, visible or not. Good places to adjust position and
///   dimensions, or to snapshot finished output.
/// - [`will_render`](Widget::will_render) /
///   [`did_render`](Widget::did_render) fire only for widgets that made it
///   into the frame's visible list. Transform state changed in
///   `will_render` applies to the widget and its descendants and is popped
///   after `did_render`.
/// - [`paint`](Widget::paint) draws the widget's own content. It is skipped
///   when a bound render function is installed on the node, and it runs
///   inside the widget's offscreen surface when cached rendering is on.
/// - [`context_will_change`](Widget::context_will_change) fires before the
///   paint context is replaced or destroyed, so implementations can drop
///   resources tied to it. Cached offscreen surfaces managed by the tree
///   are released automatically.
pub trait Widget {
    fn view_will_render(&mut self, painter: &mut dyn Painter) {
        let _ = painter;
    }

    fn view_did_render(&mut self, painter: &mut dyn Painter) {
        let _ = painter;
    }

    fn will_render(&mut self, painter: &mut dyn Painter) {
        let _ = painter;
    }

    fn did_render(&mut self, painter: &mut dyn Painter) {
        let _ = painter;
    }

    fn context_will_change(&mut self) {}

    fn paint(&mut self, painter: &mut dyn Painter, size: Size) {
        let _ = (painter, size);
    }

    /// Hit-test predicate. `point` is in view coordinates and `bounds` is
    /// this widget's measured bounds in the same space. Returning `true`
    /// claims responder status. The default ignores all events.
    fn should_handle_event(&self, point: Point, bounds: Rect) -> bool {
        let _ = (point, bounds);
        false
    }

    /// Deliver an event to this widget while it is the responder.
    fn handle_event(&mut self, event: &Event) -> EventResponse {
        let _ = event;
        EventResponse::Ignored
    }
}
