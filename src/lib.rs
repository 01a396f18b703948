//! A retained-mode widget tree engine.
//!
//! The engine keeps a tree of widgets per [`view::View`] and, on every
//! frame, resolves which widgets are visible, clips them against their
//! ancestors, and paints them through a backend-agnostic [`paint::Painter`].
//! Widgets can memoize their paint output in offscreen surfaces, and
//! pointer events are routed to a single responder picked by hit testing.
//!
//! ```no_run
//! use oriel::prelude::*;
//!
//! struct Label;
//!
//! impl Widget for Label {
//!     fn paint(&mut self, painter: &mut dyn Painter, size: Size) {
//!         painter.fill_rect(Rect::from_size(size), Color::BLACK);
//!     }
//! }
//!
//! fn show(backend: impl PaintBackend) {
//!     let mut view = View::new(backend);
//!     view.set_bounds(320.0, 240.0);
//!     let label = view.add_widget(Box::new(Label));
//!     view.tree_mut().set_bounds(label, 10.0, 10.0, 100.0, 20.0);
//!     view.render();
//! }
//! ```

pub mod cache;
pub mod geometry;
pub mod paint;
pub mod redraw;
pub mod render_list;
pub mod tree;
pub mod view;
pub mod widget;

pub mod prelude {
    pub use crate::cache::CacheInvalidator;
    pub use crate::geometry::{Color, Point, Rect, Size};
    pub use crate::paint::{FramebufferId, PaintBackend, Painter};
    pub use crate::redraw::RedrawCoalescer;
    pub use crate::render_list::RenderItem;
    pub use crate::tree::{
        HorizontalAlignment, TreeError, Unit, VerticalAlignment, WidgetId, WidgetTree,
    };
    pub use crate::view::{FramePhase, View, ViewId};
    pub use crate::widget::{Event, EventResponse, Widget};
}
