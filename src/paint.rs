//! The seam between this crate and the actual graphics stack.
//!
//! The engine never talks to a GPU or vector backend directly. It drives a
//! [`Painter`] — the primitive paint operations a frame needs — and obtains
//! that painter from a [`PaintBackend`], which owns the underlying context
//! and knows the device pixel ratio. Embedders implement both traits over
//! whatever renderer they use.

use crate::geometry::{Color, Rect};

/// Handle to an offscreen framebuffer owned by the paint context.
///
/// Collaborator failures (e.g. allocation failure in the backend) are
/// reported by returning [`FramebufferId::INVALID`] rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u64);

impl FramebufferId {
    /// Sentinel for a framebuffer that could not be created.
    pub const INVALID: FramebufferId = FramebufferId(u64::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Primitive paint operations consumed by the render pipeline.
///
/// The transform/clip state forms a stack: every [`save`](Painter::save)
/// must be balanced by a [`restore`](Painter::restore). The pipeline relies
/// on that stack for nested widget scopes, so implementations must apply
/// `translate`/`scale`/`intersect_scissor` relative to the current state.
pub trait Painter {
    /// Push the current transform/clip state.
    fn save(&mut self);

    /// Pop back to the most recently saved state.
    fn restore(&mut self);

    fn translate(&mut self, x: f32, y: f32);

    /// Uniform scale about the current origin.
    fn scale(&mut self, factor: f32);

    /// Intersect the current clip with a rect in local coordinates.
    fn intersect_scissor(&mut self, x: f32, y: f32, width: f32, height: f32);

    /// Open a paint frame covering `width` x `height` logical units,
    /// rasterized at `pixel_ratio` physical pixels per unit.
    fn begin_frame(&mut self, width: f32, height: f32, pixel_ratio: f32);

    fn end_frame(&mut self);

    /// Clear the current render target.
    fn clear(&mut self, color: Color);

    fn fill_rect(&mut self, rect: Rect, color: Color);

    /// Create an offscreen framebuffer of the given physical pixel size.
    /// Returns [`FramebufferId::INVALID`] on failure.
    fn create_framebuffer(&mut self, width: u32, height: u32) -> FramebufferId;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Redirect subsequent paint operations into the framebuffer. Must be
    /// balanced by [`unbind_framebuffer`](Painter::unbind_framebuffer).
    fn bind_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Return to the onscreen render target.
    fn unbind_framebuffer(&mut self);

    /// Blit a previously rendered framebuffer into `rect`, expressed in the
    /// current local coordinate space.
    fn draw_framebuffer(&mut self, framebuffer: FramebufferId, rect: Rect);
}

/// Owner of the paint context and the environment queries the view needs.
///
/// The context is created lazily on the first frame and destroyed when the
/// view is disposed. The backend, the context, and every framebuffer handle
/// are confined to the view's rendering thread.
pub trait PaintBackend {
    type Context: Painter;

    /// Create a fresh paint context. Called once, on the first render.
    fn create_context(&mut self) -> Self::Context;

    /// Tear down a context previously returned by
    /// [`create_context`](PaintBackend::create_context). Every framebuffer
    /// bound to it has already been released by the view at this point.
    fn destroy_context(&mut self, context: Self::Context);

    /// Physical pixels per logical unit for the output the view paints to.
    fn device_pixel_ratio(&self) -> f32;
}
