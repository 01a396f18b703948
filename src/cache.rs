//! Per-widget offscreen rendering cache.
//!
//! A widget that opts into cached rendering paints into a private
//! framebuffer only while its dirty flag is set; every other frame reuses
//! the surface with a cheap blit. Invalidation may come from any thread, so
//! the dirty flag lives behind a mutex shared with clone-able
//! [`CacheInvalidator`] handles — the same discipline the redraw coalescer
//! uses. The read side (the render thread) goes through the same mutex.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::paint::{FramebufferId, Painter};

/// Cross-thread handle for marking a widget's cached rendering stale.
#[derive(Clone)]
pub struct CacheInvalidator {
    dirty: Arc<Mutex<bool>>,
}

impl CacheInvalidator {
    /// Mark the cached surface dirty. The next frame repaints it.
    pub fn invalidate(&self) {
        *self.dirty.lock() = true;
    }
}

/// Offscreen surface memoization for one widget.
///
/// The surface itself is owned by the paint context; this struct tracks the
/// handle and the pixel dimensions it was created at, so a scale or size
/// change rebuilds it. All methods except the dirty flag accessors must be
/// called from the render thread.
pub struct FrameCache {
    framebuffer: Option<FramebufferId>,
    surface_size: (u32, u32),
    dirty: Arc<Mutex<bool>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self {
            framebuffer: None,
            surface_size: (0, 0),
            dirty: Arc::new(Mutex::new(true)),
        }
    }

    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator {
            dirty: Arc::clone(&self.dirty),
        }
    }

    pub fn mark_dirty(&self) {
        *self.dirty.lock() = true;
    }

    pub fn is_dirty(&self) -> bool {
        *self.dirty.lock()
    }

    /// Clear the dirty flag after a successful repaint.
    pub fn clear_dirty(&self) {
        *self.dirty.lock() = false;
    }

    /// The surface to blit from, if one has been rendered.
    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    /// Get a framebuffer of exactly `width` x `height` physical pixels,
    /// creating or recreating it as needed. Returns `None` when the backend
    /// reports allocation failure; the caller falls back to direct painting.
    pub fn ensure_surface(
        &mut self,
        painter: &mut dyn Painter,
        width: u32,
        height: u32,
    ) -> Option<FramebufferId> {
        if let Some(existing) = self.framebuffer {
            if self.surface_size == (width, height) {
                return Some(existing);
            }
            painter.delete_framebuffer(existing);
            self.framebuffer = None;
        }

        let framebuffer = painter.create_framebuffer(width, height);
        if !framebuffer.is_valid() {
            log::warn!("framebuffer allocation failed ({width}x{height} px)");
            return None;
        }
        self.framebuffer = Some(framebuffer);
        self.surface_size = (width, height);
        Some(framebuffer)
    }

    /// Release the surface. Called when the paint context is about to
    /// change and when the owning widget is destroyed. The next frame
    /// repaints from scratch.
    pub fn release(&mut self, painter: &mut dyn Painter) {
        if let Some(framebuffer) = self.framebuffer.take() {
            painter.delete_framebuffer(framebuffer);
        }
        self.surface_size = (0, 0);
        *self.dirty.lock() = true;
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}
