//! Cross-thread redraw request coalescing.
//!
//! Any thread may request a redraw. The first request through an idle
//! coalescer performs the (potentially slow, synchronous) paint on the
//! calling thread; requests that arrive while a paint is in flight collapse
//! into a single pending follow-up pass, executed by the thread that holds
//! the busy flag once its paint finishes. Callers are never blocked behind
//! someone else's paint.
//!
//! The busy/pending pair is scoped to one view instance.

use std::sync::Arc;

use parking_lot::Mutex;

struct RedrawFlags {
    redrawing: bool,
    pending: bool,
}

/// Clone-able handle to one view's redraw state.
#[derive(Clone)]
pub struct RedrawCoalescer {
    flags: Arc<Mutex<RedrawFlags>>,
}

impl RedrawCoalescer {
    pub fn new() -> Self {
        Self {
            flags: Arc::new(Mutex::new(RedrawFlags {
                redrawing: false,
                pending: false,
            })),
        }
    }

    /// Request a redraw, running `paint` if this caller wins the busy flag.
    ///
    /// The lock is never held across `paint`. If requests arrived while the
    /// paint ran, exactly one more complete pass is performed before
    /// returning, however many requests there were.
    pub fn redraw<F: FnMut()>(&self, mut paint: F) {
        loop {
            {
                let mut flags = self.flags.lock();
                if flags.redrawing {
                    flags.pending = true;
                    return;
                }
                flags.redrawing = true;
            }

            paint();

            let mut flags = self.flags.lock();
            let follow_up = flags.pending;
            flags.redrawing = false;
            flags.pending = false;
            drop(flags);

            if !follow_up {
                return;
            }
        }
    }
}

impl Default for RedrawCoalescer {
    fn default() -> Self {
        Self::new()
    }
}
