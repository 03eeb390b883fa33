#![forbid(unsafe_code)]

//! Per-frame reflow throttle.
//!
//! Live geometry reports arrive far faster than content can usefully
//! reflow. [`ReflowThrottle`] keeps at most one pending request per widget
//! ("latest wins") and releases them once per animation frame, so a burst
//! of any length costs at most one reflow per widget per frame.
//!
//! ```
//! use gridboard_runtime::throttle::ReflowThrottle;
//!
//! let mut throttle = ReflowThrottle::new();
//! for _ in 0..100 {
//!     throttle.request(&"w1".into());
//! }
//! assert_eq!(throttle.take_frame().len(), 1);
//! assert!(throttle.take_frame().is_empty());
//! ```

use gridboard_layout::WidgetId;
use rustc_hash::FxHashSet;

/// Coalesces reflow requests until the next animation frame.
#[derive(Debug, Clone, Default)]
pub struct ReflowThrottle {
    /// Pending ids in first-request order.
    queue: Vec<WidgetId>,
    pending: FxHashSet<WidgetId>,
    coalesced: u64,
}

impl ReflowThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a reflow of `id` at the next frame. Returns `false` when one
    /// was already pending.
    pub fn request(&mut self, id: &WidgetId) -> bool {
        if !self.pending.insert(id.clone()) {
            self.coalesced = self.coalesced.saturating_add(1);
            return false;
        }
        self.queue.push(id.clone());
        true
    }

    /// Drop any pending request for `id`.
    pub fn discard(&mut self, id: &WidgetId) -> bool {
        if !self.pending.remove(id) {
            return false;
        }
        self.queue.retain(|queued| queued != id);
        true
    }

    #[must_use]
    pub fn is_pending(&self, id: &WidgetId) -> bool {
        self.pending.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Requests absorbed by an already-pending entry.
    #[must_use]
    pub const fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Take this frame's ids, oldest request first.
    pub fn take_frame(&mut self) -> Vec<WidgetId> {
        self.pending.clear();
        std::mem::take(&mut self.queue)
    }
}
