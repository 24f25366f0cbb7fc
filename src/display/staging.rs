//! Single-slot frame hand-off between the decode and display threads
//!
//! The slot holds at most one frame. Publishing replaces whatever is there,
//! so a slow reader only ever sees the newest frame and the writer never
//! blocks on it for longer than a pointer swap.

use crate::convert::ConvertedFrame;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
pub struct FrameSlot {
    pending: Mutex<Option<ConvertedFrame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ConvertedFrame>> {
        // The slot holds plain data; a panic mid-swap leaves it valid
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `frame` as the latest one. Returns the frame it supersedes, if
    /// the reader had not taken it yet.
    pub fn publish(&self, frame: ConvertedFrame) -> Option<ConvertedFrame> {
        self.lock().replace(frame)
    }

    /// Take the latest frame, leaving the slot empty.
    pub fn take_latest(&self) -> Option<ConvertedFrame> {
        self.lock().take()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Drop any pending frame. Returns true if one was dropped.
    pub fn clear(&self) -> bool {
        self.lock().take().is_some()
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("pending", &self.has_pending())
            .finish()
    }
}
