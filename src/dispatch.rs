//! Cooperative task dispatcher (component B).
//!
//! ISRs post work by setting a bit in an atomic bitmap; the foreground
//! loop alternates between [`Dispatcher::work`] and a wait-for-interrupt.
//! There is no preemption: a handler runs to completion before the next
//! bit (even a higher-priority one set during the call) is serviced.

use core::sync::atomic::{AtomicU32, Ordering};

/// Task classes, in descending priority order (first = highest). Bit
/// position is assigned so the highest-priority task owns the
/// highest-numbered bit, since a tie on the sampled word is broken in
/// favor of the highest bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Task {
    Shutdown = 0,
    Camera = 1,
    Haptic = 2,
    ButtonHold = 3,
    DisplayRender = 4,
    FiftyHzHeartbeat = 5,
    HostProtocol = 6,
}

const NUM_TASKS: u8 = 7;

impl Task {
    fn from_bit(bit: u8) -> Task {
        match bit {
            0 => Task::Shutdown,
            1 => Task::Camera,
            2 => Task::Haptic,
            3 => Task::ButtonHold,
            4 => Task::DisplayRender,
            5 => Task::FiftyHzHeartbeat,
            6 => Task::HostProtocol,
            _ => unreachable!("bit index out of range for Task"),
        }
    }
}

/// Atomic bitmap of pending tasks. Callable from any context, including
/// ISRs: `trigger`/`cancel` are single atomic RMW ops.
pub struct Dispatcher {
    bitmap: AtomicU32,
}

impl Dispatcher {
    pub const fn new() -> Self {
        Self {
            bitmap: AtomicU32::new(0),
        }
    }

    /// Set `task`'s bit. Safe to call from an ISR.
    pub fn trigger(&self, task: Task) {
        self.bitmap.fetch_or(1 << (task as u8), Ordering::SeqCst);
    }

    /// Clear `task`'s bit before it is next sampled.
    pub fn cancel(&self, task: Task) {
        self.bitmap.fetch_and(!(1 << (task as u8)), Ordering::SeqCst);
    }

    /// Sample the bitmap once, atomically clearing every bit it saw, then
    /// invoke `handler` for each set bit from highest to lowest. Returns
    /// true if any bit was set. A bit re-triggered by `handler` itself is
    /// not revisited this call; it is picked up on the caller's next
    /// `work()`.
    pub fn work(&self, mut handler: impl FnMut(Task)) -> bool {
        let sampled = self.bitmap.swap(0, Ordering::SeqCst);
        if sampled == 0 {
            return false;
        }
        for bit in (0..NUM_TASKS).rev() {
            if sampled & (1 << bit) != 0 {
                handler(Task::from_bit(bit));
            }
        }
        true
    }

    /// True if no task is pending. Used by the main loop to decide
    /// whether to wait for an interrupt.
    pub fn is_empty(&self) -> bool {
        self.bitmap.load(Ordering::SeqCst) == 0
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
