//! Button state machine (component H, spec.md §4.6).
//!
//! Each instance tracks one physical button. The edge ISR calls
//! [`ButtonState::press`]/[`ButtonState::release`] the instant it sees a
//! GPIO edge (already polarity-resolved by the caller); a periodic "hold
//! poll" task calls [`ButtonState::poll_hold`] while any button is held.
//! No debouncing is applied here — spec.md notes the hardware is
//! adequate for that.

use bitflags::bitflags;

use crate::time::{ms, Tick};

pub const DOUBLE_CLICK_WINDOW: u32 = ms(250);
pub const CLICK_MAX_DURATION: u32 = ms(500);
pub const SHORT_HOLD_THRESHOLD: u32 = ms(500);
pub const HOLD_THRESHOLD: u32 = ms(1_700);
pub const LONG_HOLD_THRESHOLD: u32 = ms(2_700);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonEvent {
    Press,
    Release,
    DoubleClick,
    ClickRelease,
    ShortHold,
    Hold,
    LongHold,
    HoldRelease,
    LongHoldRelease,
}

/// Up to three events can be synthesized by a single call (e.g. a press
/// that is also a double-click, or a release carrying a hold-release).
pub type EventBuf = heapless::Vec<ButtonEvent, 3>;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Reported: u8 {
        const SHORT_HOLD = 0b001;
        const HOLD       = 0b010;
        const LONG_HOLD  = 0b100;
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ButtonState {
    pressed: bool,
    press_ts: Tick,
    release_ts: Option<Tick>,
    reported: Reported,
    suppress_hold: bool,
}

impl ButtonState {
    pub const fn new() -> Self {
        Self {
            pressed: false,
            press_ts: Tick::ZERO,
            release_ts: None,
            reported: Reported::empty(),
            suppress_hold: false,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Inhibit further hold-class emissions (`ShortHold`/`Hold`/`LongHold`
    /// and their release counterparts) for the current press only. Called
    /// by a subscriber that wants to consume a hold gesture exclusively.
    pub fn suppress_hold(&mut self) {
        self.suppress_hold = true;
    }

    /// GPIO down-edge. Returns `Press`, plus `DoubleClick` if the previous
    /// release was within [`DOUBLE_CLICK_WINDOW`].
    pub fn press(&mut self, now: Tick) -> EventBuf {
        let mut events = EventBuf::new();
        let was_double = match self.release_ts {
            Some(rel) => now.since(rel) < DOUBLE_CLICK_WINDOW,
            None => false,
        };
        self.pressed = true;
        self.press_ts = now;
        self.reported = Reported::empty();
        self.suppress_hold = false;

        let _ = events.push(ButtonEvent::Press);
        if was_double {
            let _ = events.push(ButtonEvent::DoubleClick);
        }
        events
    }

    /// GPIO up-edge. Returns `Release`, plus exactly one of `ClickRelease`
    /// (duration < [`CLICK_MAX_DURATION`]) or a hold-release class derived
    /// from the same thresholds `poll_hold` uses.
    pub fn release(&mut self, now: Tick) -> EventBuf {
        let mut events = EventBuf::new();
        self.pressed = false;
        self.release_ts = Some(now);
        let duration = now.since(self.press_ts);

        let _ = events.push(ButtonEvent::Release);
        if duration < CLICK_MAX_DURATION {
            let _ = events.push(ButtonEvent::ClickRelease);
        } else if !self.suppress_hold {
            if duration > LONG_HOLD_THRESHOLD {
                let _ = events.push(ButtonEvent::LongHoldRelease);
            } else if duration > HOLD_THRESHOLD {
                let _ = events.push(ButtonEvent::HoldRelease);
            }
        }
        events
    }

    /// Called while pressed, typically from the `ButtonHold` task. Emits
    /// each hold class at most once per press, in ascending order as the
    /// thresholds are crossed.
    pub fn poll_hold(&mut self, now: Tick) -> EventBuf {
        let mut events = EventBuf::new();
        if !self.pressed || self.suppress_hold {
            return events;
        }
        let duration = now.since(self.press_ts);

        if !self.reported.contains(Reported::SHORT_HOLD) && duration > SHORT_HOLD_THRESHOLD {
            self.reported.insert(Reported::SHORT_HOLD);
            let _ = events.push(ButtonEvent::ShortHold);
        }
        if !self.reported.contains(Reported::HOLD) && duration > HOLD_THRESHOLD {
            self.reported.insert(Reported::HOLD);
            let _ = events.push(ButtonEvent::Hold);
        }
        if !self.reported.contains(Reported::LONG_HOLD) && duration > LONG_HOLD_THRESHOLD {
            self.reported.insert(Reported::LONG_HOLD);
            let _ = events.push(ButtonEvent::LongHold);
        }
        events
    }
}

impl Default for ButtonState {
    fn default() -> Self {
        Self::new()
    }
}
