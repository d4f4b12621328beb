//! Idle timeout, manual override, and host-driven lockout (component Q,
//! spec.md §4.14, §4.15).
//!
//! Three small independent policies, each ported from its own original:
//! `artoo/src/idletimeout.cpp`, `manualoverride.cpp`, `lockout.cpp`. They
//! share nothing but the button-combo-detection shape, so each gets its
//! own struct rather than a forced common abstraction.

use crate::board::ButtonId;
use crate::button::ButtonEvent;
use crate::ui::UiEvent;

pub const HEARTBEAT_HZ: u32 = 50;
pub const IDLE_WARN_TICKS: u32 = HEARTBEAT_HZ * 60 * 10;
pub const IDLE_TIMEOUT_TICKS: u32 = IDLE_WARN_TICKS + HEARTBEAT_HZ * 7;

/// ArduCopter's `ALT_HOLD` flight-mode number, the mode manual override
/// drives locally (spec.md §4.15).
pub const ALT_HOLD_MODE: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleAction {
    None,
    Warn,
    Shutdown,
}

/// A + Pause(Loiter) + CameraClick, all held long, permanently disables
/// idle-timeout counting for this boot (spec.md §4.14).
pub struct IdleTimeout {
    ticker: u32,
    user_disabled: bool,
    a_held: bool,
    pause_held: bool,
    camera_held: bool,
}

impl IdleTimeout {
    pub const fn new() -> Self {
        Self { ticker: 0, user_disabled: false, a_held: false, pause_held: false, camera_held: false }
    }

    pub fn user_disabled(&self) -> bool {
        self.user_disabled
    }

    /// Feed every button event; only A/Pause/CameraClick long-hold state
    /// matters here.
    pub fn on_button_event(&mut self, button: ButtonId, event: ButtonEvent) {
        if self.user_disabled {
            return;
        }
        let held = match event {
            ButtonEvent::LongHold => Some(true),
            ButtonEvent::Release | ButtonEvent::LongHoldRelease => Some(false),
            _ => None,
        };
        let Some(held) = held else { return };
        match button {
            ButtonId::A => self.a_held = held,
            ButtonId::Loiter => self.pause_held = held,
            ButtonId::CameraClick => self.camera_held = held,
            _ => return,
        }
        if self.a_held && self.pause_held && self.camera_held {
            self.user_disabled = true;
        }
    }

    fn enabled(&self, update_in_progress: bool, flight_link_connected: bool) -> bool {
        !self.user_disabled && !update_in_progress && !flight_link_connected
    }

    /// Call once per 50 Hz heartbeat.
    pub fn tick(&mut self, update_in_progress: bool, flight_link_connected: bool) -> IdleAction {
        if !self.enabled(update_in_progress, flight_link_connected) {
            self.ticker = 0;
            return IdleAction::None;
        }
        self.ticker += 1;
        match self.ticker {
            t if t == IDLE_WARN_TICKS => IdleAction::Warn,
            t if t == IDLE_TIMEOUT_TICKS => IdleAction::Shutdown,
            _ => IdleAction::None,
        }
    }

    /// Any button press resets the counter (spec.md §4.14).
    pub fn reset(&mut self) {
        self.ticker = 0;
    }
}

impl Default for IdleTimeout {
    fn default() -> Self {
        Self::new()
    }
}

/// A + B + Fly + RTL + Pause(Loiter), all held long simultaneously,
/// latches manual-override mode until reboot (spec.md §4.15).
pub struct ManualOverride {
    enabled: bool,
    a_held: bool,
    b_held: bool,
    fly_held: bool,
    rtl_held: bool,
    pause_held: bool,
}

impl ManualOverride {
    pub const fn new() -> Self {
        Self { enabled: false, a_held: false, b_held: false, fly_held: false, rtl_held: false, pause_held: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn on_button_event(&mut self, button: ButtonId, event: ButtonEvent) {
        if self.enabled {
            return;
        }
        let held = match event {
            ButtonEvent::LongHold => Some(true),
            ButtonEvent::Release | ButtonEvent::LongHoldRelease => Some(false),
            _ => None,
        };
        let Some(held) = held else { return };
        match button {
            ButtonId::A => self.a_held = held,
            ButtonId::B => self.b_held = held,
            ButtonId::Fly => self.fly_held = held,
            ButtonId::Rtl => self.rtl_held = held,
            ButtonId::Loiter => self.pause_held = held,
            _ => return,
        }
        if self.a_held && self.b_held && self.fly_held && self.rtl_held && self.pause_held {
            self.enabled = true;
        }
    }

    /// `true` while engaged and the event was an A-button click — the
    /// caller should locally post `SetFlightMode(ALT_HOLD_MODE)` and
    /// suppress forwarding the button event to the host.
    pub fn on_button_event_for_dispatch(&self, button: ButtonId, event: ButtonEvent) -> bool {
        self.enabled && button == ButtonId::A && event == ButtonEvent::ClickRelease
    }
}

impl Default for ManualOverride {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-driven lockout (spec.md §6.2 tag 19, `LockoutState`). Locked
/// means the device rejects user-initiated vehicle commands; the UI
/// layer is responsible for the actual gating, this just tracks state
/// and edge-detects.
pub struct Lockout {
    locked: bool,
}

impl Lockout {
    pub const fn new() -> Self {
        Self { locked: false }
    }

    pub fn is_unlocked(&self) -> bool {
        !self.locked
    }

    /// A `LockoutState` frame arrived. Returns a UI event on an actual
    /// state change, suppressed while an update is in progress (the
    /// caller waits for the update's own completion event instead).
    pub fn on_host_message(&mut self, locked: bool, update_in_progress: bool) -> Option<UiEvent> {
        if self.locked == locked {
            return None;
        }
        self.locked = locked;
        if update_in_progress {
            return None;
        }
        Some(UiEvent::SystemLockoutStateChanged)
    }
}

impl Default for Lockout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_warn_then_timeout_at_exact_ticks() {
        let mut it = IdleTimeout::new();
        let mut action = IdleAction::None;
        for _ in 0..IDLE_WARN_TICKS {
            action = it.tick(false, false);
        }
        assert_eq!(action, IdleAction::Warn);
        for _ in 0..(IDLE_TIMEOUT_TICKS - IDLE_WARN_TICKS - 1) {
            action = it.tick(false, false);
        }
        assert_eq!(action, IdleAction::None);
        assert_eq!(it.tick(false, false), IdleAction::Shutdown);
    }

    #[test]
    fn flight_link_connected_suppresses_counting() {
        let mut it = IdleTimeout::new();
        for _ in 0..1000 {
            assert_eq!(it.tick(false, true), IdleAction::None);
        }
    }

    #[test]
    fn combo_disables_idle_timeout_permanently() {
        let mut it = IdleTimeout::new();
        it.on_button_event(ButtonId::A, ButtonEvent::LongHold);
        it.on_button_event(ButtonId::Loiter, ButtonEvent::LongHold);
        it.on_button_event(ButtonId::CameraClick, ButtonEvent::LongHold);
        assert!(it.user_disabled());
        for _ in 0..IDLE_WARN_TICKS {
            assert_eq!(it.tick(false, false), IdleAction::None);
        }
    }

    #[test]
    fn manual_override_requires_all_five_held() {
        let mut mo = ManualOverride::new();
        mo.on_button_event(ButtonId::A, ButtonEvent::LongHold);
        mo.on_button_event(ButtonId::B, ButtonEvent::LongHold);
        mo.on_button_event(ButtonId::Fly, ButtonEvent::LongHold);
        mo.on_button_event(ButtonId::Rtl, ButtonEvent::LongHold);
        assert!(!mo.is_enabled());
        mo.on_button_event(ButtonId::Loiter, ButtonEvent::LongHold);
        assert!(mo.is_enabled());
    }

    #[test]
    fn manual_override_latches_even_if_buttons_release() {
        let mut mo = ManualOverride::new();
        for b in [ButtonId::A, ButtonId::B, ButtonId::Fly, ButtonId::Rtl, ButtonId::Loiter] {
            mo.on_button_event(b, ButtonEvent::LongHold);
        }
        mo.on_button_event(ButtonId::A, ButtonEvent::LongHoldRelease);
        assert!(mo.is_enabled());
    }

    #[test]
    fn a_click_drives_alt_hold_only_once_engaged() {
        let mut mo = ManualOverride::new();
        assert!(!mo.on_button_event_for_dispatch(ButtonId::A, ButtonEvent::ClickRelease));
        for b in [ButtonId::A, ButtonId::B, ButtonId::Fly, ButtonId::Rtl, ButtonId::Loiter] {
            mo.on_button_event(b, ButtonEvent::LongHold);
        }
        assert!(mo.on_button_event_for_dispatch(ButtonId::A, ButtonEvent::ClickRelease));
        assert!(!mo.on_button_event_for_dispatch(ButtonId::B, ButtonEvent::ClickRelease));
    }

    #[test]
    fn lockout_raises_event_only_on_change() {
        let mut l = Lockout::new();
        assert!(l.is_unlocked());
        assert_eq!(l.on_host_message(true, false), Some(UiEvent::SystemLockoutStateChanged));
        assert!(!l.is_unlocked());
        assert_eq!(l.on_host_message(true, false), None);
    }

    #[test]
    fn lockout_change_suppressed_during_update() {
        let mut l = Lockout::new();
        assert_eq!(l.on_host_message(true, true), None);
        assert!(!l.is_unlocked());
    }
}
