//! Haptic pattern player and buzzer state (component O, spec.md §4.13).
//!
//! Ported from `artoo/src/haptic.cpp`'s `Haptic`: a pattern is a list of
//! 16-bit words, low 15 bits a duration in milliseconds, the high bit a
//! motor-off flag. `poll` is driven by the `Haptic` task on its own
//! self-rescheduled deadline, exactly as the original's `task()` does via
//! `Tasks::trigger(Tasks::Haptic)`.

use crate::time::Tick;

const OFF_MASK: u16 = 0x8000;

/// Wrap-safe `now >= deadline`.
fn reached(now: Tick, deadline: Tick) -> bool {
    now.0.wrapping_sub(deadline.0) < u32::MAX / 2
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pattern {
    SingleShort,
    SingleMedium,
    SingleLong,
    UhUh,
    LightDouble,
    LightTriple,
    HeavyTriple,
}

const SINGLE_SHORT: &[u16] = &[20];
const SINGLE_MEDIUM: &[u16] = &[40];
const SINGLE_LONG: &[u16] = &[80];
const UH_UH: &[u16] = &[30, 80 | OFF_MASK, 15];
const LIGHT_DOUBLE: &[u16] = &[50, 100 | OFF_MASK, 50];
const LIGHT_TRIPLE: &[u16] = &[50, 100 | OFF_MASK, 50, 100 | OFF_MASK, 50];
const HEAVY_TRIPLE: &[u16] = &[100, 200 | OFF_MASK, 100, 200 | OFF_MASK, 100];

fn entries(pattern: Pattern) -> &'static [u16] {
    match pattern {
        Pattern::SingleShort => SINGLE_SHORT,
        Pattern::SingleMedium => SINGLE_MEDIUM,
        Pattern::SingleLong => SINGLE_LONG,
        Pattern::UhUh => UH_UH,
        Pattern::LightDouble => LIGHT_DOUBLE,
        Pattern::LightTriple => LIGHT_TRIPLE,
        Pattern::HeavyTriple => HEAVY_TRIPLE,
    }
}

/// What [`HapticPlayer::poll`] wants the caller to do with the vibration
/// motor GPIO this call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HapticAction {
    /// Not time yet; reschedule the task for `deadline` without touching
    /// the GPIO.
    Wait,
    /// Drive the motor to this level; `deadline` is when to poll again.
    SetMotor { on: bool, deadline: Tick },
    /// Pattern exhausted: motor is now off, nothing more to schedule.
    Stopped,
}

pub struct HapticPlayer {
    entries: &'static [u16],
    index: usize,
    motor_on: bool,
    stop_deadline: Tick,
}

impl HapticPlayer {
    pub const fn new() -> Self {
        Self { entries: &[], index: 0, motor_on: false, stop_deadline: Tick::ZERO }
    }

    pub fn playing(&self) -> bool {
        self.index < self.entries.len() || self.motor_on
    }

    /// Start a pattern. Ignored (matching the original) while another
    /// pattern is already playing, or while the system isn't in its
    /// `Running` power state.
    pub fn start(&mut self, pattern: Pattern, system_running: bool) -> bool {
        if !system_running || self.playing() {
            return false;
        }
        self.entries = entries(pattern);
        self.index = 0;
        true
    }

    pub fn stop(&mut self) {
        self.entries = &[];
        self.index = self.entries.len();
        self.motor_on = false;
    }

    /// Advance the pattern. Call once when the task fires; `now` is
    /// compared against the deadline set by the previous call.
    pub fn poll(&mut self, now: Tick) -> HapticAction {
        if self.playing() && !reached(now, self.stop_deadline) {
            return HapticAction::Wait;
        }
        self.next_entry(now)
    }

    fn next_entry(&mut self, now: Tick) -> HapticAction {
        if self.index >= self.entries.len() {
            self.stop();
            return HapticAction::Stopped;
        }
        let entry = self.entries[self.index];
        self.index += 1;
        self.motor_on = entry & OFF_MASK == 0;
        let duration_ms = entry & !OFF_MASK;
        self.stop_deadline = now.add(duration_ms as u32);
        HapticAction::SetMotor { on: self.motor_on, deadline: self.stop_deadline }
    }
}

impl Default for HapticPlayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware-agnostic buzzer state (factory test only, spec.md §4.13).
/// `main.rs` programs the actual timer-PWM registers; this just tracks
/// the desired frequency/enabled state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuzzerState {
    pub frequency_hz: u32,
    pub enabled: bool,
}

impl BuzzerState {
    pub const fn new() -> Self {
        Self { frequency_hz: 0, enabled: false }
    }

    pub fn set_frequency(&mut self, hz: u32) {
        self.frequency_hz = hz;
    }

    pub fn play(&mut self) {
        self.enabled = true;
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ms;

    #[test]
    fn single_short_plays_one_entry_then_stops() {
        let mut h = HapticPlayer::new();
        assert!(h.start(Pattern::SingleShort, true));
        let a = h.poll(Tick(0));
        assert_eq!(a, HapticAction::SetMotor { on: true, deadline: Tick(20) });
        assert!(h.playing());

        assert_eq!(h.poll(Tick(ms(10))), HapticAction::Wait);
        assert_eq!(h.poll(Tick(20)), HapticAction::Stopped);
        assert!(!h.playing());
    }

    #[test]
    fn uh_uh_alternates_motor_on_and_off() {
        let mut h = HapticPlayer::new();
        h.start(Pattern::UhUh, true);
        let a1 = h.poll(Tick(0));
        assert_eq!(a1, HapticAction::SetMotor { on: true, deadline: Tick(30) });
        let a2 = h.poll(Tick(30));
        assert_eq!(a2, HapticAction::SetMotor { on: false, deadline: Tick(110) });
        let a3 = h.poll(Tick(110));
        assert_eq!(a3, HapticAction::SetMotor { on: true, deadline: Tick(125) });
        assert_eq!(h.poll(Tick(125)), HapticAction::Stopped);
    }

    #[test]
    fn ignored_while_already_playing() {
        let mut h = HapticPlayer::new();
        assert!(h.start(Pattern::SingleShort, true));
        assert!(!h.start(Pattern::SingleLong, true));
    }

    #[test]
    fn ignored_while_not_running() {
        let mut h = HapticPlayer::new();
        assert!(!h.start(Pattern::SingleShort, false));
        assert!(!h.playing());
    }

    #[test]
    fn buzzer_state_tracks_freq_and_enable() {
        let mut b = BuzzerState::new();
        b.set_frequency(2_000);
        b.play();
        assert_eq!(b, BuzzerState { frequency_hz: 2_000, enabled: true });
        b.stop();
        assert!(!b.enabled);
    }
}
