//! Power manager (component N, spec.md §4.12).
//!
//! Ported from `artoo/src/powermanager.cpp`'s `PowerManager`, recast from
//! its blocking `waitForCompleteStartup()` spin loop into tick-polled
//! state the cooperative dispatcher can drive a step at a time: each
//! call advances the state machine and returns what, if anything, the
//! caller (main.rs) needs to act on — assert a GPIO, raise a UI event,
//! reset the MCU.

use crate::time::{ms, s, Tick};

pub const POWER_STATUS_MILLIS: u32 = ms(4_000);
pub const GENEROUS_COMPANION_BOOT: u32 = s(40);
pub const RC_DISCHARGE_MILLIS: u32 = ms(2_500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysState {
    Boot,
    Running,
    Idle,
}

/// Why the MCU is currently booting (spec.md §4.12's three cold-boot
/// branches).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetCause {
    /// NRST pin asserted (bootloader path) or a software reset carrying
    /// the UART-wakeup magic in the backup register.
    SkipBootCheck,
    Normal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BootSubState {
    /// Charger present at boot and this wasn't our own software reset:
    /// show "charger connected", shut down unless power is held long.
    ChargerConnected,
    /// Battery at or below critical with no charger: show "too low",
    /// shut down unconditionally after the status duration.
    BatteryTooLow,
    /// Normal path: battery-check screen, commit on long-hold or after
    /// the status duration elapses.
    BatteryCheck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootAction {
    /// Nothing resolved yet; keep polling.
    Continue,
    EnterRunning,
    Shutdown,
}

pub struct PowerManager {
    state: SysState,
    boot_sub: Option<BootSubState>,
    boot_started: Tick,
    notify_shutdown: bool,
    companion_enabled: bool,
    power_released_at: Option<Tick>,
}

impl PowerManager {
    pub const fn new() -> Self {
        Self {
            state: SysState::Boot,
            boot_sub: None,
            boot_started: Tick::ZERO,
            notify_shutdown: false,
            companion_enabled: false,
            power_released_at: None,
        }
    }

    pub fn state(&self) -> SysState {
        self.state
    }

    pub fn companion_enabled(&self) -> bool {
        self.companion_enabled
    }

    /// Begin the cold-boot battery-check sub-flow. Returns
    /// [`BootAction::EnterRunning`] immediately for the two skip-ahead
    /// cases (spec.md §4.12); otherwise primes a sub-state for
    /// [`poll_boot`] to advance.
    pub fn begin_boot(&mut self, now: Tick, cause: ResetCause, charger_present: bool, battery_critical: bool) -> BootAction {
        self.boot_started = now;
        if cause == ResetCause::SkipBootCheck {
            return BootAction::EnterRunning;
        }

        if charger_present {
            self.boot_sub = Some(BootSubState::ChargerConnected);
        } else if battery_critical {
            self.boot_sub = Some(BootSubState::BatteryTooLow);
        } else {
            self.boot_sub = Some(BootSubState::BatteryCheck);
        }
        BootAction::Continue
    }

    /// Poll the boot sub-flow once. `power_held_long` is true once the
    /// power button's press duration has crossed the long-hold
    /// threshold; `companion_link_up` short-circuits straight to
    /// `EnterRunning` if the companion is already talking to us.
    pub fn poll_boot(&mut self, now: Tick, power_held_long: bool, companion_link_up: bool) -> BootAction {
        let Some(sub) = self.boot_sub else { return BootAction::Continue };

        if companion_link_up {
            self.boot_sub = None;
            return BootAction::EnterRunning;
        }

        let deadline_passed = now.has_elapsed_since(self.boot_started, POWER_STATUS_MILLIS);
        match sub {
            BootSubState::ChargerConnected | BootSubState::BatteryCheck => {
                if power_held_long {
                    self.boot_sub = None;
                    return BootAction::EnterRunning;
                }
                if deadline_passed {
                    self.boot_sub = None;
                    return BootAction::Shutdown;
                }
                BootAction::Continue
            }
            BootSubState::BatteryTooLow => {
                if deadline_passed {
                    self.boot_sub = None;
                    return BootAction::Shutdown;
                }
                BootAction::Continue
            }
        }
    }

    pub fn enter_running(&mut self) {
        self.state = SysState::Running;
        self.companion_enabled = true;
    }

    /// Power button press while `Idle`: trigger a full system reset.
    pub fn on_power_button_press_while_idle(&self) -> bool {
        self.state == SysState::Idle
    }

    /// Whether a shutdown request is currently allowed (spec.md §4.12:
    /// vetoed during an update or before the companion has reported in,
    /// up to a generous boot timeout).
    pub fn can_shut_down(&self, now: Tick, update_in_progress: bool, companion_connected: bool) -> bool {
        if !self.companion_enabled {
            return true;
        }
        if update_in_progress {
            return false;
        }
        if now.has_elapsed_since(self.boot_started, GENEROUS_COMPANION_BOOT) {
            return true;
        }
        companion_connected
    }

    /// Request shutdown; queues the shutdown-notify frame if allowed.
    /// Returns whether the request was accepted.
    pub fn request_shutdown(&mut self, now: Tick, update_in_progress: bool, companion_connected: bool) -> bool {
        if !self.can_shut_down(now, update_in_progress, companion_connected) {
            return false;
        }
        self.notify_shutdown = true;
        true
    }

    /// Producer-chain step for the `ShutdownRequest` frame.
    pub fn produce_shutdown_notify(&mut self) -> bool {
        if self.notify_shutdown {
            self.notify_shutdown = false;
            true
        } else {
            false
        }
    }

    /// Shutdown's user-facing sequence has finished (immediately, if
    /// `Running` was never entered). Commits to `Idle`; the caller
    /// disables the companion rail and TX.
    pub fn shutdown_sequence_complete(&mut self) {
        self.state = SysState::Idle;
        self.companion_enabled = false;
    }

    pub fn note_power_button_released(&mut self, now: Tick) {
        self.power_released_at = Some(now);
    }

    /// Whether the power-button RC filter has discharged enough to
    /// safely release the keep-on GPIO (spec.md §4.12: "≥2.5s after
    /// power button release").
    pub fn rc_discharged(&self, now: Tick, power_button_pressed: bool) -> bool {
        if power_button_pressed {
            return false;
        }
        match self.power_released_at {
            Some(t) => now.has_elapsed_since(t, RC_DISCHARGE_MILLIS),
            None => false,
        }
    }

    /// The system is alive well past when it expected to shut down
    /// (spec.md §9 design note on extended-shutdown). Returns `true` if
    /// the caller should force a reset — only when the charger has
    /// since been removed.
    pub fn on_extended_shutdown(&self, charger_present: bool) -> bool {
        !charger_present
    }
}

impl Default for PowerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_boot_check_enters_running_immediately() {
        let mut pm = PowerManager::new();
        let action = pm.begin_boot(Tick(0), ResetCause::SkipBootCheck, false, false);
        assert_eq!(action, BootAction::EnterRunning);
    }

    #[test]
    fn battery_too_low_shuts_down_after_status_duration() {
        let mut pm = PowerManager::new();
        pm.begin_boot(Tick(0), ResetCause::Normal, false, true);
        assert_eq!(pm.poll_boot(Tick(ms(1_000)), false, false), BootAction::Continue);
        assert_eq!(pm.poll_boot(Tick(POWER_STATUS_MILLIS + 1), false, false), BootAction::Shutdown);
    }

    #[test]
    fn holding_power_commits_to_running_before_deadline() {
        let mut pm = PowerManager::new();
        pm.begin_boot(Tick(0), ResetCause::Normal, false, false);
        assert_eq!(pm.poll_boot(Tick(ms(500)), true, false), BootAction::EnterRunning);
    }

    #[test]
    fn companion_already_talking_short_circuits_to_running() {
        let mut pm = PowerManager::new();
        pm.begin_boot(Tick(0), ResetCause::Normal, false, false);
        assert_eq!(pm.poll_boot(Tick(ms(10)), false, true), BootAction::EnterRunning);
    }

    #[test]
    fn cannot_shut_down_mid_update() {
        let mut pm = PowerManager::new();
        pm.enter_running();
        assert!(!pm.can_shut_down(Tick(0), true, true));
    }

    #[test]
    fn shutdown_vetoed_until_companion_reports_in_or_timeout() {
        let mut pm = PowerManager::new();
        pm.enter_running();
        assert!(!pm.can_shut_down(Tick(ms(1_000)), false, false));
        assert!(pm.can_shut_down(Tick(ms(1_000)), false, true));
        assert!(pm.can_shut_down(Tick(GENEROUS_COMPANION_BOOT + 1), false, false));
    }

    #[test]
    fn rc_discharge_requires_delay_after_release() {
        let mut pm = PowerManager::new();
        pm.note_power_button_released(Tick(0));
        assert!(!pm.rc_discharged(Tick(ms(1_000)), false));
        assert!(pm.rc_discharged(Tick(RC_DISCHARGE_MILLIS + 1), false));
    }

    #[test]
    fn rc_discharge_false_while_still_pressed() {
        let pm = PowerManager::new();
        assert!(!pm.rc_discharged(Tick(ms(10_000)), true));
    }

    #[test]
    fn extended_shutdown_resets_only_if_charger_gone() {
        let pm = PowerManager::new();
        assert!(!pm.on_extended_shutdown(true));
        assert!(pm.on_extended_shutdown(false));
    }
}
