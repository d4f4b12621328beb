//! Vehicle telemetry snapshot and battery-phase hysteresis (component K,
//! spec.md §4.9, §8 invariant 7).
//!
//! Ported from the battery-phase table in the original `flightmanager`'s
//! `batteryStates[]`/`updateBatteryPhase` (see `artoo/src/flightmanager.cpp`):
//! four phases, each with a `(min, max]` admissible window; a level
//! falling outside the *current* phase's window triggers a scan for the
//! new phase, keyed only by `level > phase.min`, in `Normal..Failsafe`
//! order. That two-step shape (not a single min/max compare) is what
//! gives the hysteresis its asymmetry.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatteryPhase {
    Normal,
    Low,
    Critical,
    Failsafe,
}

const BATTERY_MIN: i8 = -100;
const BATTERY_MAX: i8 = 100;
const FAILSAFE: i8 = 10;
const CRITICAL: i8 = 15;
const LOW: i8 = 25;
const LOW_DISMISS: i8 = 35;
const DISMISS_BUFFER: i8 = 3;

struct PhaseWindow {
    phase: BatteryPhase,
    min: i8,
    max: i8,
}

const PHASES: [PhaseWindow; 4] = [
    PhaseWindow { phase: BatteryPhase::Normal, min: LOW, max: BATTERY_MAX },
    PhaseWindow { phase: BatteryPhase::Low, min: CRITICAL, max: LOW_DISMISS },
    PhaseWindow { phase: BatteryPhase::Critical, min: FAILSAFE, max: CRITICAL + DISMISS_BUFFER },
    PhaseWindow { phase: BatteryPhase::Failsafe, min: BATTERY_MIN, max: FAILSAFE + DISMISS_BUFFER },
];

pub struct BatteryPhaseTracker {
    phase: BatteryPhase,
}

impl BatteryPhaseTracker {
    pub const fn new() -> Self {
        Self { phase: BatteryPhase::Normal }
    }

    pub fn phase(&self) -> BatteryPhase {
        self.phase
    }

    /// Feed one system-status battery-percent reading. Returns the new
    /// phase if this reading moved it out of its current hysteresis
    /// window, else `None`.
    pub fn update(&mut self, battery_pct: i8) -> Option<BatteryPhase> {
        let level = battery_pct.clamp(BATTERY_MIN, BATTERY_MAX);
        let current = PHASES.iter().find(|w| w.phase == self.phase).unwrap();
        let still_in_window = level > current.min && level <= current.max;
        if still_in_window {
            return None;
        }
        for window in PHASES.iter() {
            if level > window.min && window.phase != self.phase {
                self.phase = window.phase;
                return Some(window.phase);
            }
        }
        None
    }
}

impl Default for BatteryPhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpsFixType {
    NoFix,
    TwoD,
    ThreeD,
}

/// The subset of EKF flag bits the session cares about (spec.md §4.9
/// design note: "the active path uses EKF flags", GPS-lost-by-fix-type
/// is intentionally not wired in parallel — see DESIGN.md).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EkfFlags {
    pub position_ok: bool,
    pub predicted_ok: bool,
}

/// Widely-read snapshot of the fields the flight-link session tracks
/// (spec.md §3: "telemetry snapshot"). Owned by [`crate::flight_link`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TelemetrySnapshot {
    pub battery_pct: Option<i8>,
    pub gps_fix: Option<GpsFixType>,
    pub satellites: u8,
    pub altitude_m: f32,
    pub airspeed_mps: f32,
    pub groundspeed_mps: f32,
    pub rssi_bars: u8,
    pub ekf: EkfFlags,
}

/// Bucket a raw RSSI percentage (0-100) into the 0..5 bar count the UI
/// displays (spec.md §4.9: "bucketed bar count (0..5)").
pub fn rssi_bars(rssi_pct: u8) -> u8 {
    ((rssi_pct as u32 * 5) / 100).min(5) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_to_low_at_twenty_five() {
        let mut t = BatteryPhaseTracker::new();
        assert_eq!(t.update(80), None);
        assert_eq!(t.update(25), Some(BatteryPhase::Low));
    }

    #[test]
    fn low_to_normal_requires_climbing_past_dismiss() {
        let mut t = BatteryPhaseTracker::new();
        t.update(25); // -> Low
        assert_eq!(t.phase(), BatteryPhase::Low);
        assert_eq!(t.update(35), None); // still inside Low's (15,35] window
        assert_eq!(t.update(36), Some(BatteryPhase::Normal));
    }

    #[test]
    fn does_not_oscillate_on_single_unit_change_across_a_boundary() {
        let mut t = BatteryPhaseTracker::new();
        t.update(25); // -> Low
        assert_eq!(t.update(26), None);
        assert_eq!(t.update(24), None);
        assert_eq!(t.phase(), BatteryPhase::Low);
    }

    #[test]
    fn descends_through_critical_to_failsafe() {
        let mut t = BatteryPhaseTracker::new();
        t.update(25); // Low
        assert_eq!(t.update(15), Some(BatteryPhase::Critical));
        assert_eq!(t.update(10), Some(BatteryPhase::Failsafe));
    }

    #[test]
    fn rssi_bucketing() {
        assert_eq!(rssi_bars(0), 0);
        assert_eq!(rssi_bars(100), 5);
        assert_eq!(rssi_bars(50), 2);
    }
}
