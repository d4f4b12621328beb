//! Camera-gimbal control (component M, spec.md §4.11).
//!
//! Ported from `artoo/src/cameracontrol.cpp`'s `CameraControl`: a 50 Hz
//! rate integrator with circular ease-out near the travel limits, preset
//! animations driven by an ease-in-out-quad position tween, and a
//! gimbal-follower mode that eases toward the vehicle's reported mount
//! angle once the user has been quiet for a few seconds.

use crate::time::{ms, Tick};

pub const MIN_ANGLE: f32 = 0.0;
pub const MAX_ANGLE: f32 = 90.0;
pub const INIT_ANGLE: f32 = 80.0;
pub const RATE_MARGIN_DEG: f32 = 30.0;
pub const CAMERA_GAIN: f32 = 45.0;
pub const RATE_ACCEL_LIMIT: f32 = 6.0;

pub const MIN_SWEEP_SEC_DEFAULT: u8 = 3;
pub const MAX_SWEEP_SEC_DEFAULT: u8 = 90;

pub const GIMBAL_FOLLOW_QUIET_PERIOD: u32 = crate::time::s(3);
pub const GIMBAL_FOLLOWER_TWEEN_MS: u32 = ms(250);
pub const RETURN_TO_INIT_TWEEN_MS: u32 = crate::time::s(3);

/// Per-tick position change below which a tween target is considered
/// already reached (ported from `isWithin(cameraAngle, targetAngle,
/// 1.0f)`; gimbal-follower reuses a tighter bound implicitly via its
/// short tween duration).
const TWEEN_SKIP_EPSILON: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresetId {
    Preset1,
    Preset2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TweenSource {
    Preset,
    GimbalFollower,
    ReturnInit,
}

struct PositionTween {
    source: TweenSource,
    from: f32,
    to: f32,
    duration_ticks: u32,
    elapsed_ticks: u32,
}

impl PositionTween {
    fn is_done(&self) -> bool {
        self.elapsed_ticks >= self.duration_ticks
    }

    /// Ease-in-out-quad, `t` normalized to [0,1].
    fn step(&mut self) -> f32 {
        let t = (self.elapsed_ticks as f32 / self.duration_ticks.max(1) as f32).min(1.0);
        self.elapsed_ticks += 1;
        let eased = if t < 0.5 { 2.0 * t * t } else { 1.0 - (-2.0 * t + 2.0).powi(2) / 2.0 };
        self.from + (self.to - self.from) * eased
    }
}

/// `easeOutCirc` applied to the rate-limiting margin near either end of
/// travel (ported from `CameraControl::maxRate`).
fn ease_out_circ(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    (1.0 - (t - 1.0).powi(2)).sqrt()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresetConfig {
    pub target_deg: [i16; 2], // hundredths of a degree, per PresetId; i16::MIN == unset
}

impl PresetConfig {
    pub const UNSET: i16 = i16::MIN;

    pub const fn default_unset() -> Self {
        Self { target_deg: [Self::UNSET, Self::UNSET] }
    }

    fn get(&self, id: PresetId) -> Option<f32> {
        let raw = self.target_deg[id as usize];
        if raw == Self::UNSET {
            None
        } else {
            Some(raw as f32 / 100.0)
        }
    }

    fn set(&mut self, id: PresetId, angle_deg: f32) {
        self.target_deg[id as usize] = (angle_deg * 100.0) as i16;
    }
}

pub struct GimbalController {
    angle: f32,
    rate: f32,
    tween: Option<PositionTween>,
    input_active: bool,
    last_input_tick: Tick,
    rate_dial_filtered_ms: f32,
    min_sweep_ms: u32,
    max_sweep_ms: u32,
    presets: PresetConfig,
    follow_suppressed: bool,
}

impl GimbalController {
    pub fn new() -> Self {
        Self {
            angle: INIT_ANGLE,
            rate: 0.0,
            tween: None,
            input_active: false,
            last_input_tick: Tick::ZERO,
            rate_dial_filtered_ms: (MIN_SWEEP_SEC_DEFAULT as f32 + MAX_SWEEP_SEC_DEFAULT as f32) * 500.0,
            min_sweep_ms: MIN_SWEEP_SEC_DEFAULT as u32 * 1000,
            max_sweep_ms: MAX_SWEEP_SEC_DEFAULT as u32 * 1000,
            presets: PresetConfig::default_unset(),
            follow_suppressed: false,
        }
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn is_active(&self) -> bool {
        self.input_active || self.tween.is_some()
    }

    pub fn set_sweep_config(&mut self, min_sec: u8, max_sec: u8) {
        self.min_sweep_ms = min_sec as u32 * 1000;
        self.max_sweep_ms = max_sec as u32 * 1000;
    }

    /// Set by the "set shot info" downlink (spec.md §6.2 tag 17): a shot
    /// name containing `FOLLOW` suppresses gimbal-follower.
    pub fn set_shot_name(&mut self, name: &str) {
        self.follow_suppressed = name.contains("FOLLOW");
    }

    /// 50 Hz tick. `gimbal_y` and `gimbal_rate` are the stick's
    /// angular/linear outputs (spec.md §4.4); returns `true` if the
    /// gimbal hit a travel limit under active user input (caller plays a
    /// short haptic).
    pub fn tick(&mut self, now: Tick, gimbal_y: f32, gimbal_rate_dial: f32) -> bool {
        let new_input_active = gimbal_y != 0.0;
        if new_input_active && !self.input_active {
            self.last_input_tick = now;
        }
        self.input_active = new_input_active;

        if self.input_active {
            self.tween = None;
        }

        let new_angle = if let Some(tween) = &mut self.tween {
            if tween.is_done() {
                self.tween = None;
                self.angle
            } else {
                tween.step()
            }
        } else {
            self.rate = self.update_rate(gimbal_y);
            self.angle + self.rate * 0.02
        };

        let clamped = new_angle.clamp(MIN_ANGLE, MAX_ANGLE);
        // A clamp that actually changed the value means the integrator
        // (or tween) overshot the travel limit this tick.
        let hit_limit = self.input_active && new_angle != clamped;
        self.angle = clamped;

        let _ = gimbal_rate_dial;
        hit_limit
    }

    fn update_rate(&self, input_rate: f32) -> f32 {
        let max_rate = self.max_rate(input_rate);
        let desired = max_rate * (input_rate * CAMERA_GAIN);
        if desired > self.rate {
            (self.rate + RATE_ACCEL_LIMIT).min(desired)
        } else if desired < self.rate {
            (self.rate - RATE_ACCEL_LIMIT).max(desired)
        } else {
            desired
        }
    }

    fn max_rate(&self, input_rate: f32) -> f32 {
        if self.angle < RATE_MARGIN_DEG && input_rate < 0.0 {
            ease_out_circ(self.angle / RATE_MARGIN_DEG)
        } else if self.angle > MAX_ANGLE - RATE_MARGIN_DEG && input_rate > 0.0 {
            ease_out_circ((MAX_ANGLE - self.angle) / RATE_MARGIN_DEG)
        } else {
            1.0
        }
    }

    /// Feed the rate dial's smoothed sweep time through a slow IIR filter
    /// (alpha = 0.7, matching `MovingAvgFilter::Alpha(0.7)`). Call from a
    /// lower-rate task, not every 50 Hz tick.
    pub fn update_rate_dial(&mut self, gimbal_rate_dial: f32) {
        let sweep_ms = self.sweep_millis(self.preset_distance(), gimbal_rate_dial) as f32;
        self.rate_dial_filtered_ms += (sweep_ms - self.rate_dial_filtered_ms) * 0.3;
    }

    fn preset_distance(&self) -> f32 {
        match (self.presets.get(PresetId::Preset1), self.presets.get(PresetId::Preset2)) {
            (Some(a), Some(b)) => (a - b).abs(),
            _ => 0.0,
        }
    }

    fn sweep_millis(&self, distance_deg: f32, rate_dial: f32) -> u32 {
        let max_time = self.min_sweep_ms as f32 + rate_dial.clamp(0.0, 1.0) * (self.max_sweep_ms - self.min_sweep_ms) as f32;
        let distance_scale = (distance_deg / MAX_ANGLE).clamp(0.0, 1.0);
        (max_time * distance_scale) as u32
    }

    pub fn smoothed_sweep_seconds(&self) -> u32 {
        (self.rate_dial_filtered_ms / 1000.0).round() as u32
    }

    /// `ClickRelease` on a preset button: ease to the stored target over
    /// a duration scaled by distance and the current rate dial.
    pub fn begin_preset(&mut self, id: PresetId, rate_dial: f32) {
        let Some(target) = self.presets.get(id) else { return };
        if (target - self.angle).abs() <= TWEEN_SKIP_EPSILON {
            return;
        }
        let duration_ms = self.sweep_millis((target - self.angle).abs(), rate_dial).max(1);
        self.begin_ease(target, duration_ms, TweenSource::Preset);
    }

    /// `Hold` on a preset button: capture the current angle.
    pub fn capture_preset(&mut self, id: PresetId) {
        self.presets.set(id, self.angle);
    }

    pub fn presets(&self) -> PresetConfig {
        self.presets
    }

    pub fn return_to_init(&mut self) {
        if self.is_active() {
            return;
        }
        self.begin_ease(INIT_ANGLE, RETURN_TO_INIT_TWEEN_MS, TweenSource::ReturnInit);
    }

    /// Called when a fresh vehicle mount-angle report arrives. Starts a
    /// short ease toward it unless user input, a non-follower tween, the
    /// quiet period, or a `FOLLOW`-named shot suppress it.
    pub fn on_vehicle_angle_report(&mut self, now: Tick, reported_angle_deg: f32) {
        if self.follow_suppressed || self.input_active {
            return;
        }
        if !now.has_elapsed_since(self.last_input_tick, GIMBAL_FOLLOW_QUIET_PERIOD) {
            return;
        }
        if let Some(tween) = &self.tween {
            if tween.source != TweenSource::GimbalFollower {
                return;
            }
        }
        self.begin_ease(reported_angle_deg, GIMBAL_FOLLOWER_TWEEN_MS, TweenSource::GimbalFollower);
    }

    fn begin_ease(&mut self, target: f32, duration_ms: u32, source: TweenSource) {
        if (self.angle - target).abs() <= TWEEN_SKIP_EPSILON {
            return;
        }
        let duration_ticks = (duration_ms / 20).max(1);
        self.tween = Some(PositionTween { source, from: self.angle, to: target, duration_ticks, elapsed_ticks: 0 });
    }
}

impl Default for GimbalController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_init_angle() {
        let g = GimbalController::new();
        assert_eq!(g.angle(), INIT_ANGLE);
    }

    #[test]
    fn user_input_integrates_rate_and_clamps() {
        let mut g = GimbalController::new();
        for _ in 0..500 {
            g.tick(Tick(0), -1.0, 0.5);
        }
        assert_eq!(g.angle(), MIN_ANGLE);
    }

    #[test]
    fn no_input_holds_angle() {
        let mut g = GimbalController::new();
        let before = g.angle();
        g.tick(Tick(0), 0.0, 0.0);
        assert_eq!(g.angle(), before);
    }

    #[test]
    fn preset_tween_moves_toward_target() {
        let mut g = GimbalController::new();
        g.capture_preset(PresetId::Preset1);
        g.angle = 10.0;
        g.capture_preset(PresetId::Preset2);
        g.angle = INIT_ANGLE;

        g.begin_preset(PresetId::Preset2, 0.5);
        assert!(g.is_active());
        let mut now = Tick(0);
        for _ in 0..400 {
            g.tick(now, 0.0, 0.0);
            now = now.add(20);
        }
        assert!((g.angle() - 10.0).abs() < 1.0);
    }

    #[test]
    fn user_input_aborts_active_tween() {
        let mut g = GimbalController::new();
        g.capture_preset(PresetId::Preset1);
        g.angle = 0.0;
        g.begin_preset(PresetId::Preset1, 0.5);
        assert!(g.is_active());
        g.tick(Tick(0), 1.0, 0.0);
        assert!(g.tween.is_none());
    }

    #[test]
    fn follow_mode_suppressed_by_shot_name() {
        let mut g = GimbalController::new();
        g.set_shot_name("CABLE_CAM_FOLLOW");
        g.on_vehicle_angle_report(Tick(GIMBAL_FOLLOW_QUIET_PERIOD + 1), 20.0);
        assert!(g.tween.is_none());
    }

    #[test]
    fn follow_mode_starts_after_quiet_period() {
        let mut g = GimbalController::new();
        g.on_vehicle_angle_report(Tick(GIMBAL_FOLLOW_QUIET_PERIOD + 1), 20.0);
        assert!(g.tween.is_some());
    }
}
