//! Flight-link session manager (component K, spec.md §4.9).
//!
//! Interprets the opaque `Mavlink`-tagged host messages (spec.md §6.2 tag
//! 4) as the well-known aerial-vehicle telemetry protocol, tracks
//! arm/flight-mode/battery state with timeout-driven liveness, and
//! arbitrates user-initiated commands (arm, takeoff, return-home,
//! force-disarm) against vehicle acknowledgments. Ported from
//! `artoo/src/flightmanager.cpp`'s `FlightManager`, generalized from its
//! single static instance into an owned struct.

use heapless::Vec as HVec;

use crate::telemetry::{BatteryPhase, BatteryPhaseTracker, EkfFlags, GpsFixType, TelemetrySnapshot};
use crate::time::{s, Tick};
use crate::ui::{StatusTextAlert, UiEvent};

/// How long a telemetry link may go quiet before `connected()` drops
/// (spec.md §4.9, §8 invariant 6: "≈3 s").
pub const LINK_TIMEOUT: u32 = s(3);

/// Force-disarm's magic token in the "disarm code" field (spec.md §4.9).
pub const FORCE_DISARM_MAGIC: u16 = 21_196;

/// ArduCopter's GPS-holding "loiter" mode number — the takeoff
/// sub-machine skips the mode-change step if already here (spec.md §4.9).
pub const LOITER_MODE: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmState {
    Disarmed,
    Armed,
    DisarmForce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemStatus {
    Uninitialized,
    Standby,
    Active,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TakeoffSubState {
    None,
    SetMode,
    SentTakeoffCmd,
    Ascending,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandId {
    SetFlightMode,
    SetArmState,
    GetHomeWaypoint,
    Takeoff,
    FlyButtonClick,
    FlyButtonHold,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandState {
    Complete,
    Pending,
    Sent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandPayload {
    None,
    FlightMode(u8),
    Arm(u16),
    Waypoint(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingCommand {
    pub id: CommandId,
    pub state: CommandState,
    pub payload: CommandPayload,
}

impl PendingCommand {
    const fn none() -> Self {
        Self { id: CommandId::SetFlightMode, state: CommandState::Complete, payload: CommandPayload::None }
    }
}

/// Well-known telemetry message ids this session consumes (spec.md
/// §4.9). Parsing beyond these is out of scope (spec.md §9 design note:
/// "the fields actually consumed are small; a hand-rolled selective
/// parser is acceptable").
pub mod msg_id {
    pub const HEARTBEAT: u32 = 0;
    pub const SYS_STATUS: u32 = 1;
    pub const GPS_RAW_INT: u32 = 24;
    pub const GLOBAL_POSITION_INT: u32 = 33;
    pub const MISSION_ITEM: u32 = 39;
    pub const VFR_HUD: u32 = 74;
    pub const COMMAND_ACK: u32 = 77;
    pub const RADIO_STATUS: u32 = 109;
    pub const NAMED_VALUE_INT: u32 = 252;
    pub const STATUSTEXT: u32 = 253;
    /// Gimbal mount orientation, routed here from the vehicle link the
    /// same way `artoo/src/flightmanager.cpp` forwards it to
    /// `SoloGimbal::onMountStatus` (component M's follow mode).
    pub const MOUNT_STATUS: u32 = 158;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    Classic,
    Extended,
}

/// Locate the message-id field per spec.md §4.9's byte layout. Classic
/// framing starts `0xFE`, extended `0xFD`; a signed-message indicator
/// lives at byte 2 of extended frames (not otherwise consumed here).
pub fn parse_message_id(raw: &[u8]) -> Option<(u32, Framing)> {
    match raw.first()? {
        0xFE if raw.len() > 5 => Some((raw[5] as u32, Framing::Classic)),
        0xFD if raw.len() > 9 => {
            let id = u32::from_le_bytes([raw[7], raw[8], raw[9], 0]);
            Some((id, Framing::Extended))
        }
        _ => None,
    }
}

pub struct FlightLinkSession {
    mode: u8,
    system_status: SystemStatus,
    arm_state: ArmState,
    mode_armable_mask: u32,
    takeoff_state: TakeoffSubState,
    liveness_last: Tick,
    connected: bool,
    command: PendingCommand,
    telemetry: TelemetrySnapshot,
    battery_phase: BatteryPhaseTracker,
    home: Option<(f64, f64)>,
    current_loc: Option<(f64, f64)>,
    pending_ekf: EkfFlags,
    rc_failsafe: bool,
    prearm_alert_showing: bool,
    arm_alert_showing: bool,
    mount_angle: Option<f32>,
}

impl FlightLinkSession {
    pub const fn new() -> Self {
        Self {
            mode: 0,
            system_status: SystemStatus::Uninitialized,
            arm_state: ArmState::Disarmed,
            mode_armable_mask: 0,
            takeoff_state: TakeoffSubState::None,
            liveness_last: Tick::ZERO,
            connected: false,
            command: PendingCommand::none(),
            telemetry: TelemetrySnapshot {
                battery_pct: None,
                gps_fix: None,
                satellites: 0,
                altitude_m: 0.0,
                airspeed_mps: 0.0,
                groundspeed_mps: 0.0,
                rssi_bars: 0,
                ekf: EkfFlags { position_ok: false, predicted_ok: false },
            },
            battery_phase: BatteryPhaseTracker::new(),
            home: None,
            current_loc: None,
            pending_ekf: EkfFlags { position_ok: false, predicted_ok: false },
            rc_failsafe: false,
            prearm_alert_showing: false,
            arm_alert_showing: false,
            mount_angle: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn armed(&self) -> bool {
        self.arm_state == ArmState::Armed
    }

    pub fn flight_mode(&self) -> u8 {
        self.mode
    }

    pub fn in_flight(&self) -> bool {
        self.armed() && matches!(self.system_status, SystemStatus::Active | SystemStatus::Critical)
    }

    pub fn telemetry(&self) -> &TelemetrySnapshot {
        &self.telemetry
    }

    pub fn battery_phase(&self) -> BatteryPhase {
        self.battery_phase.phase()
    }

    pub fn pending_command(&self) -> PendingCommand {
        self.command
    }

    pub fn ready_to_arm(&self) -> bool {
        self.mode < 32 && (self.mode_armable_mask >> self.mode) & 1 != 0
    }

    pub fn ready_to_arm_without_gps(&self) -> bool {
        LOITER_MODE < 32 && (self.mode_armable_mask >> LOITER_MODE) & 1 != 0
    }

    /// Call every 50 Hz tick; transitions `connected` -> `false` once the
    /// liveness counter has been stale for [`LINK_TIMEOUT`].
    pub fn check_liveness(&mut self, now: Tick) -> HVec<UiEvent, 2> {
        let mut events = HVec::new();
        if self.connected && now.has_elapsed_since(self.liveness_last, LINK_TIMEOUT) {
            self.connected = false;
            if self.in_flight() {
                let event = if self.telemetry.gps_fix.unwrap_or(GpsFixType::NoFix) == GpsFixType::NoFix {
                    UiEvent::RCFailsafeNoGPS
                } else {
                    UiEvent::RCFailsafe
                };
                self.rc_failsafe = true;
                let _ = events.push(event);
            }
        }
        events
    }

    /// Dispatch one parsed telemetry message. `now` resets the liveness
    /// counter for every message (spec.md §4.9: "any telemetry packet
    /// resets it").
    pub fn on_message(&mut self, id: u32, payload: &[u8], now: Tick) -> HVec<UiEvent, 4> {
        self.liveness_last = now;
        let mut events = HVec::new();

        match id {
            msg_id::HEARTBEAT => self.on_heartbeat(payload, &mut events),
            msg_id::GLOBAL_POSITION_INT => self.on_global_position(payload, &mut events),
            msg_id::MISSION_ITEM => self.on_mission_item(payload, &mut events),
            msg_id::GPS_RAW_INT => self.on_gps_raw(payload),
            msg_id::VFR_HUD => self.on_vfr_hud(payload, &mut events),
            msg_id::SYS_STATUS => self.on_sys_status(payload, &mut events),
            msg_id::COMMAND_ACK => self.on_command_ack(payload, &mut events),
            msg_id::STATUSTEXT => self.on_statustext(payload, &mut events),
            msg_id::RADIO_STATUS => self.on_rssi(payload, &mut events),
            msg_id::NAMED_VALUE_INT => self.on_named_int(payload),
            msg_id::MOUNT_STATUS => self.on_mount_status(payload),
            _ => {}
        }
        events
    }

    /// Pulls the most recently reported vehicle mount angle, if any has
    /// arrived since the last call (component M's follow mode consumes
    /// this once per `Mavlink`-tagged frame).
    pub fn take_mount_angle(&mut self) -> Option<f32> {
        self.mount_angle.take()
    }

    fn on_heartbeat(&mut self, payload: &[u8], events: &mut HVec<UiEvent, 4>) {
        if payload.len() < 8 {
            return;
        }
        self.connected = true;

        let custom_mode = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let new_mode = custom_mode as u8;
        if new_mode != self.mode {
            self.mode = new_mode;
        }

        let new_status = match payload[7] {
            1 => SystemStatus::Standby,
            4 => SystemStatus::Active,
            5 => SystemStatus::Critical,
            _ => SystemStatus::Uninitialized,
        };
        self.system_status = new_status;

        // The EKF tuple is latched from its own message but only
        // committed here, so arm-state interpretation sees a consistent
        // snapshot (spec.md §4.9).
        self.telemetry.ekf = self.pending_ekf;

        self.update_rc_failsafe_recovery(events);
    }

    fn update_rc_failsafe_recovery(&mut self, events: &mut HVec<UiEvent, 4>) {
        if self.rc_failsafe && self.connected && self.in_flight() {
            self.rc_failsafe = false;
            let _ = events.push(UiEvent::RCFailsafeRecovery);
        }
    }

    fn on_global_position(&mut self, payload: &[u8], events: &mut HVec<UiEvent, 4>) {
        if payload.len() < 8 {
            return;
        }
        let lat = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as f64 / 1e7;
        let lon = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as f64 / 1e7;
        self.current_loc = Some((lat, lon));
        let _ = events; // distance-from-takeoff is derived on read, not pushed as an event here
    }

    fn on_mission_item(&mut self, payload: &[u8], events: &mut HVec<UiEvent, 4>) {
        if payload.len() < 10 {
            return;
        }
        let seq = u16::from_le_bytes([payload[0], payload[1]]);
        if seq != 0 {
            return; // only mission item #0 (home) is tracked
        }
        let lat = i32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]) as f64 / 1e7;
        let lon = i32::from_le_bytes([payload[6], payload[7], payload[8], payload[9]]) as f64 / 1e7;
        let new_home = (lat, lon);
        if self.home != Some(new_home) {
            self.home = Some(new_home);
            let _ = events.push(UiEvent::HomeLocationChanged);
        }
    }

    /// `pointing_a` is the tilt axis in centidegrees (`mavlink_mount_status_t`).
    fn on_mount_status(&mut self, payload: &[u8]) {
        if payload.len() < 4 {
            return;
        }
        let pointing_a = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        self.mount_angle = Some(pointing_a as f32 / 100.0);
    }

    fn on_gps_raw(&mut self, payload: &[u8]) {
        if payload.len() < 2 {
            return;
        }
        self.telemetry.gps_fix = Some(match payload[0] {
            0 | 1 => GpsFixType::NoFix,
            2 => GpsFixType::TwoD,
            _ => GpsFixType::ThreeD,
        });
        self.telemetry.satellites = payload[1];
    }

    fn on_vfr_hud(&mut self, payload: &[u8], events: &mut HVec<UiEvent, 4>) {
        if payload.len() < 16 {
            return;
        }
        let airspeed = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let groundspeed = f32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let alt = f32::from_le_bytes([payload[12], payload[13], payload[14], payload[15]]);

        if (alt - self.telemetry.altitude_m).abs() >= 0.1 {
            self.telemetry.altitude_m = alt;
            let _ = events.push(UiEvent::AltitudeChanged);
        }
        self.telemetry.airspeed_mps = airspeed;
        self.telemetry.groundspeed_mps = groundspeed;

        if self.takeoff_state == TakeoffSubState::Ascending {
            if let Some(target) = self.takeoff_target_altitude() {
                if (alt - target).abs() <= 0.2 {
                    self.takeoff_state = TakeoffSubState::Complete;
                }
            }
        }
    }

    fn takeoff_target_altitude(&self) -> Option<f32> {
        if let CommandPayload::Waypoint(alt_cm) = self.command.payload {
            Some(alt_cm as f32 / 100.0)
        } else {
            None
        }
    }

    fn on_sys_status(&mut self, payload: &[u8], events: &mut HVec<UiEvent, 4>) {
        if payload.len() < 31 {
            return;
        }
        let battery_pct = payload[30] as i8;
        if Some(battery_pct) != self.telemetry.battery_pct {
            self.telemetry.battery_pct = Some(battery_pct);
            let _ = events.push(UiEvent::FlightBatteryChanged);
        }
        if let Some(new_phase) = self.battery_phase.update(battery_pct) {
            let _ = events.push(match new_phase {
                BatteryPhase::Normal => UiEvent::FlightBatteryNormal,
                BatteryPhase::Low => UiEvent::FlightBatteryLow,
                BatteryPhase::Critical => UiEvent::FlightBatteryCritical,
                BatteryPhase::Failsafe => UiEvent::FlightBatteryFailsafe,
            });
        }
    }

    fn on_command_ack(&mut self, payload: &[u8], events: &mut HVec<UiEvent, 4>) {
        if payload.len() < 3 || self.command.state != CommandState::Sent {
            return;
        }
        let accepted = payload[2] == 0; // MAV_RESULT_ACCEPTED == 0
        match self.command.id {
            CommandId::Takeoff if accepted => {
                self.takeoff_state = TakeoffSubState::Ascending;
                self.command.state = CommandState::Complete;
            }
            CommandId::Takeoff => {
                self.takeoff_state = TakeoffSubState::None;
                self.command.state = CommandState::Complete;
                let _ = events.push(UiEvent::TakeoffFailed);
            }
            CommandId::SetArmState if !accepted => {
                self.command.state = CommandState::Complete;
                let _ = events.push(UiEvent::ArmFailed);
            }
            _ => {
                self.command.state = CommandState::Complete;
            }
        }
    }

    fn on_statustext(&mut self, payload: &[u8], events: &mut HVec<UiEvent, 4>) {
        let Ok(text) = core::str::from_utf8(payload) else { return };
        if text.starts_with("PreArm:") {
            self.prearm_alert_showing = true;
            let _ = events.push(UiEvent::StatusTextAlert(StatusTextAlert::PreArmFailure));
        } else if text.starts_with("Arm:") {
            self.arm_alert_showing = true;
            let _ = events.push(UiEvent::StatusTextAlert(StatusTextAlert::ArmFailure));
        } else if self.prearm_alert_showing {
            // An unrecognized message while a pre-arm alert shows dismisses it.
            self.prearm_alert_showing = false;
        }
    }

    fn on_rssi(&mut self, payload: &[u8], events: &mut HVec<UiEvent, 4>) {
        if payload.is_empty() {
            return;
        }
        let bars = crate::telemetry::rssi_bars(payload[0]);
        if bars != self.telemetry.rssi_bars {
            self.telemetry.rssi_bars = bars;
            let _ = events.push(UiEvent::RssiChanged);
        }
    }

    fn on_named_int(&mut self, payload: &[u8]) {
        if payload.len() < 14 {
            return;
        }
        let name = &payload[4..14];
        if name.starts_with(b"ARMMASK") {
            self.mode_armable_mask = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        }
    }

    /// Post a user-initiated command (spec.md §4.9). Ignored if one is
    /// already in flight, matching the original's `ASSERT(state !=
    /// Pending)` guard generalized to a silent no-op.
    pub fn post_command(&mut self, id: CommandId, payload: CommandPayload) -> bool {
        if self.command.state == CommandState::Pending {
            return false;
        }
        self.command = PendingCommand { id, state: CommandState::Pending, payload };
        if id == CommandId::Takeoff {
            self.takeoff_state =
                if self.mode == LOITER_MODE { TakeoffSubState::SentTakeoffCmd } else { TakeoffSubState::SetMode };
        }
        true
    }

    pub fn force_disarm(&mut self) -> bool {
        self.post_command(CommandId::SetArmState, CommandPayload::Arm(FORCE_DISARM_MAGIC))
    }

    /// Producer-chain step: if a command is `Pending`, mark it `Sent` and
    /// return its id+payload for wire encoding. Returns `None` otherwise.
    pub fn produce(&mut self) -> Option<(CommandId, CommandPayload)> {
        if self.command.state != CommandState::Pending {
            return None;
        }
        self.command.state = CommandState::Sent;
        Some((self.command.id, self.command.payload))
    }

    pub fn takeoff_state(&self) -> TakeoffSubState {
        self.takeoff_state
    }

    /// Called when an inbound EKF-flags message arrives (latched, only
    /// committed on the next heartbeat per spec.md §4.9).
    pub fn on_ekf_flags(&mut self, flags: EkfFlags) {
        self.pending_ekf = flags;
    }

    pub fn distance_from_takeoff_m(&self) -> Option<f64> {
        let (hlat, hlon) = self.home?;
        let (clat, clon) = self.current_loc?;
        // Equirectangular approximation; adequate at the short ranges
        // this display value is used for.
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let dlat = (clat - hlat).to_radians();
        let dlon = (clon - hlon).to_radians();
        let mean_lat = ((clat + hlat) / 2.0).to_radians();
        let x = dlon * mean_lat.cos();
        Some((x * x + dlat * dlat).sqrt() * EARTH_RADIUS_M)
    }
}

impl Default for FlightLinkSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(mode: u32, status: u8) -> [u8; 8] {
        let mut b = [0u8; 8];
        b[0..4].copy_from_slice(&mode.to_le_bytes());
        b[7] = status;
        b
    }

    #[test]
    fn heartbeat_connects_and_updates_mode() {
        let mut s = FlightLinkSession::new();
        assert!(!s.connected());
        s.on_message(msg_id::HEARTBEAT, &heartbeat(5, 4), Tick(0));
        assert!(s.connected());
        assert_eq!(s.flight_mode(), 5);
    }

    #[test]
    fn liveness_expires_after_timeout() {
        let mut s = FlightLinkSession::new();
        s.on_message(msg_id::HEARTBEAT, &heartbeat(0, 1), Tick(0));
        assert!(s.connected());
        assert!(s.check_liveness(Tick(LINK_TIMEOUT - 1)).is_empty());
        assert!(s.connected());
        s.check_liveness(Tick(LINK_TIMEOUT + 1));
        assert!(!s.connected());
    }

    #[test]
    fn mission_item_zero_updates_home_once() {
        let mut s = FlightLinkSession::new();
        let mut payload = [0u8; 10];
        payload[2..6].copy_from_slice(&100_000_001i32.to_le_bytes());
        payload[6..10].copy_from_slice(&200_000_000i32.to_le_bytes());
        let events = s.on_message(msg_id::MISSION_ITEM, &payload, Tick(0));
        assert!(events.contains(&UiEvent::HomeLocationChanged));

        let events2 = s.on_message(msg_id::MISSION_ITEM, &payload, Tick(0));
        assert!(!events2.contains(&UiEvent::HomeLocationChanged));
    }

    #[test]
    fn mount_status_surfaces_angle_once() {
        let mut s = FlightLinkSession::new();
        let mut payload = [0u8; 4];
        payload.copy_from_slice(&4500i32.to_le_bytes()); // 45.00 degrees
        s.on_message(msg_id::MOUNT_STATUS, &payload, Tick(0));
        assert_eq!(s.take_mount_angle(), Some(45.0));
        assert_eq!(s.take_mount_angle(), None);
    }

    #[test]
    fn command_ack_reject_raises_arm_failed() {
        let mut s = FlightLinkSession::new();
        s.post_command(CommandId::SetArmState, CommandPayload::Arm(1));
        s.produce(); // Pending -> Sent
        let ack = [0u8, 0u8, 4u8]; // result != 0 -> rejected
        let events = s.on_message(msg_id::COMMAND_ACK, &ack, Tick(0));
        assert!(events.contains(&UiEvent::ArmFailed));
    }

    #[test]
    fn named_int_armmask_feeds_ready_to_arm() {
        let mut s = FlightLinkSession::new();
        let mut payload = [0u8; 14];
        payload[0..4].copy_from_slice(&(1u32 << 5).to_le_bytes()); // bit 5 (loiter) armable
        payload[4..11].copy_from_slice(b"ARMMASK");
        s.on_message(msg_id::NAMED_VALUE_INT, &payload, Tick(0));
        s.on_message(msg_id::HEARTBEAT, &heartbeat(5, 1), Tick(0));
        assert!(s.ready_to_arm());
    }

    #[test]
    fn force_disarm_uses_magic_token() {
        let mut s = FlightLinkSession::new();
        assert!(s.force_disarm());
        assert_eq!(s.pending_command().payload, CommandPayload::Arm(FORCE_DISARM_MAGIC));
    }

    #[test]
    fn battery_phase_change_raises_event() {
        let mut s = FlightLinkSession::new();
        let mut payload = [0u8; 31];
        payload[30] = 20i8 as u8; // enters Low
        let events = s.on_message(msg_id::SYS_STATUS, &payload, Tick(0));
        assert!(events.contains(&UiEvent::FlightBatteryLow));
        assert!(events.contains(&UiEvent::FlightBatteryChanged));
    }

    #[test]
    fn classic_framing_message_id_at_byte_five() {
        let mut raw = [0u8; 10];
        raw[0] = 0xFE;
        raw[5] = msg_id::HEARTBEAT as u8;
        assert_eq!(parse_message_id(&raw), Some((msg_id::HEARTBEAT, Framing::Classic)));
    }
}
