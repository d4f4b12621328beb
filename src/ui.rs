//! Bounded UI event queue (component P, spec.md §3, §7).
//!
//! Every component that has something UI-observable to say posts a
//! [`UiEvent`] here rather than calling into the display/alert layer
//! directly — the spec's "pend queue" decoupling (spec.md §9:
//! "Circular references... the 'pend' queue fully decouples event
//! emitters from consumers"). Overflow drops the newest event and counts
//! it, matching every other bounded queue in this crate.

use crate::board::ButtonId;
use crate::ring::RingBuffer;

/// Capacity of the UI event queue. Generous relative to the event rate
/// (button/telemetry driven, not per-tick), power of two per spec.md §4.2.
pub const UI_QUEUE_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiEvent {
    // Power manager (N)
    SystemEnteredRunningState,
    SystemIdleWarning,
    // Stick / input validity (E, F)
    ControllerValueOutOfRange,
    // Flight-link session (K)
    HomeLocationChanged,
    ArmFailed,
    TakeoffFailed,
    RCFailsafe,
    RCFailsafeNoGPS,
    RCFailsafeRecovery,
    FlightBatteryChanged,
    FlightBatteryLow,
    FlightBatteryCritical,
    FlightBatteryFailsafe,
    FlightBatteryNormal,
    StatusTextAlert(StatusTextAlert),
    RssiChanged,
    AltitudeChanged,
    GpsFixChanged,
    // Pairing (L)
    PairingRequest,
    PairingSucceeded,
    PairingCanceled,
    PairingIncomplete,
    // Camera-gimbal (M)
    GimbalConnected,
    GimbalDisconnected,
    // Power manager (N)
    ChargerConnChanged,
    ChargerConnected,
    SystemShutdown,
    SystemLockoutStateChanged,
    // Button / haptic
    ButtonDenied(ButtonId),
}

/// The statustext dictionary's recognized classes (spec.md §4.9:
/// "string-matches against a fixed dictionary of pre-arm and arm
/// messages").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusTextAlert {
    PreArmFailure,
    ArmFailure,
}

pub struct UiEventQueue {
    queue: RingBuffer<UiEvent, UI_QUEUE_CAPACITY>,
}

impl UiEventQueue {
    pub const fn new() -> Self {
        Self { queue: RingBuffer::new() }
    }

    /// Drop-newest-and-count on overflow, like every other bounded queue
    /// in this crate (spec.md §7: "UI event queue full -> drop newest and
    /// log").
    pub fn post(&self, event: UiEvent) {
        self.queue.enqueue(event);
    }

    pub fn pop(&self) -> Option<UiEvent> {
        self.queue.dequeue()
    }

    pub fn dropped(&self) -> u32 {
        self.queue.dropped()
    }
}

impl Default for UiEventQueue {
    fn default() -> Self {
        Self::new()
    }
}
