//! Vehicle pairing state machine (component L, spec.md §4.10).
//!
//! Ported from `artoo/src/vehicleconnector.cpp`'s `VehicleConnector`:
//! a vehicle announces a pairing request with a device id; the user
//! confirms by holding the A and B buttons together (or cancels with a
//! B-button click); the confirmation is sent back over the host link and
//! the vehicle's eventual pairing result is translated into the matching
//! UI outcome.

use heapless::String;

use crate::board::ButtonId;
use crate::button::ButtonEvent;
use crate::ui::UiEvent;

pub const MAX_DEVICE_ID_LEN: usize = 31;
pub type DeviceId = String<{ MAX_DEVICE_ID_LEN + 1 }>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    RequestReceived,
    ConfirmationReceived,
    ConfirmationSent,
}

pub struct PairingSession {
    state: PairingState,
    device_id: DeviceId,
    button_a_held_long: bool,
    button_b_held_long: bool,
}

impl PairingSession {
    pub const fn new() -> Self {
        Self {
            state: PairingState::Idle,
            device_id: DeviceId::new(),
            button_a_held_long: false,
            button_b_held_long: false,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn device_id(&self) -> &str {
        self.device_id.as_str()
    }

    /// A `PairRequest` frame arrived carrying the vehicle's device id.
    pub fn on_pairing_request(&mut self, device_id: &str) -> UiEvent {
        self.device_id.clear();
        let _ = self.device_id.push_str(device_id);
        self.state = PairingState::RequestReceived;
        UiEvent::PairingRequest
    }

    /// A `PairResult` frame arrived. A name matching the pending request
    /// means success; anything else (including empty) means the vehicle
    /// gave up or the user never confirmed.
    pub fn on_pairing_result(&mut self, result_name: &str) -> UiEvent {
        let had_pending_id = !self.device_id.is_empty();
        let event = if !result_name.is_empty() && result_name == self.device_id.as_str() {
            UiEvent::PairingSucceeded
        } else if had_pending_id {
            UiEvent::PairingIncomplete
        } else {
            UiEvent::PairingCanceled
        };
        self.device_id.clear();
        self.state = PairingState::Idle;
        event
    }

    /// Feed one button event. Only A/B are relevant; everything else is a
    /// no-op. Returns `true` exactly when a `PairConfirm` frame should now
    /// be sent (the caller re-requests a TX transaction at that point).
    pub fn on_button_event(&mut self, button: ButtonId, event: ButtonEvent) -> bool {
        if self.state != PairingState::RequestReceived {
            return false;
        }

        match (button, event) {
            (ButtonId::A, ButtonEvent::LongHold) => self.button_a_held_long = true,
            (ButtonId::B, ButtonEvent::LongHold) => self.button_b_held_long = true,
            (ButtonId::A, ButtonEvent::Release | ButtonEvent::LongHoldRelease) => {
                self.button_a_held_long = false
            }
            (ButtonId::B, ButtonEvent::Release | ButtonEvent::LongHoldRelease) => {
                self.button_b_held_long = false
            }
            (ButtonId::B, ButtonEvent::ClickRelease) => {
                self.device_id.clear();
                self.state = PairingState::ConfirmationReceived;
                return true;
            }
            _ => {}
        }

        if self.button_a_held_long && self.button_b_held_long {
            self.state = PairingState::ConfirmationReceived;
            return true;
        }
        false
    }

    /// Producer-chain step: if a confirmation is queued, return the
    /// device id to frame into a `PairConfirm` body and mark it sent.
    pub fn produce_confirm(&mut self) -> Option<&str> {
        if self.state != PairingState::ConfirmationReceived {
            return None;
        }
        self.state = PairingState::ConfirmationSent;
        Some(self.device_id.as_str())
    }
}

impl Default for PairingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_result_match_succeeds() {
        let mut s = PairingSession::new();
        assert_eq!(s.on_pairing_request("SOLO-1234"), UiEvent::PairingRequest);
        assert_eq!(s.on_pairing_result("SOLO-1234"), UiEvent::PairingSucceeded);
        assert_eq!(s.state(), PairingState::Idle);
    }

    #[test]
    fn result_without_prior_request_is_canceled() {
        let mut s = PairingSession::new();
        assert_eq!(s.on_pairing_result(""), UiEvent::PairingCanceled);
    }

    #[test]
    fn result_mismatch_after_request_is_incomplete() {
        let mut s = PairingSession::new();
        s.on_pairing_request("SOLO-1");
        assert_eq!(s.on_pairing_result(""), UiEvent::PairingIncomplete);
    }

    #[test]
    fn holding_a_and_b_confirms() {
        let mut s = PairingSession::new();
        s.on_pairing_request("SOLO-1");
        assert!(!s.on_button_event(ButtonId::A, ButtonEvent::LongHold));
        assert!(s.on_button_event(ButtonId::B, ButtonEvent::LongHold));
        assert_eq!(s.state(), PairingState::ConfirmationReceived);
    }

    #[test]
    fn b_click_cancels_and_confirms_with_empty_id() {
        let mut s = PairingSession::new();
        s.on_pairing_request("SOLO-1");
        assert!(s.on_button_event(ButtonId::B, ButtonEvent::ClickRelease));
        assert_eq!(s.produce_confirm(), Some(""));
    }

    #[test]
    fn produce_confirm_sends_once() {
        let mut s = PairingSession::new();
        s.on_pairing_request("SOLO-1");
        s.on_button_event(ButtonId::A, ButtonEvent::LongHold);
        s.on_button_event(ButtonId::B, ButtonEvent::LongHold);
        assert_eq!(s.produce_confirm(), Some("SOLO-1"));
        assert_eq!(s.produce_confirm(), None);
    }

    #[test]
    fn button_event_ignored_outside_request_received() {
        let mut s = PairingSession::new();
        assert!(!s.on_button_event(ButtonId::A, ButtonEvent::LongHold));
    }
}
