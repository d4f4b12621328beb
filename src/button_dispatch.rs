//! Button dispatcher (component I, spec.md §4.7).
//!
//! Routes each synthesized [`ButtonEvent`](crate::button::ButtonEvent) to
//! a fixed, statically-ordered chain of subscribers. A subscriber that
//! returns `true` ("consumed") stops the chain; later subscribers don't
//! see the event. Per the teacher's design notes (spec.md §9), this is
//! plain tabular dispatch — an ordered array of closures — rather than
//! trait-object virtual dispatch.

use crate::board::ButtonId;
use crate::button::ButtonEvent;
use crate::ring::RingBuffer;

/// One outbound record: the button, its event, and a snapshot of which
/// buttons were pressed at the moment of the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ButtonEventRecord {
    pub button: ButtonId,
    pub event: ButtonEvent,
    pub all_pressed_mask: u16,
}

/// Capacity for the outbound button-event ring buffer. Power of two per
/// spec.md §4.2.
pub const OUTBOUND_CAPACITY: usize = 16;

/// The fixed subscriber chain, in priority order. `Outbound` is last: it
/// only gets a chance to forward an event to the host if every policy
/// and feature subscriber ahead of it declined to consume it.
const CHAIN: [Subscriber; 6] = [
    Subscriber::Pairing,
    Subscriber::ManualOverride,
    Subscriber::FlightLink,
    Subscriber::Camera,
    Subscriber::UiAlerts,
    Subscriber::Outbound,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Subscriber {
    FlightLink,
    Camera,
    UiAlerts,
    Pairing,
    ManualOverride,
    Outbound,
}

/// One closure per subscriber, called in [`CHAIN`] order. Each returns
/// `true` if it consumed the event.
pub struct Handlers<'a> {
    pub flight_link: &'a mut dyn FnMut(ButtonId, ButtonEvent) -> bool,
    pub camera: &'a mut dyn FnMut(ButtonId, ButtonEvent) -> bool,
    pub ui_alerts: &'a mut dyn FnMut(ButtonId, ButtonEvent) -> bool,
    pub pairing: &'a mut dyn FnMut(ButtonId, ButtonEvent) -> bool,
    pub manual_override: &'a mut dyn FnMut(ButtonId, ButtonEvent) -> bool,
}

/// Outbound queue of button-event records bound for the host. Forwards
/// `Press` and `ClickRelease` only, and only when manual override is not
/// engaged (spec.md §4.7: "all button events are suppressed from the
/// host" while overridden, so the vehicle can't misread the gesture as a
/// mode change).
pub struct OutboundQueue {
    queue: RingBuffer<ButtonEventRecord, OUTBOUND_CAPACITY>,
}

impl OutboundQueue {
    pub const fn new() -> Self {
        Self { queue: RingBuffer::new() }
    }

    pub fn dequeue(&self) -> Option<ButtonEventRecord> {
        self.queue.dequeue()
    }

    fn forward(&self, button: ButtonId, event: ButtonEvent, mask: u16, override_engaged: bool) {
        if override_engaged {
            return;
        }
        if matches!(event, ButtonEvent::Press | ButtonEvent::ClickRelease) {
            self.queue.enqueue(ButtonEventRecord { button, event, all_pressed_mask: mask });
        }
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the fixed subscriber chain for one event. `override_engaged`
/// gates the outbound queue's forwarding, independent of whether any
/// subscriber consumed the event (manual override suppresses outbound
/// forwarding of events other subscribers pass through, too).
pub fn dispatch(
    button: ButtonId,
    event: ButtonEvent,
    all_pressed_mask: u16,
    handlers: &mut Handlers,
    outbound: &OutboundQueue,
    override_engaged: bool,
) {
    for sub in CHAIN {
        let consumed = match sub {
            Subscriber::FlightLink => (handlers.flight_link)(button, event),
            Subscriber::Camera => (handlers.camera)(button, event),
            Subscriber::UiAlerts => (handlers.ui_alerts)(button, event),
            Subscriber::Pairing => (handlers.pairing)(button, event),
            Subscriber::ManualOverride => (handlers.manual_override)(button, event),
            Subscriber::Outbound => {
                outbound.forward(button, event, all_pressed_mask, override_engaged);
                false
            }
        };
        if consumed {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumed_event_stops_the_chain() {
        let outbound = OutboundQueue::new();
        let mut flight_link_calls = 0;
        let mut pairing = |_: ButtonId, _: ButtonEvent| true; // consumes everything
        let mut flight_link = |_: ButtonId, _: ButtonEvent| {
            flight_link_calls += 1;
            false
        };
        let mut camera = |_: ButtonId, _: ButtonEvent| false;
        let mut ui_alerts = |_: ButtonId, _: ButtonEvent| false;
        let mut manual_override = |_: ButtonId, _: ButtonEvent| false;

        let mut handlers = Handlers {
            flight_link: &mut flight_link,
            camera: &mut camera,
            ui_alerts: &mut ui_alerts,
            pairing: &mut pairing,
            manual_override: &mut manual_override,
        };

        dispatch(ButtonId::A, ButtonEvent::Press, 0, &mut handlers, &outbound, false);
        assert_eq!(flight_link_calls, 0);
        assert!(outbound.dequeue().is_none());
    }

    #[test]
    fn press_and_click_release_forward_to_outbound_when_unconsumed() {
        let outbound = OutboundQueue::new();
        let mut no = |_: ButtonId, _: ButtonEvent| false;
        let mut handlers = Handlers {
            flight_link: &mut no,
            camera: &mut no,
            ui_alerts: &mut no,
            pairing: &mut no,
            manual_override: &mut no,
        };

        dispatch(ButtonId::Fly, ButtonEvent::Press, 0b10, &mut handlers, &outbound, false);
        let rec = outbound.dequeue().expect("press should be forwarded");
        assert_eq!(rec.button, ButtonId::Fly);
        assert_eq!(rec.event, ButtonEvent::Press);
        assert_eq!(rec.all_pressed_mask, 0b10);
    }

    #[test]
    fn hold_events_are_not_forwarded() {
        let outbound = OutboundQueue::new();
        let mut no = |_: ButtonId, _: ButtonEvent| false;
        let mut handlers = Handlers {
            flight_link: &mut no,
            camera: &mut no,
            ui_alerts: &mut no,
            pairing: &mut no,
            manual_override: &mut no,
        };
        dispatch(ButtonId::A, ButtonEvent::LongHold, 0, &mut handlers, &outbound, false);
        assert!(outbound.dequeue().is_none());
    }

    #[test]
    fn manual_override_suppresses_all_outbound_events() {
        let outbound = OutboundQueue::new();
        let mut no = |_: ButtonId, _: ButtonEvent| false;
        let mut handlers = Handlers {
            flight_link: &mut no,
            camera: &mut no,
            ui_alerts: &mut no,
            pairing: &mut no,
            manual_override: &mut no,
        };
        dispatch(ButtonId::A, ButtonEvent::Press, 0, &mut handlers, &outbound, true);
        assert!(outbound.dequeue().is_none());
    }
}
