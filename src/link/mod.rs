//! Host serial link (component J, spec.md §4.8).
//!
//! RX: the UART RX ISR enqueues bytes into a 2 KB byte ring; the
//! `HostProtocol` task drains it through [`HostLink::drain_frames`],
//! which decodes SLIP frames and hands each one to the caller keyed by
//! its tag. TX: exactly one DMA transfer is ever in flight; when idle,
//! [`poll_tx`] walks the fixed producer chain once and returns the first
//! producer's framed bytes.

pub mod proto;
pub mod slip;

use crate::ring::RingBuffer;
use proto::{split_tag, Tag};
use slip::{SlipDecoder, SlipEncoder};

/// Capacity of the inbound byte ring (spec.md §4.8: "2 KB ring buffer").
pub const RX_RING_CAPACITY: usize = 2_048;

/// Largest payload any inbound message can carry — sized to the largest
/// telemetry record the vehicle-protocol parser accepts (spec.md §3).
pub const MAX_FRAME_PAYLOAD: usize = 280;

pub type RxRing = RingBuffer<u8, RX_RING_CAPACITY>;

/// Owns frame decoding state for the host link. One instance for the
/// process lifetime.
pub struct HostLink {
    decoder: SlipDecoder<MAX_FRAME_PAYLOAD>,
    line_errors: u32,
}

impl HostLink {
    pub const fn new() -> Self {
        Self { decoder: SlipDecoder::new(), line_errors: 0 }
    }

    /// Count of UART line/framing/overrun errors observed via
    /// [`note_line_error`](Self::note_line_error), plus malformed-frame
    /// resyncs from the SLIP decoder itself.
    pub fn error_count(&self) -> u32 {
        self.line_errors + self.decoder.resync_count()
    }

    /// Called by the UART ISR when it observes a line/framing/overrun
    /// condition directly (before any byte reaches the ring).
    pub fn note_line_error(&mut self) {
        self.line_errors += 1;
    }

    /// Drain every byte currently in the RX ring, decoding SLIP frames
    /// and invoking `on_frame(tag, payload)` for each well-formed one.
    /// Malformed frames are dropped silently (already counted by the
    /// decoder); unrecognized tags are dropped too.
    pub fn drain_frames(&mut self, ring: &RxRing, mut on_frame: impl FnMut(Tag, &[u8])) {
        while let Some(byte) = ring.dequeue() {
            if let Some(frame) = self.decoder.add_byte(byte) {
                if let Some((tag, payload)) = split_tag(frame) {
                    on_frame(tag, payload);
                }
            }
        }
    }
}

impl Default for HostLink {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed outbound producer chain, high to low priority (spec.md
/// §4.8). Each producer fills `buf` and returns the number of bytes
/// written, or `None` if it has nothing to send this pass.
pub type Producer<'a> = &'a mut dyn FnMut(&mut [u8; MAX_FRAME_PAYLOAD]) -> Option<usize>;

pub struct TxProducers<'a> {
    pub host_request_response: Producer<'a>,
    pub button_event: Producer<'a>,
    pub input_report: Producer<'a>,
    pub flight_link_command: Producer<'a>,
    pub pair_confirm: Producer<'a>,
    pub shutdown_notify: Producer<'a>,
    pub self_test: Producer<'a>,
}

#[derive(Clone, Copy)]
enum Slot {
    HostRequestResponse,
    ButtonEvent,
    InputReport,
    FlightLinkCommand,
    PairConfirm,
    ShutdownNotify,
    SelfTest,
}

const CHAIN: [Slot; 7] = [
    Slot::HostRequestResponse,
    Slot::ButtonEvent,
    Slot::InputReport,
    Slot::FlightLinkCommand,
    Slot::PairConfirm,
    Slot::ShutdownNotify,
    Slot::SelfTest,
];

/// Walk [`CHAIN`] once; the first producer with data wins, and its
/// payload is SLIP-framed and returned. `None` means nothing to send
/// this pass — the DMA stays idle.
pub fn poll_tx<const N: usize>(producers: &mut TxProducers) -> Option<heapless::Vec<u8, N>> {
    let mut raw = [0u8; MAX_FRAME_PAYLOAD];
    for slot in CHAIN {
        let produced = match slot {
            Slot::HostRequestResponse => (producers.host_request_response)(&mut raw),
            Slot::ButtonEvent => (producers.button_event)(&mut raw),
            Slot::InputReport => (producers.input_report)(&mut raw),
            Slot::FlightLinkCommand => (producers.flight_link_command)(&mut raw),
            Slot::PairConfirm => (producers.pair_confirm)(&mut raw),
            Slot::ShutdownNotify => (producers.shutdown_notify)(&mut raw),
            Slot::SelfTest => (producers.self_test)(&mut raw),
        };
        if let Some(len) = produced {
            let mut enc = SlipEncoder::<N>::new();
            enc.push_slice(&raw[..len]);
            return Some(enc.finish());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::write_button_event;

    fn framed_input(frames: &[&[u8]]) -> heapless::Vec<u8, RX_RING_CAPACITY> {
        let mut out = heapless::Vec::new();
        for frame in frames {
            let mut enc = SlipEncoder::<64>::new();
            enc.push_slice(frame);
            for b in enc.finish() {
                let _ = out.push(b);
            }
        }
        out
    }

    #[test]
    fn drain_frames_dispatches_by_tag() {
        let mut body = [0u8; 4];
        write_button_event(1, 2, 0x0F, &mut body);
        let mut frame = heapless::Vec::<u8, 8>::new();
        let _ = frame.push(Tag::ButtonEvent as u8);
        for b in body {
            let _ = frame.push(b);
        }

        let bytes = framed_input(&[frame.as_slice()]);
        let ring: RxRing = RingBuffer::new();
        for b in bytes {
            ring.enqueue(b);
        }

        let mut link = HostLink::new();
        let mut seen = None;
        link.drain_frames(&ring, |tag, payload| {
            seen = Some((tag, heapless::Vec::<u8, 4>::from_slice(payload).unwrap()));
        });
        let (tag, payload) = seen.unwrap();
        assert_eq!(tag, Tag::ButtonEvent);
        assert_eq!(payload.as_slice(), &[1, 2, 0x0F, 0x00]);
    }

    #[test]
    fn poll_tx_picks_first_producer_with_data() {
        let mut called_lower_priority = false;
        let mut host_request_response = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut button_event = |buf: &mut [u8; MAX_FRAME_PAYLOAD]| {
            buf[0] = Tag::ButtonEvent as u8;
            Some(1)
        };
        let mut input_report = |_: &mut [u8; MAX_FRAME_PAYLOAD]| {
            called_lower_priority = true;
            None
        };
        let mut flight_link_command = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut pair_confirm = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut shutdown_notify = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut self_test = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;

        let mut producers = TxProducers {
            host_request_response: &mut host_request_response,
            button_event: &mut button_event,
            input_report: &mut input_report,
            flight_link_command: &mut flight_link_command,
            pair_confirm: &mut pair_confirm,
            shutdown_notify: &mut shutdown_notify,
            self_test: &mut self_test,
        };

        let framed: heapless::Vec<u8, 16> = poll_tx(&mut producers).unwrap();
        assert_eq!(framed[0], slip::DELIMITER);
        assert_eq!(framed[1], Tag::ButtonEvent as u8);
        assert!(!called_lower_priority);
    }

    #[test]
    fn poll_tx_returns_none_when_no_producer_has_data() {
        let mut host_request_response = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut button_event = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut input_report = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut flight_link_command = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut pair_confirm = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut shutdown_notify = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut self_test = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;
        let mut producers = TxProducers {
            host_request_response: &mut host_request_response,
            button_event: &mut button_event,
            input_report: &mut input_report,
            flight_link_command: &mut flight_link_command,
            pair_confirm: &mut pair_confirm,
            shutdown_notify: &mut shutdown_notify,
            self_test: &mut self_test,
        };
        let framed: Option<heapless::Vec<u8, 16>> = poll_tx(&mut producers);
        assert!(framed.is_none());
    }
}
