//! Crate-local error type for the few operations where failure is
//! meaningful enough to propagate rather than surface as a UI event.
//! Most component operations return `bool` instead, matching the
//! teacher's `try`-operation convention (`cfg_storage.rs`, `safety.rs`).

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A framed host message was truncated, had a bad tag, or exceeded
    /// the packet buffer's capacity.
    MalformedFrame,
    /// A fixed-capacity buffer (ring buffer, packet buffer, event queue)
    /// had no room for the requested item.
    BufferFull,
    /// A telemetry field was outside the range this parser understands.
    TelemetryOutOfRange,
}
