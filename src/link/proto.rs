//! Host serial message tags and wire structs (spec.md §6.2).
//!
//! Every frame's first payload byte is a [`Tag`]; the rest is the
//! message body, little-endian throughout. Only the bodies actually
//! produced or consumed elsewhere in this crate are given dedicated wire
//! structs here; tags with no local consumer (factory-test-only ones)
//! are enumerated for completeness but pass their payload through
//! untouched.

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Tag {
    Nop = 0,
    DsmChannels = 1,
    Calibrate = 2,
    SysInfo = 3,
    Mavlink = 4,
    SetRawIo = 5,
    RawIoReport = 6,
    PairRequest = 7,
    PairConfirm = 8,
    PairResult = 9,
    ShutdownRequest = 10,
    ParamStoredVals = 11,
    OutputTest = 12,
    ButtonEvent = 13,
    InputReport = 14,
    ConfigStickAxes = 15,
    ButtonFunctionCfg = 16,
    SetShotInfo = 17,
    Updater = 18,
    LockoutState = 19,
    SelfTest = 20,
    ConfigSweepTime = 21,
    GpioTest = 22,
    TestEvent = 23,
    SetTelemUnits = 24,
    InvalidStickInputs = 25,
    SoloAppConnection = 26,
}

/// Maximum device-id string length, NUL excluded (spec.md §6.2: "≤31").
pub const MAX_DEVICE_ID_LEN: usize = 31;
pub type DeviceId = heapless::String<{ MAX_DEVICE_ID_LEN + 1 }>;

/// Split a decoded frame into its tag and remaining payload. Returns
/// `None` for an empty frame or an unrecognized tag byte.
pub fn split_tag(frame: &[u8]) -> Option<(Tag, &[u8])> {
    let (&tag_byte, rest) = frame.split_first()?;
    let tag = Tag::try_from(tag_byte).ok()?;
    Some((tag, rest))
}

/// Read a NUL-terminated (or payload-exhausted) device-id string,
/// truncated to [`MAX_DEVICE_ID_LEN`].
pub fn read_device_id(payload: &[u8]) -> DeviceId {
    let len = payload.iter().position(|&b| b == 0).unwrap_or(payload.len()).min(MAX_DEVICE_ID_LEN);
    let mut out = DeviceId::new();
    if let Ok(s) = core::str::from_utf8(&payload[..len]) {
        let _ = out.push_str(s);
    }
    out
}

/// Encode `PairConfirm`/`PairRequest`/`PairResult` bodies: the device id
/// followed by a NUL terminator (empty id = decline/failure).
pub fn write_device_id(id: &str, out: &mut [u8]) -> usize {
    let len = id.len().min(MAX_DEVICE_ID_LEN).min(out.len().saturating_sub(1));
    out[..len].copy_from_slice(&id.as_bytes()[..len]);
    out[len] = 0;
    len + 1
}

/// `DsmChannels` body: 8 channels, 2 bytes LE each (spec.md §6.2 tag 1).
pub fn write_dsm_channels(channels: &[u16; 8], out: &mut [u8]) -> usize {
    for (i, ch) in channels.iter().enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&ch.to_le_bytes());
    }
    16
}

/// `InputReport` body: gimbal_y, gimbal_rate, battery, 2 bytes LE each
/// (spec.md §6.2 tag 14).
pub fn write_input_report(gimbal_y: u16, gimbal_rate: u16, battery: u16, out: &mut [u8]) -> usize {
    out[0..2].copy_from_slice(&gimbal_y.to_le_bytes());
    out[2..4].copy_from_slice(&gimbal_rate.to_le_bytes());
    out[4..6].copy_from_slice(&battery.to_le_bytes());
    6
}

/// `ButtonEvent` body: `{button_id, event_id, all_buttons_mask_LE}`
/// (spec.md §6.2 tag 13).
pub fn write_button_event(button_id: u8, event_id: u8, mask: u16, out: &mut [u8]) -> usize {
    out[0] = button_id;
    out[1] = event_id;
    out[2..4].copy_from_slice(&mask.to_le_bytes());
    4
}

/// `InvalidStickInputs` body: `{raw_id, inputVal, trim, min, max}`, all
/// but `raw_id` a signed 16-bit LE value (spec.md §6.2 tag 25).
pub fn write_invalid_stick(raw_id: u8, input_val: i16, trim: i16, min: i16, max: i16, out: &mut [u8]) -> usize {
    out[0] = raw_id;
    out[1..3].copy_from_slice(&input_val.to_le_bytes());
    out[3..5].copy_from_slice(&trim.to_le_bytes());
    out[5..7].copy_from_slice(&min.to_le_bytes());
    out[7..9].copy_from_slice(&max.to_le_bytes());
    9
}

/// Decode a `Calibrate` body: `{raw_id, min, trim, max}` (spec.md §6.2
/// tag 2, ignored while armed by the caller).
pub fn read_calibrate(payload: &[u8]) -> Option<(u8, i16, i16, i16)> {
    if payload.len() < 7 {
        return None;
    }
    let min = i16::from_le_bytes([payload[1], payload[2]]);
    let trim = i16::from_le_bytes([payload[3], payload[4]]);
    let max = i16::from_le_bytes([payload[5], payload[6]]);
    Some((payload[0], min, trim, max))
}

/// Decode a `ConfigStickAxes` body: one `(source_channel, reversed,
/// expo)` tuple per stick (spec.md §6.2 tag 15), same layout as
/// [`crate::params::StickConfig`]'s on-flash bytes.
pub fn read_stick_axis_cfg(payload: &[u8]) -> Option<(u8, u8, bool, f32)> {
    if payload.len() < 7 {
        return None;
    }
    let stick_index = payload[0];
    let source_channel = payload[1];
    let reversed = payload[2] != 0;
    let expo = f32::from_le_bytes([payload[3], payload[4], payload[5], payload[6]]);
    Some((stick_index, source_channel, reversed, expo))
}

/// Decode a `ConfigSweepTime` body: `{min_sweep_s, max_sweep_s}` (spec.md
/// §6.2 tag 21).
pub fn read_sweep_time(payload: &[u8]) -> Option<(u8, u8)> {
    if payload.len() < 2 {
        return None;
    }
    Some((payload[0], payload[1]))
}

/// Decode a single boolean-payload message: `LockoutState`,
/// `SetTelemUnits`, `SoloAppConnection` (spec.md §6.2 tags 19, 24, 26).
pub fn read_bool(payload: &[u8]) -> Option<bool> {
    payload.first().map(|&b| b != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_tag_reads_known_tag() {
        let frame = [Tag::ButtonEvent as u8, 1, 2, 3, 4];
        let (tag, rest) = split_tag(&frame).unwrap();
        assert_eq!(tag, Tag::ButtonEvent);
        assert_eq!(rest, &[1, 2, 3, 4]);
    }

    #[test]
    fn split_tag_rejects_unknown_tag() {
        assert!(split_tag(&[200, 1, 2]).is_none());
    }

    #[test]
    fn device_id_round_trips_with_nul_terminator() {
        let mut buf = [0xAAu8; 32];
        let len = write_device_id("SOLO-42", &mut buf);
        assert_eq!(&buf[..len], b"SOLO-42\0");
        assert_eq!(read_device_id(&buf[..len]).as_str(), "SOLO-42");
    }

    #[test]
    fn empty_device_id_is_just_a_nul() {
        let mut buf = [0xAAu8; 4];
        let len = write_device_id("", &mut buf);
        assert_eq!(len, 1);
        assert_eq!(buf[0], 0);
        assert_eq!(read_device_id(&buf[..len]).as_str(), "");
    }

    #[test]
    fn button_event_body_is_little_endian() {
        let mut out = [0u8; 4];
        write_button_event(5, 1, 0x0102, &mut out);
        assert_eq!(out, [5, 1, 0x02, 0x01]);
    }

    #[test]
    fn calibrate_round_trips() {
        let mut buf = [0u8; 7];
        buf[0] = 3;
        buf[1..3].copy_from_slice(&(-100i16).to_le_bytes());
        buf[3..5].copy_from_slice(&2048i16.to_le_bytes());
        buf[5..7].copy_from_slice(&4095i16.to_le_bytes());
        assert_eq!(read_calibrate(&buf), Some((3, -100, 2048, 4095)));
    }
}
