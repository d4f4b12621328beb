//! Board-agnostic identifiers shared across components.
//!
//! Actual peripheral handles (GPIO `Pin`s, the UART, the ADC, DMA
//! channels) are owned exclusively by `main.rs`'s RTIC resources, per the
//! ownership model in spec.md §5 — this module only names the logical
//! entities (which button is which, which NV region holds params) that
//! hardware-agnostic logic needs to refer to. Board-revision differences
//! (`bb02` vs `dvt`) are resolved here with `cfg_if!`, mirroring the
//! teacher's `h7`/`g4` split in `main.rs`.

use cfg_if::cfg_if;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The nine physical buttons (spec.md §6.1). Discriminant doubles as the
/// bit index into the 16-bit "all buttons pressed" mask (spec.md §4.7)
/// and as the wire `button_id` in `ButtonEvent`/`InvalidStickInputs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ButtonId {
    Power = 0,
    Fly = 1,
    Rtl = 2,
    Loiter = 3,
    A = 4,
    B = 5,
    Preset1 = 6,
    Preset2 = 7,
    CameraClick = 8,
}

pub const NUM_BUTTONS: usize = 9;

/// The six analog stick channels (spec.md §4.4): four RC sticks remapped
/// through stored configuration, plus two direct gimbal channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StickId {
    Throttle = 0,
    Roll = 1,
    Pitch = 2,
    Yaw = 3,
    GimbalPitch = 4,
    GimbalRate = 5,
}

pub const NUM_STICKS: usize = 6;

/// The two user-assignable camera presets (spec.md §3).
pub const NUM_PRESETS: usize = 2;

cfg_if! {
    if #[cfg(feature = "bb02")] {
        /// Flash sector index used for the stored-parameters page on the
        /// `bb02` board revision (smaller flash, single bank).
        pub const PARAMS_FLASH_PAGE: usize = 62;
    } else {
        /// `dvt` (default) board revision.
        pub const PARAMS_FLASH_PAGE: usize = 127;
    }
}

/// Bytes in one internal-flash erase page on both supported revisions.
pub const FLASH_PAGE_SIZE: usize = 2_048;
