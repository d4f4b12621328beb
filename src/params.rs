//! Persistent parameters store (component D, spec.md §4.3 and §6.3).
//!
//! One struct of fixed layout, snapshotted whole to the last page of
//! internal flash. There is no versioning header (spec.md §4.3): the
//! layout is stable within a firmware line, exactly like the teacher's
//! `UserCfg::save`/`load` in `cfg_storage.rs`, which also writes the
//! whole struct in one erase+write pass rather than field-at-a-time.

use crate::board::{ButtonId, NUM_BUTTONS, NUM_PRESETS, NUM_STICKS};
use crate::time::{s, Tick};
use crate::Error;

/// Anything that can erase-and-write, or read, one flash page. The real
/// implementation in `main.rs` wraps `stm32_hal2::flash::Flash`, the same
/// type the teacher's `cfg_storage.rs` uses; this trait lets the store's
/// load/mark/flush logic be tested without real flash.
pub trait NvFlash {
    fn read_page(&self, page: usize, out: &mut [u8]) -> Result<(), Error>;
    fn erase_write_page(&mut self, page: usize, data: &[u8]) -> Result<(), Error>;
}

pub const PARAMS_SIZE: usize = 2
    + StickCalibration::SIZE * NUM_STICKS
    + 4 * NUM_PRESETS
    + StickConfig::SIZE * NUM_STICKS
    + ButtonFunctionConfig::SIZE * NUM_BUTTONS
    + 2;

/// Minimum time between flushes, so a burst of edits (e.g. dragging a
/// calibration slider) costs at most one flash erase+write cycle.
const FLUSH_DEBOUNCE: u32 = s(1);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StickCalibration {
    pub min: i16,
    pub trim: i16,
    pub max: i16,
}

impl StickCalibration {
    const SIZE: usize = 6;

    fn to_bytes(self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.min.to_le_bytes());
        out[2..4].copy_from_slice(&self.trim.to_le_bytes());
        out[4..6].copy_from_slice(&self.max.to_le_bytes());
    }

    fn from_bytes(b: &[u8]) -> Self {
        Self {
            min: i16::from_le_bytes([b[0], b[1]]),
            trim: i16::from_le_bytes([b[2], b[3]]),
            max: i16::from_le_bytes([b[4], b[5]]),
        }
    }
}

impl Default for StickCalibration {
    fn default() -> Self {
        Self { min: 0, trim: 2_048, max: 4_095 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StickConfig {
    /// Which raw ADC channel feeds this logical stick.
    pub source_channel: u8,
    pub reversed: bool,
    /// Expo curve strength, 0.0 (linear) to 1.0.
    pub expo: f32,
}

impl StickConfig {
    const SIZE: usize = 6;

    fn to_bytes(self, out: &mut [u8]) {
        out[0] = self.source_channel;
        out[1] = self.reversed as u8;
        out[2..6].copy_from_slice(&self.expo.to_le_bytes());
    }

    fn from_bytes(b: &[u8]) -> Self {
        Self {
            source_channel: b[0],
            reversed: b[1] != 0,
            expo: f32::from_le_bytes([b[2], b[3], b[4], b[5]]),
        }
    }
}

impl Default for StickConfig {
    fn default() -> Self {
        Self { source_channel: 0, reversed: false, expo: 0.0 }
    }
}

/// A user-captured preset-sweep animation endpoint, in degrees.
pub type PresetAngle = f32;

const MAX_DESCRIPTOR_LEN: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ButtonFunctionConfig {
    pub button: ButtonId,
    /// The button event (spec.md §4.6) that triggers this function.
    pub triggering_event: u8,
    pub shot_id: u8,
    pub state: u8,
    pub descriptor_len: u8,
    pub descriptor: [u8; MAX_DESCRIPTOR_LEN],
}

impl ButtonFunctionConfig {
    const SIZE: usize = 1 + 1 + 1 + 1 + 1 + MAX_DESCRIPTOR_LEN;

    fn default_for(button: ButtonId) -> Self {
        Self {
            button,
            triggering_event: 0,
            shot_id: 0,
            state: 0,
            descriptor_len: 0,
            descriptor: [0; MAX_DESCRIPTOR_LEN],
        }
    }

    fn to_bytes(self, out: &mut [u8]) {
        out[0] = self.button as u8;
        out[1] = self.triggering_event;
        out[2] = self.shot_id;
        out[3] = self.state;
        out[4] = self.descriptor_len;
        out[5..5 + MAX_DESCRIPTOR_LEN].copy_from_slice(&self.descriptor);
    }

    fn from_bytes(b: &[u8]) -> Self {
        let button = ButtonId::try_from(b[0]).unwrap_or(ButtonId::Power);
        let mut descriptor = [0u8; MAX_DESCRIPTOR_LEN];
        descriptor.copy_from_slice(&b[5..5 + MAX_DESCRIPTOR_LEN]);
        Self {
            button,
            triggering_event: b[1],
            shot_id: b[2],
            state: b[3],
            descriptor_len: b[4].min(MAX_DESCRIPTOR_LEN as u8),
            descriptor,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepConfig {
    pub min_sweep_s: u8,
    pub max_sweep_s: u8,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { min_sweep_s: 1, max_sweep_s: 5 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoredParams {
    pub stick_cal: [StickCalibration; NUM_STICKS],
    pub presets: [PresetAngle; NUM_PRESETS],
    pub stick_cfg: [StickConfig; NUM_STICKS],
    pub button_fn: [ButtonFunctionConfig; NUM_BUTTONS],
    pub sweep: SweepConfig,
}

impl Default for StoredParams {
    fn default() -> Self {
        const BUTTONS: [ButtonId; NUM_BUTTONS] = [
            ButtonId::Power,
            ButtonId::Fly,
            ButtonId::Rtl,
            ButtonId::Loiter,
            ButtonId::A,
            ButtonId::B,
            ButtonId::Preset1,
            ButtonId::Preset2,
            ButtonId::CameraClick,
        ];
        let mut button_fn = [ButtonFunctionConfig::default_for(ButtonId::Power); NUM_BUTTONS];
        for (slot, id) in button_fn.iter_mut().zip(BUTTONS) {
            *slot = ButtonFunctionConfig::default_for(id);
        }
        Self {
            stick_cal: [StickCalibration::default(); NUM_STICKS],
            presets: [80.0, 10.0],
            stick_cfg: [StickConfig::default(); NUM_STICKS],
            button_fn,
            sweep: SweepConfig::default(),
        }
    }
}

impl StoredParams {
    pub fn to_bytes(&self, out: &mut [u8; PARAMS_SIZE]) {
        let mut at = 0;
        for cal in self.stick_cal {
            cal.to_bytes(&mut out[at..at + StickCalibration::SIZE]);
            at += StickCalibration::SIZE;
        }
        for angle in self.presets {
            out[at..at + 4].copy_from_slice(&angle.to_le_bytes());
            at += 4;
        }
        for cfg in self.stick_cfg {
            cfg.to_bytes(&mut out[at..at + StickConfig::SIZE]);
            at += StickConfig::SIZE;
        }
        for bf in self.button_fn {
            bf.to_bytes(&mut out[at..at + ButtonFunctionConfig::SIZE]);
            at += ButtonFunctionConfig::SIZE;
        }
        out[at] = self.sweep.min_sweep_s;
        out[at + 1] = self.sweep.max_sweep_s;
        at += 2;
        debug_assert_eq!(at, PARAMS_SIZE);
    }

    pub fn from_bytes(buf: &[u8; PARAMS_SIZE]) -> Self {
        let mut at = 0;
        let mut stick_cal = [StickCalibration::default(); NUM_STICKS];
        for cal in stick_cal.iter_mut() {
            *cal = StickCalibration::from_bytes(&buf[at..at + StickCalibration::SIZE]);
            at += StickCalibration::SIZE;
        }
        let mut presets = [0.0f32; NUM_PRESETS];
        for p in presets.iter_mut() {
            *p = f32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
            at += 4;
        }
        let mut stick_cfg = [StickConfig::default(); NUM_STICKS];
        for cfg in stick_cfg.iter_mut() {
            *cfg = StickConfig::from_bytes(&buf[at..at + StickConfig::SIZE]);
            at += StickConfig::SIZE;
        }
        let mut button_fn = [ButtonFunctionConfig::default_for(ButtonId::Power); NUM_BUTTONS];
        for bf in button_fn.iter_mut() {
            *bf = ButtonFunctionConfig::from_bytes(&buf[at..at + ButtonFunctionConfig::SIZE]);
            at += ButtonFunctionConfig::SIZE;
        }
        let sweep = SweepConfig { min_sweep_s: buf[at], max_sweep_s: buf[at + 1] };
        at += 2;
        debug_assert_eq!(at, PARAMS_SIZE);
        Self { stick_cal, presets, stick_cfg, button_fn, sweep }
    }
}

/// True iff any byte in `region` is not `0xFF` — i.e. the region has been
/// written to since its last erase. Matches erased NAND/NOR flash, whose
/// cells read back all-ones.
pub fn is_initialized(region: &[u8]) -> bool {
    region.iter().any(|&b| b != 0xFF)
}

/// Owns the in-RAM copy of [`StoredParams`] plus the dirty/flush-debounce
/// bookkeeping. Foreground-only: every mutator runs in the foreground
/// task context, so no synchronization is needed here (spec.md §5).
pub struct ParamsStore {
    params: StoredParams,
    dirty: bool,
    last_flush: Tick,
}

impl ParamsStore {
    pub fn new() -> Self {
        Self { params: StoredParams::default(), dirty: false, last_flush: Tick::ZERO }
    }

    pub fn params(&self) -> &StoredParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut StoredParams {
        &mut self.params
    }

    /// Read the dedicated NV page into RAM at boot. Uninitialized (erased)
    /// flash falls back to `StoredParams::default()`.
    pub fn load(&mut self, flash: &impl NvFlash, page: usize) {
        let mut raw = [0u8; PARAMS_SIZE];
        if flash.read_page(page, &mut raw).is_err() {
            self.params = StoredParams::default();
            return;
        }
        self.params = if is_initialized(&raw) {
            StoredParams::from_bytes(&raw)
        } else {
            StoredParams::default()
        };
    }

    /// Mark the in-RAM struct dirty; called by any mutator.
    pub fn mark(&mut self) {
        self.dirty = true;
    }

    /// If dirty and at least one second has elapsed since the last flush,
    /// erase and write the page, then clear dirty. A second `mark()`
    /// within the same second does not cause a second write.
    pub fn periodic_work(&mut self, now: Tick, flash: &mut impl NvFlash, page: usize) -> bool {
        if !self.dirty || !now.has_elapsed_since(self.last_flush, FLUSH_DEBOUNCE) {
            return false;
        }
        let mut raw = [0u8; PARAMS_SIZE];
        self.params.to_bytes(&mut raw);
        // Best-effort: a failed write leaves `dirty` set so the next pass
        // retries, per spec.md §7's "save() is best-effort".
        if flash.erase_write_page(page, &raw).is_ok() {
            self.dirty = false;
            self.last_flush = now;
            true
        } else {
            false
        }
    }
}

impl Default for ParamsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeFlash {
        pages: HashMap<usize, [u8; PARAMS_SIZE]>,
        writes: u32,
    }

    impl FakeFlash {
        fn erased() -> Self {
            Self { pages: HashMap::new(), writes: 0 }
        }
    }

    impl NvFlash for FakeFlash {
        fn read_page(&self, page: usize, out: &mut [u8]) -> Result<(), Error> {
            match self.pages.get(&page) {
                Some(data) => {
                    out.copy_from_slice(data);
                    Ok(())
                }
                None => {
                    out.fill(0xFF);
                    Ok(())
                }
            }
        }

        fn erase_write_page(&mut self, page: usize, data: &[u8]) -> Result<(), Error> {
            let mut arr = [0u8; PARAMS_SIZE];
            arr.copy_from_slice(data);
            self.pages.insert(page, arr);
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut p = StoredParams::default();
        p.stick_cal[0] = StickCalibration { min: 10, trim: 500, max: 4000 };
        p.presets[1] = 42.5;
        let mut buf = [0u8; PARAMS_SIZE];
        p.to_bytes(&mut buf);
        let back = StoredParams::from_bytes(&buf);
        assert_eq!(p, back);
    }

    #[test]
    fn uninitialized_region_is_all_ff() {
        let erased = [0xFFu8; 16];
        assert!(!is_initialized(&erased));
        let mut written = erased;
        written[3] = 0;
        assert!(is_initialized(&written));
    }

    #[test]
    fn load_from_erased_flash_uses_defaults() {
        let flash = FakeFlash::erased();
        let mut store = ParamsStore::new();
        store.load(&flash, 10);
        assert_eq!(*store.params(), StoredParams::default());
    }

    #[test]
    fn mark_then_one_second_flushes_exactly_once() {
        let mut flash = FakeFlash::erased();
        let mut store = ParamsStore::new();
        store.mark();

        // Too soon: no flush yet.
        assert!(!store.periodic_work(Tick(500), &mut flash, 10));
        assert_eq!(flash.writes, 0);

        // A second mark within the same window doesn't add a write.
        store.mark();
        assert!(store.periodic_work(Tick(1_000), &mut flash, 10));
        assert_eq!(flash.writes, 1);

        // Nothing dirty: no further writes.
        assert!(!store.periodic_work(Tick(5_000), &mut flash, 10));
        assert_eq!(flash.writes, 1);
    }

    #[test]
    fn load_after_save_round_trips_through_flash() {
        let mut flash = FakeFlash::erased();
        let mut store = ParamsStore::new();
        store.params_mut().sweep = SweepConfig { min_sweep_s: 2, max_sweep_s: 9 };
        store.mark();
        store.periodic_work(Tick(2_000), &mut flash, 10);

        let mut store2 = ParamsStore::new();
        store2.load(&flash, 10);
        assert_eq!(store2.params().sweep, SweepConfig { min_sweep_s: 2, max_sweep_s: 9 });
    }
}
