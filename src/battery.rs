//! Battery/charger manager (component G, spec.md §4.5).
//!
//! Owns the single `BatteryState` instance: classifies the pack, filters
//! state-of-charge, drives cell balancing, and triggers the `Shutdown`
//! task on undervoltage with no charger present. Mutated by the
//! ADC-completion path (through [`BatteryManager::on_cell_samples`]) and
//! the 50 Hz heartbeat (through [`BatteryManager::prep_to_sample`]);
//! read widely by the UI and power manager.

/// UI alert thresholds, in percent of the display-clamped scale (spec.md
/// §4.5).
pub const FAILSAFE_PCT: u8 = 10;
pub const CRITICAL_PCT: u8 = 16;
pub const DISMISS_TOO_LOW_PCT: u8 = 30;

const THERMISTOR_DISCONNECT: i32 = 4_000;
const PACK_ID_DISCONNECT: i32 = 4_000;
const PACK_ID_2CELL: i32 = 500;
const PACK_ID_4CELL: i32 = 1_500;
const PACK_ID_SLOP_PCT: i32 = 1;

const OVERVOLTAGE_COUNTS: i32 = 4_250;
const THERMAL_LIMIT_COUNTS: i32 = 600;
const UNDERVOLTAGE_COUNTS: i32 = 3_000;
const BALANCE_DELTA_COUNTS: i32 = 20;

/// Ticks the sample-gate cycle spans: a few ticks with the charger
/// disabled (to remove its offset from the cell readings), then a few
/// more with the balancing shunts also disabled before the gate opens.
const DISABLE_CHARGER_AT: u8 = 2;
const GATE_OPEN_AT: u8 = 5;
const CYCLE_LEN: u8 = 8;

const SOC_FILTER_N: i32 = 10;
const SOC_REPORT_DELTA: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackType {
    Unknown,
    Pack2Cell,
    Pack4Cell,
}

/// Hardware actions the sampling-window state machine wants this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GateActions {
    pub disable_charger: bool,
    pub disable_shunts: bool,
    /// Whether the ADC result that arrives after this tick should be
    /// treated as a valid (charger-quiesced) cell sample.
    pub gate_open: bool,
}

/// UI-relevant edges detected by [`BatteryManager::on_cell_samples`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellEventFlags {
    pub pack_unknown_while_present: bool,
    pub charger_conn_changed: bool,
    pub charger_connected: bool,
    pub soc_changed: bool,
    pub shutdown_needed: bool,
}

pub struct BatteryManager {
    sample_counter: u8,
    pack: PackType,
    charger_present: bool,
    thermal_lockout: bool,
    overvoltage_hold: bool,
    first_sample: bool,
    cell_sum_prev: Option<i32>,
    soc_filtered: f32,
    soc_reported: u8,
    balance_needed: bool,
}

impl BatteryManager {
    pub const fn new() -> Self {
        Self {
            sample_counter: 0,
            pack: PackType::Unknown,
            charger_present: false,
            thermal_lockout: false,
            overvoltage_hold: false,
            first_sample: true,
            cell_sum_prev: None,
            soc_filtered: 0.0,
            soc_reported: 0,
            balance_needed: false,
        }
    }

    pub fn pack(&self) -> PackType {
        self.pack
    }

    pub fn reported_soc(&self) -> u8 {
        self.soc_reported
    }

    pub fn thermal_lockout(&self) -> bool {
        self.thermal_lockout
    }

    pub fn balance_needed(&self) -> bool {
        self.balance_needed
    }

    /// Called each 50 Hz tick to advance the sample-gate cycle.
    pub fn prep_to_sample(&mut self) -> GateActions {
        let count = self.sample_counter;
        self.sample_counter = if count + 1 >= CYCLE_LEN { 0 } else { count + 1 };
        GateActions {
            disable_charger: count == DISABLE_CHARGER_AT,
            disable_shunts: count == GATE_OPEN_AT,
            gate_open: count >= GATE_OPEN_AT,
        }
    }

    /// Whether the charger output should be (re-)enabled right now. Gated
    /// off by thermal lockout or a latched overvoltage condition; the
    /// caller should only ask this once per sample-gate cycle (count==0).
    pub fn should_enable_charger(&self) -> bool {
        self.charger_present && !self.thermal_lockout && !self.overvoltage_hold
    }

    fn classify_pack(pack_id: i32) -> (PackType, bool) {
        if pack_id >= PACK_ID_DISCONNECT {
            return (PackType::Unknown, false);
        }
        if within_slop(pack_id, PACK_ID_2CELL, PACK_ID_SLOP_PCT) {
            (PackType::Pack2Cell, true)
        } else if within_slop(pack_id, PACK_ID_4CELL, PACK_ID_SLOP_PCT) {
            (PackType::Pack4Cell, true)
        } else {
            (PackType::Unknown, true)
        }
    }

    fn curve_for(pack: PackType) -> &'static [i32] {
        match pack {
            PackType::Pack2Cell => &SOC_CURVE_2CELL,
            PackType::Pack4Cell => &SOC_CURVE_4CELL,
            PackType::Unknown => &[],
        }
    }

    /// Process one gated batch of cell readings (spec.md §4.5 steps 1-9).
    /// Only call this when the gate was open for the sample in question.
    pub fn on_cell_samples(
        &mut self,
        bottom: i32,
        top_raw: i32,
        thermistor: i32,
        pack_id: i32,
        charger_present: bool,
    ) -> CellEventFlags {
        let mut flags = CellEventFlags::default();

        if thermistor >= THERMISTOR_DISCONNECT {
            // Battery disconnected; nothing else to process this pass.
            self.pack = PackType::Unknown;
            return flags;
        }

        let (pack, present) = Self::classify_pack(pack_id);
        self.pack = pack;
        if pack == PackType::Unknown && present {
            flags.pack_unknown_while_present = true;
        }

        let top = top_raw - bottom; // divider geometry correction
        let cell_sum = bottom + top;

        if self.cell_sum_prev != Some(cell_sum) {
            self.cell_sum_prev = Some(cell_sum);
            let raw_soc = lookup_soc(Self::curve_for(pack), cell_sum);
            self.update_filtered_soc(raw_soc, &mut flags);
        }

        if !self.charger_present && charger_present {
            flags.charger_conn_changed = true;
            flags.charger_connected = true;
            self.thermal_lockout = false; // unplugged and replugged clears lockout
        }
        self.charger_present = charger_present;

        self.overvoltage_hold = bottom > OVERVOLTAGE_COUNTS || top > OVERVOLTAGE_COUNTS;

        if thermistor < THERMAL_LIMIT_COUNTS {
            self.thermal_lockout = true;
        }

        if !self.charger_present && (bottom < UNDERVOLTAGE_COUNTS || top < UNDERVOLTAGE_COUNTS) {
            flags.shutdown_needed = true;
        }

        self.balance_needed =
            (top - bottom).unsigned_abs() as i32 >= BALANCE_DELTA_COUNTS && self.should_enable_charger();

        flags
    }

    fn update_filtered_soc(&mut self, raw_soc: u8, flags: &mut CellEventFlags) {
        if self.first_sample {
            self.soc_filtered = raw_soc as f32;
            self.soc_reported = raw_soc;
            self.first_sample = false;
            flags.soc_changed = true;
            return;
        }

        self.soc_filtered += (raw_soc as f32 - self.soc_filtered) / SOC_FILTER_N as f32;
        let filtered_rounded = self.soc_filtered.round().clamp(0.0, 100.0) as u8;

        let delta = (filtered_rounded as i16 - self.soc_reported as i16).abs();
        if delta >= SOC_REPORT_DELTA as i16 || filtered_rounded == 0 {
            self.soc_reported = filtered_rounded;
            flags.soc_changed = true;
        }
    }
}

impl Default for BatteryManager {
    fn default() -> Self {
        Self::new()
    }
}

fn within_slop(value: i32, reference: i32, pct: i32) -> bool {
    let slop = (reference * pct) / 100;
    (value - reference).abs() <= slop.max(1)
}

/// `(count - first_index_whose_threshold_is_below_sum) / count`, rendered
/// 0-100 (spec.md §4.5 step 3). An empty curve (unknown pack) reports 0.
fn lookup_soc(curve: &[i32], cell_sum: i32) -> u8 {
    if curve.is_empty() {
        return 0;
    }
    let count = curve.len();
    let idx = curve.iter().position(|&threshold| threshold < cell_sum).unwrap_or(count);
    (((count - idx) * 100) / count) as u8
}

/// Discards the lowest 10% of raw SoC for headroom before alert
/// thresholds are applied (spec.md §4.5).
pub fn to_display_scale(raw_pct: u8) -> u8 {
    let shifted = raw_pct.saturating_sub(10);
    ((shifted as u32 * 100) / 90).min(100) as u8
}

// Descending cell-sum ADC thresholds, consulted top-down. Indicative
// values for a 2S/4S Li-ion pack on a 12-bit ADC; not a datasheet figure.
const SOC_CURVE_2CELL: [i32; 11] =
    [4_050, 3_980, 3_920, 3_860, 3_800, 3_740, 3_680, 3_620, 3_550, 3_450, 3_300];
const SOC_CURVE_4CELL: [i32; 11] = [
    8_100, 7_960, 7_840, 7_720, 7_600, 7_480, 7_360, 7_240, 7_100, 6_900, 6_600,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_unknown_when_pack_id_disconnected() {
        let (pack, present) = BatteryManager::classify_pack(4_500);
        assert_eq!(pack, PackType::Unknown);
        assert!(!present);
    }

    #[test]
    fn classifies_known_packs_within_slop() {
        let (pack, present) = BatteryManager::classify_pack(PACK_ID_2CELL + 2);
        assert_eq!(pack, PackType::Pack2Cell);
        assert!(present);

        let (pack, present) = BatteryManager::classify_pack(PACK_ID_4CELL - 2);
        assert_eq!(pack, PackType::Pack4Cell);
        assert!(present);
    }

    #[test]
    fn unknown_pack_while_present_raises_flag() {
        let mut bm = BatteryManager::new();
        let flags = bm.on_cell_samples(3_000, 3_000, 1_000, 900 /* neither known value */, false);
        assert!(flags.pack_unknown_while_present);
    }

    #[test]
    fn first_sample_latches_unfiltered() {
        let mut bm = BatteryManager::new();
        let flags = bm.on_cell_samples(2_000, 4_000, 1_000, PACK_ID_4CELL, false);
        assert!(flags.soc_changed);
        assert_eq!(bm.reported_soc(), lookup_soc(&SOC_CURVE_4CELL, 2_000));
    }

    #[test]
    fn small_step_change_does_not_propagate() {
        let mut bm = BatteryManager::new();
        bm.on_cell_samples(8_000, 16_000, 1_000, PACK_ID_4CELL, false); // latch first, ~100%
        let first_reported = bm.reported_soc();

        // Nudge cell sum down by a small amount (< 3 percentage points worth).
        let flags = bm.on_cell_samples(7_990, 15_980, 1_000, PACK_ID_4CELL, false);
        assert!(!flags.soc_changed);
        assert_eq!(bm.reported_soc(), first_reported);
    }

    #[test]
    fn large_step_change_converges_within_ten_samples() {
        let mut bm = BatteryManager::new();
        bm.on_cell_samples(8_000, 16_000, 1_000, PACK_ID_4CELL, false); // latch near-full

        // Drop hard to a much lower cell sum and feed repeated samples;
        // the IIR should reach the new steady value within 10 samples.
        for i in 0..10 {
            bm.on_cell_samples(6_600, 13_200, 1_000, PACK_ID_4CELL, false);
            let _ = i;
        }
        let target = lookup_soc(&SOC_CURVE_4CELL, 19_800);
        assert!((bm.reported_soc() as i16 - target as i16).abs() <= 1);
    }

    #[test]
    fn charger_connect_edge_raises_flags_once() {
        let mut bm = BatteryManager::new();
        bm.on_cell_samples(3_800, 7_600, 1_000, PACK_ID_4CELL, false);
        let flags = bm.on_cell_samples(3_800, 7_601, 1_000, PACK_ID_4CELL, true);
        assert!(flags.charger_conn_changed);
        assert!(flags.charger_connected);

        let flags2 = bm.on_cell_samples(3_800, 7_601, 1_000, PACK_ID_4CELL, true);
        assert!(!flags2.charger_conn_changed);
    }

    #[test]
    fn thermal_lockout_persists_until_unplug_replug() {
        let mut bm = BatteryManager::new();
        bm.on_cell_samples(3_800, 7_600, 100 /* below thermal limit */, PACK_ID_4CELL, false);
        assert!(bm.thermal_lockout());
        assert!(!bm.should_enable_charger());

        // Still plugged absent -> stays locked out even if thermistor recovers.
        bm.on_cell_samples(3_800, 7_600, 2_000, PACK_ID_4CELL, false);
        assert!(bm.thermal_lockout());

        // Unplug then replug clears the lockout.
        bm.on_cell_samples(3_800, 7_600, 2_000, PACK_ID_4CELL, true);
        assert!(!bm.thermal_lockout());
    }

    #[test]
    fn undervoltage_without_charger_requests_shutdown() {
        let mut bm = BatteryManager::new();
        let flags = bm.on_cell_samples(2_800, 5_600, 2_000, PACK_ID_4CELL, false);
        assert!(flags.shutdown_needed);

        let flags = bm.on_cell_samples(2_800, 5_600, 2_000, PACK_ID_4CELL, true);
        assert!(!flags.shutdown_needed);
    }

    #[test]
    fn balance_needed_when_delta_large_and_charger_enabled() {
        let mut bm = BatteryManager::new();
        let flags = bm.on_cell_samples(3_800, 7_630 /* top-bottom delta = 30 */, 2_000, PACK_ID_4CELL, true);
        let _ = flags;
        assert!(bm.balance_needed());
    }

    #[test]
    fn display_scale_discards_lowest_tenth() {
        assert_eq!(to_display_scale(10), 0);
        assert_eq!(to_display_scale(100), 100);
        assert_eq!(to_display_scale(55), 50);
    }

    #[test]
    fn sample_gate_cycle_opens_after_disabling_charger_and_shunts() {
        let mut bm = BatteryManager::new();
        let mut saw_disable_charger = false;
        let mut saw_gate_open = false;
        for _ in 0..CYCLE_LEN {
            let actions = bm.prep_to_sample();
            saw_disable_charger |= actions.disable_charger;
            saw_gate_open |= actions.gate_open;
        }
        assert!(saw_disable_charger);
        assert!(saw_gate_open);
    }
}
