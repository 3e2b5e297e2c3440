//! Anomaly category evaluator.
//!
//! [`evaluate`] reduces one computed [`PackSnapshot`] to five independent
//! anomaly category bits plus the derived facts the correlation engine and
//! the telemetry encoder need. It is a pure function: it reads the
//! thresholds and the snapshot, writes nothing back, and allocates nothing.
//!
//! Each physical domain is checked on its own; the correlation engine then
//! counts how many domains agree before anything drastic happens. The two
//! exceptions that bypass counting are the short-circuit flag and the
//! physics-limit "direct emergency" checks — a reading no healthy pack can
//! produce does not need a second opinion.

use enumset::{EnumSet, EnumSetType};

use crate::snapshot::{ntc_plausible, PackSnapshot, MODULES};
use crate::thresholds::Thresholds;

/// One independent physical domain contributing a bit to the anomaly mask.
///
/// Declaration order fixes the wire encoding: ELECTRICAL = 0x01,
/// THERMAL = 0x02, GAS = 0x04, PRESSURE = 0x08, SWELLING = 0x10.
#[derive(EnumSetType, Debug)]
pub enum Category {
    /// Voltage, current, or internal-resistance anomaly.
    Electrical,
    /// Temperature level, gradient, or rate-of-rise anomaly.
    Thermal,
    /// VOC gas-ratio anomaly (ratio drops when electrolyte decomposes).
    Gas,
    /// Enclosure overpressure anomaly.
    Pressure,
    /// Mechanical cell-swelling anomaly.
    Swelling,
}

impl Category {
    /// Short display label.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Electrical => "ELECTRICAL",
            Self::Thermal => "THERMAL",
            Self::Gas => "GAS",
            Self::Pressure => "PRESSURE",
            Self::Swelling => "SWELLING",
        }
    }
}

/// Set of module indexes (0-based), stored as the same u8 bitmask the
/// telemetry frame carries. Bit *m* set means module *m* contributed to at
/// least one anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleSet(u8);

impl ModuleSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Mark a module. Indexes ≥ [`MODULES`] are ignored.
    pub fn insert(&mut self, module: usize) {
        if module < MODULES {
            self.0 |= 1 << module;
        }
    }

    /// Whether a module is marked.
    #[must_use]
    pub fn contains(self, module: usize) -> bool {
        module < MODULES && self.0 & (1 << module) != 0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of marked modules.
    #[must_use]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// The raw bitmask as carried on the wire.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Rebuild from a wire bitmask.
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Iterate marked module indexes in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MODULES).filter(move |&m| self.contains(m))
    }
}

/// Discretised thermal-runaway progression of the hottest cell, derived
/// from its estimated core temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CascadeStage {
    /// Below 60 °C core.
    #[default]
    Normal,
    /// Above 60 °C.
    Elevated,
    /// Above 80 °C: SEI layer breaks down.
    SeiDecomposition,
    /// Above 120 °C: separator starts to collapse.
    SeparatorCollapse,
    /// Above 150 °C: electrolyte decomposes.
    ElectrolyteDecomposition,
    /// Above 200 °C: cathode decomposes.
    CathodeDecomposition,
    /// Above 300 °C.
    FullRunaway,
}

impl CascadeStage {
    /// Core-temperature boundaries between stages, °C. A stage is the number
    /// of boundaries strictly exceeded.
    pub const BOUNDARIES_C: [f32; 6] = [60.0, 80.0, 120.0, 150.0, 200.0, 300.0];

    /// Stage for an estimated core temperature. NaN maps to `Normal` — an
    /// unknown core temperature must not look like a runaway.
    #[must_use]
    pub fn from_core_temp(core_temp_c: f32) -> Self {
        let exceeded = Self::BOUNDARIES_C
            .iter()
            .filter(|&&boundary| core_temp_c > boundary)
            .count();
        Self::from_index(exceeded as u8)
    }

    /// Stage from its index; values above 6 saturate at `FullRunaway`.
    #[must_use]
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => Self::Normal,
            1 => Self::Elevated,
            2 => Self::SeiDecomposition,
            3 => Self::SeparatorCollapse,
            4 => Self::ElectrolyteDecomposition,
            5 => Self::CathodeDecomposition,
            _ => Self::FullRunaway,
        }
    }

    /// Stage index 0..=6 as carried on the wire.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for CascadeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Normal => "Normal",
            Self::Elevated => "Elevated",
            Self::SeiDecomposition => "SEI decomposition",
            Self::SeparatorCollapse => "Separator collapse",
            Self::ElectrolyteDecomposition => "Electrolyte decomposition",
            Self::CathodeDecomposition => "Cathode decomposition",
            Self::FullRunaway => "Full runaway",
        };
        f.write_str(name)
    }
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnomalyResult {
    /// Active anomaly categories.
    pub categories: EnumSet<Category>,
    /// Short circuit detected (fast-loop flag or current above the short
    /// threshold).
    pub short_circuit: bool,
    /// A single-channel physics limit tripped; bypasses category counting.
    pub emergency_direct: bool,
    /// Hottest module (0-based), when any NTC is live.
    pub hotspot_module: Option<u8>,
    /// Modules that contributed to at least one anomaly.
    pub anomaly_modules: ModuleSet,
    /// Bounded 0.0–1.0 runaway risk scalar; display and ranking only,
    /// never a trip source.
    pub risk_factor: f32,
    /// Thermal cascade stage of the hottest cell.
    pub cascade_stage: CascadeStage,
}

impl AnomalyResult {
    /// Number of active categories, 0..=5.
    #[must_use]
    pub fn active_count(&self) -> u8 {
        self.categories.len() as u8
    }

    /// The category mask as carried on the wire.
    #[must_use]
    pub fn category_bits(&self) -> u8 {
        self.categories.as_u8()
    }

    /// Hotspot module as a 1-based number (0 = none) for display/telemetry.
    #[must_use]
    pub fn hotspot_module_number(&self) -> u8 {
        self.hotspot_module.map_or(0, |m| m + 1)
    }

    /// True if anything at all is wrong — used by the emergency-recovery
    /// hold and the scheduler's alert mode.
    #[must_use]
    pub fn any_anomaly(&self) -> bool {
        !self.categories.is_empty() || self.short_circuit || self.emergency_direct
    }
}

/// Evaluate a computed snapshot against the thresholds.
///
/// Expects [`PackSnapshot::compute_derived`] to have run on this snapshot
/// in the same cycle. Implausible channel values (NaN, the -999 °C NTC
/// sentinel) never raise a category: every rule is written so that a dead
/// channel compares false, and the derived statistics already exclude dead
/// NTCs. A channel must return to a plausible range before it can alarm.
#[must_use]
pub fn evaluate(thresholds: &Thresholds, snapshot: &PackSnapshot) -> AnomalyResult {
    let mut categories = EnumSet::new();
    let mut marked = ModuleSet::EMPTY;
    let mut short_circuit = false;
    let mut emergency_direct = false;

    let abs_current_a = snapshot.pack_current_a.abs();

    // --- Electrical ---
    if snapshot.pack_voltage_v < thresholds.voltage_low_v
        || snapshot.pack_voltage_v > thresholds.voltage_high_v
    {
        categories |= Category::Electrical;
    }
    if snapshot.v_spread_mv > thresholds.v_spread_warn_mv {
        categories |= Category::Electrical;
    }
    for (m, module) in snapshot.modules.iter().enumerate() {
        // One offending group is enough to mark the module.
        let deviating = module.group_voltages_v.iter().any(|&v| {
            (v - module.mean_group_v).abs() * 1000.0 > thresholds.group_v_deviation_mv
        });
        if deviating {
            categories |= Category::Electrical;
            marked.insert(m);
        }
    }
    if abs_current_a > thresholds.current_warning_a {
        categories |= Category::Electrical;
    }
    if snapshot.r_internal_mohm > thresholds.r_int_warning_mohm {
        categories |= Category::Electrical;
    }
    if snapshot.short_circuit || abs_current_a > thresholds.current_short_a {
        short_circuit = true;
        categories |= Category::Electrical;
    }
    if abs_current_a > thresholds.current_emergency_a {
        emergency_direct = true;
        categories |= Category::Electrical;
    }

    // --- Thermal ---
    for (m, module) in snapshot.modules.iter().enumerate() {
        let over = [module.ntc1_c, module.ntc2_c]
            .into_iter()
            .any(|t| ntc_plausible(t) && t > thresholds.temp_warning_c);
        if over {
            categories |= Category::Thermal;
            marked.insert(m);
        }
        if module.delta_t_intra_c > thresholds.intra_module_dt_warn_c {
            categories |= Category::Thermal;
            marked.insert(m);
        }
    }
    if snapshot.temp_spread_c > thresholds.inter_module_dt_warn_c {
        categories |= Category::Thermal;
    }
    if let Some(hotspot) = snapshot.hotspot {
        // Ambient compensation: a fixed absolute limit is wrong in hot
        // climates and too slow in cold ones; the excursion above ambient
        // is what matters.
        if snapshot.ambient_c.is_finite()
            && hotspot.temp_c - snapshot.ambient_c >= thresholds.delta_t_ambient_warning_c
        {
            categories |= Category::Thermal;
        }
        if hotspot.temp_c > thresholds.temp_emergency_c {
            emergency_direct = true;
            categories |= Category::Thermal;
        }
    }
    if snapshot.dt_dt_max_c_min > thresholds.dt_dt_warning_c_min {
        categories |= Category::Thermal;
    }
    if snapshot.dt_dt_max_c_min > thresholds.dt_dt_emergency_c_min {
        emergency_direct = true;
        categories |= Category::Thermal;
    }

    // --- Gas --- worst case of the two co-located sensors; f32::min skips
    // a NaN operand, and a double-NaN compares false.
    let worst_gas = snapshot.gas_ratio_1.min(snapshot.gas_ratio_2);
    if worst_gas < thresholds.gas_warning_ratio {
        categories |= Category::Gas;
    }

    // --- Pressure ---
    let worst_pressure_hpa = snapshot.pressure_delta_1_hpa.max(snapshot.pressure_delta_2_hpa);
    if worst_pressure_hpa > thresholds.pressure_warning_hpa {
        categories |= Category::Pressure;
    }

    // --- Swelling ---
    for (m, module) in snapshot.modules.iter().enumerate() {
        if module.swelling_pct > thresholds.swelling_warning_pct {
            categories |= Category::Swelling;
            marked.insert(m);
        }
    }

    AnomalyResult {
        categories,
        short_circuit,
        emergency_direct,
        hotspot_module: snapshot.hotspot.map(|h| h.module as u8),
        anomaly_modules: marked,
        risk_factor: risk_factor(snapshot, worst_gas, worst_pressure_hpa),
        cascade_stage: CascadeStage::from_core_temp(snapshot.t_core_est_c),
    }
}

/// Bounded runaway-risk scalar: core temperature, rate of rise, gas, and
/// pressure contributions, each clamped to [0, 1] before the clamped sum.
fn risk_factor(snapshot: &PackSnapshot, worst_gas: f32, worst_pressure_hpa: f32) -> f32 {
    let total = contribution((snapshot.t_core_est_c - 60.0) / 240.0)
        + contribution(snapshot.dt_dt_max_c_min * 0.05)
        + contribution((0.8 - worst_gas) * 0.5)
        + contribution(worst_pressure_hpa * 0.02);
    total.clamp(0.0, 1.0)
}

/// Clamp one risk contribution; a NaN input contributes nothing.
fn contribution(raw: f32) -> f32 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
