//! Pack snapshot model and derived-field computer.
//!
//! One [`PackSnapshot`] is the canonical view of every sensor channel for a
//! single sampling cycle: pack electricals, eight [`ModuleSample`]s (13 group
//! voltages + 2 NTCs + swelling each), environment sensors, and the computed
//! statistics the anomaly evaluator consumes. Raw channels are written by the
//! receive path (or a direct driver surface); computed fields are filled
//! in-place by [`PackSnapshot::compute_derived`] once per medium cycle and
//! treated as read-only afterwards.

use smallvec::SmallVec;

/// Number of modules in the pack.
pub const MODULES: usize = 8;

/// Series cell groups per module.
pub const GROUPS_PER_MODULE: usize = 13;

/// Total series groups across the pack (104 for the 104S8P build).
pub const SERIES_TOTAL: usize = MODULES * GROUPS_PER_MODULE;

/// Parallel cells per series group.
pub const CELLS_PER_GROUP: usize = 8;

/// NTC sensors per module (one between groups 3-4, one between 10-11).
pub const NTCS_PER_MODULE: usize = 2;

/// Cell core-to-surface thermal resistance in °C/W for the cylindrical LFP
/// cells of the full pack build.
pub const R_THERMAL_C_PER_W: f32 = 3.0;

/// Lowest surface temperature an NTC can physically report. Anything below
/// (notably the -999 °C shorted-sensor sentinel) or non-finite is treated as
/// a dead channel and excluded from every thermal statistic.
pub const NTC_PLAUSIBLE_MIN_C: f32 = -45.0;

/// Returns `true` if an NTC reading is usable for thermal statistics.
///
/// There is deliberately no upper bound: a cell in runaway reads far above
/// any "sane" limit and must stay visible to the evaluator.
#[must_use]
pub fn ntc_plausible(temp_c: f32) -> bool {
    temp_c.is_finite() && temp_c >= NTC_PLAUSIBLE_MIN_C
}

/// The module whose hotter NTC currently reads highest across the pack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hotspot {
    /// Module index, 0-based.
    pub module: usize,
    /// Temperature of that module's hotter NTC in °C.
    pub temp_c: f32,
}

/// Per-module sensor channels plus computed statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleSample {
    /// 13 series-group voltages in volts.
    pub group_voltages_v: [f32; GROUPS_PER_MODULE],
    /// Surface temperature between groups 3-4 in °C.
    pub ntc1_c: f32,
    /// Surface temperature between groups 10-11 in °C.
    pub ntc2_c: f32,
    /// End-plate swelling, 0-100 %.
    pub swelling_pct: f32,

    /// Fastest NTC rate of rise seen this cycle, °C/min. Written by the
    /// medium loop from NTC history, not by `compute_derived`.
    pub max_dt_dt_c_min: f32,
    /// |NTC1 - NTC2| in °C; 0 unless both NTCs are plausible.
    pub delta_t_intra_c: f32,
    /// Sum of the 13 group voltages in volts.
    pub module_voltage_v: f32,
    /// Mean group voltage in volts.
    pub mean_group_v: f32,
    /// Max-min group voltage within the module, millivolts.
    pub v_spread_mv: f32,
}

impl Default for ModuleSample {
    fn default() -> Self {
        Self {
            group_voltages_v: [0.0; GROUPS_PER_MODULE],
            ntc1_c: 0.0,
            ntc2_c: 0.0,
            swelling_pct: 0.0,
            max_dt_dt_c_min: 0.0,
            delta_t_intra_c: 0.0,
            module_voltage_v: 0.0,
            mean_group_v: 0.0,
            v_spread_mv: 0.0,
        }
    }
}

impl ModuleSample {
    /// The hotter of the two NTCs, ignoring dead channels.
    #[must_use]
    pub fn hotter_ntc_c(&self) -> Option<f32> {
        match (ntc_plausible(self.ntc1_c), ntc_plausible(self.ntc2_c)) {
            (true, true) => Some(self.ntc1_c.max(self.ntc2_c)),
            (true, false) => Some(self.ntc1_c),
            (false, true) => Some(self.ntc2_c),
            (false, false) => None,
        }
    }
}

/// Full-pack snapshot: every raw channel plus the computed statistics the
/// evaluator reads. Produced once per medium cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PackSnapshot {
    /// Pack terminal voltage in volts (~332 V nominal).
    pub pack_voltage_v: f32,
    /// Pack current in amps, signed; positive = discharge.
    pub pack_current_a: f32,
    /// Estimated group internal resistance in milliohms.
    pub r_internal_mohm: f32,

    /// Per-module samples.
    pub modules: [ModuleSample; MODULES],

    /// Ambient temperature in °C.
    pub ambient_c: f32,
    /// Coolant inlet temperature in °C.
    pub coolant_inlet_c: f32,
    /// Coolant outlet temperature in °C.
    pub coolant_outlet_c: f32,
    /// Gas resistance ratio of sensor 1 (1.0 = clean air, lower = more VOC).
    pub gas_ratio_1: f32,
    /// Gas resistance ratio of sensor 2.
    pub gas_ratio_2: f32,
    /// Enclosure pressure delta at sensor 1, hPa, positive = overpressure.
    pub pressure_delta_1_hpa: f32,
    /// Enclosure pressure delta at sensor 2, hPa.
    pub pressure_delta_2_hpa: f32,
    /// Pack humidity, %.
    pub humidity_pct: f32,
    /// HV isolation resistance in MΩ.
    pub isolation_mohm: f32,

    /// Max per-module dT/dt across the pack, °C/min.
    pub dt_dt_max_c_min: f32,
    /// Max-min group voltage across all 104 groups, millivolts.
    pub v_spread_mv: f32,
    /// Max-min NTC temperature across all 16 sensors, °C.
    pub temp_spread_c: f32,
    /// Estimated core temperature of the hottest cell, °C.
    pub t_core_est_c: f32,
    /// Internal-resistance rate of change, mΩ/s. Written by the medium loop.
    pub dr_dt_mohm_s: f32,
    /// Coolant outlet minus inlet, °C. May be negative.
    pub coolant_delta_t_c: f32,

    /// Hottest module, or `None` until derived fields have been computed
    /// (or while every NTC channel is dead).
    pub hotspot: Option<Hotspot>,

    /// Raised by the fast loop on a current spike; cleared when a fresh
    /// external cycle arrives.
    pub short_circuit: bool,
}

impl Default for PackSnapshot {
    fn default() -> Self {
        Self {
            pack_voltage_v: 0.0,
            pack_current_a: 0.0,
            r_internal_mohm: 0.0,
            modules: [ModuleSample::default(); MODULES],
            ambient_c: 0.0,
            coolant_inlet_c: 0.0,
            coolant_outlet_c: 0.0,
            gas_ratio_1: 0.0,
            gas_ratio_2: 0.0,
            pressure_delta_1_hpa: 0.0,
            pressure_delta_2_hpa: 0.0,
            humidity_pct: 0.0,
            isolation_mohm: 0.0,
            dt_dt_max_c_min: 0.0,
            v_spread_mv: 0.0,
            temp_spread_c: 0.0,
            t_core_est_c: 0.0,
            dr_dt_mohm_s: 0.0,
            coolant_delta_t_c: 0.0,
            hotspot: None,
            short_circuit: false,
        }
    }
}

impl PackSnapshot {
    /// A healthy pack at light load: 332.8 V, 60 A (0.5C), NTCs around
    /// 28-30 °C, clean air, no overpressure. Used as the startup self-check
    /// probe and as the initial state before the first real sample arrives.
    #[must_use]
    pub fn nominal() -> Self {
        let mut snap = Self {
            pack_voltage_v: 332.8,
            pack_current_a: 60.0,
            r_internal_mohm: 0.44,
            ambient_c: 25.0,
            coolant_inlet_c: 25.0,
            coolant_outlet_c: 27.0,
            gas_ratio_1: 0.98,
            gas_ratio_2: 0.97,
            pressure_delta_1_hpa: 0.1,
            pressure_delta_2_hpa: 0.1,
            humidity_pct: 50.0,
            isolation_mohm: 500.0,
            ..Self::default()
        };
        for (m, module) in snap.modules.iter_mut().enumerate() {
            module.ntc1_c = 28.0 + m as f32 * 0.3;
            module.ntc2_c = 28.2 + m as f32 * 0.3;
            module.swelling_pct = 0.5;
            module.group_voltages_v = [3.20; GROUPS_PER_MODULE];
        }
        snap
    }

    /// Hotspot module as a 1-based number for display and telemetry;
    /// 0 means "not yet computed".
    #[must_use]
    pub fn hotspot_module_number(&self) -> u8 {
        match self.hotspot {
            Some(h) => h.module as u8 + 1,
            None => 0,
        }
    }

    /// Fill every computed field from the raw channels. Raw channels are
    /// never written; dead NTC channels are excluded from the statistics so
    /// a shorted sensor cannot fake a gradient.
    pub fn compute_derived(&mut self) {
        for module in &mut self.modules {
            module.module_voltage_v = module.group_voltages_v.iter().sum();
            module.mean_group_v = module.module_voltage_v / GROUPS_PER_MODULE as f32;
            module.v_spread_mv = spread(module.group_voltages_v.iter().copied()) * 1000.0;
            module.delta_t_intra_c =
                if ntc_plausible(module.ntc1_c) && ntc_plausible(module.ntc2_c) {
                    (module.ntc1_c - module.ntc2_c).abs()
                } else {
                    0.0
                };
        }

        self.v_spread_mv = spread(
            self.modules
                .iter()
                .flat_map(|m| m.group_voltages_v.iter().copied()),
        ) * 1000.0;

        let ntcs: SmallVec<[f32; MODULES * NTCS_PER_MODULE]> = self
            .modules
            .iter()
            .flat_map(|m| [m.ntc1_c, m.ntc2_c])
            .filter(|&t| ntc_plausible(t))
            .collect();
        self.temp_spread_c = spread(ntcs.iter().copied());

        // Lowest module index wins a hotspot tie.
        self.hotspot = None;
        for (m, module) in self.modules.iter().enumerate() {
            if let Some(temp) = module.hotter_ntc_c() {
                if self.hotspot.map_or(true, |h| temp > h.temp_c) {
                    self.hotspot = Some(Hotspot { module: m, temp_c: temp });
                }
            }
        }

        self.dt_dt_max_c_min = self
            .modules
            .iter()
            .map(|m| m.max_dt_dt_c_min)
            .filter(|d| d.is_finite())
            .fold(0.0, f32::max);

        // T_core = T_surface + I_cell² · R_int · R_thermal. With no live NTC
        // the ambient sensor is the best remaining surface estimate.
        let surface_c = match self.hotspot {
            Some(h) => h.temp_c,
            None if self.ambient_c.is_finite() => self.ambient_c,
            None => 0.0,
        };
        let i_cell_a = self.pack_current_a / CELLS_PER_GROUP as f32;
        let r_int_ohm = self.r_internal_mohm / 1000.0;
        let joule_rise_c = i_cell_a * i_cell_a * r_int_ohm * R_THERMAL_C_PER_W;
        self.t_core_est_c = if joule_rise_c.is_finite() {
            surface_c + joule_rise_c
        } else {
            surface_c
        };

        self.coolant_delta_t_c = self.coolant_outlet_c - self.coolant_inlet_c;
    }
}

/// Max-min over the finite values of an iterator; 0 when fewer than two
/// finite values remain.
fn spread(values: impl Iterator<Item = f32>) -> f32 {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for v in values.filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if max >= min {
        max - min
    } else {
        0.0
    }
}
