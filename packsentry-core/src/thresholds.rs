//! Trip thresholds for the full 104S8P pack.
//!
//! The record is created once at startup, validated, and never mutated
//! during operation. Every limit is a plain named number so the whole set
//! can be reviewed (and serialized for the dashboard) at a glance.

use serde::{Deserialize, Serialize};

/// Flat record of every trip limit the evaluator reads.
///
/// Ordering rules are enforced by [`Thresholds::validate`]; a violation is a
/// fatal self-check failure that keeps the contactor-close path blocked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Pack voltage below this is an electrical anomaly (V).
    pub voltage_low_v: f32,
    /// Pack voltage above this is an electrical anomaly (V).
    pub voltage_high_v: f32,
    /// Per-group deviation from the module mean (mV).
    pub group_v_deviation_mv: f32,
    /// Max-min spread across all 104 groups, warning (mV).
    pub v_spread_warn_mv: f32,
    /// Max-min spread across all 104 groups, critical (mV).
    pub v_spread_crit_mv: f32,
    /// |Pack current| above this is anomalous (A).
    pub current_warning_a: f32,
    /// |Pack current| above this is a short circuit (A).
    pub current_short_a: f32,
    /// |Pack current| above this is an immediate emergency (A).
    pub current_emergency_a: f32,
    /// Group internal resistance above this indicates degradation (mΩ).
    pub r_int_warning_mohm: f32,

    /// Any NTC above this is a thermal anomaly (°C).
    pub temp_warning_c: f32,
    /// Critical cell temperature (°C).
    pub temp_critical_c: f32,
    /// Any NTC above this is an immediate emergency (°C).
    pub temp_emergency_c: f32,
    /// Rate of rise warning (°C/min).
    pub dt_dt_warning_c_min: f32,
    /// Rate of rise emergency (°C/min).
    pub dt_dt_emergency_c_min: f32,
    /// Max-min NTC spread across modules, warning (°C).
    pub inter_module_dt_warn_c: f32,
    /// Max-min NTC spread across modules, critical (°C).
    pub inter_module_dt_crit_c: f32,
    /// |NTC1 - NTC2| within one module, warning (°C).
    pub intra_module_dt_warn_c: f32,
    /// |NTC1 - NTC2| within one module, critical (°C).
    pub intra_module_dt_crit_c: f32,
    /// Hottest NTC minus ambient at or above this is a thermal anomaly (°C).
    /// A 45 °C cell in 25 °C ambient is suspicious; the same cell in 38 °C
    /// ambient is not.
    pub delta_t_ambient_warning_c: f32,

    /// Gas ratio below this is a gas anomaly (ratios drop with VOCs).
    pub gas_warning_ratio: f32,
    /// Gas ratio below this is critical off-gassing.
    pub gas_critical_ratio: f32,

    /// Pressure delta above this is a pressure anomaly (hPa).
    pub pressure_warning_hpa: f32,
    /// Pressure delta above this is critical venting (hPa).
    pub pressure_critical_hpa: f32,

    /// Minimum expected coolant ΔT under load (°C).
    pub coolant_dt_min_c: f32,

    /// Module swelling above this is a mechanical anomaly (%).
    pub swelling_warning_pct: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            voltage_low_v: 260.0,
            voltage_high_v: 380.0,
            group_v_deviation_mv: 15.0,
            v_spread_warn_mv: 50.0,
            v_spread_crit_mv: 100.0,
            current_warning_a: 180.0,
            current_short_a: 350.0,
            current_emergency_a: 500.0,
            r_int_warning_mohm: 2.0,
            temp_warning_c: 55.0,
            temp_critical_c: 70.0,
            temp_emergency_c: 80.0,
            dt_dt_warning_c_min: 2.0,
            dt_dt_emergency_c_min: 5.0,
            inter_module_dt_warn_c: 5.0,
            inter_module_dt_crit_c: 10.0,
            intra_module_dt_warn_c: 3.0,
            intra_module_dt_crit_c: 6.0,
            delta_t_ambient_warning_c: 20.0,
            gas_warning_ratio: 0.70,
            gas_critical_ratio: 0.40,
            pressure_warning_hpa: 5.0,
            pressure_critical_hpa: 15.0,
            coolant_dt_min_c: 2.0,
            swelling_warning_pct: 3.0,
        }
    }
}

/// A threshold ordering rule that does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdError {
    /// `temp_warning_c < temp_critical_c < temp_emergency_c` violated.
    TemperatureOrdering,
    /// `gas_warning_ratio > gas_critical_ratio` violated (ratios fall as
    /// VOC concentration rises).
    GasOrdering,
    /// `pressure_warning_hpa < pressure_critical_hpa` violated.
    PressureOrdering,
    /// `current_warning_a < current_short_a < current_emergency_a` violated.
    CurrentOrdering,
}

impl std::fmt::Display for ThresholdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TemperatureOrdering => {
                write!(f, "temperature thresholds must satisfy warning < critical < emergency")
            }
            Self::GasOrdering => {
                write!(f, "gas warning ratio must be above the critical ratio")
            }
            Self::PressureOrdering => {
                write!(f, "pressure warning must be below the critical delta")
            }
            Self::CurrentOrdering => {
                write!(f, "current thresholds must satisfy warning < short < emergency")
            }
        }
    }
}

impl std::error::Error for ThresholdError {}

impl Thresholds {
    /// Check the ordering rules. Called by the startup self-check; a failure
    /// keeps the safety-arm gate closed.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        if !(self.temp_warning_c < self.temp_critical_c
            && self.temp_critical_c < self.temp_emergency_c)
        {
            return Err(ThresholdError::TemperatureOrdering);
        }
        if self.gas_warning_ratio <= self.gas_critical_ratio {
            return Err(ThresholdError::GasOrdering);
        }
        if self.pressure_warning_hpa >= self.pressure_critical_hpa {
            return Err(ThresholdError::PressureOrdering);
        }
        if !(self.current_warning_a < self.current_short_a
            && self.current_short_a < self.current_emergency_a)
        {
            return Err(ThresholdError::CurrentOrdering);
        }
        Ok(())
    }
}
