//! Multi-domain correlation engine.
//!
//! The false-positive killer: escalation is driven by how many independent
//! anomaly categories agree, not by any single reading.
//!
//! ```text
//!   0 categories → NORMAL      (after a de-escalation hold)
//!   1 category   → WARNING
//!   2 categories → CRITICAL    (timed countdown to EMERGENCY)
//!   3+ / short / physics limit → EMERGENCY, latched
//! ```
//!
//! EMERGENCY latches because a runaway precursor must not auto-acknowledge;
//! the latch clears only after the supervised recovery window of sustained
//! nominal input, so a prediction that never materialised does not demand a
//! manual reset. The CRITICAL countdown and the de-escalation hold are
//! cycle counts; the scheduler recomputes them from their millisecond
//! windows whenever the medium period changes.

use crate::evaluator::{AnomalyResult, CascadeStage, ModuleSet};

/// Overall system alert level, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SystemState {
    #[default]
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl SystemState {
    /// Display name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Emergency => "EMERGENCY",
        }
    }

    /// Status-indicator level 0..=3 as carried on the wire.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Default CRITICAL→EMERGENCY countdown: 20 cycles = 10 s at the nominal
/// 500 ms medium period.
pub const DEFAULT_CRITICAL_COUNTDOWN_LIMIT: u16 = 20;

/// Default de-escalation hold: 10 cycles = 5 s at 500 ms.
pub const DEFAULT_DEESCALATION_LIMIT: u16 = 10;

/// Default emergency recovery hold, in cycles of sustained nominal input.
pub const DEFAULT_EMERGENCY_RECOVERY_LIMIT: u16 = 10;

/// Latching state machine fed one [`AnomalyResult`] per medium cycle.
///
/// Mutated only by [`CorrelationEngine::update`] and explicit
/// [`CorrelationEngine::reset`]; the scheduler owns it exclusively.
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    state: SystemState,

    critical_countdown: u16,
    critical_countdown_limit: u16,

    deescalation_counter: u16,
    deescalation_limit: u16,

    emergency_latched: bool,
    emergency_recovery_counter: u16,
    emergency_recovery_limit: u16,

    // Pass-through from the latest evaluation, for telemetry.
    hotspot_module: Option<u8>,
    anomaly_modules: ModuleSet,
    risk_factor: f32,
    cascade_stage: CascadeStage,

    total_evaluations: u32,
    warning_count: u32,
    critical_count: u32,
    emergency_count: u32,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationEngine {
    /// Fresh engine: NORMAL, unlatched, default hold limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SystemState::Normal,
            critical_countdown: 0,
            critical_countdown_limit: DEFAULT_CRITICAL_COUNTDOWN_LIMIT,
            deescalation_counter: 0,
            deescalation_limit: DEFAULT_DEESCALATION_LIMIT,
            emergency_latched: false,
            emergency_recovery_counter: 0,
            emergency_recovery_limit: DEFAULT_EMERGENCY_RECOVERY_LIMIT,
            hotspot_module: None,
            anomaly_modules: ModuleSet::EMPTY,
            risk_factor: 0.0,
            cascade_stage: CascadeStage::Normal,
            total_evaluations: 0,
            warning_count: 0,
            critical_count: 0,
            emergency_count: 0,
        }
    }

    /// Re-initialise every field as if freshly constructed.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Current alert level.
    #[must_use]
    pub fn state(&self) -> SystemState {
        self.state
    }

    /// Whether the EMERGENCY latch is engaged.
    #[must_use]
    pub fn emergency_latched(&self) -> bool {
        self.emergency_latched
    }

    /// Rescale the time-valued holds to cycle counts for the current medium
    /// period. Called by the scheduler whenever that period changes so a
    /// 10 s deadline stays 10 s at any rate.
    pub fn set_hold_limits(&mut self, critical_cycles: u16, deescalation_cycles: u16) {
        self.critical_countdown_limit = critical_cycles.max(1);
        self.deescalation_limit = deescalation_cycles.max(1);
    }

    /// Cycles of sustained nominal input required to release the latch.
    #[must_use]
    pub fn emergency_recovery_limit(&self) -> u16 {
        self.emergency_recovery_limit
    }

    /// Current CRITICAL→EMERGENCY countdown limit in cycles.
    #[must_use]
    pub fn critical_countdown_limit(&self) -> u16 {
        self.critical_countdown_limit
    }

    /// Current de-escalation hold in cycles.
    #[must_use]
    pub fn deescalation_limit(&self) -> u16 {
        self.deescalation_limit
    }

    /// Hotspot module (0-based) from the latest evaluation.
    #[must_use]
    pub fn hotspot_module(&self) -> Option<u8> {
        self.hotspot_module
    }

    /// Modules flagged by the latest evaluation.
    #[must_use]
    pub fn anomaly_modules(&self) -> ModuleSet {
        self.anomaly_modules
    }

    /// Risk scalar from the latest evaluation.
    #[must_use]
    pub fn risk_factor(&self) -> f32 {
        self.risk_factor
    }

    /// Cascade stage from the latest evaluation.
    #[must_use]
    pub fn cascade_stage(&self) -> CascadeStage {
        self.cascade_stage
    }

    /// (total, warning, critical, emergency) evaluation counters.
    #[must_use]
    pub fn counters(&self) -> (u32, u32, u32, u32) {
        (
            self.total_evaluations,
            self.warning_count,
            self.critical_count,
            self.emergency_count,
        )
    }

    /// Process one evaluation result and return the new alert level.
    /// Called exactly once per medium cycle (and inline by the fast loop on
    /// a short circuit, which only ever escalates).
    pub fn update(&mut self, result: &AnomalyResult) -> SystemState {
        self.total_evaluations = self.total_evaluations.wrapping_add(1);

        self.hotspot_module = result.hotspot_module;
        self.anomaly_modules = result.anomaly_modules;
        self.risk_factor = result.risk_factor;
        self.cascade_stage = result.cascade_stage;

        // Latched: only the supervised recovery path may leave EMERGENCY.
        if self.emergency_latched {
            if result.any_anomaly() {
                self.emergency_recovery_counter = 0;
                self.emergency_count += 1;
                return SystemState::Emergency;
            }
            self.emergency_recovery_counter += 1;
            if self.emergency_recovery_counter >= self.emergency_recovery_limit {
                self.emergency_latched = false;
                self.emergency_recovery_counter = 0;
                self.critical_countdown = 0;
                self.deescalation_counter = 0;
                self.state = SystemState::Normal;
                return SystemState::Normal;
            }
            self.emergency_count += 1;
            return SystemState::Emergency;
        }

        if result.short_circuit || result.emergency_direct {
            return self.enter_emergency();
        }

        match result.active_count() {
            count if count >= 3 => self.enter_emergency(),
            2 => {
                if self.state != SystemState::Critical {
                    self.state = SystemState::Critical;
                    self.critical_countdown = 0;
                }
                self.critical_countdown += 1;
                self.critical_count += 1;
                self.deescalation_counter = 0;
                if self.critical_countdown >= self.critical_countdown_limit {
                    self.enter_emergency()
                } else {
                    SystemState::Critical
                }
            }
            1 => {
                self.state = SystemState::Warning;
                self.critical_countdown = 0;
                self.deescalation_counter = 0;
                self.warning_count += 1;
                SystemState::Warning
            }
            _ => {
                // Don't drop the level on a single clean cycle; a recurring
                // fault that dips to zero must stay visible.
                if self.state != SystemState::Normal {
                    self.deescalation_counter += 1;
                    if self.deescalation_counter >= self.deescalation_limit {
                        self.state = SystemState::Normal;
                        self.deescalation_counter = 0;
                    }
                }
                self.critical_countdown = 0;
                self.state
            }
        }
    }

    fn enter_emergency(&mut self) -> SystemState {
        self.state = SystemState::Emergency;
        self.emergency_latched = true;
        self.emergency_recovery_counter = 0;
        self.emergency_count += 1;
        SystemState::Emergency
    }
}
