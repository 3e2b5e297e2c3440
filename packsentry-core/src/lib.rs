//! Core decision logic for the PackSentry traction-battery supervisor.
//!
//! This crate is hardware-agnostic and can be tested without embedded
//! hardware. It holds the three inner stages of the safety pipeline:
//!
//! 1. [`snapshot`] — the canonical in-memory shape of one pack sample
//!    (104 series groups across 8 modules, ~139 channels) and the
//!    derived-field computer that fills voltage/temperature statistics,
//!    the hotspot, and the estimated cell-core temperature.
//! 2. [`evaluator`] — the pure function that reduces a snapshot to five
//!    independent anomaly category bits plus risk and cascade facts.
//! 3. [`engine`] — the latching correlation state machine that escalates
//!    NORMAL → WARNING → CRITICAL → EMERGENCY on multi-domain evidence.
//!
//! Wire framing lives in `packsentry-wire`; the cooperative scheduler
//! that drives these stages lives in `packsentry-supervisor`.

pub mod engine;
pub mod evaluator;
pub mod snapshot;
pub mod thresholds;

pub use engine::{CorrelationEngine, SystemState};
pub use evaluator::{evaluate, AnomalyResult, CascadeStage, Category, ModuleSet};
pub use snapshot::{
    ntc_plausible, Hotspot, ModuleSample, PackSnapshot, CELLS_PER_GROUP, GROUPS_PER_MODULE,
    MODULES, NTCS_PER_MODULE, SERIES_TOTAL,
};
pub use thresholds::{ThresholdError, Thresholds};

#[cfg(test)]
mod scenario_tests {
    //! End-to-end runs of the full decision pipeline: edit a nominal
    //! snapshot, compute derived fields, evaluate, update the engine.

    use crate::*;

    fn step(engine: &mut CorrelationEngine, snapshot: &mut PackSnapshot) -> SystemState {
        snapshot.compute_derived();
        let result = evaluate(&Thresholds::default(), snapshot);
        engine.update(&result)
    }

    #[test]
    fn normal_pack() {
        let mut engine = CorrelationEngine::new();
        let mut snap = PackSnapshot::nominal();
        let state = step(&mut engine, &mut snap);

        let result = evaluate(&Thresholds::default(), &snap);
        assert_eq!(result.category_bits(), 0);
        assert_eq!(state, SystemState::Normal);
        assert_eq!(result.cascade_stage.as_u8(), 0);
        assert!(result.risk_factor < 0.01);
    }

    #[test]
    fn thermal_in_one_module_is_a_warning() {
        let mut engine = CorrelationEngine::new();
        let mut snap = PackSnapshot::nominal();
        snap.modules[2].ntc1_c = 62.0;
        snap.modules[2].ntc2_c = 58.0;

        let state = step(&mut engine, &mut snap);
        let result = evaluate(&Thresholds::default(), &snap);

        assert_eq!(result.categories, enumset::EnumSet::only(Category::Thermal));
        assert_eq!(result.active_count(), 1);
        assert_eq!(result.hotspot_module_number(), 3);
        assert!(result.anomaly_modules.contains(2));
        assert_eq!(state, SystemState::Warning);
    }

    #[test]
    fn gas_alone_is_a_warning() {
        let mut engine = CorrelationEngine::new();
        let mut snap = PackSnapshot::nominal();
        snap.gas_ratio_1 = 0.55;
        snap.gas_ratio_2 = 0.60;

        let state = step(&mut engine, &mut snap);
        let result = evaluate(&Thresholds::default(), &snap);

        assert_eq!(result.categories, enumset::EnumSet::only(Category::Gas));
        assert_eq!(state, SystemState::Warning);
    }

    #[test]
    fn thermal_plus_gas_goes_critical_then_emergency_on_hold() {
        let mut engine = CorrelationEngine::new();
        let mut snap = PackSnapshot::nominal();
        snap.modules[2].ntc1_c = 62.0;
        snap.modules[2].ntc2_c = 58.0;
        snap.gas_ratio_1 = 0.55;
        snap.gas_ratio_2 = 0.60;

        assert_eq!(step(&mut engine, &mut snap), SystemState::Critical);
        let result = evaluate(&Thresholds::default(), &snap);
        assert_eq!(result.active_count(), 2);

        let mut state = engine.state();
        for _ in 0..engine.critical_countdown_limit() {
            state = step(&mut engine, &mut snap);
        }
        assert_eq!(state, SystemState::Emergency);
        assert!(engine.emergency_latched());
    }

    #[test]
    fn direct_thermal_emergency_on_first_update() {
        let mut engine = CorrelationEngine::new();
        let mut snap = PackSnapshot::nominal();
        snap.modules[2].ntc1_c = 82.0;

        assert_eq!(step(&mut engine, &mut snap), SystemState::Emergency);
        assert!(engine.emergency_latched());
        let result = evaluate(&Thresholds::default(), &snap);
        assert!(result.emergency_direct);
    }

    #[test]
    fn short_circuit_latches_immediately() {
        let mut engine = CorrelationEngine::new();
        let mut snap = PackSnapshot::nominal();
        snap.pack_current_a = 400.0;
        snap.short_circuit = true;

        assert_eq!(step(&mut engine, &mut snap), SystemState::Emergency);
        assert!(engine.emergency_latched());
        let result = evaluate(&Thresholds::default(), &snap);
        assert!(result.short_circuit);
    }

    #[test]
    fn latched_recovery_with_an_intervening_anomaly() {
        let mut engine = CorrelationEngine::new();
        let mut snap = PackSnapshot::nominal();
        snap.modules[2].ntc1_c = 82.0;
        step(&mut engine, &mut snap);
        assert!(engine.emergency_latched());

        let mut nominal = PackSnapshot::nominal();
        let limit = engine.emergency_recovery_limit();

        // One anomalous cycle mid-hold resets the recovery counter
        for _ in 0..limit - 2 {
            assert_eq!(step(&mut engine, &mut nominal), SystemState::Emergency);
        }
        let mut relapse = PackSnapshot::nominal();
        relapse.gas_ratio_1 = 0.55;
        assert_eq!(step(&mut engine, &mut relapse), SystemState::Emergency);

        // Only the full uninterrupted window releases the latch
        for _ in 0..limit - 1 {
            assert_eq!(step(&mut engine, &mut nominal), SystemState::Emergency);
        }
        assert_eq!(step(&mut engine, &mut nominal), SystemState::Normal);
        assert!(!engine.emergency_latched());
    }

    #[test]
    fn ambient_compensation_end_to_end() {
        let thresholds = Thresholds::default();
        let mut engine = CorrelationEngine::new();

        let mut snap = PackSnapshot::nominal();
        for module in &mut snap.modules {
            module.ntc1_c = 45.0;
            module.ntc2_c = 45.0;
        }
        snap.ambient_c = 25.0;
        snap.compute_derived();
        let result = evaluate(&thresholds, &snap);
        assert!(result.categories.contains(Category::Thermal));
        assert_eq!(engine.update(&result), SystemState::Warning);

        snap.ambient_c = 38.0;
        snap.compute_derived();
        let result = evaluate(&thresholds, &snap);
        assert!(!result.categories.contains(Category::Thermal));

        let mut state = engine.state();
        for _ in 0..engine.deescalation_limit() {
            state = engine.update(&result);
        }
        assert_eq!(state, SystemState::Normal);
    }

    #[test]
    fn cascade_stage_ladder() {
        for (temp, stage) in [
            (25.0, 0),
            (61.0, 1),
            (100.0, 2),
            (140.0, 3),
            (180.0, 4),
            (250.0, 5),
            (350.0, 6),
        ] {
            assert_eq!(CascadeStage::from_core_temp(temp).as_u8(), stage);
        }
    }
}
