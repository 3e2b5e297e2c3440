//! Fault-scenario timeline for the demo feed.
//!
//! Seven phases over 215 simulated seconds, adapted from the pack
//! validation playbook. Thermal ramps are kept continuous across phase
//! boundaries (and cool-downs are instant) so the rate-of-rise channel
//! sees realistic slopes rather than editing artifacts.
//!
//! | Phase | Window | Story |
//! |-------|--------|-------|
//! | 1 | 0–30 s    | Normal operation, all modules steady |
//! | 2 | 30–70 s   | Thermal anomaly: module 3 develops a hotspot |
//! | 3 | 70–100 s  | Gas anomaly: electrolyte off-gassing, pack cooled |
//! | 4 | 100–150 s | Multi-fault: thermal + gas (+ swelling), escalation |
//! | 5 | 150–165 s | Short circuit: massive current spike |
//! | 6 | 165–185 s | Recovery: sensors return to nominal, latch releases |
//! | 7 | 185–215 s | Ambient compensation: same cell temps, two ambients |

use packsentry_core::PackSnapshot;

/// Total timeline length in seconds.
pub const DURATION_S: u64 = 215;

/// Baseline pack: nominal values plus a little natural per-group variation.
fn baseline() -> PackSnapshot {
    let mut snap = PackSnapshot::nominal();
    for module in &mut snap.modules {
        for (g, voltage) in module.group_voltages_v.iter_mut().enumerate() {
            *voltage = 3.20 + 0.002 * (g % 3) as f32;
        }
    }
    snap
}

/// Sensor values the digital twin reports at `t_ms` into the timeline.
#[must_use]
pub fn inject(t_ms: u64) -> PackSnapshot {
    let t_s = t_ms as f32 / 1000.0;
    let mut snap = baseline();

    // Phase 1: normal operation
    if t_s < 30.0 {
        return snap;
    }

    // Phase 2: module 3 (index 2) develops a thermal hotspot
    if t_s < 70.0 {
        let progress = (t_s - 30.0) / 40.0;
        snap.modules[2].ntc1_c = 28.6 + progress * 34.9; // → 63.5 °C
        snap.modules[2].ntc2_c = 28.8 + progress * 28.0; // → 56.8 °C

        // Neighbours warm slightly through thermal coupling
        snap.modules[1].ntc1_c = 28.3 + progress * 4.0;
        snap.modules[3].ntc1_c = 28.9 + progress * 3.5;
        return snap;
    }

    // Phase 3: module 3 cooled off, gas ratio drops as VOCs appear
    if t_s < 100.0 {
        let progress = (t_s - 70.0) / 30.0;
        snap.modules[2].ntc1_c = 35.0 - progress * 5.0;
        snap.modules[2].ntc2_c = 34.0 - progress * 4.0;

        snap.gas_ratio_1 = 0.95 - progress * 0.40; // → 0.55
        snap.gas_ratio_2 = 0.96 - progress * 0.30; // → 0.66
        return snap;
    }

    // Phase 4: module 5 (index 4) runs away while gas keeps worsening
    if t_s < 150.0 {
        let progress = (t_s - 100.0) / 50.0;
        snap.modules[4].ntc1_c = 29.2 + progress * 44.0; // → 73.2 °C
        snap.modules[4].ntc2_c = 29.4 + progress * 35.0;
        snap.modules[4].swelling_pct = 0.5 + progress * 8.0;

        snap.gas_ratio_1 = 0.55 - progress * 0.25;
        snap.gas_ratio_2 = 0.66 - progress * 0.20;

        if t_s > 120.0 {
            let p2 = (t_s - 120.0) / 30.0;
            snap.pressure_delta_1_hpa = p2 * 4.0;
            snap.pressure_delta_2_hpa = p2 * 3.0;
        }

        // Voltage sags and current climbs under the fault
        snap.pack_voltage_v = 332.8 - progress * 15.0;
        snap.pack_current_a = 60.0 + progress * 40.0;

        snap.modules[3].ntc1_c = 28.9 + progress * 6.0;
        snap.modules[5].ntc1_c = 29.5 + progress * 5.5;
        return snap;
    }

    // Phase 5: dead short across the pack
    if t_s < 165.0 {
        snap.pack_voltage_v = 280.0;
        snap.pack_current_a = 400.0;

        snap.modules[4].ntc1_c = 95.0;
        snap.modules[4].ntc2_c = 82.0;
        snap.modules[4].swelling_pct = 12.0;

        snap.gas_ratio_1 = 0.20;
        snap.gas_ratio_2 = 0.25;
        snap.pressure_delta_1_hpa = 8.0;
        snap.pressure_delta_2_hpa = 7.0;
        return snap;
    }

    // Phase 6: everything ramps back toward nominal; the latch must hold
    // until the readings have been clean for the full recovery window
    if t_s < 185.0 {
        let progress = (t_s - 165.0) / 20.0;
        snap.pack_voltage_v = 280.0 + progress * 52.8;
        snap.pack_current_a = 400.0 - progress * 340.0;

        snap.modules[4].ntc1_c = 95.0 - progress * 65.0;
        snap.modules[4].ntc2_c = 82.0 - progress * 52.0;
        snap.modules[4].swelling_pct = 12.0 - progress * 11.0;

        snap.gas_ratio_1 = 0.20 + progress * 0.78;
        snap.gas_ratio_2 = 0.25 + progress * 0.72;
        snap.pressure_delta_1_hpa = 8.0 - progress * 8.0;
        snap.pressure_delta_2_hpa = 7.0 - progress * 7.0;
        return snap;
    }

    // Phase 7: every module warms to ~45 °C over ten seconds. In 25 °C
    // ambient that is a 20 °C excursion and must alarm; from 200 s the
    // ambient sensor reads 38 °C and the same cells are unremarkable.
    let ramp = ((t_s - 185.0) / 10.0).min(1.0);
    for (m, module) in snap.modules.iter_mut().enumerate() {
        let target1 = 45.2 + m as f32 * 0.2;
        let target2 = 45.0 + m as f32 * 0.15;
        module.ntc1_c += (target1 - module.ntc1_c) * ramp;
        module.ntc2_c += (target2 - module.ntc2_c) * ramp;
    }
    snap.ambient_c = if t_s < 200.0 { 25.0 } else { 38.0 };
    snap
}
