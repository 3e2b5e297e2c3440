//! Runtime configuration for the supervisor.
//!
//! Everything is created once at init and read-only afterwards; nothing is
//! persisted, so a power cycle always comes up with whatever the embedding
//! layer passes in (or the defaults). The record serializes so a host-side
//! harness can load it from JSON.

use log::warn;
use serde::{Deserialize, Serialize};

use packsentry_core::Thresholds;

/// Nominal and alert periods for the three cooperative slots, plus the
/// external-input tightening for the slow slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopTiming {
    /// Fast slot period when the pack is nominal (ms).
    pub fast_normal_ms: u32,
    /// Fast slot period while any anomaly is active (ms).
    pub fast_alert_ms: u32,
    /// Medium slot period when nominal (ms).
    pub med_normal_ms: u32,
    /// Medium slot period on alert (ms).
    pub med_alert_ms: u32,
    /// Slow slot period when nominal (ms).
    pub slow_normal_ms: u32,
    /// Slow slot period on alert (ms).
    pub slow_alert_ms: u32,
    /// Slow slot period while a digital-twin feed is live (ms). Only ever
    /// tightens the slow slot.
    pub slow_external_ms: u32,
}

const fn default_fast_normal_ms() -> u32 {
    100
}

const fn default_fast_alert_ms() -> u32 {
    20
}

const fn default_med_normal_ms() -> u32 {
    500
}

const fn default_med_alert_ms() -> u32 {
    100
}

const fn default_slow_normal_ms() -> u32 {
    5000
}

const fn default_slow_alert_ms() -> u32 {
    1000
}

const fn default_slow_external_ms() -> u32 {
    1000
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            fast_normal_ms: default_fast_normal_ms(),
            fast_alert_ms: default_fast_alert_ms(),
            med_normal_ms: default_med_normal_ms(),
            med_alert_ms: default_med_alert_ms(),
            slow_normal_ms: default_slow_normal_ms(),
            slow_alert_ms: default_slow_alert_ms(),
            slow_external_ms: default_slow_external_ms(),
        }
    }
}

/// Top-level supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Trip thresholds; ordering is checked by the startup self-check.
    pub thresholds: Thresholds,
    /// Slot periods.
    pub timing: LoopTiming,
    /// CRITICAL→EMERGENCY hold, milliseconds of real time. Converted to
    /// medium-loop cycles whenever the medium period changes.
    #[serde(default = "default_critical_hold_ms")]
    pub critical_hold_ms: u32,
    /// De-escalation hold, milliseconds of real time.
    #[serde(default = "default_deescalation_hold_ms")]
    pub deescalation_hold_ms: u32,
    /// Silence on the digital-twin feed after which the supervisor falls
    /// back to the last-known snapshot (ms).
    #[serde(default = "default_external_timeout_ms")]
    pub external_timeout_ms: u32,
}

const fn default_critical_hold_ms() -> u32 {
    10_000
}

const fn default_deescalation_hold_ms() -> u32 {
    5_000
}

const fn default_external_timeout_ms() -> u32 {
    2_000
}

impl SupervisorConfig {
    /// Clamp values to usable ranges and repair anything nonsensical.
    /// Threshold *ordering* is deliberately not repaired here — that is a
    /// fatal self-check condition, not a fixable typo.
    pub fn validate(&mut self) {
        let t = &mut self.timing;
        for (name, period, default) in [
            ("fast_normal_ms", &mut t.fast_normal_ms, default_fast_normal_ms()),
            ("med_normal_ms", &mut t.med_normal_ms, default_med_normal_ms()),
            ("slow_normal_ms", &mut t.slow_normal_ms, default_slow_normal_ms()),
        ] {
            if *period == 0 {
                warn!("{name} is 0, resetting to {default}");
                *period = default;
            }
        }
        for (name, alert, nominal) in [
            ("fast_alert_ms", &mut t.fast_alert_ms, t.fast_normal_ms),
            ("med_alert_ms", &mut t.med_alert_ms, t.med_normal_ms),
            ("slow_alert_ms", &mut t.slow_alert_ms, t.slow_normal_ms),
        ] {
            if *alert == 0 || *alert > nominal {
                warn!("{name} out of range ({}), clamping to {nominal}", *alert);
                *alert = nominal;
            }
        }
        if t.slow_external_ms == 0 {
            warn!("slow_external_ms is 0, resetting to {}", default_slow_external_ms());
            t.slow_external_ms = default_slow_external_ms();
        }
        if self.critical_hold_ms == 0 {
            warn!("critical_hold_ms is 0, resetting to {}", default_critical_hold_ms());
            self.critical_hold_ms = default_critical_hold_ms();
        }
        if self.deescalation_hold_ms == 0 {
            warn!(
                "deescalation_hold_ms is 0, resetting to {}",
                default_deescalation_hold_ms()
            );
            self.deescalation_hold_ms = default_deescalation_hold_ms();
        }
        if self.external_timeout_ms == 0 {
            warn!(
                "external_timeout_ms is 0, resetting to {}",
                default_external_timeout_ms()
            );
            self.external_timeout_ms = default_external_timeout_ms();
        }
    }
}
