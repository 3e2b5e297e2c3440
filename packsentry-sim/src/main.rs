//! Host-side demo runner: drives a [`Supervisor`] with the digital-twin
//! wire protocol, exactly as the board receives it over UART.
//!
//! Usage: cargo run -p packsentry-sim
//!
//! The feeder encodes the scenario timeline into inbound frames, pushes
//! them through the receive parser, and advances virtual time in 10 ms
//! ticks. State transitions, contactor/indicator activity, and decoded
//! telemetry are printed as they happen.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use packsentry_core::{PackSnapshot, SystemState};
use packsentry_supervisor::{OutputDriver, Supervisor, SupervisorConfig};
use packsentry_wire::convert::{clamp_i16, clamp_i8, clamp_u16, clamp_u8};
use packsentry_wire::inbound::{ModuleFrame, PackFrame};
use packsentry_wire::outbound::{PackSummary, FRAME_TYPE_PACK_SUMMARY};
use packsentry_wire::TELEMETRY_CYCLE_LEN;

mod scenario;

#[derive(Parser, Debug)]
#[command(about = "PackSentry digital-twin demo feed")]
struct Args {
    /// Timeline length in seconds
    #[arg(long, default_value_t = scenario::DURATION_S)]
    duration_s: u64,

    /// Virtual scheduler tick in milliseconds
    #[arg(long, default_value_t = 10)]
    tick_ms: u64,

    /// Interval between twin sensor cycles in milliseconds
    #[arg(long, default_value_t = 100)]
    feed_interval_ms: u64,

    /// Number of timeline passes; the supervisor is reset between passes
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// Supervisor configuration as JSON (defaults to the demo profile)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a machine-readable run summary at the end
    #[arg(long)]
    summary_json: bool,
}

/// Demo configuration: stock thresholds except for the rate-of-rise
/// limits. The timeline compresses hours of fault evolution into about
/// three minutes, so ramps that would take an hour on a real pack pass in
/// tens of seconds; the dT/dt limits scale up to match.
fn demo_config() -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.thresholds.dt_dt_warning_c_min = 30.0;
    config.thresholds.dt_dt_emergency_c_min = 180.0;
    config
}

/// Console output driver: prints level/contactor changes, counts the
/// rest, and plays dashboard by decoding its own telemetry.
#[derive(Debug, Default)]
struct ConsoleDriver {
    now_s: f32,
    level: Option<u8>,
    contactor_closed: Option<bool>,
    annunciator_pulses: u64,
    telemetry_frames: u64,
    last_summary: Option<PackSummary>,
}

impl ConsoleDriver {
    fn stamp(&self) -> String {
        format!("[{:>6.1}s]", self.now_s)
    }
}

impl OutputDriver for ConsoleDriver {
    fn set_status_level(&mut self, level: u8) {
        if self.level != Some(level) {
            println!("{} status indicator -> level {level}", self.stamp());
            self.level = Some(level);
        }
    }

    fn contactor_open(&mut self) {
        if self.contactor_closed != Some(false) {
            println!("{} CONTACTOR OPEN - pack isolated", self.stamp());
            self.contactor_closed = Some(false);
        }
    }

    fn contactor_close(&mut self) {
        if self.contactor_closed != Some(true) {
            println!("{} contactor closed", self.stamp());
            self.contactor_closed = Some(true);
        }
    }

    fn annunciator_pulse(&mut self, _duration_ms: u32) {
        self.annunciator_pulses += 1;
    }

    fn send_telemetry(&mut self, frame: &[u8]) {
        self.telemetry_frames += 1;
        if frame.get(2) == Some(&FRAME_TYPE_PACK_SUMMARY) {
            if let Ok(summary) = PackSummary::parse(frame) {
                println!(
                    "{} [TEL] V={:.1} I={:.1} Tmax={:.1} gas=[{:.2},{:.2}] \
                     state={} cats={} hot=M{} risk={}% stage={}",
                    self.stamp(),
                    f32::from(summary.pack_voltage_dv) / 10.0,
                    f32::from(summary.pack_current_da) / 10.0,
                    f32::from(summary.max_ntc_dt) / 10.0,
                    f32::from(summary.gas_ratio_1_cp) / 100.0,
                    f32::from(summary.gas_ratio_2_cp) / 100.0,
                    summary.system_state,
                    summary.anomaly_count,
                    summary.hotspot_module,
                    summary.risk_factor_pct,
                    summary.cascade_stage,
                );
                self.last_summary = Some(summary);
            }
        }
    }
}

/// Encode one full twin sensor cycle (pack frame + 8 module frames) for a
/// snapshot's raw channel values.
fn twin_frames(snap: &PackSnapshot) -> Vec<u8> {
    let pack = PackFrame {
        pack_voltage_dv: clamp_u16(snap.pack_voltage_v * 10.0),
        pack_current_da: clamp_i16(snap.pack_current_a * 10.0),
        ambient_dt: clamp_i16(snap.ambient_c * 10.0),
        coolant_inlet_dt: clamp_i16(snap.coolant_inlet_c * 10.0),
        coolant_outlet_dt: clamp_i16(snap.coolant_outlet_c * 10.0),
        gas_ratio_1_cp: clamp_u16(snap.gas_ratio_1 * 100.0),
        gas_ratio_2_cp: clamp_u16(snap.gas_ratio_2 * 100.0),
        pressure_delta_1_chpa: clamp_i16(snap.pressure_delta_1_hpa * 100.0),
        pressure_delta_2_chpa: clamp_i16(snap.pressure_delta_2_hpa * 100.0),
        humidity_pct: clamp_u8(snap.humidity_pct),
        isolation_dmohm: clamp_u16(snap.isolation_mohm * 10.0),
    };
    let mut bytes = pack.to_bytes().to_vec();

    for (m, module) in snap.modules.iter().enumerate() {
        let mean_v = module.group_voltages_v.iter().sum::<f32>()
            / module.group_voltages_v.len() as f32;
        let v_base_mv = clamp_u16(mean_v * 1000.0);
        let mut v_delta_mv = [0i8; packsentry_core::GROUPS_PER_MODULE];
        for (g, &v) in module.group_voltages_v.iter().enumerate() {
            v_delta_mv[g] = clamp_i8(v * 1000.0 - f32::from(v_base_mv));
        }
        let frame = ModuleFrame {
            module_index: m as u8,
            ntc1_dt: clamp_i16(module.ntc1_c * 10.0),
            ntc2_dt: clamp_i16(module.ntc2_c * 10.0),
            swelling_pct: clamp_u8(module.swelling_pct),
            v_base_mv,
            v_delta_mv,
        };
        bytes.extend_from_slice(&frame.to_bytes());
    }
    bytes
}

#[derive(Debug, serde::Serialize)]
struct RunSummary {
    final_state: String,
    emergency_latched: bool,
    evaluations: u32,
    warnings: u32,
    criticals: u32,
    emergencies: u32,
    telemetry_frames: u64,
    annunciator_pulses: u64,
    rx_bad_length: u32,
    rx_unknown_type: u32,
    rx_bad_checksum: u32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let mut config: SupervisorConfig =
                serde_json::from_str(&text).context("parsing config JSON")?;
            config.validate();
            config
        }
        None => demo_config(),
    };

    println!("====================================================");
    println!("  PackSentry digital-twin demo");
    println!("  104S8P | 832 cells | 139 sensor channels");
    println!("  {} s timeline, {} ms twin cycle", args.duration_s, args.feed_interval_ms);
    println!("====================================================");

    let mut supervisor = Supervisor::new(config, ConsoleDriver::default(), 0);
    if supervisor.safety_armed() {
        println!("self-check passed, contactor-close path armed");
    } else {
        println!(
            "self-check FAILED ({}), contactor-close path blocked",
            supervisor
                .self_check_error()
                .map_or_else(|| "unknown".to_string(), |e| e.to_string())
        );
    }

    let total_ms = args.duration_s * 1000;
    let tick_ms = args.tick_ms.max(1);
    let mut last_state = supervisor.state();
    let mut next_feed_ms = 0u64;

    let mut now_ms = 0u64;
    for pass in 0..args.loops.max(1) {
        if pass > 0 {
            println!("--- restarting demo (pass {}) ---", pass + 1);
            supervisor.reset(now_ms);
            last_state = supervisor.state();
        }
        let pass_start_ms = now_ms;

        while now_ms - pass_start_ms <= total_ms {
            supervisor.driver_mut().now_s = now_ms as f32 / 1000.0;

            if now_ms >= next_feed_ms {
                let frames = twin_frames(&scenario::inject(now_ms - pass_start_ms));
                supervisor.feed_bytes(&frames, now_ms);
                next_feed_ms = now_ms + args.feed_interval_ms.max(tick_ms);
            }

            supervisor.tick(now_ms);

            let state = supervisor.state();
            if state != last_state {
                let result = supervisor.result();
                println!(
                    "[{:>6.1}s] state {last_state} -> {state} (cats={}, hotspot=M{}, risk={}%){}",
                    now_ms as f32 / 1000.0,
                    result.active_count(),
                    result.hotspot_module_number(),
                    (result.risk_factor * 100.0) as u8,
                    if result.emergency_direct { " [DIRECT]" } else { "" },
                );
                last_state = state;
            }

            now_ms += tick_ms;
        }
    }

    let (evaluations, warnings, criticals, emergencies) = supervisor.engine().counters();
    let (rx_bad_length, rx_unknown_type, rx_bad_checksum) = supervisor.receiver().drop_counts();
    let summary = RunSummary {
        final_state: supervisor.state().to_string(),
        emergency_latched: supervisor.engine().emergency_latched(),
        evaluations,
        warnings,
        criticals,
        emergencies,
        telemetry_frames: supervisor.driver().telemetry_frames,
        annunciator_pulses: supervisor.driver().annunciator_pulses,
        rx_bad_length,
        rx_unknown_type,
        rx_bad_checksum,
    };

    println!("====================================================");
    println!(
        "run complete: final state {} after {} evaluations \
         ({} warning, {} critical, {} emergency cycles)",
        summary.final_state, summary.evaluations, summary.warnings, summary.criticals,
        summary.emergencies,
    );
    println!(
        "telemetry: {} frames ({} bytes per full cycle)",
        summary.telemetry_frames, TELEMETRY_CYCLE_LEN
    );

    if args.summary_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if supervisor.state() != SystemState::Normal {
        println!("warning: timeline ended away from NORMAL");
    }
    Ok(())
}
