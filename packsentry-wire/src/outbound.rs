//! Dashboard telemetry protocol (sync `0xAA`).
//!
//! Once per telemetry cycle the supervisor emits one pack summary frame
//! followed by the eight module detail frames, in that order. Frames carry
//! clamped fixed-point integers; [`PackSummary::parse`] and
//! [`ModuleDetail::parse`] exist so the startup self-check (and the host
//! dashboard) can validate what was encoded.

use packsentry_core::{AnomalyResult, PackSnapshot, SystemState, MODULES};

use crate::convert::{clamp_i16, clamp_u16, clamp_u8, clamp_u8_max};
use crate::xor_checksum;

/// Sync byte opening every telemetry frame.
pub const TELEMETRY_SYNC: u8 = 0xAA;

/// Frame type of the pack summary.
pub const FRAME_TYPE_PACK_SUMMARY: u8 = 0x01;

/// Frame type of a module detail.
pub const FRAME_TYPE_MODULE_DETAIL: u8 = 0x02;

/// Pack summary frame size on the wire.
pub const PACK_SUMMARY_LEN: usize = 38;

/// Module detail frame size on the wire.
pub const MODULE_DETAIL_LEN: usize = 17;

/// Flags bit 0: a physics-limit direct emergency is active.
pub const FLAG_EMERGENCY_DIRECT: u8 = 1 << 0;

/// Why a received telemetry frame failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the declared frame needs.
    TooShort { needed: usize, got: usize },
    /// First byte was not the telemetry sync.
    BadSync(u8),
    /// Length byte does not match the frame type's fixed size.
    BadLength { expected: u8, got: u8 },
    /// Unknown frame type byte.
    BadType(u8),
    /// Checksum mismatch.
    BadChecksum { expected: u8, got: u8 },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort { needed, got } => {
                write!(f, "frame too short: needed {needed} bytes, got {got}")
            }
            Self::BadSync(b) => write!(f, "bad sync byte 0x{b:02X}"),
            Self::BadLength { expected, got } => {
                write!(f, "bad length byte: expected {expected}, got {got}")
            }
            Self::BadType(b) => write!(f, "unknown frame type 0x{b:02X}"),
            Self::BadChecksum { expected, got } => {
                write!(f, "checksum mismatch: expected 0x{expected:02X}, got 0x{got:02X}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Check sync, length, declared type, and checksum of one telemetry frame.
fn validate(buf: &[u8], expected_type: u8, expected_len: usize) -> Result<(), FrameError> {
    if buf.len() < expected_len {
        return Err(FrameError::TooShort {
            needed: expected_len,
            got: buf.len(),
        });
    }
    if buf[0] != TELEMETRY_SYNC {
        return Err(FrameError::BadSync(buf[0]));
    }
    if buf[2] != expected_type {
        return Err(FrameError::BadType(buf[2]));
    }
    if buf[1] != expected_len as u8 {
        return Err(FrameError::BadLength {
            expected: expected_len as u8,
            got: buf[1],
        });
    }
    let expected = xor_checksum(&buf[..expected_len - 1]);
    if buf[expected_len - 1] != expected {
        return Err(FrameError::BadChecksum {
            expected,
            got: buf[expected_len - 1],
        });
    }
    Ok(())
}

/// Pack summary frame, type `0x01`. Field values are the raw wire integers.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0  | 1 | Sync `0xAA` |
/// | 1  | 1 | Length (38) |
/// | 2  | 1 | Type (`0x01`) |
/// | 3  | 4 | Timestamp (u32, ms since boot) |
/// | 7  | 2 | Pack voltage (u16, deci-volts) |
/// | 9  | 2 | Pack current (i16, deci-amps) |
/// | 11 | 2 | R_int (u16, mΩ × 100) |
/// | 13 | 2 | Max NTC (i16, deci-°C) |
/// | 15 | 2 | Ambient (i16, deci-°C) |
/// | 17 | 2 | Est. core temp (i16, deci-°C) |
/// | 19 | 1 | dT/dt max (u8, °C/min × 100, clamped) |
/// | 20 | 1 | Gas ratio 1 (u8, ×100, clamped 0..100) |
/// | 21 | 1 | Gas ratio 2 (u8, ×100, clamped 0..100) |
/// | 22 | 2 | Pressure delta 1 (i16, centi-hPa) |
/// | 24 | 2 | Pressure delta 2 (i16, centi-hPa) |
/// | 26 | 2 | Voltage spread (u16, deci-mV) |
/// | 28 | 1 | Temp spread (u8, deci-°C, clamped) |
/// | 29 | 1 | System state (0..3) |
/// | 30 | 1 | Anomaly category mask |
/// | 31 | 1 | Anomaly count |
/// | 32 | 1 | Anomaly modules mask |
/// | 33 | 1 | Hotspot module (1-based, 0 = none) |
/// | 34 | 1 | Risk factor (u8, percent) |
/// | 35 | 1 | Cascade stage (0..6) |
/// | 36 | 1 | Flags (bit 0 = emergency direct) |
/// | 37 | 1 | XOR checksum |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackSummary {
    pub timestamp_ms: u32,
    pub pack_voltage_dv: u16,
    pub pack_current_da: i16,
    pub r_int_cmohm: u16,
    pub max_ntc_dt: i16,
    pub ambient_dt: i16,
    pub core_temp_dt: i16,
    pub dt_dt_max_cpm: u8,
    pub gas_ratio_1_cp: u8,
    pub gas_ratio_2_cp: u8,
    pub pressure_delta_1_chpa: i16,
    pub pressure_delta_2_chpa: i16,
    pub v_spread_dmv: u16,
    pub temp_spread_dt: u8,
    pub system_state: u8,
    pub anomaly_mask: u8,
    pub anomaly_count: u8,
    pub anomaly_modules: u8,
    pub hotspot_module: u8,
    pub risk_factor_pct: u8,
    pub cascade_stage: u8,
    pub flags: u8,
}

impl PackSummary {
    /// Build a summary frame from the current cycle's state.
    #[must_use]
    pub fn encode(
        timestamp_ms: u32,
        snapshot: &PackSnapshot,
        result: &AnomalyResult,
        state: SystemState,
    ) -> Self {
        let hotspot_temp_c = snapshot.hotspot.map_or(0.0, |h| h.temp_c);
        let mut flags = 0;
        if result.emergency_direct {
            flags |= FLAG_EMERGENCY_DIRECT;
        }
        Self {
            timestamp_ms,
            pack_voltage_dv: clamp_u16(snapshot.pack_voltage_v * 10.0),
            pack_current_da: clamp_i16(snapshot.pack_current_a * 10.0),
            r_int_cmohm: clamp_u16(snapshot.r_internal_mohm * 100.0),
            max_ntc_dt: clamp_i16(hotspot_temp_c * 10.0),
            ambient_dt: clamp_i16(snapshot.ambient_c * 10.0),
            core_temp_dt: clamp_i16(snapshot.t_core_est_c * 10.0),
            dt_dt_max_cpm: clamp_u8(snapshot.dt_dt_max_c_min * 100.0),
            gas_ratio_1_cp: clamp_u8_max(snapshot.gas_ratio_1 * 100.0, 100),
            gas_ratio_2_cp: clamp_u8_max(snapshot.gas_ratio_2 * 100.0, 100),
            pressure_delta_1_chpa: clamp_i16(snapshot.pressure_delta_1_hpa * 100.0),
            pressure_delta_2_chpa: clamp_i16(snapshot.pressure_delta_2_hpa * 100.0),
            v_spread_dmv: clamp_u16(snapshot.v_spread_mv * 10.0),
            temp_spread_dt: clamp_u8(snapshot.temp_spread_c * 10.0),
            system_state: state.as_u8(),
            anomaly_mask: result.category_bits(),
            anomaly_count: result.active_count(),
            anomaly_modules: result.anomaly_modules.bits(),
            hotspot_module: result.hotspot_module_number(),
            risk_factor_pct: clamp_u8(result.risk_factor * 100.0),
            cascade_stage: result.cascade_stage.as_u8(),
            flags,
        }
    }

    /// Serialize with header and checksum.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PACK_SUMMARY_LEN] {
        let mut buf = [0u8; PACK_SUMMARY_LEN];
        buf[0] = TELEMETRY_SYNC;
        buf[1] = PACK_SUMMARY_LEN as u8;
        buf[2] = FRAME_TYPE_PACK_SUMMARY;
        buf[3..7].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        buf[7..9].copy_from_slice(&self.pack_voltage_dv.to_le_bytes());
        buf[9..11].copy_from_slice(&self.pack_current_da.to_le_bytes());
        buf[11..13].copy_from_slice(&self.r_int_cmohm.to_le_bytes());
        buf[13..15].copy_from_slice(&self.max_ntc_dt.to_le_bytes());
        buf[15..17].copy_from_slice(&self.ambient_dt.to_le_bytes());
        buf[17..19].copy_from_slice(&self.core_temp_dt.to_le_bytes());
        buf[19] = self.dt_dt_max_cpm;
        buf[20] = self.gas_ratio_1_cp;
        buf[21] = self.gas_ratio_2_cp;
        buf[22..24].copy_from_slice(&self.pressure_delta_1_chpa.to_le_bytes());
        buf[24..26].copy_from_slice(&self.pressure_delta_2_chpa.to_le_bytes());
        buf[26..28].copy_from_slice(&self.v_spread_dmv.to_le_bytes());
        buf[28] = self.temp_spread_dt;
        buf[29] = self.system_state;
        buf[30] = self.anomaly_mask;
        buf[31] = self.anomaly_count;
        buf[32] = self.anomaly_modules;
        buf[33] = self.hotspot_module;
        buf[34] = self.risk_factor_pct;
        buf[35] = self.cascade_stage;
        buf[36] = self.flags;
        buf[PACK_SUMMARY_LEN - 1] = xor_checksum(&buf[..PACK_SUMMARY_LEN - 1]);
        buf
    }

    /// Validate and deserialize a received frame.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        validate(buf, FRAME_TYPE_PACK_SUMMARY, PACK_SUMMARY_LEN)?;
        Ok(Self {
            timestamp_ms: u32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]),
            pack_voltage_dv: u16::from_le_bytes([buf[7], buf[8]]),
            pack_current_da: i16::from_le_bytes([buf[9], buf[10]]),
            r_int_cmohm: u16::from_le_bytes([buf[11], buf[12]]),
            max_ntc_dt: i16::from_le_bytes([buf[13], buf[14]]),
            ambient_dt: i16::from_le_bytes([buf[15], buf[16]]),
            core_temp_dt: i16::from_le_bytes([buf[17], buf[18]]),
            dt_dt_max_cpm: buf[19],
            gas_ratio_1_cp: buf[20],
            gas_ratio_2_cp: buf[21],
            pressure_delta_1_chpa: i16::from_le_bytes([buf[22], buf[23]]),
            pressure_delta_2_chpa: i16::from_le_bytes([buf[24], buf[25]]),
            v_spread_dmv: u16::from_le_bytes([buf[26], buf[27]]),
            temp_spread_dt: buf[28],
            system_state: buf[29],
            anomaly_mask: buf[30],
            anomaly_count: buf[31],
            anomaly_modules: buf[32],
            hotspot_module: buf[33],
            risk_factor_pct: buf[34],
            cascade_stage: buf[35],
            flags: buf[36],
        })
    }
}

/// Module detail frame, type `0x02`, emitted once per module per cycle.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0  | 1 | Sync `0xAA` |
/// | 1  | 1 | Length (17) |
/// | 2  | 1 | Type (`0x02`) |
/// | 3  | 1 | Module index (0..7) |
/// | 4  | 2 | NTC1 (i16, deci-°C) |
/// | 6  | 2 | NTC2 (i16, deci-°C) |
/// | 8  | 1 | Swelling (u8, %) |
/// | 9  | 1 | Intra-module ΔT (u8, deci-°C, clamped) |
/// | 10 | 1 | Max dT/dt (u8, °C/min × 100, clamped) |
/// | 11 | 2 | Module voltage (u16, deci-volts) |
/// | 13 | 2 | Intra-module voltage spread (u16, mV) |
/// | 15 | 1 | Reserved (zero) |
/// | 16 | 1 | XOR checksum |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleDetail {
    pub module_index: u8,
    pub ntc1_dt: i16,
    pub ntc2_dt: i16,
    pub swelling_pct: u8,
    pub delta_t_intra_dt: u8,
    pub max_dt_dt_cpm: u8,
    pub module_voltage_dv: u16,
    pub v_spread_mv: u16,
}

impl ModuleDetail {
    /// Build a detail frame for one module. Indexes past the pack geometry
    /// encode as an empty module rather than panicking.
    #[must_use]
    pub fn encode(module_index: usize, snapshot: &PackSnapshot) -> Self {
        let Some(module) = snapshot.modules.get(module_index) else {
            return Self::default();
        };
        Self {
            module_index: module_index as u8,
            ntc1_dt: clamp_i16(module.ntc1_c * 10.0),
            ntc2_dt: clamp_i16(module.ntc2_c * 10.0),
            swelling_pct: clamp_u8(module.swelling_pct),
            delta_t_intra_dt: clamp_u8(module.delta_t_intra_c * 10.0),
            max_dt_dt_cpm: clamp_u8(module.max_dt_dt_c_min * 100.0),
            module_voltage_dv: clamp_u16(module.module_voltage_v * 10.0),
            v_spread_mv: clamp_u16(module.v_spread_mv),
        }
    }

    /// Serialize with header and checksum.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MODULE_DETAIL_LEN] {
        let mut buf = [0u8; MODULE_DETAIL_LEN];
        buf[0] = TELEMETRY_SYNC;
        buf[1] = MODULE_DETAIL_LEN as u8;
        buf[2] = FRAME_TYPE_MODULE_DETAIL;
        buf[3] = self.module_index;
        buf[4..6].copy_from_slice(&self.ntc1_dt.to_le_bytes());
        buf[6..8].copy_from_slice(&self.ntc2_dt.to_le_bytes());
        buf[8] = self.swelling_pct;
        buf[9] = self.delta_t_intra_dt;
        buf[10] = self.max_dt_dt_cpm;
        buf[11..13].copy_from_slice(&self.module_voltage_dv.to_le_bytes());
        buf[13..15].copy_from_slice(&self.v_spread_mv.to_le_bytes());
        // buf[15] reserved, already zero
        buf[MODULE_DETAIL_LEN - 1] = xor_checksum(&buf[..MODULE_DETAIL_LEN - 1]);
        buf
    }

    /// Validate and deserialize a received frame.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        validate(buf, FRAME_TYPE_MODULE_DETAIL, MODULE_DETAIL_LEN)?;
        Ok(Self {
            module_index: buf[3],
            ntc1_dt: i16::from_le_bytes([buf[4], buf[5]]),
            ntc2_dt: i16::from_le_bytes([buf[6], buf[7]]),
            swelling_pct: buf[8],
            delta_t_intra_dt: buf[9],
            max_dt_dt_cpm: buf[10],
            module_voltage_dv: u16::from_le_bytes([buf[11], buf[12]]),
            v_spread_mv: u16::from_le_bytes([buf[13], buf[14]]),
        })
    }
}

/// Encode one full telemetry cycle: pack summary first, then module
/// details 0..7 in order, written back-to-back into `out`.
///
/// `out` must hold [`TELEMETRY_CYCLE_LEN`] bytes; returns the slice written.
pub fn encode_cycle<'a>(
    out: &'a mut [u8; TELEMETRY_CYCLE_LEN],
    timestamp_ms: u32,
    snapshot: &PackSnapshot,
    result: &AnomalyResult,
    state: SystemState,
) -> &'a [u8] {
    let summary = PackSummary::encode(timestamp_ms, snapshot, result, state);
    out[..PACK_SUMMARY_LEN].copy_from_slice(&summary.to_bytes());
    for m in 0..MODULES {
        let start = PACK_SUMMARY_LEN + m * MODULE_DETAIL_LEN;
        out[start..start + MODULE_DETAIL_LEN]
            .copy_from_slice(&ModuleDetail::encode(m, snapshot).to_bytes());
    }
    &out[..]
}

/// Bytes in one complete telemetry cycle (summary + 8 details).
pub const TELEMETRY_CYCLE_LEN: usize = PACK_SUMMARY_LEN + MODULES * MODULE_DETAIL_LEN;

#[cfg(test)]
mod tests {
    use super::*;
    use packsentry_core::{evaluate, Thresholds};

    fn computed_nominal() -> (PackSnapshot, AnomalyResult) {
        let mut snap = PackSnapshot::nominal();
        snap.compute_derived();
        let result = evaluate(&Thresholds::default(), &snap);
        (snap, result)
    }

    #[test]
    fn pack_summary_roundtrips_bitwise() {
        let (snap, result) = computed_nominal();
        let summary = PackSummary::encode(5000, &snap, &result, SystemState::Normal);
        let bytes = summary.to_bytes();

        assert_eq!(bytes.len(), PACK_SUMMARY_LEN);
        assert_eq!(bytes[0], TELEMETRY_SYNC);
        assert_eq!(bytes[1] as usize, PACK_SUMMARY_LEN);

        let parsed = PackSummary::parse(&bytes).expect("frame validates");
        assert_eq!(parsed, summary);
        // Re-encoding the parse is byte-identical
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn pack_summary_field_values() {
        let (snap, result) = computed_nominal();
        let summary = PackSummary::encode(5000, &snap, &result, SystemState::Normal);

        assert_eq!(summary.timestamp_ms, 5000);
        assert_eq!(summary.pack_voltage_dv, 3328);
        assert_eq!(summary.pack_current_da, 600);
        assert_eq!(summary.r_int_cmohm, 44);
        assert_eq!(summary.max_ntc_dt, 303); // module 8 NTC2 = 30.3 °C
        assert_eq!(summary.ambient_dt, 250);
        assert_eq!(summary.gas_ratio_1_cp, 98);
        assert_eq!(summary.system_state, 0);
        assert_eq!(summary.anomaly_mask, 0);
        assert_eq!(summary.anomaly_count, 0);
        assert_eq!(summary.hotspot_module, 8);
        assert_eq!(summary.cascade_stage, 0);
        assert_eq!(summary.flags, 0);
    }

    #[test]
    fn module_detail_roundtrips_bitwise() {
        let (snap, _) = computed_nominal();
        let detail = ModuleDetail::encode(3, &snap);
        let bytes = detail.to_bytes();

        assert_eq!(bytes.len(), MODULE_DETAIL_LEN);
        assert_eq!(detail.module_index, 3);
        assert_eq!(detail.ntc1_dt, 289); // 28.0 + 3 × 0.3 = 28.9 °C
        assert_eq!(detail.module_voltage_dv, 416); // 13 × 3.20 V

        let parsed = ModuleDetail::parse(&bytes).expect("frame validates");
        assert_eq!(parsed, detail);
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn every_single_byte_flip_breaks_validation() {
        let (snap, result) = computed_nominal();
        let bytes = PackSummary::encode(123, &snap, &result, SystemState::Warning).to_bytes();

        // Flipping any byte but the sync must fail checksum (or a header
        // check); flipping the sync fails the sync check
        for i in 0..PACK_SUMMARY_LEN {
            for bit in 0..8 {
                let mut corrupted = bytes;
                corrupted[i] ^= 1 << bit;
                assert!(
                    PackSummary::parse(&corrupted).is_err(),
                    "flip of byte {i} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn module_detail_byte_flips_detected() {
        let (snap, _) = computed_nominal();
        let bytes = ModuleDetail::encode(0, &snap).to_bytes();
        for i in 0..MODULE_DETAIL_LEN {
            let mut corrupted = bytes;
            corrupted[i] ^= 0x10;
            assert!(
                ModuleDetail::parse(&corrupted).is_err(),
                "flip of byte {i} went undetected"
            );
        }
    }

    #[test]
    fn truncated_frame_rejected() {
        let (snap, result) = computed_nominal();
        let bytes = PackSummary::encode(0, &snap, &result, SystemState::Normal).to_bytes();
        let err = PackSummary::parse(&bytes[..20]).unwrap_err();
        assert!(matches!(err, FrameError::TooShort { .. }));
    }

    #[test]
    fn wrong_type_rejected() {
        let (snap, _) = computed_nominal();
        let bytes = ModuleDetail::encode(0, &snap).to_bytes();
        let err = PackSummary::parse(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::TooShort { .. } | FrameError::BadType(_)));
    }

    #[test]
    fn anomalous_state_is_carried_in_the_frame() {
        let mut snap = PackSnapshot::nominal();
        snap.modules[2].ntc1_c = 62.0;
        snap.gas_ratio_1 = 0.55;
        snap.compute_derived();
        let result = evaluate(&Thresholds::default(), &snap);
        let summary = PackSummary::encode(9000, &snap, &result, SystemState::Critical);

        assert_eq!(summary.system_state, 2);
        assert_eq!(summary.anomaly_count, 2);
        assert_ne!(summary.anomaly_mask & 0x02, 0); // THERMAL
        assert_ne!(summary.anomaly_mask & 0x04, 0); // GAS
        assert_eq!(summary.hotspot_module, 3);
        assert_ne!(summary.anomaly_modules & (1 << 2), 0);
    }

    #[test]
    fn clamping_prevents_silent_overflow() {
        let mut snap = PackSnapshot::nominal();
        snap.pack_voltage_v = 50_000.0; // way past u16 deci-volts
        snap.dt_dt_max_c_min = 9.0; // 900 > u8 rail
        snap.gas_ratio_1 = 1.4; // 140 > semantic max 100
        snap.compute_derived();
        // dt_dt_max is recomputed from modules; force it after
        snap.dt_dt_max_c_min = 9.0;
        let result = evaluate(&Thresholds::default(), &snap);
        let summary = PackSummary::encode(0, &snap, &result, SystemState::Normal);

        assert_eq!(summary.pack_voltage_dv, 65_535);
        assert_eq!(summary.dt_dt_max_cpm, 255);
        assert_eq!(summary.gas_ratio_1_cp, 100);
    }

    #[test]
    fn cycle_emits_summary_then_modules_in_order() {
        let (snap, result) = computed_nominal();
        let mut buf = [0u8; TELEMETRY_CYCLE_LEN];
        let bytes = encode_cycle(&mut buf, 777, &snap, &result, SystemState::Normal);

        assert_eq!(bytes.len(), TELEMETRY_CYCLE_LEN);
        let summary = PackSummary::parse(&bytes[..PACK_SUMMARY_LEN]).unwrap();
        assert_eq!(summary.timestamp_ms, 777);
        for m in 0..MODULES {
            let start = PACK_SUMMARY_LEN + m * MODULE_DETAIL_LEN;
            let detail = ModuleDetail::parse(&bytes[start..start + MODULE_DETAIL_LEN]).unwrap();
            assert_eq!(detail.module_index, m as u8);
        }
    }
}
