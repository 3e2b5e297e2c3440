//! Digital-twin input protocol (sync `0xBB`).
//!
//! The twin streams ~139 sensor channels as nine frames per sensor cycle:
//! one pack-level frame (type `0x01`) and eight module frames (type `0x02`,
//! module indexes 0..7). [`FrameReceiver`] reassembles them from an
//! arbitrary byte stream: frames may interleave in any order, any amount of
//! filler may sit between them, and a corrupted frame is dropped by
//! resynchronising one byte past its sync.
//!
//! Group voltages travel as a base millivolt value plus 13 signed byte
//! deltas, `v[g] = (base_mv + delta[g]) / 1000`, which keeps the module
//! frame small without losing millivolt resolution.

use packsentry_core::{PackSnapshot, GROUPS_PER_MODULE, MODULES};

use crate::xor_checksum;

/// Sync byte opening every inbound frame.
pub const INPUT_SYNC: u8 = 0xBB;

/// Frame type carrying pack-level channels.
pub const FRAME_TYPE_PACK: u8 = 0x01;

/// Frame type carrying one module's channels.
pub const FRAME_TYPE_MODULE: u8 = 0x02;

/// Total pack frame size on the wire. 21 payload bytes are used; the
/// remaining 5 before the checksum are reserved and sent as zero.
pub const PACK_FRAME_LEN: usize = 30;

/// Total module frame size on the wire.
pub const MODULE_FRAME_LEN: usize = 25;

/// Receive reassembly buffer size. Must hold at least one maximum frame.
const RX_BUF_LEN: usize = 64;

/// Pack-level frame, type `0x01`. Field values are the raw wire integers.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0  | 1 | Sync `0xBB` |
/// | 1  | 1 | Length (30) |
/// | 2  | 1 | Type (`0x01`) |
/// | 3  | 2 | Pack voltage (u16, deci-volts) |
/// | 5  | 2 | Pack current (i16, deci-amps, signed) |
/// | 7  | 2 | Ambient temp (i16, deci-°C) |
/// | 9  | 2 | Coolant inlet (i16, deci-°C) |
/// | 11 | 2 | Coolant outlet (i16, deci-°C) |
/// | 13 | 2 | Gas ratio 1 (u16, ×100) |
/// | 15 | 2 | Gas ratio 2 (u16, ×100) |
/// | 17 | 2 | Pressure delta 1 (i16, centi-hPa) |
/// | 19 | 2 | Pressure delta 2 (i16, centi-hPa) |
/// | 21 | 1 | Humidity (u8, %) |
/// | 22 | 2 | Isolation (u16, MΩ × 10) |
/// | 24 | 5 | Reserved (zero) |
/// | 29 | 1 | XOR checksum |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackFrame {
    pub pack_voltage_dv: u16,
    pub pack_current_da: i16,
    pub ambient_dt: i16,
    pub coolant_inlet_dt: i16,
    pub coolant_outlet_dt: i16,
    pub gas_ratio_1_cp: u16,
    pub gas_ratio_2_cp: u16,
    pub pressure_delta_1_chpa: i16,
    pub pressure_delta_2_chpa: i16,
    pub humidity_pct: u8,
    pub isolation_dmohm: u16,
}

impl PackFrame {
    /// Serialize with header and checksum.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PACK_FRAME_LEN] {
        let mut buf = [0u8; PACK_FRAME_LEN];
        buf[0] = INPUT_SYNC;
        buf[1] = PACK_FRAME_LEN as u8;
        buf[2] = FRAME_TYPE_PACK;
        buf[3..5].copy_from_slice(&self.pack_voltage_dv.to_le_bytes());
        buf[5..7].copy_from_slice(&self.pack_current_da.to_le_bytes());
        buf[7..9].copy_from_slice(&self.ambient_dt.to_le_bytes());
        buf[9..11].copy_from_slice(&self.coolant_inlet_dt.to_le_bytes());
        buf[11..13].copy_from_slice(&self.coolant_outlet_dt.to_le_bytes());
        buf[13..15].copy_from_slice(&self.gas_ratio_1_cp.to_le_bytes());
        buf[15..17].copy_from_slice(&self.gas_ratio_2_cp.to_le_bytes());
        buf[17..19].copy_from_slice(&self.pressure_delta_1_chpa.to_le_bytes());
        buf[19..21].copy_from_slice(&self.pressure_delta_2_chpa.to_le_bytes());
        buf[21] = self.humidity_pct;
        buf[22..24].copy_from_slice(&self.isolation_dmohm.to_le_bytes());
        // buf[24..29] reserved, already zero
        buf[PACK_FRAME_LEN - 1] = xor_checksum(&buf[..PACK_FRAME_LEN - 1]);
        buf
    }

    /// Deserialize from an already-validated frame buffer.
    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            pack_voltage_dv: u16::from_le_bytes([buf[3], buf[4]]),
            pack_current_da: i16::from_le_bytes([buf[5], buf[6]]),
            ambient_dt: i16::from_le_bytes([buf[7], buf[8]]),
            coolant_inlet_dt: i16::from_le_bytes([buf[9], buf[10]]),
            coolant_outlet_dt: i16::from_le_bytes([buf[11], buf[12]]),
            gas_ratio_1_cp: u16::from_le_bytes([buf[13], buf[14]]),
            gas_ratio_2_cp: u16::from_le_bytes([buf[15], buf[16]]),
            pressure_delta_1_chpa: i16::from_le_bytes([buf[17], buf[18]]),
            pressure_delta_2_chpa: i16::from_le_bytes([buf[19], buf[20]]),
            humidity_pct: buf[21],
            isolation_dmohm: u16::from_le_bytes([buf[22], buf[23]]),
        }
    }
}

/// Module-level frame, type `0x02`, sent once per module per cycle.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0  | 1  | Sync `0xBB` |
/// | 1  | 1  | Length (25) |
/// | 2  | 1  | Type (`0x02`) |
/// | 3  | 1  | Module index (0..7) |
/// | 4  | 2  | NTC1 (i16, deci-°C) |
/// | 6  | 2  | NTC2 (i16, deci-°C) |
/// | 8  | 1  | Swelling (u8, %) |
/// | 9  | 2  | Base group voltage (u16, mV) |
/// | 11 | 13 | Per-group delta from base (i8, mV) |
/// | 24 | 1  | XOR checksum |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleFrame {
    pub module_index: u8,
    pub ntc1_dt: i16,
    pub ntc2_dt: i16,
    pub swelling_pct: u8,
    pub v_base_mv: u16,
    pub v_delta_mv: [i8; GROUPS_PER_MODULE],
}

impl ModuleFrame {
    /// Serialize with header and checksum.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MODULE_FRAME_LEN] {
        let mut buf = [0u8; MODULE_FRAME_LEN];
        buf[0] = INPUT_SYNC;
        buf[1] = MODULE_FRAME_LEN as u8;
        buf[2] = FRAME_TYPE_MODULE;
        buf[3] = self.module_index;
        buf[4..6].copy_from_slice(&self.ntc1_dt.to_le_bytes());
        buf[6..8].copy_from_slice(&self.ntc2_dt.to_le_bytes());
        buf[8] = self.swelling_pct;
        buf[9..11].copy_from_slice(&self.v_base_mv.to_le_bytes());
        for (g, &delta) in self.v_delta_mv.iter().enumerate() {
            buf[11 + g] = delta as u8;
        }
        buf[MODULE_FRAME_LEN - 1] = xor_checksum(&buf[..MODULE_FRAME_LEN - 1]);
        buf
    }

    /// Deserialize from an already-validated frame buffer.
    fn from_bytes(buf: &[u8]) -> Self {
        let mut v_delta_mv = [0i8; GROUPS_PER_MODULE];
        for (g, delta) in v_delta_mv.iter_mut().enumerate() {
            *delta = buf[11 + g] as i8;
        }
        Self {
            module_index: buf[3],
            ntc1_dt: i16::from_le_bytes([buf[4], buf[5]]),
            ntc2_dt: i16::from_le_bytes([buf[6], buf[7]]),
            swelling_pct: buf[8],
            v_base_mv: u16::from_le_bytes([buf[9], buf[10]]),
            v_delta_mv,
        }
    }
}

/// What one fed byte produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Nothing complete yet.
    None,
    /// A valid frame was stored.
    FrameParsed,
    /// That frame completed the cycle: the pack frame and all eight module
    /// frames have arrived since the last cycle reset.
    CycleReady,
}

/// Sliding-buffer reassembler for the inbound protocol.
///
/// Corrupted input never reaches the snapshot: a frame with a bad length,
/// unknown type, or failed checksum is discarded by advancing one byte past
/// its sync and rescanning, and the drop is tallied in a counter. The
/// counters are diagnostics only — frame-level transients do not affect
/// system state.
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    buf: [u8; RX_BUF_LEN],
    len: usize,

    pack_received: bool,
    modules_received: u8,

    last_pack: PackFrame,
    last_modules: [ModuleFrame; MODULES],

    bad_length: u32,
    unknown_type: u32,
    bad_checksum: u32,
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReceiver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: [0; RX_BUF_LEN],
            len: 0,
            pack_received: false,
            modules_received: 0,
            last_pack: PackFrame::default(),
            last_modules: [ModuleFrame::default(); MODULES],
            bad_length: 0,
            unknown_type: 0,
            bad_checksum: 0,
        }
    }

    /// Feed one received byte.
    pub fn feed(&mut self, byte: u8) -> FeedOutcome {
        if self.len == RX_BUF_LEN {
            // No frame fit in a full buffer: garbage. Start over.
            self.len = 0;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        self.try_parse()
    }

    /// Feed a run of bytes, returning the strongest outcome seen.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::None;
        for &b in bytes {
            let o = self.feed(b);
            if o == FeedOutcome::CycleReady
                || (o == FeedOutcome::FrameParsed && outcome == FeedOutcome::None)
            {
                outcome = o;
            }
        }
        outcome
    }

    /// Whether a pack frame and all eight module frames have arrived since
    /// the last [`FrameReceiver::reset_cycle`].
    #[must_use]
    pub fn cycle_ready(&self) -> bool {
        self.pack_received && self.modules_received == 0xFF
    }

    /// Clear the per-cycle presence tracking. The stored frames stay valid
    /// as the last-known readings.
    pub fn reset_cycle(&mut self) {
        self.pack_received = false;
        self.modules_received = 0;
    }

    /// Most recent valid pack frame.
    #[must_use]
    pub fn last_pack(&self) -> &PackFrame {
        &self.last_pack
    }

    /// Most recent valid frame for each module.
    #[must_use]
    pub fn last_modules(&self) -> &[ModuleFrame; MODULES] {
        &self.last_modules
    }

    /// (bad length, unknown type, bad checksum) drop tallies.
    #[must_use]
    pub fn drop_counts(&self) -> (u32, u32, u32) {
        (self.bad_length, self.unknown_type, self.bad_checksum)
    }

    /// Write the stored frames into a snapshot's raw channels, converting
    /// from wire fixed-point to engineering units. Computed fields are left
    /// for the derived-field pass; the fast-loop short-circuit flag is
    /// cleared because this is a fresh observation of the pack.
    pub fn apply_to(&self, snapshot: &mut PackSnapshot) {
        let pack = &self.last_pack;
        snapshot.pack_voltage_v = f32::from(pack.pack_voltage_dv) / 10.0;
        snapshot.pack_current_a = f32::from(pack.pack_current_da) / 10.0;
        snapshot.ambient_c = f32::from(pack.ambient_dt) / 10.0;
        snapshot.coolant_inlet_c = f32::from(pack.coolant_inlet_dt) / 10.0;
        snapshot.coolant_outlet_c = f32::from(pack.coolant_outlet_dt) / 10.0;
        snapshot.gas_ratio_1 = f32::from(pack.gas_ratio_1_cp) / 100.0;
        snapshot.gas_ratio_2 = f32::from(pack.gas_ratio_2_cp) / 100.0;
        snapshot.pressure_delta_1_hpa = f32::from(pack.pressure_delta_1_chpa) / 100.0;
        snapshot.pressure_delta_2_hpa = f32::from(pack.pressure_delta_2_chpa) / 100.0;
        snapshot.humidity_pct = f32::from(pack.humidity_pct);
        snapshot.isolation_mohm = f32::from(pack.isolation_dmohm) / 10.0;

        for (module, frame) in snapshot.modules.iter_mut().zip(&self.last_modules) {
            module.ntc1_c = f32::from(frame.ntc1_dt) / 10.0;
            module.ntc2_c = f32::from(frame.ntc2_dt) / 10.0;
            module.swelling_pct = f32::from(frame.swelling_pct);
            for (g, voltage) in module.group_voltages_v.iter_mut().enumerate() {
                let mv = f32::from(frame.v_base_mv) + f32::from(frame.v_delta_mv[g]);
                *voltage = mv / 1000.0;
            }
        }

        snapshot.short_circuit = false;
    }

    /// Try to extract one frame from the front of the buffer.
    fn try_parse(&mut self) -> FeedOutcome {
        // Drop anything before a sync byte
        if let Some(start) = self.buf[..self.len].iter().position(|&b| b == INPUT_SYNC) {
            if start > 0 {
                self.buf.copy_within(start..self.len, 0);
                self.len -= start;
            }
        } else {
            self.len = 0;
            return FeedOutcome::None;
        }

        if self.len < 3 {
            return FeedOutcome::None;
        }

        let frame_len = self.buf[1] as usize;
        let frame_type = self.buf[2];

        let expected_len = match frame_type {
            FRAME_TYPE_PACK => PACK_FRAME_LEN,
            FRAME_TYPE_MODULE => MODULE_FRAME_LEN,
            _ => {
                self.unknown_type += 1;
                self.skip_sync();
                return FeedOutcome::None;
            }
        };
        if frame_len != expected_len {
            self.bad_length += 1;
            self.skip_sync();
            return FeedOutcome::None;
        }

        if self.len < frame_len {
            return FeedOutcome::None;
        }

        let expected = xor_checksum(&self.buf[..frame_len - 1]);
        if self.buf[frame_len - 1] != expected {
            self.bad_checksum += 1;
            self.skip_sync();
            return FeedOutcome::None;
        }

        match frame_type {
            FRAME_TYPE_PACK => {
                self.last_pack = PackFrame::from_bytes(&self.buf[..frame_len]);
                self.pack_received = true;
            }
            _ => {
                let frame = ModuleFrame::from_bytes(&self.buf[..frame_len]);
                // An index past the pack geometry is a twin bug; the frame
                // checksummed fine, so just ignore its payload.
                if let Some(slot) = self.last_modules.get_mut(frame.module_index as usize) {
                    *slot = frame;
                    self.modules_received |= 1 << frame.module_index;
                }
            }
        }

        self.buf.copy_within(frame_len..self.len, 0);
        self.len -= frame_len;

        if self.cycle_ready() {
            FeedOutcome::CycleReady
        } else {
            FeedOutcome::FrameParsed
        }
    }

    /// Discard the sync byte at the front and keep the rest for rescanning.
    fn skip_sync(&mut self) {
        self.buf.copy_within(1..self.len, 0);
        self.len -= 1;
    }
}
