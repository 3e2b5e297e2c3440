//! Framed byte protocols spoken by the PackSentry supervisor.
//!
//! Two little-endian protocols share the same frame shape,
//! `[sync | length | type | payload | xor_checksum]`, where the checksum is
//! the XOR of every preceding byte:
//!
//! - [`inbound`] — the digital-twin feed (sync `0xBB`): one pack frame plus
//!   eight module frames per sensor cycle, reassembled by a sliding-buffer
//!   receiver that tolerates filler bytes, interleaving, and corruption.
//! - [`outbound`] — dashboard telemetry (sync `0xAA`): one pack summary and
//!   eight module detail frames per telemetry cycle.
//!
//! All fixed-point conversions go through the clamped converters in
//! [`convert`] so no field can silently overflow its wire width.

pub mod convert;
pub mod inbound;
pub mod outbound;

pub use inbound::{FeedOutcome, FrameReceiver, ModuleFrame, PackFrame};
pub use outbound::{
    encode_cycle, FrameError, ModuleDetail, PackSummary, TELEMETRY_CYCLE_LEN,
};

/// XOR of every byte in `data`. Frame checksums are this over all bytes
/// preceding the checksum byte itself.
#[must_use]
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}
