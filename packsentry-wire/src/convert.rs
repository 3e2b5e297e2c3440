//! Clamped fixed-point converters.
//!
//! Every engineering-unit → wire-integer conversion in both protocols goes
//! through these helpers: values are clamped to the destination range and
//! rounded to nearest before the cast, so an out-of-range sensor reading
//! narrows to the rail instead of wrapping. NaN casts to 0 under Rust's
//! float-to-int rules, which is the same "channel contributes nothing"
//! behaviour the evaluator applies.

/// Clamp to `0..=65535` and round.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped first
pub fn clamp_u16(value: f32) -> u16 {
    value.clamp(0.0, 65_535.0).round() as u16
}

/// Clamp to `-32768..=32767` and round.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // clamped first
pub fn clamp_i16(value: f32) -> i16 {
    value.clamp(-32_768.0, 32_767.0).round() as i16
}

/// Clamp to `0..=255` and round.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped first
pub fn clamp_u8(value: f32) -> u8 {
    value.clamp(0.0, 255.0).round() as u8
}

/// Clamp to `0..=max` and round. Used where the wire field has a narrower
/// semantic range than its byte (gas ratios cap at 100).
#[must_use]
pub fn clamp_u8_max(value: f32, max: u8) -> u8 {
    clamp_u8(value).min(max)
}

/// Clamp to `-128..=127` and round.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // clamped first
pub fn clamp_i8(value: f32) -> i8 {
    value.clamp(-128.0, 127.0).round() as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_values_pass_through() {
        assert_eq!(clamp_u16(3328.0), 3328);
        assert_eq!(clamp_i16(-600.0), -600);
        assert_eq!(clamp_u8(97.0), 97);
        assert_eq!(clamp_i8(-12.0), -12);
    }

    #[test]
    fn conversions_round_to_nearest() {
        // Fixed-point products often land a hair under the integer
        assert_eq!(clamp_u16(43.99999), 44);
        assert_eq!(clamp_u16(415.99998), 416);
        assert_eq!(clamp_i16(288.99997), 289);
        assert_eq!(clamp_u8(2.4), 2);
        assert_eq!(clamp_u8(2.6), 3);
    }

    #[test]
    fn out_of_range_values_rail() {
        assert_eq!(clamp_u16(70_000.0), 65_535);
        assert_eq!(clamp_u16(-5.0), 0);
        assert_eq!(clamp_i16(40_000.0), 32_767);
        assert_eq!(clamp_i16(-40_000.0), -32_768);
        assert_eq!(clamp_u8(300.0), 255);
        assert_eq!(clamp_u8(-1.0), 0);
        assert_eq!(clamp_i8(200.0), 127);
    }

    #[test]
    fn nan_narrows_to_zero() {
        assert_eq!(clamp_u16(f32::NAN), 0);
        assert_eq!(clamp_i16(f32::NAN), 0);
        assert_eq!(clamp_u8(f32::NAN), 0);
    }

    #[test]
    fn semantic_max_caps_below_the_byte_rail() {
        assert_eq!(clamp_u8_max(98.0, 100), 98);
        assert_eq!(clamp_u8_max(140.0, 100), 100);
    }
}
