//! Hardware output surface.
//!
//! The supervisor never touches GPIO, UART, or I²C itself; everything it
//! does to the outside world goes through this trait. The device build
//! implements it over the board support crate, the host harness over
//! stdout/TCP, and tests over a recording stub.

/// Outputs the supervisor drives.
///
/// Implementations must be non-blocking; every call happens inside a
/// run-to-completion scheduler slot.
pub trait OutputDriver {
    /// Show the current alert level: 0 = NORMAL .. 3 = EMERGENCY.
    fn set_status_level(&mut self, level: u8);

    /// Latch the contactor open, electrically isolating the pack.
    /// Must be idempotent — the supervisor re-asserts it every EMERGENCY
    /// cycle.
    fn contactor_open(&mut self);

    /// Close the contactor. Only ever called after the safety-arm gate has
    /// passed the startup self-check.
    fn contactor_close(&mut self);

    /// Pulse the audible/visual annunciator.
    fn annunciator_pulse(&mut self, duration_ms: u32);

    /// Ship one encoded telemetry frame toward the dashboard.
    fn send_telemetry(&mut self, frame: &[u8]);
}

/// Driver that discards everything. Useful for tests and for running the
/// pipeline headless.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDriver;

impl OutputDriver for NullDriver {
    fn set_status_level(&mut self, _level: u8) {}
    fn contactor_open(&mut self) {}
    fn contactor_close(&mut self) {}
    fn annunciator_pulse(&mut self, _duration_ms: u32) {}
    fn send_telemetry(&mut self, _frame: &[u8]) {}
}
