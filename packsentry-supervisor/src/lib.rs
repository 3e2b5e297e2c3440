//! System supervisor for the PackSentry safety pipeline.
//!
//! Owns every piece of mutable state — thresholds, latest snapshot, last
//! evaluation, correlation engine, receive parser, loop deadlines — and
//! drives the three cooperative slots:
//!
//! - **fast**: short-circuit current check, with an inline escalation path
//!   so a short never waits for the next medium tick;
//! - **medium**: rate computations, derived fields, anomaly evaluation,
//!   correlation update, output actuation;
//! - **slow**: binary telemetry plus a human-readable debug line.
//!
//! Slot periods auto-tighten while any anomaly is active and relax when the
//! pack is nominal; the engine's time-valued holds are rescaled on every
//! period change so "10 seconds to EMERGENCY" means 10 seconds at any rate.
//!
//! Everything is single-threaded and run-to-completion: the embedding layer
//! pushes received bytes via [`Supervisor::feed_bytes`] and calls
//! [`Supervisor::tick`] from its main loop with a monotonic millisecond
//! clock. Hardware effects go through the [`OutputDriver`] trait.

pub mod config;
pub mod outputs;
pub mod scheduler;
pub mod supervisor;

pub use config::{LoopTiming, SupervisorConfig};
pub use outputs::{NullDriver, OutputDriver};
pub use scheduler::{ms_to_cycles, Scheduler};
pub use supervisor::{SelfCheckError, Supervisor};
