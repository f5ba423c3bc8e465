//! Simulated hardware.
//!
//! Mock implementations of the capability traits for tests and for running scans
//! without an instrument attached:
//!
//! - [`MockActuator`]: multi-axis stage with travel limits and homing
//! - [`MockDetector`]: counter whose rate can follow the actuator position
//! - [`MockModeController`]: optical path selector that records switches
//! - [`ErrorConfig`]: error injection shared by all of the above

mod actuator;
mod detector;
mod errors;
mod mode;

pub use actuator::{MockActuator, MockActuatorBuilder, RecordedMove};
pub use detector::{MockDetector, MockDetectorBuilder, PositionFn, SignalFn};
pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::{MockModeController, OpticalMode};

/// Timing behaviour of mock devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Operations complete immediately
    #[default]
    Instant,
    /// Blocking moves settle and integrations take their full window
    Realistic,
}
