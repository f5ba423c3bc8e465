//! Hardware seams of the scanning core.
//!
//! - [`capabilities`]: async traits the scan session drives
//! - [`mock`]: simulated devices for tests and the command line front end

pub mod capabilities;
pub mod mock;

pub use capabilities::{Actuator, Detector, ModeController, MoveMode};
