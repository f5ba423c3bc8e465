//! Hardware capabilities consumed by the scanning core.
//!
//! The session never talks to a device protocol directly. It receives already
//! activated handles implementing these traits:
//!
//! - [`Actuator`]: multi-axis positioner (piezo stage, galvo pair)
//! - [`Detector`]: counting detector integrating over a time window
//! - [`ModeController`]: optical path selector switched at scan boundaries
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Failures are reported as `anyhow` errors; the session turns them into
//! [`DeviceError`](crate::error::DeviceError) values or log entries.

use crate::model::AxisPosition;
use anyhow::Result;
use async_trait::async_trait;

/// How long `move_absolute` waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    /// Return once the axes have settled at the target
    Blocking,
    /// Return as soon as the move has been commanded
    NonBlocking,
}

impl MoveMode {
    /// `true` for [`MoveMode::Blocking`].
    pub fn is_blocking(&self) -> bool {
        matches!(self, MoveMode::Blocking)
    }
}

/// Capability: multi-axis absolute positioning.
///
/// # Contract
/// - `move_absolute` only touches the axes present in `coords`
/// - `get_position` reports every axis the actuator controls
/// - `calibrate` re-homes the axes and returns the position held before homing,
///   so callers can return there afterwards
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Move to absolute coordinates (axis units).
    async fn move_absolute(&self, coords: &AxisPosition, mode: MoveMode) -> Result<()>;

    /// Current actual position of every axis.
    async fn get_position(&self) -> Result<AxisPosition>;

    /// Re-home all axes, returning the pre-homing position.
    async fn calibrate(&self) -> Result<AxisPosition>;
}

/// Capability: photon counting over a time window.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Integrate channel `channel` for `dt_seconds` and return the count rate.
    ///
    /// Blocks for the whole integration window.
    async fn integrate(&self, channel: u32, dt_seconds: f64) -> Result<f64>;
}

/// Capability: switch the optical path between scanning and idle.
#[async_trait]
pub trait ModeController: Send + Sync {
    /// Route the beam through the scanner.
    async fn enter_scanning_mode(&self) -> Result<()>;

    /// Restore the path used between scans.
    async fn enter_idle_mode(&self) -> Result<()>;
}
