//! Simulated multi-axis actuator.

use super::errors::ErrorConfig;
use super::MockMode;
use crate::hardware::capabilities::{Actuator, MoveMode};
use crate::model::{AxisPosition, ScanConstraints};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// A move as the actuator received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMove {
    /// Requested coordinates, only the axes that were moved
    pub coords: AxisPosition,
    /// Requested wait behaviour
    pub mode: MoveMode,
}

#[derive(Debug)]
struct ActuatorState {
    position: AxisPosition,
    moves: Vec<RecordedMove>,
    calibrations: u32,
}

/// Mock positioner with hard travel limits.
///
/// Clones share state, so a test can keep one handle for inspection while the
/// session owns another.
#[derive(Clone, Debug)]
pub struct MockActuator {
    name: String,
    limits: BTreeMap<String, (f64, f64)>,
    home: AxisPosition,
    settle_time: Duration,
    mode: MockMode,
    error_config: ErrorConfig,
    state: Arc<Mutex<ActuatorState>>,
}

impl MockActuator {
    /// Start building an actuator with no axes.
    pub fn builder() -> MockActuatorBuilder {
        MockActuatorBuilder::new()
    }

    /// Actuator covering every axis of `constraints`, see
    /// [`MockActuatorBuilder::from_constraints`].
    pub fn from_constraints(constraints: &ScanConstraints) -> Self {
        MockActuatorBuilder::from_constraints(constraints).build()
    }

    /// Current position without going through the async trait.
    pub fn position(&self) -> AxisPosition {
        self.state.lock().position.clone()
    }

    /// Every move received so far, oldest first.
    pub fn moves(&self) -> Vec<RecordedMove> {
        self.state.lock().moves.clone()
    }

    /// Forget the recorded moves.
    pub fn clear_moves(&self) {
        self.state.lock().moves.clear();
    }

    /// Number of `calibrate` calls that succeeded.
    pub fn calibration_count(&self) -> u32 {
        self.state.lock().calibrations
    }

    fn enforce(&self, axis: &str, value: f64) -> Result<()> {
        let (min, max) = self
            .limits
            .get(axis)
            .ok_or_else(|| anyhow!("{}: unknown axis '{}'", self.name, axis))?;
        if !(value >= *min && value <= *max) {
            return Err(anyhow!(
                "{}: target {:.3e} outside travel ({:.3e}, {:.3e}) of axis '{}'",
                self.name,
                value,
                min,
                max,
                axis
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn move_absolute(&self, coords: &AxisPosition, mode: MoveMode) -> Result<()> {
        self.error_config.check_operation(&self.name, "move")?;
        for (axis, &value) in coords {
            self.enforce(axis, value)?;
        }

        if mode.is_blocking() && matches!(self.mode, MockMode::Realistic) {
            sleep(self.settle_time).await;
        }

        let mut state = self.state.lock();
        for (axis, &value) in coords {
            state.position.insert(axis.clone(), value);
        }
        state.moves.push(RecordedMove {
            coords: coords.clone(),
            mode,
        });
        tracing::trace!(device = %self.name, ?coords, ?mode, "moved");
        Ok(())
    }

    async fn get_position(&self) -> Result<AxisPosition> {
        self.error_config.check_operation(&self.name, "position")?;
        Ok(self.position())
    }

    async fn calibrate(&self) -> Result<AxisPosition> {
        self.error_config.check_operation(&self.name, "calibrate")?;
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.position, self.home.clone());
        state.calibrations += 1;
        tracing::debug!(device = %self.name, ?previous, "homed");
        Ok(previous)
    }
}

/// Builder for [`MockActuator`].
#[derive(Debug)]
pub struct MockActuatorBuilder {
    name: String,
    limits: BTreeMap<String, (f64, f64)>,
    position: AxisPosition,
    home: AxisPosition,
    settle_time: Duration,
    mode: MockMode,
    error_config: ErrorConfig,
}

impl MockActuatorBuilder {
    /// Builder with no axes, instant moves and no injected errors.
    pub fn new() -> Self {
        Self {
            name: "mock_actuator".to_string(),
            limits: BTreeMap::new(),
            position: AxisPosition::new(),
            home: AxisPosition::new(),
            settle_time: Duration::from_millis(5),
            mode: MockMode::Instant,
            error_config: ErrorConfig::none(),
        }
    }

    /// Every axis of `constraints`, parked mid-travel and homing to the lower
    /// limit.
    pub fn from_constraints(constraints: &ScanConstraints) -> Self {
        constraints.axes().iter().fold(Self::new(), |builder, axis| {
            builder
                .axis(&axis.name, axis.value_range)
                .initial_position(&axis.name, (axis.min_value() + axis.max_value()) / 2.0)
        })
    }

    /// Device name used in errors and logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add an axis with travel `(min, max)`. It starts and homes at `min` unless
    /// overridden.
    pub fn axis(mut self, name: &str, range: (f64, f64)) -> Self {
        self.limits.insert(name.to_string(), range);
        self.position.entry(name.to_string()).or_insert(range.0);
        self.home.entry(name.to_string()).or_insert(range.0);
        self
    }

    /// Starting coordinate of `axis`.
    pub fn initial_position(mut self, axis: &str, value: f64) -> Self {
        self.position.insert(axis.to_string(), value);
        self
    }

    /// Coordinate `axis` returns to on `calibrate`.
    pub fn home(mut self, axis: &str, value: f64) -> Self {
        self.home.insert(axis.to_string(), value);
        self
    }

    /// Settle delay of blocking moves in [`MockMode::Realistic`].
    pub fn settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Instant or realistic timing.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Inject failures.
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Create the actuator.
    pub fn build(self) -> MockActuator {
        MockActuator {
            name: self.name,
            limits: self.limits,
            home: self.home,
            settle_time: self.settle_time,
            mode: self.mode,
            error_config: self.error_config,
            state: Arc::new(Mutex::new(ActuatorState {
                position: self.position,
                moves: Vec::new(),
                calibrations: 0,
            })),
        }
    }
}

impl Default for MockActuatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::ErrorScenario;

    fn xy() -> MockActuator {
        MockActuator::builder()
            .axis("x", (0.0, 10.0))
            .axis("y", (-5.0, 5.0))
            .initial_position("x", 2.0)
            .home("x", 1.0)
            .build()
    }

    fn coords(pairs: &[(&str, f64)]) -> AxisPosition {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_move_updates_only_given_axes() {
        let actuator = xy();
        actuator
            .move_absolute(&coords(&[("y", 3.0)]), MoveMode::Blocking)
            .await
            .unwrap();

        let position = actuator.get_position().await.unwrap();
        assert_eq!(position, coords(&[("x", 2.0), ("y", 3.0)]));
        assert_eq!(actuator.moves().len(), 1);
        assert_eq!(actuator.moves()[0].mode, MoveMode::Blocking);
    }

    #[tokio::test]
    async fn test_move_outside_travel_rejected() {
        let actuator = xy();
        assert!(actuator
            .move_absolute(&coords(&[("x", 11.0)]), MoveMode::NonBlocking)
            .await
            .is_err());
        assert!(actuator
            .move_absolute(&coords(&[("q", 0.0)]), MoveMode::NonBlocking)
            .await
            .is_err());
        assert_eq!(actuator.position()["x"], 2.0);
        assert!(actuator.moves().is_empty());
    }

    #[tokio::test]
    async fn test_calibrate_returns_previous_position() {
        let actuator = xy();
        let previous = actuator.calibrate().await.unwrap();
        assert_eq!(previous, coords(&[("x", 2.0), ("y", -5.0)]));
        assert_eq!(actuator.position(), coords(&[("x", 1.0), ("y", -5.0)]));
        assert_eq!(actuator.calibration_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_calibration_failure() {
        let actuator = MockActuator::builder()
            .axis("x", (0.0, 1.0))
            .error_config(ErrorConfig::scenario(ErrorScenario::Always {
                operation: "calibrate",
            }))
            .build();
        assert!(actuator.calibrate().await.is_err());
        assert_eq!(actuator.calibration_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_realistic_mode_settles_blocking_moves_only() {
        let actuator = MockActuator::builder()
            .axis("x", (0.0, 1.0))
            .mode(MockMode::Realistic)
            .settle_time(Duration::from_millis(50))
            .build();

        let start = tokio::time::Instant::now();
        actuator
            .move_absolute(&coords(&[("x", 0.5)]), MoveMode::NonBlocking)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        actuator
            .move_absolute(&coords(&[("x", 0.6)]), MoveMode::Blocking)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
