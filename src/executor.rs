//! Raster scan executor.
//!
//! Turns one line of a configured scan into actuator moves and detector reads.
//! The executor holds no scan state: the session tells it which line to acquire
//! and stores the result.

use crate::error::{DeviceError, DeviceErrorKind};
use crate::hardware::capabilities::{Actuator, Detector, MoveMode};
use crate::model::{AxisPosition, ChannelSource, ScanConstraints, ScanSettings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Which moves of a line wait for the actuator to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePolicy {
    /// Settle on the first point of every line, stream the rest
    #[default]
    FirstPointBlocking,
    /// Settle on every point
    AllBlocking,
    /// Never wait for settling
    NoneBlocking,
}

impl MovePolicy {
    /// Move mode for point `point` of a line.
    pub fn mode_for(&self, point: usize) -> MoveMode {
        match self {
            MovePolicy::FirstPointBlocking if point == 0 => MoveMode::Blocking,
            MovePolicy::FirstPointBlocking => MoveMode::NonBlocking,
            MovePolicy::AllBlocking => MoveMode::Blocking,
            MovePolicy::NoneBlocking => MoveMode::NonBlocking,
        }
    }
}

/// `n` evenly spaced samples from `start` to `end`, both included.
///
/// A single sample sits at `start`. The last sample is exactly `end` and every
/// sample is clamped into the range, so round-off never leaves it.
pub fn axis_grid(start: f64, end: f64, n: usize) -> Vec<f64> {
    let (lo, hi) = (start.min(end), start.max(end));
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    let value = if i == n - 1 { end } else { start + i as f64 * step };
                    value.clamp(lo, hi)
                })
                .collect()
        }
    }
}

/// Result of one acquired line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineData {
    /// Line index, 0 for line scans
    pub line: usize,
    /// Fast axis coordinate of every point
    pub fast_axis: Vec<f64>,
    /// Slow axis coordinate shared by the line, `None` for line scans
    pub slow_axis: Option<f64>,
    /// One array per channel, in constraint order
    pub values: Vec<Vec<f64>>,
}

/// Acquires scan lines point by point.
pub struct RasterScanExecutor {
    actuator: Arc<dyn Actuator>,
    detector: Arc<dyn Detector>,
    constraints: Arc<ScanConstraints>,
    policy: MovePolicy,
}

impl RasterScanExecutor {
    /// Executor moving `actuator` and reading `detector` within `constraints`.
    pub fn new(
        actuator: Arc<dyn Actuator>,
        detector: Arc<dyn Detector>,
        constraints: Arc<ScanConstraints>,
        policy: MovePolicy,
    ) -> Self {
        Self {
            actuator,
            detector,
            constraints,
            policy,
        }
    }

    /// Blocking split applied to every line.
    pub fn policy(&self) -> MovePolicy {
        self.policy
    }

    fn clamp_to_axis(&self, axis: &str, value: f64) -> f64 {
        self.constraints
            .axis(axis)
            .map_or(value, |constraint| constraint.clamp(value))
    }

    /// Full coordinate tuple of every point of line `line`.
    ///
    /// Axes not being scanned stay at `target`.
    pub fn line_coordinates(
        &self,
        settings: &ScanSettings,
        line: usize,
        target: &AxisPosition,
    ) -> Vec<AxisPosition> {
        let (Some(fast), Some(&(start, end)), Some(&points)) = (
            settings.axes.first(),
            settings.ranges.first(),
            settings.resolution.first(),
        ) else {
            return Vec::new();
        };

        let mut base = target.clone();
        if let (Some(slow), Some(&(slow_start, slow_end)), Some(&lines)) = (
            settings.axes.get(1),
            settings.ranges.get(1),
            settings.resolution.get(1),
        ) {
            let grid = axis_grid(slow_start, slow_end, lines);
            if let Some(&value) = grid.get(line) {
                base.insert(slow.clone(), self.clamp_to_axis(slow, value));
            }
        }

        axis_grid(start, end, points)
            .into_iter()
            .map(|value| {
                let mut coords = base.clone();
                coords.insert(fast.clone(), self.clamp_to_axis(fast, value));
                coords
            })
            .collect()
    }

    /// Acquire line `line` of `settings`.
    ///
    /// Points are visited in order. Each point is one absolute move followed by one
    /// integration of `1 / frequency` seconds per detector channel; composite
    /// channels are summed from the detector channels of the same point. The first
    /// failing move or read aborts the line.
    pub async fn scan_line(
        &self,
        settings: &ScanSettings,
        line: usize,
        target: &AxisPosition,
    ) -> Result<LineData, DeviceError> {
        let points = self.line_coordinates(settings, line, target);
        let dwell = settings.dwell_time();
        let channels = self.constraints.channels();
        let fast = settings.axes.first().cloned().unwrap_or_default();
        let slow = settings.axes.get(1);

        debug!(line, points = points.len(), dwell, "scanning line");

        let mut values = vec![Vec::with_capacity(points.len()); channels.len()];
        for (index, coords) in points.iter().enumerate() {
            let mode = self.policy.mode_for(index);
            self.actuator
                .move_absolute(coords, mode)
                .await
                .map_err(|e| DeviceError::from_anyhow("actuator", DeviceErrorKind::Move, &e))?;

            let mut point = vec![0.0; channels.len()];
            for (slot, channel) in point.iter_mut().zip(channels) {
                if let ChannelSource::Detector(id) = channel.source {
                    *slot = self
                        .detector
                        .integrate(id, dwell)
                        .await
                        .map_err(|e| DeviceError::from_anyhow("detector", DeviceErrorKind::Read, &e))?;
                }
            }
            let total: f64 = channels
                .iter()
                .zip(&point)
                .filter(|(channel, _)| matches!(channel.source, ChannelSource::Detector(_)))
                .map(|(_, value)| value)
                .sum();
            for ((column, channel), value) in values.iter_mut().zip(channels).zip(point) {
                column.push(match channel.source {
                    ChannelSource::Detector(_) => value,
                    ChannelSource::Sum => total,
                });
            }
        }

        Ok(LineData {
            line,
            fast_axis: points
                .iter()
                .map(|coords| coords.get(&fast).copied().unwrap_or(f64::NAN))
                .collect(),
            slow_axis: slow.and_then(|axis| points.first().and_then(|coords| coords.get(axis).copied())),
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{ErrorConfig, ErrorScenario, MockActuator, MockDetector};
    use crate::model::{AxisConstraint, ChannelSpec};

    fn constraints() -> Arc<ScanConstraints> {
        Arc::new(ScanConstraints::new(
            vec![
                AxisConstraint::new("x", "m", (0.0, 10.0), (1, 100), (1.0, 1000.0)),
                AxisConstraint::new("y", "m", (0.0, 10.0), (1, 100), (1.0, 1000.0)),
                AxisConstraint::new("z", "m", (0.0, 10.0), (1, 100), (1.0, 1000.0)),
            ],
            vec![
                ChannelSpec::detector("APD1", "c/s", 0),
                ChannelSpec::detector("APD2", "c/s", 1),
                ChannelSpec::sum("sum", "c/s"),
            ],
        ))
    }

    fn target() -> AxisPosition {
        [("x", 5.0), ("y", 5.0), ("z", 7.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn executor(actuator: &MockActuator, detector: &MockDetector, policy: MovePolicy) -> RasterScanExecutor {
        RasterScanExecutor::new(
            Arc::new(actuator.clone()),
            Arc::new(detector.clone()),
            constraints(),
            policy,
        )
    }

    #[test]
    fn test_axis_grid_includes_endpoints() {
        assert_eq!(axis_grid(0.0, 4.0, 5), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(axis_grid(2.0, 3.0, 1), vec![2.0]);
        assert!(axis_grid(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_axis_grid_never_leaves_range() {
        let grid = axis_grid(0.1, 0.7, 7);
        assert_eq!(grid.len(), 7);
        assert_eq!(grid[0], 0.1);
        assert_eq!(grid[6], 0.7);
        assert!(grid.iter().all(|v| (0.1..=0.7).contains(v)));
        assert!(grid.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_move_policy_modes() {
        let policy = MovePolicy::default();
        assert_eq!(policy.mode_for(0), MoveMode::Blocking);
        assert_eq!(policy.mode_for(1), MoveMode::NonBlocking);
        assert_eq!(MovePolicy::AllBlocking.mode_for(3), MoveMode::Blocking);
        assert_eq!(MovePolicy::NoneBlocking.mode_for(0), MoveMode::NonBlocking);
    }

    #[test]
    fn test_line_coordinates_hold_other_axes() {
        let actuator = MockActuator::from_constraints(&constraints());
        let detector = MockDetector::builder().channels(2).build();
        let exec = executor(&actuator, &detector, MovePolicy::default());

        let settings = ScanSettings::raster(("x", (0.0, 2.0), 3), ("y", (1.0, 3.0), 2), 100.0);
        let coords = exec.line_coordinates(&settings, 1, &target());
        assert_eq!(coords.len(), 3);
        for (i, point) in coords.iter().enumerate() {
            assert_eq!(point["x"], i as f64);
            assert_eq!(point["y"], 3.0);
            assert_eq!(point["z"], 7.0);
        }
    }

    #[tokio::test]
    async fn test_scan_line_moves_and_reads_in_order() {
        let actuator = MockActuator::from_constraints(&constraints());
        let detector = MockDetector::builder()
            .channels(2)
            .signal(|channel, _| if channel == 0 { 100.0 } else { 50.0 })
            .build();
        let exec = executor(&actuator, &detector, MovePolicy::default());

        let settings = ScanSettings::raster(("x", (0.0, 4.0), 5), ("y", (0.0, 1.0), 2), 10.0);
        let data = exec.scan_line(&settings, 0, &target()).await.unwrap();

        assert_eq!(data.fast_axis, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(data.slow_axis, Some(0.0));
        assert_eq!(data.values[0], vec![100.0; 5]);
        assert_eq!(data.values[1], vec![50.0; 5]);
        assert_eq!(data.values[2], vec![150.0; 5]);

        let modes: Vec<MoveMode> = actuator.moves().iter().map(|m| m.mode).collect();
        assert_eq!(modes[0], MoveMode::Blocking);
        assert!(modes[1..].iter().all(|m| *m == MoveMode::NonBlocking));

        // Two detector channels per point, each integrating for 1 / frequency
        let integrations = detector.integrations();
        assert_eq!(integrations.len(), 10);
        assert!(integrations.iter().all(|&(_, dt)| (dt - 0.1).abs() < 1e-12));
    }

    #[tokio::test]
    async fn test_scan_line_reports_move_failure() {
        let actuator = MockActuator::builder()
            .axis("x", (0.0, 10.0))
            .error_config(ErrorConfig::scenario(ErrorScenario::FailOnCall {
                operation: "move",
                call: 2,
            }))
            .build();
        let detector = MockDetector::builder().channels(2).build();
        let exec = executor(&actuator, &detector, MovePolicy::default());

        let settings = ScanSettings::line("x", (0.0, 1.0), 4, 10.0);
        let err = exec
            .scan_line(&settings, 0, &AxisPosition::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::Move);
        assert_eq!(err.device, "actuator");
    }
}
