//! Scan data model.
//!
//! Immutable descriptions of what a scanner can do ([`AxisConstraint`], [`ChannelSpec`],
//! [`ScanConstraints`]) and what a caller asks it to do ([`ScanSettings`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position per axis name, in axis units.
///
/// Used both for the last commanded (target) position and for the position read
/// back from the actuator.
pub type AxisPosition = BTreeMap<String, f64>;

/// Lifecycle state of a scan session or poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScanState {
    /// No scan or poll in progress
    #[default]
    Idle,
    /// Lines are being acquired or ticks are firing
    Running,
}

impl ScanState {
    /// `true` for [`ScanState::Running`].
    pub fn is_running(&self) -> bool {
        matches!(self, ScanState::Running)
    }
}

/// Limits of one scannable axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConstraint {
    /// Unique axis name (e.g. "x")
    pub name: String,
    /// Physical unit (e.g. "m")
    pub unit: String,
    /// Travel `(min, max)`
    pub value_range: (f64, f64),
    /// Smallest/largest step between two points
    pub step_range: (f64, f64),
    /// Min/max number of samples along this axis
    pub resolution_range: (usize, usize),
    /// Min/max sample rate when this axis is the fast axis (Hz)
    pub frequency_range: (f64, f64),
}

impl AxisConstraint {
    /// Build an axis whose step range spans `(0, |max - min|)`.
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        value_range: (f64, f64),
        resolution_range: (usize, usize),
        frequency_range: (f64, f64),
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            value_range,
            step_range: (0.0, (value_range.1 - value_range.0).abs()),
            resolution_range,
            frequency_range,
        }
    }

    /// Lower travel limit.
    pub fn min_value(&self) -> f64 {
        self.value_range.0
    }

    /// Upper travel limit.
    pub fn max_value(&self) -> f64 {
        self.value_range.1
    }

    /// Fewest samples allowed along this axis.
    pub fn min_resolution(&self) -> usize {
        self.resolution_range.0
    }

    /// Most samples allowed along this axis.
    pub fn max_resolution(&self) -> usize {
        self.resolution_range.1
    }

    /// Clamp a coordinate into the axis travel.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.value_range.0, self.value_range.1)
    }
}

/// Numeric element type of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    /// Floating point rates
    #[default]
    F64,
    /// Raw counts
    U64,
}

/// Where a channel's samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSource {
    /// Counter input `id` of the detector
    Detector(u32),
    /// Sum of every detector channel at the same point
    Sum,
}

/// One detector stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Unique channel name (e.g. "APD1")
    pub name: String,
    /// Physical unit (e.g. "c/s")
    pub unit: String,
    /// Element type of the samples
    pub sample_type: SampleType,
    /// Detector input or composite
    pub source: ChannelSource,
}

impl ChannelSpec {
    /// Channel read from detector input `id`.
    pub fn detector(name: impl Into<String>, unit: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            sample_type: SampleType::F64,
            source: ChannelSource::Detector(id),
        }
    }

    /// Composite channel summing all detector channels.
    pub fn sum(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            sample_type: SampleType::F64,
            source: ChannelSource::Sum,
        }
    }

}

/// Everything a scan may request, fixed for the lifetime of a hardware binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConstraints {
    axes: Vec<AxisConstraint>,
    channels: Vec<ChannelSpec>,
}

impl ScanConstraints {
    /// Constraint set over `axes` and `channels`, both in declaration order.
    pub fn new(axes: Vec<AxisConstraint>, channels: Vec<ChannelSpec>) -> Self {
        Self { axes, channels }
    }

    /// Axes in declaration order.
    pub fn axes(&self) -> &[AxisConstraint] {
        &self.axes
    }

    /// Channels in declaration order.
    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    /// Axis by name.
    pub fn axis(&self, name: &str) -> Option<&AxisConstraint> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    /// Channel names in declaration order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|channel| channel.name.as_str())
    }
}

/// A requested 1-D or 2-D raster scan.
///
/// `axes[0]` is the fast axis; `axes[1]`, if present, is the slow axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Scan axes, fast axis first
    pub axes: Vec<String>,
    /// `(start, end)` per axis
    pub ranges: Vec<(f64, f64)>,
    /// Samples per axis
    pub resolution: Vec<usize>,
    /// Fast-axis sample rate in Hz
    pub frequency: f64,
}

impl ScanSettings {
    /// 1-D scan along `axis`.
    pub fn line(axis: impl Into<String>, range: (f64, f64), resolution: usize, frequency: f64) -> Self {
        Self {
            axes: vec![axis.into()],
            ranges: vec![range],
            resolution: vec![resolution],
            frequency,
        }
    }

    /// 2-D scan, `fast` swept within each line, `slow` advanced once per line.
    pub fn raster(
        fast: (impl Into<String>, (f64, f64), usize),
        slow: (impl Into<String>, (f64, f64), usize),
        frequency: f64,
    ) -> Self {
        Self {
            axes: vec![fast.0.into(), slow.0.into()],
            ranges: vec![fast.1, slow.1],
            resolution: vec![fast.2, slow.2],
            frequency,
        }
    }

    /// Copy with every range reordered so that `min <= max`. NaN endpoints are kept.
    pub fn normalized(&self) -> Self {
        Self {
            ranges: self
                .ranges
                .iter()
                .map(|&(a, b)| if a > b { (b, a) } else { (a, b) })
                .collect(),
            ..self.clone()
        }
    }

    /// Number of scan axes (1 or 2 for valid settings).
    pub fn dimension(&self) -> usize {
        self.axes.len()
    }

    /// Number of lines in the scan: `resolution[1]` for 2-D, 1 for 1-D.
    pub fn line_count(&self) -> usize {
        if self.dimension() == 2 {
            self.resolution.get(1).copied().unwrap_or(1)
        } else {
            1
        }
    }

    /// Points per line (fast axis resolution).
    pub fn points_per_line(&self) -> usize {
        self.resolution.first().copied().unwrap_or(0)
    }

    /// Per-point integration window in seconds.
    pub fn dwell_time(&self) -> f64 {
        1.0 / self.frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_reorders_ranges() {
        let settings = ScanSettings::raster(("x", (4.0, 0.0), 5), ("y", (-1.0, 1.0), 3), 100.0);
        let normalized = settings.normalized();
        assert_eq!(normalized.ranges, vec![(0.0, 4.0), (-1.0, 1.0)]);
        assert_eq!(normalized.axes, settings.axes);

        let nan = ScanSettings::line("x", (f64::NAN, 3.0), 4, 10.0).normalized();
        assert!(nan.ranges[0].0.is_nan());
        assert_eq!(nan.ranges[0].1, 3.0);
    }

    #[test]
    fn test_line_count_by_dimension() {
        let line = ScanSettings::line("x", (0.0, 1.0), 10, 50.0);
        assert_eq!(line.line_count(), 1);
        assert_eq!(line.points_per_line(), 10);
        assert!((line.dwell_time() - 0.02).abs() < 1e-12);

        let raster = ScanSettings::raster(("x", (0.0, 1.0), 3), ("y", (0.0, 1.0), 2), 50.0);
        assert_eq!(raster.line_count(), 2);
        assert_eq!(raster.points_per_line(), 3);
    }

    #[test]
    fn test_axis_step_range_spans_travel() {
        let axis = AxisConstraint::new("z", "m", (-5e-6, 5e-6), (1, 100), (1.0, 1000.0));
        assert_eq!(axis.step_range.0, 0.0);
        assert!((axis.step_range.1 - 1e-5).abs() < 1e-18);
        assert_eq!(axis.clamp(1.0), 5e-6);
    }

    #[test]
    fn test_channel_source_serde() {
        let channel = ChannelSpec::detector("APD1", "c/s", 0);
        let json = serde_json::to_string(&channel).unwrap();
        assert!(json.contains("\"detector\":0"));

        let sum: ChannelSpec =
            serde_json::from_str(r#"{"name":"sum","unit":"c/s","sample_type":"f64","source":"sum"}"#)
                .unwrap();
        assert_eq!(sum.source, ChannelSource::Sum);
    }
}
