//! Scan data buffer.
//!
//! [`ScanBuffer`] owns one dense array per channel, shaped `[res0]` for a line scan
//! and `[res0, res1]` (row-major) for a raster scan. Line `l` of a raster scan is the
//! column `[:, l]`. Readers never see the buffer itself: [`ScanBuffer::snapshot`]
//! hands out a deep copy.

use crate::model::{ChannelSpec, ScanSettings};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Values of one channel in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelData {
    /// Channel name
    pub name: String,
    /// Channel unit
    pub unit: String,
    /// Row-major samples, `NaN` where nothing has been acquired yet
    pub values: Vec<f64>,
}

/// Per-channel storage of the configured scan.
#[derive(Debug, Clone)]
pub struct ScanBuffer {
    settings: ScanSettings,
    channels: Vec<ChannelSpec>,
    data: Vec<Vec<f64>>,
    lines_completed: usize,
    failed_lines: BTreeSet<usize>,
    generation: u64,
    updated_at: DateTime<Utc>,
}

impl ScanBuffer {
    /// Allocate a NaN-filled buffer for `settings`.
    pub fn new(settings: ScanSettings, channels: &[ChannelSpec]) -> Self {
        let len = settings.resolution.iter().product::<usize>();
        Self {
            data: vec![vec![f64::NAN; len]; channels.len()],
            channels: channels.to_vec(),
            settings,
            lines_completed: 0,
            failed_lines: BTreeSet::new(),
            generation: 0,
            updated_at: Utc::now(),
        }
    }

    /// `[res0]` or `[res0, res1]`.
    pub fn shape(&self) -> Vec<usize> {
        self.settings.resolution.clone()
    }

    /// Prepare for a new acquisition pass.
    ///
    /// Previous values are kept until overwritten line by line, so a consumer keeps
    /// seeing the last image while the new one builds up.
    pub fn begin_scan(&mut self) {
        self.generation += 1;
        self.lines_completed = 0;
        self.failed_lines.clear();
        self.updated_at = Utc::now();
    }

    /// Flat indices of line `line`.
    fn line_indices(&self, line: usize) -> impl Iterator<Item = usize> {
        let points = self.settings.points_per_line();
        let stride = self.settings.line_count();
        (0..points).map(move |i| i * stride + line)
    }

    /// Store one acquired line. `values` is ordered like the channels.
    ///
    /// Channels missing from `values` and samples beyond the line length are
    /// ignored.
    pub fn write_line(&mut self, line: usize, values: &[Vec<f64>]) {
        if line >= self.settings.line_count() {
            return;
        }
        let indices: Vec<usize> = self.line_indices(line).collect();
        for (column, samples) in self.data.iter_mut().zip(values) {
            for (&index, &sample) in indices.iter().zip(samples) {
                column[index] = sample;
            }
        }
        self.failed_lines.remove(&line);
        self.lines_completed = self.lines_completed.max(line + 1);
        self.updated_at = Utc::now();
    }

    /// Record that line `line` could not be acquired; its values stay stale.
    pub fn mark_failed(&mut self, line: usize) {
        self.failed_lines.insert(line);
        self.lines_completed = self.lines_completed.max(line + 1);
        self.updated_at = Utc::now();
    }

    /// Deep copy of the current contents.
    pub fn snapshot(&self) -> ScanBufferSnapshot {
        ScanBufferSnapshot {
            settings: self.settings.clone(),
            shape: self.shape(),
            channels: self
                .channels
                .iter()
                .zip(&self.data)
                .map(|(spec, values)| ChannelData {
                    name: spec.name.clone(),
                    unit: spec.unit.clone(),
                    values: values.clone(),
                })
                .collect(),
            lines_completed: self.lines_completed,
            failed_lines: self.failed_lines.iter().copied().collect(),
            generation: self.generation,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time copy of a [`ScanBuffer`].
///
/// Owns its data; later writes to the buffer never show up here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanBufferSnapshot {
    /// Settings the buffer was allocated for
    pub settings: ScanSettings,
    /// `[res0]` or `[res0, res1]`
    pub shape: Vec<usize>,
    /// One entry per channel, in constraint order
    pub channels: Vec<ChannelData>,
    /// Lines visited in the current generation
    pub lines_completed: usize,
    /// Lines whose acquisition failed, with stale values
    pub failed_lines: Vec<usize>,
    /// Incremented on every scan start
    pub generation: u64,
    /// Time of the last write to the buffer
    pub updated_at: DateTime<Utc>,
}

impl ScanBufferSnapshot {
    /// Channel by name.
    pub fn channel(&self, name: &str) -> Option<&ChannelData> {
        self.channels.iter().find(|channel| channel.name == name)
    }

    /// Sample `(i, j)` of a channel, `i` along the fast axis and `j` the line.
    ///
    /// Line scans only have line 0.
    pub fn get(&self, channel: &str, i: usize, j: usize) -> Option<f64> {
        let stride = self.shape.get(1).copied().unwrap_or(1);
        if j >= stride {
            return None;
        }
        self.channel(channel)?.values.get(i * stride + j).copied()
    }

    /// All samples of line `line` of a channel.
    pub fn line(&self, channel: &str, line: usize) -> Option<Vec<f64>> {
        let points = self.shape.first().copied().unwrap_or(0);
        (0..points).map(|i| self.get(channel, i, line)).collect()
    }

    /// Every line has been visited in the current generation.
    pub fn is_complete(&self) -> bool {
        self.lines_completed >= self.settings.line_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<ChannelSpec> {
        vec![
            ChannelSpec::detector("APD1", "c/s", 0),
            ChannelSpec::sum("sum", "c/s"),
        ]
    }

    #[test]
    fn test_new_buffer_is_nan_filled() {
        let settings = ScanSettings::raster(("x", (0.0, 1.0), 3), ("y", (0.0, 1.0), 2), 10.0);
        let buffer = ScanBuffer::new(settings, &channels());
        let snapshot = buffer.snapshot();

        assert_eq!(snapshot.shape, vec![3, 2]);
        assert_eq!(snapshot.channels.len(), 2);
        assert!(snapshot.channels.iter().all(|c| c.values.len() == 6));
        assert!(snapshot.channels[0].values.iter().all(|v| v.is_nan()));
        assert_eq!(snapshot.lines_completed, 0);
    }

    #[test]
    fn test_write_line_fills_one_column() {
        let settings = ScanSettings::raster(("x", (0.0, 1.0), 3), ("y", (0.0, 1.0), 2), 10.0);
        let mut buffer = ScanBuffer::new(settings, &channels());
        buffer.write_line(1, &[vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]]);

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.line("APD1", 1), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(snapshot.get("sum", 2, 1), Some(30.0));
        assert!(snapshot.line("APD1", 0).unwrap().iter().all(|v| v.is_nan()));
        assert_eq!(snapshot.lines_completed, 2);
    }

    #[test]
    fn test_line_scan_layout() {
        let settings = ScanSettings::line("x", (0.0, 1.0), 4, 10.0);
        let mut buffer = ScanBuffer::new(settings, &channels());
        buffer.write_line(0, &[vec![1.0, 2.0, 3.0, 4.0], vec![0.0; 4]]);

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.shape, vec![4]);
        assert_eq!(snapshot.channel("APD1").unwrap().values, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(snapshot.is_complete());

        // A line scan has a single line
        assert_eq!(snapshot.line("APD1", 0), Some(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(snapshot.line("APD1", 5), None);
        assert_eq!(snapshot.get("APD1", 0, 7), None);
        assert_eq!(snapshot.get("APD1", 4, 0), None);

        // Out of range lines are ignored
        buffer.write_line(1, &[vec![9.0; 4], vec![9.0; 4]]);
        assert_eq!(buffer.snapshot().channels, snapshot.channels);
    }

    #[test]
    fn test_snapshot_is_independent_of_buffer() {
        let settings = ScanSettings::line("x", (0.0, 1.0), 2, 10.0);
        let mut buffer = ScanBuffer::new(settings, &channels());
        buffer.write_line(0, &[vec![1.0, 1.0], vec![1.0, 1.0]]);
        let before = buffer.snapshot();

        buffer.write_line(0, &[vec![5.0, 5.0], vec![5.0, 5.0]]);
        assert_eq!(before.channels[0].values, vec![1.0, 1.0]);
        assert_eq!(buffer.snapshot().channels[0].values, vec![5.0, 5.0]);
    }

    #[test]
    fn test_begin_scan_keeps_values_and_resets_progress() {
        let settings = ScanSettings::raster(("x", (0.0, 1.0), 2), ("y", (0.0, 1.0), 2), 10.0);
        let mut buffer = ScanBuffer::new(settings, &channels());
        buffer.write_line(0, &[vec![1.0, 2.0], vec![3.0, 4.0]]);
        buffer.mark_failed(1);
        assert_eq!(buffer.snapshot().failed_lines, vec![1]);

        buffer.begin_scan();
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.lines_completed, 0);
        assert!(snapshot.failed_lines.is_empty());
        assert_eq!(snapshot.line("APD1", 0), Some(vec![1.0, 2.0]));
    }
}
