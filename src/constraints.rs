//! Validation of scan requests against the scanner constraints.

use crate::error::ConstraintError;
use crate::model::{AxisConstraint, AxisPosition, ScanConstraints, ScanSettings};
use std::collections::HashSet;

/// `true` if `value` lies in `[min, max]`. NaN is never in range.
fn within(value: f64, (min, max): (f64, f64)) -> bool {
    value >= min && value <= max
}

impl ScanConstraints {
    /// Check `settings` against the constraint set.
    ///
    /// Checks run in a fixed order and the first failure is returned:
    /// 1. every axis exists
    /// 2. axes, ranges and resolutions have the same length, and there are 1 or 2
    ///    distinct axes
    /// 3. every range lies within its axis travel
    /// 4. every resolution lies within its axis resolution range
    /// 5. the frequency lies within the fast axis frequency range
    pub fn validate(&self, settings: &ScanSettings) -> Result<(), ConstraintError> {
        let axes = settings
            .axes
            .iter()
            .map(|name| {
                self.axis(name).ok_or_else(|| ConstraintError::UnknownAxis {
                    axis: name.clone(),
                })
            })
            .collect::<Result<Vec<&AxisConstraint>, _>>()?;

        if settings.axes.len() != settings.ranges.len()
            || settings.axes.len() != settings.resolution.len()
        {
            return Err(ConstraintError::ArityMismatch {
                axes: settings.axes.len(),
                ranges: settings.ranges.len(),
                resolutions: settings.resolution.len(),
            });
        }

        let distinct: HashSet<&str> = settings.axes.iter().map(String::as_str).collect();
        if !(1..=2).contains(&settings.axes.len()) || distinct.len() != settings.axes.len() {
            return Err(ConstraintError::InvalidDimension {
                axes: settings.axes.clone(),
            });
        }

        for (axis, &(a, b)) in axes.iter().zip(&settings.ranges) {
            if !within(a, axis.value_range) || !within(b, axis.value_range) {
                return Err(ConstraintError::RangeOutOfBounds {
                    axis: axis.name.clone(),
                    requested: (a, b),
                    allowed: axis.value_range,
                });
            }
        }

        for (axis, &resolution) in axes.iter().zip(&settings.resolution) {
            if resolution < axis.min_resolution() || resolution > axis.max_resolution() {
                return Err(ConstraintError::ResolutionOutOfBounds {
                    axis: axis.name.clone(),
                    requested: resolution,
                    allowed: axis.resolution_range,
                });
            }
        }

        let fast = axes[0];
        if !within(settings.frequency, fast.frequency_range) {
            return Err(ConstraintError::FrequencyOutOfBounds {
                axis: fast.name.clone(),
                requested: settings.frequency,
                allowed: fast.frequency_range,
            });
        }

        Ok(())
    }

    /// Check a direct move: every axis must exist and every coordinate lie within
    /// its travel.
    pub fn validate_position(&self, position: &AxisPosition) -> Result<(), ConstraintError> {
        for (name, &value) in position {
            let axis = self.axis(name).ok_or_else(|| ConstraintError::UnknownAxis {
                axis: name.clone(),
            })?;
            if !within(value, axis.value_range) {
                return Err(ConstraintError::PositionOutOfBounds {
                    axis: name.clone(),
                    requested: value,
                    allowed: axis.value_range,
                });
            }
        }
        Ok(())
    }
}
