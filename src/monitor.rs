//! Hardware monitors.
//!
//! Poll tasks that keep a consumer informed about the instrument between scans:
//! [`PositionMonitor`] reads the actuator position and [`CountMonitor`] the count
//! rate of every channel.

use crate::hardware::capabilities::{Actuator, Detector};
use crate::model::{AxisPosition, ChannelSource, ChannelSpec};
use crate::poll::{PollTask, Tick};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Publishes the actuator position on every tick.
pub struct PositionMonitor {
    actuator: Arc<dyn Actuator>,
}

impl PositionMonitor {
    /// Monitor reading `actuator`.
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }
}

#[async_trait]
impl PollTask for PositionMonitor {
    type Output = AxisPosition;

    fn name(&self) -> &str {
        "position"
    }

    async fn tick(&mut self) -> Result<Tick<AxisPosition>> {
        Ok(Tick::Continue(self.actuator.get_position().await?))
    }
}

/// Count rates of all channels at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountSample {
    /// When the integrations finished
    pub timestamp: DateTime<Utc>,
    /// Count rate per channel name
    pub rates: BTreeMap<String, f64>,
}

/// Integrates every detector channel once per tick.
pub struct CountMonitor {
    detector: Arc<dyn Detector>,
    channels: Vec<ChannelSpec>,
    integration_time: f64,
}

impl CountMonitor {
    /// `integration_time` in seconds per channel.
    pub fn new(detector: Arc<dyn Detector>, channels: Vec<ChannelSpec>, integration_time: f64) -> Self {
        Self {
            detector,
            channels,
            integration_time,
        }
    }
}

#[async_trait]
impl PollTask for CountMonitor {
    type Output = CountSample;

    fn name(&self) -> &str {
        "counter"
    }

    async fn tick(&mut self) -> Result<Tick<CountSample>> {
        let mut rates = BTreeMap::new();
        let mut total = 0.0;
        for channel in &self.channels {
            if let ChannelSource::Detector(id) = channel.source {
                let rate = self.detector.integrate(id, self.integration_time).await?;
                total += rate;
                rates.insert(channel.name.clone(), rate);
            }
        }
        for channel in &self.channels {
            if channel.source == ChannelSource::Sum {
                rates.insert(channel.name.clone(), total);
            }
        }
        Ok(Tick::Continue(CountSample {
            timestamp: Utc::now(),
            rates,
        }))
    }
}
