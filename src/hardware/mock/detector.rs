//! Simulated counting detector.

use super::errors::ErrorConfig;
use super::MockMode;
use crate::hardware::capabilities::Detector;
use crate::model::AxisPosition;
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Count rate as a function of channel and position.
pub type SignalFn = Arc<dyn Fn(u32, &AxisPosition) -> f64 + Send + Sync>;

/// Source of the position fed to the signal function.
pub type PositionFn = Arc<dyn Fn() -> AxisPosition + Send + Sync>;

/// Mock photon counter.
///
/// Returns `signal(channel, position)` in counts per second, quantised to whole
/// counts over the integration window, with optional relative noise.
#[derive(Clone)]
pub struct MockDetector {
    name: String,
    channels: u32,
    signal: SignalFn,
    position: PositionFn,
    noise: f64,
    mode: MockMode,
    error_config: ErrorConfig,
    rng: Arc<Mutex<StdRng>>,
    integrations: Arc<Mutex<Vec<(u32, f64)>>>,
}

impl std::fmt::Debug for MockDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDetector")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("noise", &self.noise)
            .field("mode", &self.mode)
            .finish()
    }
}

impl MockDetector {
    /// Start building a single-channel detector.
    pub fn builder() -> MockDetectorBuilder {
        MockDetectorBuilder::new()
    }

    /// Every `(channel, dt)` integration requested so far.
    pub fn integrations(&self) -> Vec<(u32, f64)> {
        self.integrations.lock().clone()
    }
}

#[async_trait]
impl Detector for MockDetector {
    async fn integrate(&self, channel: u32, dt_seconds: f64) -> Result<f64> {
        self.error_config.check_operation(&self.name, "integrate")?;
        if channel >= self.channels {
            bail!("{}: no counter input {}", self.name, channel);
        }
        if !(dt_seconds > 0.0) {
            bail!("{}: integration window must be positive, got {}", self.name, dt_seconds);
        }

        if matches!(self.mode, MockMode::Realistic) {
            sleep(Duration::from_secs_f64(dt_seconds)).await;
        }

        let rate = (self.signal)(channel, &(self.position)());
        let noisy = if self.noise > 0.0 {
            let factor: f64 = self.rng.lock().gen_range(-1.0..=1.0);
            rate * (1.0 + self.noise * factor)
        } else {
            rate
        };
        let counts = (noisy.max(0.0) * dt_seconds).round();

        self.integrations.lock().push((channel, dt_seconds));
        Ok(counts / dt_seconds)
    }
}

/// Builder for [`MockDetector`].
pub struct MockDetectorBuilder {
    name: String,
    channels: u32,
    signal: SignalFn,
    position: PositionFn,
    noise: f64,
    mode: MockMode,
    error_config: ErrorConfig,
    seed: Option<u64>,
}

impl MockDetectorBuilder {
    /// One channel at a constant 10 kc/s, no noise, instant.
    pub fn new() -> Self {
        Self {
            name: "mock_detector".to_string(),
            channels: 1,
            signal: Arc::new(|_, _| 1.0e4),
            position: Arc::new(AxisPosition::new),
            noise: 0.0,
            mode: MockMode::Instant,
            error_config: ErrorConfig::none(),
            seed: None,
        }
    }

    /// Device name used in errors and logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of counter inputs, ids `0..channels`.
    pub fn channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    /// Same rate on every channel, everywhere.
    pub fn constant_rate(mut self, rate: f64) -> Self {
        self.signal = Arc::new(move |_, _| rate);
        self
    }

    /// Noise-free rate of a channel at a position.
    pub fn signal(mut self, signal: impl Fn(u32, &AxisPosition) -> f64 + Send + Sync + 'static) -> Self {
        self.signal = Arc::new(signal);
        self
    }

    /// Where the detector looks, usually an actuator's position.
    pub fn position_source(mut self, source: impl Fn() -> AxisPosition + Send + Sync + 'static) -> Self {
        self.position = Arc::new(source);
        self
    }

    /// Relative uniform noise amplitude, e.g. `0.05` for ±5 %.
    pub fn noise(mut self, noise: f64) -> Self {
        self.noise = noise.max(0.0);
        self
    }

    /// Make the noise reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Realistic mode sleeps for the integration window.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Inject failures.
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Create the detector.
    pub fn build(self) -> MockDetector {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        MockDetector {
            name: self.name,
            channels: self.channels,
            signal: self.signal,
            position: self.position,
            noise: self.noise,
            mode: self.mode,
            error_config: self.error_config,
            rng: Arc::new(Mutex::new(rng)),
            integrations: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Default for MockDetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::ErrorScenario;

    #[tokio::test]
    async fn test_constant_rate_without_noise() {
        let detector = MockDetector::builder().constant_rate(2000.0).build();
        let rate = detector.integrate(0, 0.01).await.unwrap();
        assert!((rate - 2000.0).abs() < 1e-9);
        assert_eq!(detector.integrations(), vec![(0, 0.01)]);
    }

    #[tokio::test]
    async fn test_signal_follows_position_source() {
        let detector = MockDetector::builder()
            .channels(2)
            .signal(|channel, position| (channel as f64 + 1.0) * 1000.0 * position["x"])
            .position_source(|| [("x".to_string(), 3.0)].into_iter().collect())
            .build();
        assert_eq!(detector.integrate(0, 1.0).await.unwrap(), 3000.0);
        assert_eq!(detector.integrate(1, 1.0).await.unwrap(), 6000.0);
    }

    #[tokio::test]
    async fn test_rejects_unknown_channel_and_bad_window() {
        let detector = MockDetector::builder().build();
        assert!(detector.integrate(3, 0.1).await.is_err());
        assert!(detector.integrate(0, 0.0).await.is_err());
        assert!(detector.integrate(0, f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_noise_stays_within_amplitude() {
        let detector = MockDetector::builder()
            .constant_rate(1.0e6)
            .noise(0.1)
            .seed(42)
            .build();
        for _ in 0..20 {
            let rate = detector.integrate(0, 1.0).await.unwrap();
            assert!((0.9e6..=1.1e6).contains(&rate));
        }
    }

    #[tokio::test]
    async fn test_injected_read_failure() {
        let detector = MockDetector::builder()
            .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
                operation: "integrate",
            }))
            .build();
        let err = detector.integrate(0, 0.1).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
