//! Simulated optical path selector.

use super::errors::ErrorConfig;
use crate::hardware::capabilities::ModeController;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Optical path selected by a [`MockModeController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpticalMode {
    /// Path used between scans
    Idle,
    /// Beam routed through the scanner
    Scanning,
}

/// Records every mode switch.
#[derive(Clone, Debug)]
pub struct MockModeController {
    name: String,
    error_config: ErrorConfig,
    history: Arc<Mutex<Vec<OpticalMode>>>,
}

impl MockModeController {
    /// Controller that never fails.
    pub fn new() -> Self {
        Self::with_error_config(ErrorConfig::none())
    }

    /// Controller failing as `error_config` says.
    pub fn with_error_config(error_config: ErrorConfig) -> Self {
        Self {
            name: "mock_mode_controller".to_string(),
            error_config,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Switches in call order.
    pub fn history(&self) -> Vec<OpticalMode> {
        self.history.lock().clone()
    }

    /// Last selected mode, [`OpticalMode::Idle`] before any switch.
    pub fn current(&self) -> OpticalMode {
        self.history.lock().last().copied().unwrap_or(OpticalMode::Idle)
    }
}

impl Default for MockModeController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModeController for MockModeController {
    async fn enter_scanning_mode(&self) -> Result<()> {
        self.error_config.check_operation(&self.name, "scanning_mode")?;
        self.history.lock().push(OpticalMode::Scanning);
        Ok(())
    }

    async fn enter_idle_mode(&self) -> Result<()> {
        self.error_config.check_operation(&self.name, "idle_mode")?;
        self.history.lock().push(OpticalMode::Idle);
        Ok(())
    }
}
