//! Scan session.
//!
//! [`ScanSession`] is the single ownership boundary of a scanner binding: one
//! `tokio::sync::Mutex` guards the settings, buffer, line cursor, target and restore
//! positions, and every externally invoked transition goes through it. A scan is
//! pull driven: while Running, each [`get_scan_data`](ScanSession::get_scan_data)
//! call acquires exactly one line before returning a snapshot.
//!
//! The lifecycle state is mirrored in a `watch` channel so
//! [`is_scan_running`](ScanSession::is_scan_running) answers without waiting for
//! a line in progress.

use crate::buffer::{ScanBuffer, ScanBufferSnapshot};
use crate::error::{DeviceError, DeviceErrorKind, ScanError, ScanResult};
use crate::executor::{MovePolicy, RasterScanExecutor};
use crate::hardware::capabilities::{Actuator, Detector, ModeController, MoveMode};
use crate::model::{AxisPosition, ScanConstraints, ScanSettings, ScanState};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SessionInner {
    state: ScanState,
    settings: Option<ScanSettings>,
    buffer: Option<ScanBuffer>,
    /// Next line to acquire while Running
    next_line: usize,
    /// Last commanded position
    target: AxisPosition,
    /// Position to return to when the scan ends
    restore: Option<AxisPosition>,
}

/// Scanner binding: constraints, hardware handles and scan state.
pub struct ScanSession {
    constraints: Arc<ScanConstraints>,
    actuator: Arc<dyn Actuator>,
    mode_controller: Option<Arc<dyn ModeController>>,
    executor: RasterScanExecutor,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<ScanState>,
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("state", &*self.state_tx.borrow())
            .field("move_policy", &self.executor.policy())
            .finish_non_exhaustive()
    }
}

impl ScanSession {
    /// Start binding hardware to `constraints`.
    pub fn builder(constraints: ScanConstraints) -> ScanSessionBuilder {
        ScanSessionBuilder::new(constraints)
    }

    /// Constraint set every request is validated against.
    pub fn get_constraints(&self) -> Arc<ScanConstraints> {
        Arc::clone(&self.constraints)
    }

    /// `true` while Running. Never waits for a line in progress.
    pub fn is_scan_running(&self) -> bool {
        self.state_tx.borrow().is_running()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ScanState {
        *self.state_tx.borrow()
    }

    /// Observe Idle/Running transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ScanState> {
        self.state_tx.subscribe()
    }

    /// Settings of the last successful [`configure_scan`](Self::configure_scan).
    pub async fn scan_settings(&self) -> Option<ScanSettings> {
        self.inner.lock().await.settings.clone()
    }

    /// Validate and install new scan settings.
    ///
    /// Ranges are reordered so that `min <= max` before validation. On success the
    /// settings and a freshly allocated buffer replace the previous ones together
    /// and the installed settings are returned; on failure nothing changes.
    pub async fn configure_scan(&self, settings: ScanSettings) -> ScanResult<ScanSettings> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_running() {
            return Err(ScanError::ScanInProgress);
        }

        let settings = settings.normalized();
        self.constraints.validate(&settings)?;

        inner.buffer = Some(ScanBuffer::new(settings.clone(), self.constraints.channels()));
        inner.settings = Some(settings.clone());
        inner.next_line = 0;
        info!(
            axes = ?settings.axes,
            resolution = ?settings.resolution,
            frequency = settings.frequency,
            "scan configured"
        );
        Ok(settings)
    }

    /// Enter Running.
    ///
    /// Remembers the current target as the restore position, re-homes the actuator
    /// and switches the optical path to scanning. A calibration failure is
    /// returned and leaves the session Idle; a mode switch failure is only logged.
    pub async fn start_scan(&self) -> ScanResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_running() {
            return Err(ScanError::ScanInProgress);
        }
        if inner.settings.is_none() {
            return Err(ScanError::NotConfigured);
        }

        let restore = inner.target.clone();
        let previous = self
            .actuator
            .calibrate()
            .await
            .map_err(|e| DeviceError::from_anyhow("actuator", DeviceErrorKind::Calibration, &e))?;
        debug!(?previous, "actuator calibrated");

        if let Some(mode) = &self.mode_controller {
            if let Err(e) = mode.enter_scanning_mode().await {
                warn!(error = %e, "failed to enter scanning mode");
            }
        }

        if let Some(buffer) = inner.buffer.as_mut() {
            buffer.begin_scan();
        }
        inner.next_line = 0;
        inner.restore = Some(restore);
        self.set_state(&mut inner, ScanState::Running);
        info!("scan started");
        Ok(())
    }

    /// Leave Running, returning the actuator to where it was at scan start.
    ///
    /// Always completes; failures to restore the position or the optical path are
    /// logged. Takes effect between lines, never during one.
    pub async fn stop_scan(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state.is_running() {
            info!(lines = inner.next_line, "scan stopped");
            self.finish_scan(&mut inner).await;
        }
    }

    /// Snapshot of the scan buffer, acquiring one line first while Running.
    ///
    /// Returns `None` until a scan has been configured. When Idle the buffer is not
    /// touched. A line whose acquisition fails keeps its previous values and is
    /// listed in the snapshot's `failed_lines`; the scan carries on. After the last
    /// line the session returns to Idle on its own.
    pub async fn get_scan_data(&self) -> Option<ScanBufferSnapshot> {
        let mut inner = self.inner.lock().await;
        let settings = inner.settings.clone()?;

        if inner.state.is_running() {
            let line = inner.next_line;
            let result = self.executor.scan_line(&settings, line, &inner.target).await;
            if let Some(buffer) = inner.buffer.as_mut() {
                match result {
                    Ok(data) => {
                        buffer.write_line(line, &data.values);
                        debug!(line, "line acquired");
                    }
                    Err(e) => {
                        warn!(line, error = %e, "scan line failed, keeping previous data");
                        buffer.mark_failed(line);
                    }
                }
            }
            inner.next_line += 1;

            if inner.next_line >= settings.line_count() {
                info!(lines = inner.next_line, "scan complete");
                self.finish_scan(&mut inner).await;
            }
        }

        inner.buffer.as_ref().map(ScanBuffer::snapshot)
    }

    /// Last commanded position. While Running this is the pre-scan target.
    pub async fn get_target(&self) -> AxisPosition {
        self.inner.lock().await.target.clone()
    }

    /// Actual position read back from the actuator.
    pub async fn get_position(&self) -> ScanResult<AxisPosition> {
        self.actuator
            .get_position()
            .await
            .map_err(|e| DeviceError::from_anyhow("actuator", DeviceErrorKind::Read, &e).into())
    }

    /// Blocking move of some axes, only while Idle.
    ///
    /// Returns the updated target.
    pub async fn move_absolute(&self, coords: AxisPosition) -> ScanResult<AxisPosition> {
        let mut inner = self.inner.lock().await;
        if inner.state.is_running() {
            return Err(ScanError::ScanInProgress);
        }
        self.constraints.validate_position(&coords)?;

        self.actuator
            .move_absolute(&coords, MoveMode::Blocking)
            .await
            .map_err(|e| DeviceError::from_anyhow("actuator", DeviceErrorKind::Move, &e))?;
        inner.target.extend(coords);
        debug!(position = ?inner.target, "moved");
        Ok(inner.target.clone())
    }

    async fn finish_scan(&self, inner: &mut SessionInner) {
        let restore = inner.restore.take().unwrap_or_else(|| inner.target.clone());
        if let Err(e) = self.actuator.move_absolute(&restore, MoveMode::Blocking).await {
            warn!(error = %e, "failed to restore position after scan");
        }
        if let Some(mode) = &self.mode_controller {
            if let Err(e) = mode.enter_idle_mode().await {
                warn!(error = %e, "failed to enter idle mode");
            }
        }
        self.set_state(inner, ScanState::Idle);
    }

    fn set_state(&self, inner: &mut SessionInner, state: ScanState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Builder for [`ScanSession`].
pub struct ScanSessionBuilder {
    constraints: ScanConstraints,
    actuator: Option<Arc<dyn Actuator>>,
    detector: Option<Arc<dyn Detector>>,
    mode_controller: Option<Arc<dyn ModeController>>,
    move_policy: MovePolicy,
}

impl ScanSessionBuilder {
    /// Builder with no hardware and the default move policy.
    pub fn new(constraints: ScanConstraints) -> Self {
        Self {
            constraints,
            actuator: None,
            detector: None,
            mode_controller: None,
            move_policy: MovePolicy::default(),
        }
    }

    /// Positioner moving the scan axes. Required.
    pub fn actuator(mut self, actuator: Arc<dyn Actuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    /// Counter read at every point. Required.
    pub fn detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Optical path switched at scan start and end. Optional.
    pub fn mode_controller(mut self, mode_controller: Arc<dyn ModeController>) -> Self {
        self.mode_controller = Some(mode_controller);
        self
    }

    /// Blocking split of the moves within a line.
    pub fn move_policy(mut self, policy: MovePolicy) -> Self {
        self.move_policy = policy;
        self
    }

    /// Bind the hardware. The initial target is the actuator's current position.
    pub async fn build(self) -> ScanResult<ScanSession> {
        let actuator = self
            .actuator
            .ok_or_else(|| ScanError::Configuration("scan session needs an actuator".to_string()))?;
        let detector = self
            .detector
            .ok_or_else(|| ScanError::Configuration("scan session needs a detector".to_string()))?;

        let target = actuator
            .get_position()
            .await
            .map_err(|e| DeviceError::from_anyhow("actuator", DeviceErrorKind::Read, &e))?;

        let constraints = Arc::new(self.constraints);
        let executor = RasterScanExecutor::new(
            Arc::clone(&actuator),
            detector,
            Arc::clone(&constraints),
            self.move_policy,
        );
        let (state_tx, _) = watch::channel(ScanState::Idle);

        Ok(ScanSession {
            constraints,
            actuator,
            mode_controller: self.mode_controller,
            executor,
            inner: Mutex::new(SessionInner {
                target,
                ..SessionInner::default()
            }),
            state_tx,
        })
    }
}
