//! Poll-driven scan acquisition.
//!
//! [`ScanPoller`] drives a [`ScanSession`] from a [`PollLoop`]: every tick pulls
//! one line through `get_scan_data` and publishes the snapshot. [`ScanLogic`] ties
//! the session and the loop together so a scan can be started, observed and
//! stopped from any task.

use crate::buffer::ScanBufferSnapshot;
use crate::error::ScanResult;
use crate::model::ScanSettings;
use crate::poll::{PollConfig, PollLoop, PollLoopHandle, PollTask, Tick};
use crate::session::ScanSession;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Poll task acquiring one scan line per tick.
pub struct ScanPoller {
    session: Arc<ScanSession>,
}

impl ScanPoller {
    /// Poller acquiring lines of `session`.
    pub fn new(session: Arc<ScanSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl PollTask for ScanPoller {
    type Output = ScanBufferSnapshot;

    fn name(&self) -> &str {
        "scan"
    }

    async fn tick(&mut self) -> Result<Tick<ScanBufferSnapshot>> {
        let snapshot = self
            .session
            .get_scan_data()
            .await
            .ok_or_else(|| anyhow!("no scan configured"))?;
        if self.session.is_scan_running() {
            Ok(Tick::Continue(snapshot))
        } else {
            Ok(Tick::Finished(snapshot))
        }
    }

    async fn on_idle(&mut self) {
        self.session.stop_scan().await;
    }
}

/// Scan session plus the poll loop acquiring its lines.
pub struct ScanLogic {
    session: Arc<ScanSession>,
    poll: PollLoopHandle<ScanBufferSnapshot>,
}

impl ScanLogic {
    /// Spawn the acquisition loop for `session`. Nothing runs until
    /// [`start_scan`](Self::start_scan).
    pub fn new(session: Arc<ScanSession>, config: PollConfig) -> Self {
        let poll = PollLoop::spawn(ScanPoller::new(Arc::clone(&session)), config);
        Self { session, poll }
    }

    /// The driven session.
    pub fn session(&self) -> &Arc<ScanSession> {
        &self.session
    }

    /// See [`ScanSession::configure_scan`].
    pub async fn configure_scan(&self, settings: ScanSettings) -> ScanResult<ScanSettings> {
        self.session.configure_scan(settings).await
    }

    /// Start the session, then the loop.
    pub async fn start_scan(&self) -> Result<()> {
        self.session.start_scan().await?;
        self.poll.start().await
    }

    /// Stop the loop and the session, returning once both are Idle.
    pub async fn stop_scan(&self) -> Result<()> {
        self.poll.stop().await?;
        self.poll.wait_idle().await?;
        self.session.stop_scan().await;
        Ok(())
    }

    /// See [`ScanSession::is_scan_running`].
    pub fn is_scan_running(&self) -> bool {
        self.session.is_scan_running()
    }

    /// Snapshots published after every acquired line.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanBufferSnapshot> {
        self.poll.subscribe()
    }

    /// Wait until the scan has finished or been stopped.
    pub async fn wait_finished(&self) -> Result<()> {
        self.poll.wait_idle().await
    }

    /// Stop the scan and join the poll loop.
    pub async fn shutdown(self) -> Result<()> {
        self.poll.shutdown().await?;
        self.session.stop_scan().await;
        Ok(())
    }
}
