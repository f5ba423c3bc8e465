//! Periodic polling state machine.
//!
//! Every logic module that refreshes hardware state runs a [`PollTask`] inside a
//! [`PollLoop`]. The loop is an actor: it owns the task and runs in its own Tokio
//! task, processes [`PollCommand`] messages from an mpsc inbox and acknowledges
//! them through oneshot channels, so start and stop are linearized with ticks no
//! matter which task sends them.
//!
//! ```text
//!          start                 stop (observed at the next firing)
//!  Idle ───────────> Running ───────────────────────────────────> Idle
//!                     │   ▲
//!                     │   │ rearm: interval after Ok, recovery_interval after Err
//!                     └───┘
//! ```
//!
//! Each successful tick is broadcast to subscribers. A tick returning
//! [`Tick::Finished`] is broadcast and sends the loop back to Idle.

use crate::model::ScanState;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn, Instrument};

/// Delay before retrying after a failed tick.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_millis(3000);

const UPDATE_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Outcome of one successful tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick<T> {
    /// Publish and poll again after the interval
    Continue(T),
    /// Publish and return to Idle
    Finished(T),
}

/// Work performed once per firing of a [`PollLoop`].
#[async_trait]
pub trait PollTask: Send + 'static {
    /// Value published to subscribers after every successful tick
    type Output: Clone + Send + 'static;

    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Query the hardware once.
    async fn tick(&mut self) -> Result<Tick<Self::Output>>;

    /// Called on every transition to Idle.
    async fn on_idle(&mut self) {}
}

/// Timing of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between successful ticks
    pub interval: Duration,
    /// Delay after a failed tick
    pub recovery_interval: Duration,
}

impl PollConfig {
    /// Poll every `interval`, retry after the default recovery interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            recovery_interval: DEFAULT_RECOVERY_INTERVAL,
        }
    }

    /// Override the delay after a failed tick.
    pub fn with_recovery_interval(mut self, recovery_interval: Duration) -> Self {
        self.recovery_interval = recovery_interval;
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

/// Commands accepted by the poll loop actor.
#[derive(Debug)]
pub enum PollCommand {
    /// Idle -> Running; no-op when already Running
    Start {
        /// Acknowledged once handled
        respond_to: oneshot::Sender<()>,
    },
    /// Request a return to Idle at the next firing
    Stop {
        /// Acknowledged once the request is recorded
        respond_to: oneshot::Sender<()>,
    },
    /// Go Idle and exit the actor
    Shutdown {
        /// Acknowledged before the actor exits
        respond_to: oneshot::Sender<()>,
    },
}

impl PollCommand {
    /// `Start` command and its acknowledgement.
    pub fn start() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Start { respond_to: tx }, rx)
    }

    /// `Stop` command and its acknowledgement.
    pub fn stop() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { respond_to: tx }, rx)
    }

    /// `Shutdown` command and its acknowledgement.
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { respond_to: tx }, rx)
    }
}

/// Spawns poll loop actors.
pub struct PollLoop;

impl PollLoop {
    /// Spawn `task` on the current runtime. The loop starts Idle.
    pub fn spawn<P: PollTask>(task: P, config: PollConfig) -> PollLoopHandle<P::Output> {
        let name = task.name().to_string();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ScanState::Idle);

        let actor = PollActor {
            task,
            config,
            state: ScanState::Idle,
            stop_requested: false,
            deadline: None,
            updates: update_tx.clone(),
            state_tx,
        };
        let join = tokio::spawn(actor.run(command_rx).in_current_span());

        PollLoopHandle {
            name,
            commands: command_tx,
            updates: update_tx,
            state: state_rx,
            join,
        }
    }
}

struct PollActor<P: PollTask> {
    task: P,
    config: PollConfig,
    state: ScanState,
    stop_requested: bool,
    deadline: Option<Instant>,
    updates: broadcast::Sender<P::Output>,
    state_tx: watch::Sender<ScanState>,
}

impl<P: PollTask> PollActor<P> {
    async fn run(mut self, mut inbox: mpsc::Receiver<PollCommand>) {
        debug!(task = self.task.name(), "poll loop started");
        loop {
            let deadline = self.deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                command = inbox.recv() => match command {
                    Some(PollCommand::Start { respond_to }) => {
                        self.start();
                        let _ = respond_to.send(());
                    }
                    Some(PollCommand::Stop { respond_to }) => {
                        if self.state.is_running() {
                            self.stop_requested = true;
                        }
                        let _ = respond_to.send(());
                    }
                    Some(PollCommand::Shutdown { respond_to }) => {
                        self.go_idle().await;
                        let _ = respond_to.send(());
                        break;
                    }
                    None => {
                        self.go_idle().await;
                        break;
                    }
                },
                _ = sleep_until(deadline), if self.deadline.is_some() => {
                    self.fire().await;
                }
            }
        }
        debug!(task = self.task.name(), "poll loop exited");
    }

    fn start(&mut self) {
        self.stop_requested = false;
        if self.state.is_running() {
            return;
        }
        info!(task = self.task.name(), "polling started");
        self.set_state(ScanState::Running);
        self.deadline = Some(Instant::now() + self.config.interval);
    }

    async fn fire(&mut self) {
        self.deadline = None;
        if self.stop_requested {
            self.go_idle().await;
            return;
        }

        match self.task.tick().await {
            Ok(Tick::Continue(output)) => {
                let _ = self.updates.send(output);
                self.deadline = Some(Instant::now() + self.config.interval);
            }
            Ok(Tick::Finished(output)) => {
                let _ = self.updates.send(output);
                self.go_idle().await;
            }
            Err(err) => {
                warn!(
                    task = self.task.name(),
                    error = %err,
                    retry_ms = self.config.recovery_interval.as_millis() as u64,
                    "poll tick failed"
                );
                self.deadline = Some(Instant::now() + self.config.recovery_interval);
            }
        }
    }

    async fn go_idle(&mut self) {
        self.stop_requested = false;
        self.deadline = None;
        if !self.state.is_running() {
            return;
        }
        self.task.on_idle().await;
        self.set_state(ScanState::Idle);
        info!(task = self.task.name(), "polling stopped");
    }

    fn set_state(&mut self, state: ScanState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Handle to a spawned [`PollLoop`].
pub struct PollLoopHandle<T> {
    name: String,
    commands: mpsc::Sender<PollCommand>,
    updates: broadcast::Sender<T>,
    state: watch::Receiver<ScanState>,
    join: JoinHandle<()>,
}

impl<T: Clone + Send + 'static> PollLoopHandle<T> {
    /// Name of the polled task.
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, (command, ack): (PollCommand, oneshot::Receiver<()>)) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("poll loop '{}' has shut down", self.name))?;
        ack.await
            .map_err(|_| anyhow!("poll loop '{}' dropped the command", self.name))
    }

    /// Enter Running; the first tick fires one interval later.
    pub async fn start(&self) -> Result<()> {
        self.send(PollCommand::start()).await
    }

    /// Request a return to Idle.
    ///
    /// Returns once the request is queued; the loop goes Idle at its next firing,
    /// see [`wait_idle`](Self::wait_idle).
    pub async fn stop(&self) -> Result<()> {
        self.send(PollCommand::stop()).await
    }

    /// Current state.
    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    /// `true` while Running.
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Receive every published tick output.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.updates.subscribe()
    }

    /// Observe Idle/Running transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ScanState> {
        self.state.clone()
    }

    /// Wait until the loop is Idle.
    pub async fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.clone();
        let idle = state.wait_for(|state| !state.is_running()).await.map(|_| ());
        idle.map_err(|_| anyhow!("poll loop '{}' has shut down", self.name))
    }

    /// Stop polling and join the actor task.
    pub async fn shutdown(self) -> Result<()> {
        // A failed send means the actor already exited
        let _ = self.send(PollCommand::shutdown()).await;
        self.join
            .await
            .map_err(|e| anyhow!("poll loop '{}' task failed: {}", self.name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    struct FailingTask;

    #[async_trait]
    impl PollTask for FailingTask {
        type Output = ();

        fn name(&self) -> &str {
            "failing"
        }

        async fn tick(&mut self) -> Result<Tick<()>> {
            Err(anyhow!("sensor unplugged"))
        }
    }

    #[test]
    fn test_default_recovery_interval() {
        let config = PollConfig::new(Duration::from_millis(20));
        assert_eq!(config.interval, Duration::from_millis(20));
        assert_eq!(config.recovery_interval, Duration::from_millis(3000));
        assert_eq!(
            config
                .with_recovery_interval(Duration::from_millis(500))
                .recovery_interval,
            Duration::from_millis(500)
        );
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_failed_tick_is_logged_with_retry_delay() {
        let handle = PollLoop::spawn(FailingTask, PollConfig::default());
        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(logs_contain("poll tick failed"));
        assert!(logs_contain("sensor unplugged"));
        assert!(logs_contain("retry_ms=3000"));
        handle.shutdown().await.unwrap();
    }
}
