//! # Scan DAQ
//!
//! Scanning and acquisition core of a confocal instrument. It turns a declarative
//! scan request (axes, ranges, resolution, frequency) into a synchronized sequence
//! of actuator moves and detector reads, and keeps a data buffer that consumers
//! read back as point-in-time snapshots while the scan runs.
//!
//! ## Crate Structure
//!
//! - **`model`**: axis and channel descriptions, scan settings and state.
//! - **`constraints`**: validation of scan settings against the scanner limits.
//! - **`buffer`**: per-channel scan data and its snapshots.
//! - **`executor`**: acquisition of one scan line as moves and integrations.
//! - **`session`**: `ScanSession`, the configure/start/stop/get-data state machine.
//! - **`poll`**: generic periodic polling loop with error backoff.
//! - **`runner`**: poll-driven scan acquisition on top of a session.
//! - **`monitor`**: position and count-rate polling tasks.
//! - **`hardware`**: capability traits (`Actuator`, `Detector`, `ModeController`)
//!   and simulated devices.
//! - **`config`**: Figment-based configuration loading and validation.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: error types.

pub mod buffer;
pub mod config;
pub mod constraints;
pub mod error;
pub mod executor;
pub mod hardware;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod poll;
pub mod runner;
pub mod session;

pub use buffer::{ScanBuffer, ScanBufferSnapshot};
pub use error::{ConstraintError, DeviceError, DeviceErrorKind, ScanError, ScanResult};
pub use executor::{MovePolicy, RasterScanExecutor};
pub use model::{AxisConstraint, AxisPosition, ChannelSpec, ScanConstraints, ScanSettings, ScanState};
pub use poll::{PollConfig, PollLoop, PollLoopHandle, PollTask, Tick};
pub use session::ScanSession;
