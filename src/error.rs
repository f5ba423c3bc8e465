//! Custom error types for the scanning core.
//!
//! Using the `thiserror` crate, this module gives the crate a centralized and consistent
//! way to report what went wrong, from a malformed scan request to a stage that refused
//! to move.
//!
//! ## Error Hierarchy
//!
//! - **`ConstraintError`**: the caller asked for something the scanner cannot do (unknown
//!   axis, range outside the travel, resolution or frequency out of bounds). Always
//!   recoverable by correcting the request.
//! - **`DeviceError`**: a hardware collaborator (actuator, detector, mode controller)
//!   failed. Carries the device name and a [`DeviceErrorKind`] category.
//! - **`ScanError`**: the error returned by the scan session API. Wraps the two types
//!   above and adds lifecycle conflicts (`ScanInProgress`, `NotConfigured`) and
//!   configuration-file failures.
//!
//! By using `#[from]`, `ScanError` can be created from the underlying error types with
//! the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the session error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

// =============================================================================
// Constraint Errors
// =============================================================================

/// A scan request violated the scanner's declared constraints.
///
/// Each variant names the offending axis and the bound that was violated so the
/// caller can report a precise message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstraintError {
    /// The requested axis is not part of the constraint set.
    #[error("Unknown scan axis '{axis}'")]
    UnknownAxis {
        /// Requested axis name
        axis: String,
    },

    /// Axis, range and resolution lists have different lengths.
    #[error(
        "\"axes\", \"range\" and \"resolution\" must have same length (got {axes}, {ranges}, {resolutions})"
    )]
    ArityMismatch {
        /// Number of axes
        axes: usize,
        /// Number of ranges
        ranges: usize,
        /// Number of resolutions
        resolutions: usize,
    },

    /// Only 1-D and 2-D scans over distinct axes are supported.
    #[error("Scan must use 1 or 2 distinct axes, got {axes:?}")]
    InvalidDimension {
        /// Requested axes
        axes: Vec<String>,
    },

    /// Requested range leaves the axis travel.
    #[error(
        "Scan range ({:.3e}, {:.3e}) out of bounds for axis '{axis}'. Maximum possible range is ({:.3e}, {:.3e})",
        .requested.0, .requested.1, .allowed.0, .allowed.1
    )]
    RangeOutOfBounds {
        /// Offending axis
        axis: String,
        /// Requested `(start, end)`
        requested: (f64, f64),
        /// Axis travel
        allowed: (f64, f64),
    },

    /// Requested sample count is outside the axis resolution range.
    #[error(
        "Scan resolution {requested} out of bounds for axis '{axis}'. Allowed range is ({}, {})",
        .allowed.0, .allowed.1
    )]
    ResolutionOutOfBounds {
        /// Offending axis
        axis: String,
        /// Requested sample count
        requested: usize,
        /// Axis resolution range
        allowed: (usize, usize),
    },

    /// Requested frequency is outside the fast axis frequency range.
    #[error(
        "Scan frequency {requested} Hz out of bounds for fast axis '{axis}'. Allowed range is ({}, {}) Hz",
        .allowed.0, .allowed.1
    )]
    FrequencyOutOfBounds {
        /// Fast axis
        axis: String,
        /// Requested frequency in Hz
        requested: f64,
        /// Fast axis frequency range
        allowed: (f64, f64),
    },

    /// A direct move targeted a position outside the axis travel.
    #[error(
        "Position {requested:.3e} out of bounds for axis '{axis}'. Allowed range is ({:.3e}, {:.3e})",
        .allowed.0, .allowed.1
    )]
    PositionOutOfBounds {
        /// Offending axis
        axis: String,
        /// Requested coordinate
        requested: f64,
        /// Axis travel
        allowed: (f64, f64),
    },
}

// =============================================================================
// Device Errors
// =============================================================================

/// Category of a hardware failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// Actuator move rejected or failed
    Move,
    /// Position or detector read failed
    Read,
    /// Homing or calibration failed
    Calibration,
    /// Link to the device lost
    Communication,
    /// Device did not answer in time
    Timeout,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceErrorKind::Move => "move",
            DeviceErrorKind::Read => "read",
            DeviceErrorKind::Calibration => "calibration",
            DeviceErrorKind::Communication => "communication",
            DeviceErrorKind::Timeout => "timeout",
            DeviceErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Hardware failure surfaced by an actuator, detector or mode controller.
#[derive(Error, Debug, Clone)]
#[error("Device '{device}' {kind} error: {message}")]
pub struct DeviceError {
    /// Name of the failing device
    pub device: String,
    /// Failure category
    pub kind: DeviceErrorKind,
    /// Device-specific detail
    pub message: String,
}

impl DeviceError {
    /// Error of `kind` raised by `device`.
    pub fn new(device: impl Into<String>, kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }

    /// Wrap an `anyhow` error returned across a capability trait.
    pub fn from_anyhow(device: impl Into<String>, kind: DeviceErrorKind, err: &anyhow::Error) -> Self {
        Self::new(device, kind, format!("{:#}", err))
    }
}

// =============================================================================
// Session Errors
// =============================================================================

/// Primary error type of the scan session API.
///
/// # Error Categories
///
/// 1. **Caller misconfiguration** - `Constraint`, `Configuration`, `Config`
///    - Recovery: correct the request or the configuration file
///
/// 2. **Lifecycle conflicts** - `ScanInProgress`, `NotConfigured`
///    - Recovery: stop the running scan, or call `configure_scan` first
///
/// 3. **Hardware failures** - `Device`
///    - Returned only where the operation cannot proceed (e.g. calibration at
///      scan start). Failures during a running scan are logged instead.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The scan request violated the constraint set.
    #[error("Invalid scan settings: {0}")]
    Constraint(#[from] ConstraintError),

    /// A conflicting operation was attempted while a scan is running.
    #[error("Scan in progress. Stop scanning and try again")]
    ScanInProgress,

    /// `start_scan` was called before any successful `configure_scan`.
    #[error("Scan is not configured, call configure_scan first")]
    NotConfigured,

    /// A hardware collaborator failed.
    #[error("{0}")]
    Device(#[from] DeviceError),

    /// Configuration file could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Config(Box::new(err))
    }
}
