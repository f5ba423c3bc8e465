//! Global subscriber installation.
//!
//! Kept in its own test binary: once the global subscriber is set it stays set for
//! the whole process.

use scan_daq::config::ScannerConfig;
use scan_daq::logging::{self, LogFormat, LoggingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let config = LoggingConfig::new(Level::WARN).with_format(LogFormat::Compact);
    assert!(logging::init(config.clone()).is_ok());
    assert!(logging::init(config).is_ok());

    // A later init with another format is accepted and leaves the first in place
    let json = LoggingConfig::new(Level::DEBUG).with_format(LogFormat::Json);
    assert!(logging::init(json).is_ok());
    tracing::warn!("logging installed");
}

#[test]
fn test_init_from_config_rejects_bad_level() {
    let mut config = ScannerConfig::default();
    config.application.log_level = "loud".to_string();
    let err = logging::init_from_config(&config).unwrap_err();
    assert!(err.contains("Invalid log level 'loud'"));
}
