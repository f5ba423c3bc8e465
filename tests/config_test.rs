//! Loading and validation of the scanner configuration file.

use scan_daq::config::ScannerConfig;
use scan_daq::error::ScanError;
use scan_daq::logging::LogFormat;
use scan_daq::model::ChannelSource;
use scan_daq::MovePolicy;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const MINIMAL: &str = r#"
[application]
name = "bench scanner"
log_level = "debug"

[scanner]
move_policy = "all_blocking"

[[scanner.axes]]
name = "x"
position_range = [0.0, 2e-5]
resolution_range = [2, 200]
frequency_range = [1.0, 250.0]

[[scanner.channels]]
name = "APD1"
source = { detector = 0 }

[[scanner.channels]]
name = "sum"
source = "sum"
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_minimal_file_fills_defaults() {
    let file = write_config(MINIMAL);
    let config = ScannerConfig::load_validated(file.path()).unwrap();

    assert_eq!(config.application.name, "bench scanner");
    assert_eq!(config.application.log_format, LogFormat::Pretty);
    assert_eq!(config.polling.query_interval_ms, 100);
    assert_eq!(config.polling.recovery_interval_ms, 3000);
    assert_eq!(config.scanner.move_policy, MovePolicy::AllBlocking);
    assert_eq!(config.scanner.axes[0].unit, "m");
    assert_eq!(config.scanner.channels[1].source, ChannelSource::Sum);

    let constraints = config.constraints();
    let x = constraints.axis("x").unwrap();
    assert_eq!(x.value_range, (0.0, 2e-5));
    assert_eq!(x.frequency_range, (1.0, 250.0));
    assert_eq!(
        constraints.channel_names().collect::<Vec<_>>(),
        vec!["APD1", "sum"]
    );
    assert_eq!(config.detector_inputs(), 1);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(MINIMAL);
    std::env::set_var("SCAN_DAQ_APPLICATION__LOG_LEVEL", "warn");
    std::env::set_var("SCAN_DAQ_POLLING__QUERY_INTERVAL_MS", "50");

    let result = ScannerConfig::load_from(file.path());

    std::env::remove_var("SCAN_DAQ_APPLICATION__LOG_LEVEL");
    std::env::remove_var("SCAN_DAQ_POLLING__QUERY_INTERVAL_MS");

    let config = result.unwrap();
    assert_eq!(config.application.log_level, "warn");
    assert_eq!(config.polling.query_poll().interval, Duration::from_millis(50));
    assert_eq!(
        config.polling.query_poll().recovery_interval,
        Duration::from_millis(3000)
    );
}

#[test]
#[serial]
fn test_invalid_values_rejected_on_load() {
    let file = write_config(&MINIMAL.replace("frequency_range = [1.0, 250.0]", "frequency_range = [0.0, 250.0]"));
    match ScannerConfig::load_validated(file.path()) {
        Err(ScanError::Configuration(msg)) => assert!(msg.contains("frequency_range")),
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_malformed_file_is_config_error() {
    let file = write_config("[application]\nname = 3\n");
    assert!(matches!(
        ScannerConfig::load_validated(file.path()),
        Err(ScanError::Config(_))
    ));
}

#[test]
#[serial]
fn test_default_config_round_trips_through_file() {
    let rendered = ScannerConfig::default().to_toml_string().unwrap();
    let file = write_config(&rendered);

    let loaded = ScannerConfig::load_validated(file.path()).unwrap();
    assert_eq!(loaded, ScannerConfig::default());
}

#[test]
#[serial]
fn test_shipped_config_matches_defaults() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/scanner.toml");
    let loaded = ScannerConfig::load_validated(path).unwrap();
    assert_eq!(loaded.constraints(), ScannerConfig::default().constraints());
    assert_eq!(loaded.polling, ScannerConfig::default().polling);
}
