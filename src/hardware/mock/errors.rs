//! Error injection for simulated devices.
//!
//! Lets tests make a mock fail on a given call, after a number of calls, at random,
//! or permanently, and check that the scanning core degrades gracefully.

use crate::error::{DeviceError, DeviceErrorKind};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration shared by all clones of a mock device.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0), `"*"` matches every operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<Mutex<StdRng>>,
    state: Arc<Mutex<ErrorState>>,
}

/// Deterministic failure pattern.
///
/// `operation` is one of `"move"`, `"position"`, `"calibrate"`, `"integrate"`,
/// `"scanning_mode"` or `"idle_mode"`.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail every call after `count` successful ones
    FailAfterN {
        /// Operation to fail
        operation: &'static str,
        /// Successful calls before the first failure
        count: u32,
    },
    /// Fail only the `call`-th invocation (1-based)
    FailOnCall {
        /// Operation to fail
        operation: &'static str,
        /// 1-based call number
        call: u32,
    },
    /// Fail every invocation
    Always {
        /// Operation to fail
        operation: &'static str,
    },
    /// Report a timeout on every invocation
    Timeout {
        /// Operation to time out
        operation: &'static str,
    },
    /// Every operation fails once this triggers on the first call
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
}

fn kind_for(operation: &str) -> DeviceErrorKind {
    match operation {
        "move" => DeviceErrorKind::Move,
        "integrate" | "position" => DeviceErrorKind::Read,
        "calibrate" => DeviceErrorKind::Calibration,
        _ => DeviceErrorKind::Unknown,
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl ErrorConfig {
    fn build(rates: HashMap<&'static str, f64>, scenarios: Vec<ErrorScenario>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(Mutex::new(rng)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// No injected errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation, reproducible with `seed`.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// A single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, any matching one fails the call.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Number of times `operation` has been checked so far.
    pub fn call_count(&self, operation: &str) -> u32 {
        self.state
            .lock()
            .operation_counts
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Count one call of `operation` and decide whether it fails.
    pub fn check_operation(&self, device: &str, operation: &'static str) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let call = {
            let count = state.operation_counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };
        let kind = kind_for(operation);

        if state.communication_lost {
            return Err(DeviceError::new(
                device,
                DeviceErrorKind::Communication,
                "Communication lost",
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN { operation: op, count } if *op == operation => {
                    if call > *count {
                        return Err(DeviceError::new(
                            device,
                            kind,
                            format!("Injected failure after {} operations", count),
                        ));
                    }
                }
                ErrorScenario::FailOnCall { operation: op, call: n } if *op == operation => {
                    if call == *n {
                        return Err(DeviceError::new(
                            device,
                            kind,
                            format!("Injected failure on call {}", n),
                        ));
                    }
                }
                ErrorScenario::Always { operation: op } if *op == operation => {
                    return Err(DeviceError::new(device, kind, "Injected failure"));
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DeviceError::new(
                        device,
                        DeviceErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DeviceError::new(
                        device,
                        DeviceErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                _ => {}
            }
        }
        drop(state);

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if rate > 0.0 && (rate >= 1.0 || self.rng.lock().gen::<f64>() < rate) {
            return Err(DeviceError::new(
                device,
                kind,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors_by_default() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("mock", "move").is_ok());
        }
        assert_eq!(config.call_count("move"), 100);
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "move",
            count: 2,
        });
        assert!(config.check_operation("mock", "move").is_ok());
        assert!(config.check_operation("mock", "move").is_ok());
        let err = config.check_operation("mock", "move").unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::Move);
        // Other operations are unaffected
        assert!(config.check_operation("mock", "integrate").is_ok());
    }

    #[test]
    fn test_fail_on_single_call() {
        let config = ErrorConfig::scenario(ErrorScenario::FailOnCall {
            operation: "integrate",
            call: 2,
        });
        assert!(config.check_operation("mock", "integrate").is_ok());
        assert!(config.check_operation("mock", "integrate").is_err());
        assert!(config.check_operation("mock", "integrate").is_ok());
    }

    #[test]
    fn test_communication_loss_is_permanent() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        let first = config.check_operation("mock", "move").unwrap_err();
        assert_eq!(first.kind, DeviceErrorKind::Communication);
        let second = config.check_operation("mock", "position").unwrap_err();
        assert_eq!(second.kind, DeviceErrorKind::Communication);
    }

    #[test]
    fn test_seeded_random_failures_are_reproducible() {
        let outcomes = |seed| {
            let config = ErrorConfig::random_failures_seeded(0.5, Some(seed));
            (0..50)
                .map(|_| config.check_operation("mock", "move").is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(outcomes(7), outcomes(7));
        assert!(outcomes(7).iter().any(|ok| !ok));
    }
}
