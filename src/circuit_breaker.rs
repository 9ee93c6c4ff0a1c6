//! # Circuit Breaker Module
//!
//! This module implements the circuit breaker pattern for branch ledger
//! lookups. A branch whose database fails repeatedly is skipped for a
//! cool-down period instead of slowing every scan with doomed connections.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ocr_config::RecoveryConfig;

/// Circuit breaker guarding calls to one external dependency
///
/// Opens after `circuit_breaker_threshold` consecutive failures and
/// automatically resets `circuit_breaker_reset_secs` after the last failure,
/// letting the next request test whether the dependency recovered.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_count: Mutex<u32>,
    last_failure_time: Mutex<Option<Instant>>,
    config: RecoveryConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            failure_count: Mutex::new(0),
            last_failure_time: Mutex::new(None),
            config,
        }
    }

    /// Check if circuit breaker is open (blocking requests)
    ///
    /// Returns `true` when the failure count has reached the threshold and
    /// the reset timeout has not yet elapsed. Once the timeout elapses the
    /// counters are cleared and requests flow again.
    pub fn is_open(&self) -> bool {
        let failure_count = *self
            .failure_count
            .lock()
            .expect("Failed to acquire failure count lock");
        let last_failure = *self
            .last_failure_time
            .lock()
            .expect("Failed to acquire last failure time lock");

        if failure_count >= self.config.circuit_breaker_threshold {
            if let Some(last_time) = last_failure {
                let elapsed = last_time.elapsed();
                if elapsed < Duration::from_secs(self.config.circuit_breaker_reset_secs) {
                    return true; // Circuit is still open
                }
                // Reset circuit breaker
                *self
                    .failure_count
                    .lock()
                    .expect("Failed to acquire failure count lock") = 0;
                *self
                    .last_failure_time
                    .lock()
                    .expect("Failed to acquire last failure time lock") = None;
            }
        }
        false
    }

    /// Record a failure to increment the failure counter
    pub fn record_failure(&self) {
        *self
            .failure_count
            .lock()
            .expect("Failed to acquire failure count lock") += 1;
        *self
            .last_failure_time
            .lock()
            .expect("Failed to acquire last failure time lock") = Some(Instant::now());
    }

    /// Record a success to reset the failure counter
    pub fn record_success(&self) {
        *self
            .failure_count
            .lock()
            .expect("Failed to acquire failure count lock") = 0;
        *self
            .last_failure_time
            .lock()
            .expect("Failed to acquire last failure time lock") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, reset_secs: u64) -> RecoveryConfig {
        RecoveryConfig {
            operation_timeout_secs: 30,
            circuit_breaker_threshold: threshold,
            circuit_breaker_reset_secs: reset_secs,
        }
    }

    #[test]
    fn test_closed_until_threshold() {
        let breaker = CircuitBreaker::new(config(3, 60));
        assert!(!breaker.is_open());
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_resets_counter() {
        let breaker = CircuitBreaker::new(config(2, 60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }
}
