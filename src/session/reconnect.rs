//! Reconnection policy and decision logic
//!
//! The default policy waits a fixed delay and retries until the session is explicitly
//! disconnected. A backoff pattern and an attempt cap can be configured without changing
//! the state machine.

use std::time::Duration;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before each attempt, or once the backoff pattern is exhausted
    pub delay_ms: u64,
    /// Maximum number of consecutive attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Escalating delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Schedule another attempt when an automatic attempt fails to connect
    pub retry_failed_attempts: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 5000,
            max_attempts: None,
            backoff_pattern: Vec::new(),
            retry_failed_attempts: true,
        }
    }
}

impl ReconnectConfig {
    /// Fixed delay, unlimited retries
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Default::default()
        }
    }

    /// Delay for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.delay_ms)
    }

    /// Total waiting time across all attempts, None when unlimited
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts
            .map(|max_attempts| (1..=max_attempts).map(|n| self.calculate_backoff_delay(n)).sum())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
        }

        if self.delay_ms == 0 {
            return Err("reconnect delay_ms must be greater than 0".to_string());
        }

        if self.backoff_pattern.iter().any(|&delay| delay == 0) {
            return Err("backoff pattern delays must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Wait `delay`, then issue attempt number `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// Attempt cap reached; stay disconnected
    AbortMaxAttemptsExceeded { max_attempts: u32 },
}

/// Decide whether another attempt should be made after `current_attempts` attempts
pub fn should_attempt_reconnection(
    current_attempts: u32,
    config: &ReconnectConfig,
) -> ReconnectionDecision {
    if let Some(max_attempts) = config.max_attempts {
        if current_attempts >= max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts };
        }
    }

    let attempt = current_attempts.saturating_add(1);
    ReconnectionDecision::Proceed {
        attempt,
        delay: Duration::from_millis(config.calculate_backoff_delay(attempt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_ms, 5000);
        assert_eq!(config.max_attempts, None);
        assert!(config.backoff_pattern.is_empty());
        assert!(config.retry_failed_attempts);
    }

    #[test]
    fn test_fixed_delay_never_changes() {
        let config = ReconnectConfig::fixed(5000);
        assert_eq!(config.calculate_backoff_delay(1), 5000);
        assert_eq!(config.calculate_backoff_delay(2), 5000);
        assert_eq!(config.calculate_backoff_delay(100), 5000);
    }

    #[test]
    fn test_backoff_pattern_then_sustained_delay() {
        let config = ReconnectConfig {
            delay_ms: 250,
            backoff_pattern: vec![25, 50, 100],
            ..Default::default()
        };

        assert_eq!(config.calculate_backoff_delay(1), 25);
        assert_eq!(config.calculate_backoff_delay(2), 50);
        assert_eq!(config.calculate_backoff_delay(3), 100);
        assert_eq!(config.calculate_backoff_delay(4), 250);
        assert_eq!(config.calculate_backoff_delay(10), 250);
    }

    #[test]
    fn test_calculate_max_total_time() {
        let limited = ReconnectConfig {
            delay_ms: 250,
            max_attempts: Some(4),
            backoff_pattern: vec![25, 50],
            retry_failed_attempts: true,
        };
        assert_eq!(limited.calculate_max_total_time(), Some(25 + 50 + 250 + 250));

        assert_eq!(ReconnectConfig::default().calculate_max_total_time(), None);
    }

    #[test]
    fn test_unlimited_attempts_always_proceed() {
        let config = ReconnectConfig::fixed(5000);

        for current in [0, 1, 10, 10_000] {
            assert_eq!(
                should_attempt_reconnection(current, &config),
                ReconnectionDecision::Proceed {
                    attempt: current + 1,
                    delay: Duration::from_millis(5000),
                }
            );
        }
    }

    #[test]
    fn test_unlimited_attempt_counter_saturates() {
        let config = ReconnectConfig::fixed(5000);

        assert_eq!(
            should_attempt_reconnection(u32::MAX, &config),
            ReconnectionDecision::Proceed {
                attempt: u32::MAX,
                delay: Duration::from_millis(5000),
            }
        );
    }

    #[test]
    fn test_attempt_cap() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            ..ReconnectConfig::fixed(100)
        };

        assert!(matches!(
            should_attempt_reconnection(2, &config),
            ReconnectionDecision::Proceed { attempt: 3, .. }
        ));
        assert_eq!(
            should_attempt_reconnection(3, &config),
            ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts: 3 }
        );
    }

    #[test]
    fn test_validate() {
        assert!(ReconnectConfig::default().validate().is_ok());

        let zero_attempts = ReconnectConfig {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(zero_attempts.validate().is_err());

        assert!(ReconnectConfig::fixed(0).validate().is_err());

        let zero_in_pattern = ReconnectConfig {
            backoff_pattern: vec![25, 0],
            ..Default::default()
        };
        assert!(zero_in_pattern.validate().is_err());
    }
}
