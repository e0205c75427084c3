//! Session health metrics
//!
//! Pure functions that turn the manager's timestamps and counters into a health
//! assessment. A telemetry feed counts as stale when nothing has arrived for
//! [`STALE_AFTER`].

use std::time::{Duration, Instant};

/// Time without inbound messages after which a connected session is considered stale
pub const STALE_AFTER: Duration = Duration::from_secs(300);

/// Health metrics for the current session
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMetrics {
    /// Time since the current connection was established
    pub uptime: Option<Duration>,
    /// Time since the last inbound message
    pub time_since_last_message: Option<Duration>,
    /// Successful automatic reconnects over the manager's lifetime
    pub reconnect_count: u32,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub is_healthy: bool,
}

impl HealthMetrics {
    /// Calculate metrics from raw timestamps (pure apart from reading the clock)
    pub fn calculate(
        connected_at: Option<Instant>,
        last_message_at: Option<Instant>,
        reconnect_count: u32,
        messages_sent: u64,
        messages_received: u64,
    ) -> Self {
        let now = Instant::now();
        let uptime = connected_at.map(|t| now.duration_since(t));
        let time_since_last_message = last_message_at.map(|t| now.duration_since(t));

        Self {
            uptime,
            time_since_last_message,
            reconnect_count,
            messages_sent,
            messages_received,
            is_healthy: determine_health_status(uptime, time_since_last_message),
        }
    }

    pub fn quality(&self) -> ConnectionQuality {
        assess_connection_quality(self)
    }
}

/// Connected, and either no messages yet or the last one is recent
fn determine_health_status(
    uptime: Option<Duration>,
    time_since_last_message: Option<Duration>,
) -> bool {
    match (uptime, time_since_last_message) {
        (Some(_), None) => true,
        (Some(_), Some(last_message)) => last_message < STALE_AFTER,
        _ => false,
    }
}

/// Connection quality assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    /// Stable connection, no reconnects, long uptime
    Excellent,
    Good,
    /// Some reconnects, but working
    Fair,
    /// Frequent reconnects
    Poor,
    /// Not connected or stale
    Critical,
}

fn assess_connection_quality(metrics: &HealthMetrics) -> ConnectionQuality {
    if !metrics.is_healthy {
        return ConnectionQuality::Critical;
    }

    match (metrics.reconnect_count, metrics.uptime) {
        (0, Some(uptime)) if uptime > Duration::from_secs(3600) => ConnectionQuality::Excellent,
        (0, Some(_)) => ConnectionQuality::Good,
        (1..=2, Some(uptime)) if uptime > Duration::from_secs(1800) => ConnectionQuality::Good,
        (1..=2, Some(_)) => ConnectionQuality::Fair,
        (3..=5, _) => ConnectionQuality::Fair,
        (6..=10, _) => ConnectionQuality::Poor,
        _ => ConnectionQuality::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(uptime_secs: u64, reconnects: u32) -> HealthMetrics {
        HealthMetrics {
            uptime: Some(Duration::from_secs(uptime_secs)),
            time_since_last_message: Some(Duration::from_secs(5)),
            reconnect_count: reconnects,
            messages_sent: 0,
            messages_received: 0,
            is_healthy: true,
        }
    }

    #[test]
    fn test_calculate_metrics() {
        let now = Instant::now();
        let metrics = HealthMetrics::calculate(
            Some(now - Duration::from_secs(3600)),
            Some(now - Duration::from_secs(60)),
            2,
            7,
            40,
        );

        assert!(metrics.uptime.unwrap() >= Duration::from_secs(3600));
        assert!(metrics.time_since_last_message.is_some());
        assert_eq!(metrics.reconnect_count, 2);
        assert_eq!(metrics.messages_sent, 7);
        assert_eq!(metrics.messages_received, 40);
        assert!(metrics.is_healthy);
    }

    #[test]
    fn test_determine_health_status() {
        let uptime = Some(Duration::from_secs(3600));

        assert!(determine_health_status(uptime, Some(Duration::from_secs(60))));
        assert!(determine_health_status(uptime, None));
        assert!(!determine_health_status(uptime, Some(Duration::from_secs(400))));
        assert!(!determine_health_status(None, None));
    }

    #[test]
    fn test_assess_connection_quality() {
        assert_eq!(metrics(7200, 0).quality(), ConnectionQuality::Excellent);
        assert_eq!(metrics(1800, 0).quality(), ConnectionQuality::Good);
        assert_eq!(metrics(3600, 2).quality(), ConnectionQuality::Good);
        assert_eq!(metrics(600, 2).quality(), ConnectionQuality::Fair);
        assert_eq!(metrics(600, 4).quality(), ConnectionQuality::Fair);
        assert_eq!(metrics(600, 8).quality(), ConnectionQuality::Poor);
        assert_eq!(metrics(600, 20).quality(), ConnectionQuality::Critical);

        let disconnected = HealthMetrics::calculate(None, None, 0, 0, 0);
        assert_eq!(disconnected.quality(), ConnectionQuality::Critical);
    }
}
