//! Testing utilities and mock implementations
//!
//! Lets the session manager be exercised without a running broker.

pub mod mocks;

pub use mocks::*;

use crate::config::{Endpoint, SessionConfig, TopicSet, MQTT_PATH};
use crate::session::ReconnectConfig;
use rumqttc::QoS;
use std::time::Duration;

/// Session configuration for tests: plain `ws://localhost:8083/mqtt`, prefix `X1`,
/// fixed client id, auto-reconnect every 5 seconds
pub fn test_session_config() -> SessionConfig {
    SessionConfig {
        endpoint: Endpoint {
            secure: false,
            host: "localhost".to_string(),
            port: 8083,
            path: MQTT_PATH.to_string(),
        },
        client_id: "web_X1_test0001".to_string(),
        namespace_prefix: "X1".to_string(),
        topics: TopicSet::from_prefix("X1"),
        qos: QoS::AtMostOnce,
        keep_alive: Duration::from_secs(60),
        connect_timeout: Duration::from_secs(10),
        clean_session: true,
        auto_reconnect: true,
        reconnect: ReconnectConfig::fixed(5000),
        resubscribe_on_reconnect: true,
        credentials: None,
    }
}
