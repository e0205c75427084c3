//! Sensor Link - browser-style MQTT session manager for IoT dashboards
//!
//! Maintains one MQTT 3.1.1 session over WebSocket (`ws://` or `wss://`) to a public or
//! private broker on behalf of a host application, with topics namespaced by a
//! per-device prefix.
//!
//! # Overview
//!
//! - [`config`]: layered configuration (defaults, TOML file, `SENSOR_LINK_*` environment)
//!   resolved into an immutable [`SessionConfig`]
//! - [`session`]: the [`ConnectionManager`] state machine with automatic reconnection
//! - [`transport`]: the transport capability and its rumqttc WebSocket implementation
//! - [`observability`]: tracing subscriber setup
//! - [`testing`]: a mock transport for driving the manager without a broker
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sensor_link::{ConnectionManager, Settings, TopicPurpose};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut settings = Settings::default();
//! settings.session.namespace_prefix = "X1".to_string();
//! let config = settings.resolve()?;
//! let led_topic = config.topics.get(TopicPurpose::Led).to_string();
//!
//! let manager = ConnectionManager::websocket(config);
//! manager.on_message(|message| println!("{} -> {}", message.destination, message.payload));
//! manager.connect().await?;
//! manager.subscribe("X1/suhu")?;
//! manager.publish(&led_topic, "ON")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{
    ConfigError, Credentials, Endpoint, SessionConfig, Settings, TopicPurpose, TopicSet,
};
pub use error::{Operation, SessionError, SessionResult};
pub use session::{
    ConnectionManager, ConnectionState, HealthMetrics, ReconnectConfig, SessionEvent,
    SessionStatus,
};
pub use transport::mqtt::MqttWsConnector;
pub use transport::{
    ConnectionLoss, InboundMessage, OutboundMessage, TransportConnector, TransportError,
    TransportEvent, TransportHandle,
};

pub use rumqttc::QoS;
