//! Transport capability consumed by the session manager
//!
//! The manager never talks to a protocol library directly. It asks a [`TransportConnector`]
//! to open a connection and gets back a [`TransportHandle`] for outbound requests; everything
//! the transport observes (connect outcome, loss, inbound messages) arrives through the
//! [`EventSink`] handed to `open`. This enables dependency injection and testing with
//! [`crate::testing::MockConnector`].

use crate::config::{Credentials, Endpoint};
use chrono::{DateTime, Utc};
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

/// Everything a transport needs to construct and connect one session
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub endpoint: Endpoint,
    pub client_id: String,
    pub timeout: Duration,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub credentials: Option<Credentials>,
}

/// Message handed to the transport for publishing
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub destination: String,
    pub payload: String,
    pub qos: QoS,
    pub retained: bool,
}

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub destination: String,
    /// Payload decoded as UTF-8 (lossy)
    pub payload: String,
    pub qos: QoS,
    pub retained: bool,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(destination: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retained: false,
            received_at: Utc::now(),
        }
    }
}

/// Reason reported with an unsolicited connection loss
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLoss {
    /// 0 for a normal close, non-zero for an error
    pub code: i32,
    pub message: String,
}

impl ConnectionLoss {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_normal_close(&self) -> bool {
        self.code == 0
    }
}

impl std::fmt::Display for ConnectionLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Events a transport reports back to the manager
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the connection
    ConnectSucceeded,
    /// Connect attempt was rejected or timed out
    ConnectFailed(TransportError),
    /// Established connection dropped without a local disconnect
    ConnectionLost(ConnectionLoss),
    /// Message arrived on a subscribed topic
    MessageArrived(InboundMessage),
}

/// Callback the transport invokes for every [`TransportEvent`]
///
/// Implementations must never call it synchronously from inside
/// [`TransportConnector::open`].
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Transport-level errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("Connect timed out after {0}s")]
    Timeout(u64),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request rejected: {0}")]
    RequestRejected(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Factory for transport sessions
pub trait TransportConnector: Send + Sync {
    /// Construct a transport for `request` and start connecting
    ///
    /// The outcome is reported later through `events`. An `Err` here means the transport
    /// could not even be constructed.
    fn open(
        &self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError>;
}

/// Outbound side of one transport session
///
/// All methods issue the request and return immediately.
pub trait TransportHandle: Send {
    fn disconnect(&mut self) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn send(&mut self, message: OutboundMessage) -> Result<(), TransportError>;
}

/// Map a numeric QoS level (0, 1, 2) to [`QoS`]
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Numeric level of a [`QoS`]
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}
