//! Pure connection state and status snapshots

use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Connection state of the managed session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No live session; initial state
    #[default]
    Disconnected,
    /// Connect attempt in flight
    Connecting,
    /// Connected and ready for operations
    Connected,
    /// Connection lost; waiting for the reconnect delay
    Reconnecting,
}

impl ConnectionState {
    /// Publish, subscribe and unsubscribe are only valid while connected
    pub fn accepts_operations(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
        };
        f.write_str(name)
    }
}

/// Read-only snapshot returned by `ConnectionManager::status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub client_id: String,
    pub broker: String,
    pub port: u16,
    pub secure: bool,
}

/// Log a connection state transition
pub fn log_state_transition(client_id: &str, from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Disconnected, ConnectionState::Connecting) => {
            info!(client_id, "Connecting to broker");
        }
        (ConnectionState::Reconnecting, ConnectionState::Connecting) => {
            info!(client_id, "Issuing reconnect attempt");
        }
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!(client_id, "Connected to broker");
        }
        (ConnectionState::Connecting, ConnectionState::Disconnected) => {
            warn!(client_id, "Connect attempt ended without a connection");
        }
        (ConnectionState::Connected, ConnectionState::Reconnecting) => {
            warn!(client_id, "Connection lost, reconnect scheduled");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            info!(client_id, "Disconnected from broker");
        }
        _ => {
            info!(client_id, "Connection state: {} -> {}", from, to);
        }
    }
}
