//! Broker session management
//!
//! [`ConnectionManager`] owns the connection lifecycle. The submodules hold the pure
//! pieces it is built from: the state enum, the reconnect policy, health metrics and
//! observer fan-out.

pub mod health;
pub mod manager;
pub mod observers;
pub mod reconnect;
pub mod state;

pub use health::{ConnectionQuality, HealthMetrics};
pub use manager::ConnectionManager;
pub use observers::{
    ConnectObserver, DisconnectObserver, ErrorObserver, MessageObserver, SessionEvent,
};
pub use reconnect::{should_attempt_reconnection, ReconnectConfig, ReconnectionDecision};
pub use state::{ConnectionState, SessionStatus};
