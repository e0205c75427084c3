//! Event loop driver for one MQTT-over-WebSocket session
//!
//! Routing of rumqttc events is pure and tested on its own. The driver runs in two
//! phases: wait for the broker's ConnAck within the connect timeout, then forward
//! messages until the connection ends. It never polls past the first loss, so rumqttc
//! does not reconnect behind the manager's back.

use crate::transport::{
    ConnectionLoss, EventSink, InboundMessage, TransportError, TransportEvent,
};
use chrono::Utc;
use rumqttc::{ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How long a local disconnect may take to flush before the socket is dropped
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Loss code reported when the broker closes the session
pub const LOSS_CLOSED_BY_BROKER: i32 = 1;
/// Loss code reported for network and protocol errors
pub const LOSS_NETWORK_ERROR: i32 = 2;

/// Routing decision for a rumqttc event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAccepted,
    ConnectionRefused(String),
    MessageReceived(InboundMessage),
    ClosedByBroker,
    LocalDisconnectSent,
    /// Pings, acks and other protocol traffic
    Infrastructure,
}

/// Route a rumqttc event (pure)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => match ack.code {
            ConnectReturnCode::Success => EventRoute::ConnectionAccepted,
            code => EventRoute::ConnectionRefused(format!("{code:?}")),
        },
        Event::Incoming(Packet::Publish(publish)) => {
            EventRoute::MessageReceived(InboundMessage {
                destination: publish.topic.clone(),
                payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                qos: publish.qos,
                retained: publish.retain,
                received_at: Utc::now(),
            })
        }
        Event::Incoming(Packet::Disconnect) => EventRoute::ClosedByBroker,
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::LocalDisconnectSent,
        _ => EventRoute::Infrastructure,
    }
}

/// Map a connection error seen before ConnAck to a transport error
pub fn connect_error(error: &ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => {
            TransportError::ConnectionRefused(format!("{code:?}"))
        }
        other => TransportError::Network(other.to_string()),
    }
}

/// Drive `event_loop` until the session ends or `shutdown` is signalled
pub async fn run_event_loop(
    mut event_loop: EventLoop,
    events: EventSink,
    connect_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let handshake = tokio::time::timeout(connect_timeout, async {
        loop {
            match event_loop.poll().await {
                Ok(event) => match route_event(&event) {
                    EventRoute::ConnectionAccepted => return Ok(()),
                    EventRoute::ConnectionRefused(reason) => {
                        return Err(TransportError::ConnectionRefused(reason))
                    }
                    _ => continue,
                },
                Err(e) => return Err(connect_error(&e)),
            }
        }
    });

    let outcome = tokio::select! {
        _ = shutdown.changed() => {
            debug!("Connect attempt abandoned before ConnAck");
            return;
        }
        outcome = handshake => outcome,
    };

    match outcome {
        Ok(Ok(())) => {
            info!("ConnAck received");
            events(TransportEvent::ConnectSucceeded);
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Connect attempt failed");
            events(TransportEvent::ConnectFailed(e));
            return;
        }
        Err(_) => {
            warn!(
                timeout_secs = connect_timeout.as_secs(),
                "ConnAck timeout - no connection confirmation received"
            );
            events(TransportEvent::ConnectFailed(TransportError::Timeout(
                connect_timeout.as_secs(),
            )));
            return;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                flush_disconnect(&mut event_loop).await;
                return;
            }
            result = event_loop.poll() => match result {
                Ok(event) => match route_event(&event) {
                    EventRoute::MessageReceived(message) => {
                        events(TransportEvent::MessageArrived(message));
                    }
                    EventRoute::ClosedByBroker => {
                        events(TransportEvent::ConnectionLost(ConnectionLoss::new(
                            LOSS_CLOSED_BY_BROKER,
                            "Connection closed by broker",
                        )));
                        return;
                    }
                    EventRoute::LocalDisconnectSent => return,
                    _ => {}
                },
                Err(e) => {
                    events(TransportEvent::ConnectionLost(ConnectionLoss::new(
                        LOSS_NETWORK_ERROR,
                        e.to_string(),
                    )));
                    return;
                }
            }
        }
    }
}

/// Keep polling until the queued DISCONNECT is written, without reporting anything
async fn flush_disconnect(event_loop: &mut EventLoop) {
    let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if flushed.is_err() {
        debug!("Disconnect not flushed within grace period, dropping socket");
    }
}
