//! MQTT 3.1.1 over WebSocket transport built on rumqttc
//!
//! Each `open` creates a fresh client/event-loop pair and spawns a task that drives it.
//! The returned handle queues requests on the client without waiting for the network.

pub mod event_loop;
pub mod options;

pub use event_loop::{route_event, run_event_loop, EventRoute};
pub use options::{configure_mqtt_options, REQUEST_CHANNEL_CAPACITY};

use crate::mqtt_span;
use crate::transport::{
    ConnectRequest, EventSink, OutboundMessage, TransportConnector, TransportError,
    TransportHandle,
};
use rumqttc::{AsyncClient, ClientError, QoS};
use tokio::sync::watch;
use tracing::{debug, Instrument};

/// Connector producing rumqttc WebSocket sessions
#[derive(Debug, Clone, Default)]
pub struct MqttWsConnector;

impl MqttWsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl TransportConnector for MqttWsConnector {
    fn open(
        &self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            TransportError::Network("no Tokio runtime available for the event loop".to_string())
        })?;

        let options = configure_mqtt_options(&request);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let span = mqtt_span!(client_id = %request.client_id, url = %request.endpoint);
        runtime.spawn(
            run_event_loop(event_loop, events, request.timeout, shutdown_rx).instrument(span),
        );

        Ok(Box::new(MqttWsHandle {
            client,
            shutdown: shutdown_tx,
        }))
    }
}

/// Outbound side of a rumqttc session
pub struct MqttWsHandle {
    client: AsyncClient,
    shutdown: watch::Sender<bool>,
}

fn rejected(error: ClientError) -> TransportError {
    TransportError::RequestRejected(error.to_string())
}

impl TransportHandle for MqttWsHandle {
    fn disconnect(&mut self) -> Result<(), TransportError> {
        let queued = self.client.try_disconnect().map_err(rejected);
        // Event loop may already have stopped
        let _ = self.shutdown.send(true);
        queued
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client.try_subscribe(topic, qos).map_err(rejected)
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client.try_unsubscribe(topic).map_err(rejected)
    }

    fn send(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        self.client
            .try_publish(
                message.destination,
                message.qos,
                message.retained,
                message.payload.into_bytes(),
            )
            .map_err(rejected)
    }
}

impl Drop for MqttWsHandle {
    fn drop(&mut self) {
        if self.shutdown.send(true).is_ok() {
            debug!("Transport handle dropped, stopping event loop");
        }
    }
}
