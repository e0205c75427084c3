//! Mock transport for testing
//!
//! [`MockConnector`] records every connect attempt and every request made on the
//! handles it returns. Tests drive the session by firing transport events at the latest
//! (or any earlier) attempt.

use crate::transport::{
    ConnectRequest, ConnectionLoss, EventSink, InboundMessage, OutboundMessage,
    TransportConnector, TransportError, TransportEvent, TransportHandle,
};
use rumqttc::QoS;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Request recorded on a mock handle
#[derive(Debug, Clone, PartialEq)]
pub enum HandleCall {
    Subscribe { topic: String, qos: QoS },
    Unsubscribe(String),
    Send(OutboundMessage),
    Disconnect,
}

struct Attempt {
    request: ConnectRequest,
    sink: EventSink,
    calls: Arc<Mutex<Vec<HandleCall>>>,
}

#[derive(Default)]
struct MockState {
    attempts: Vec<Attempt>,
    fail_next_open: Option<TransportError>,
    auto_accept: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock transport connector
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    reject: Arc<Mutex<Option<TransportError>>>,
}

impl MockConnector {
    /// Connector whose attempts stay pending until the test completes them
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that acknowledges every attempt shortly after it is opened
    pub fn accepting() -> Self {
        let connector = Self::default();
        lock(&connector.state).auto_accept = true;
        connector
    }

    /// Make the next `open` fail before any transport is created
    pub fn fail_next_open(&self, error: TransportError) {
        lock(&self.state).fail_next_open = Some(error);
    }

    /// Make handle requests fail with `error` (None restores normal behavior)
    pub fn reject_requests(&self, error: Option<TransportError>) {
        *lock(&self.reject) = error;
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).attempts.len()
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        lock(&self.state)
            .attempts
            .last()
            .map(|attempt| attempt.request.clone())
    }

    /// Wait until at least `count` attempts have been opened
    pub async fn wait_for_opens(&self, count: usize) {
        while self.open_count() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Requests made on the latest attempt's handle
    pub fn calls(&self) -> Vec<HandleCall> {
        let index = self.open_count().saturating_sub(1);
        self.calls_for(index)
    }

    /// Requests made on the handle of attempt `index` (0-based)
    pub fn calls_for(&self, index: usize) -> Vec<HandleCall> {
        let calls = lock(&self.state)
            .attempts
            .get(index)
            .map(|attempt| attempt.calls.clone());
        calls.map(|calls| lock(&calls).clone()).unwrap_or_default()
    }

    /// Fire an event at attempt `index` (0-based)
    pub fn emit_on(&self, index: usize, event: TransportEvent) {
        let sink = lock(&self.state)
            .attempts
            .get(index)
            .map(|attempt| attempt.sink.clone());
        // Lock released before the sink runs; the manager may call back into the handle
        if let Some(sink) = sink {
            sink(event);
        }
    }

    /// Fire an event at the latest attempt
    pub fn emit(&self, event: TransportEvent) {
        let index = self.open_count().saturating_sub(1);
        self.emit_on(index, event);
    }

    pub fn complete_connect(&self) {
        self.emit(TransportEvent::ConnectSucceeded);
    }

    pub fn fail_connect(&self, error: TransportError) {
        self.emit(TransportEvent::ConnectFailed(error));
    }

    pub fn lose_connection(&self, code: i32, message: &str) {
        self.emit(TransportEvent::ConnectionLost(ConnectionLoss::new(code, message)));
    }

    pub fn deliver(&self, topic: &str, payload: &str) {
        self.emit(TransportEvent::MessageArrived(InboundMessage::new(topic, payload)));
    }
}

impl TransportConnector for MockConnector {
    fn open(
        &self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.fail_next_open.take() {
            return Err(error);
        }

        let calls = Arc::new(Mutex::new(Vec::new()));
        state.attempts.push(Attempt {
            request,
            sink: events.clone(),
            calls: calls.clone(),
        });

        if state.auto_accept {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                events(TransportEvent::ConnectSucceeded);
            });
        }

        Ok(Box::new(MockHandle {
            calls,
            reject: self.reject.clone(),
        }))
    }
}

/// Handle returned by [`MockConnector`]
pub struct MockHandle {
    calls: Arc<Mutex<Vec<HandleCall>>>,
    reject: Arc<Mutex<Option<TransportError>>>,
}

impl MockHandle {
    fn record(&self, call: HandleCall) -> Result<(), TransportError> {
        if let Some(error) = lock(&self.reject).clone() {
            return Err(error);
        }
        lock(&self.calls).push(call);
        Ok(())
    }
}

impl TransportHandle for MockHandle {
    fn disconnect(&mut self) -> Result<(), TransportError> {
        lock(&self.calls).push(HandleCall::Disconnect);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.record(HandleCall::Subscribe {
            topic: topic.to_string(),
            qos,
        })
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.record(HandleCall::Unsubscribe(topic.to_string()))
    }

    fn send(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        self.record(HandleCall::Send(message))
    }
}
