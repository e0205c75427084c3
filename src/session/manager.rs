//! Connection manager: one long-lived broker session on behalf of a host application
//!
//! All mutable session state lives behind a single mutex. Transport events and timer
//! expiries are applied under that lock, and the resulting observer notifications and
//! timer scheduling run only after it is released, so observers may freely call back
//! into the manager.
//!
//! Every connect attempt gets a new generation number. Event sinks and reconnect timers
//! capture the generation they belong to; anything that arrives for an older generation
//! is ignored. This is what makes `disconnect()` final even when a loss or timer races
//! with it.

use crate::config::SessionConfig;
use crate::error::{Operation, SessionError, SessionResult};
use crate::session::health::HealthMetrics;
use crate::session::observers::{Dispatcher, SessionEvent};
use crate::session::reconnect::{should_attempt_reconnection, ReconnectionDecision};
use crate::session::state::{log_state_transition, ConnectionState, SessionStatus};
use crate::session_span;
use crate::transport::mqtt::MqttWsConnector;
use crate::transport::{
    qos_level, ConnectRequest, ConnectionLoss, EventSink, InboundMessage, OutboundMessage,
    TransportConnector, TransportEvent, TransportHandle,
};
use rumqttc::QoS;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Who asked for the current connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOrigin {
    Caller,
    Reconnect,
}

/// Work to do once the session lock is released
enum Followup {
    Dispatch(SessionEvent),
    ScheduleReconnect {
        generation: u64,
        attempt: u32,
        delay: Duration,
    },
}

struct Session {
    state: ConnectionState,
    handle: Option<Box<dyn TransportHandle>>,
    generation: u64,
    origin: AttemptOrigin,
    waiters: Vec<oneshot::Sender<SessionResult<()>>>,
    /// Consecutive automatic attempts since the last successful connection
    reconnect_attempts: u32,
    reconnect_timer: Option<JoinHandle<()>>,
    /// Active subscriptions, restored after an automatic reconnect
    subscriptions: BTreeMap<String, QoS>,
    connected_at: Option<Instant>,
    last_message_at: Option<Instant>,
    total_reconnects: u32,
    messages_sent: u64,
    messages_received: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            handle: None,
            generation: 0,
            origin: AttemptOrigin::Caller,
            waiters: Vec::new(),
            reconnect_attempts: 0,
            reconnect_timer: None,
            subscriptions: BTreeMap::new(),
            connected_at: None,
            last_message_at: None,
            total_reconnects: 0,
            messages_sent: 0,
            messages_received: 0,
        }
    }

    fn transition(&mut self, client_id: &str, to: ConnectionState) {
        if self.state != to {
            log_state_transition(client_id, self.state, to);
            self.state = to;
        }
    }

    fn resolve_waiters(&mut self, outcome: SessionResult<()>) {
        for waiter in self.waiters.drain(..) {
            // Waiter may have been dropped by a cancelled caller
            let _ = waiter.send(outcome.clone());
        }
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    /// Close and drop the current transport, if any
    fn release_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.disconnect() {
                debug!(error = %e, "Transport disconnect request failed");
            }
        }
    }

    fn connected_handle(
        &mut self,
        operation: Operation,
    ) -> SessionResult<&mut Box<dyn TransportHandle>> {
        let state = self.state;
        match self.handle.as_mut() {
            Some(handle) if state.accepts_operations() => Ok(handle),
            _ => {
                error!(%operation, %state, "Cannot {}: not connected", operation);
                Err(SessionError::not_connected(state))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_reconnect_timer();
        self.release_handle();
    }
}

struct Inner {
    config: Arc<SessionConfig>,
    connector: Arc<dyn TransportConnector>,
    session: Mutex<Session>,
    dispatcher: Dispatcher,
}

impl Inner {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn client_id(&self) -> &str {
        &self.config.client_id
    }

    fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            endpoint: self.config.endpoint.clone(),
            client_id: self.config.client_id.clone(),
            timeout: self.config.connect_timeout,
            keep_alive: self.config.keep_alive,
            clean_session: self.config.clean_session,
            credentials: self.config.credentials.clone(),
        }
    }

    fn event_sink(self: &Arc<Self>, generation: u64) -> EventSink {
        let inner: Weak<Inner> = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(inner) = inner.upgrade() {
                inner.handle_transport_event(generation, event);
            }
        })
    }

    /// Start a new attempt under the lock; the previous transport is discarded
    fn begin_attempt(
        self: &Arc<Self>,
        session: &mut Session,
        origin: AttemptOrigin,
        followups: &mut Vec<Followup>,
    ) {
        session.generation += 1;
        session.release_handle();
        session.origin = origin;
        session.transition(self.client_id(), ConnectionState::Connecting);

        info!(
            url = %self.config.endpoint,
            client_id = %self.config.client_id,
            attempt = session.reconnect_attempts,
            "Opening broker connection"
        );

        let sink = self.event_sink(session.generation);
        match self.connector.open(self.connect_request(), sink) {
            Ok(handle) => session.handle = Some(handle),
            Err(e) => {
                error!(error = %e, "Failed to construct transport");
                self.fail_attempt(session, SessionError::from(e), followups);
            }
        }
    }

    /// Current attempt failed to produce a connection
    fn fail_attempt(
        &self,
        session: &mut Session,
        error: SessionError,
        followups: &mut Vec<Followup>,
    ) {
        error!(client_id = %self.config.client_id, error = %error, "Connection failed");
        session.handle = None;
        session.resolve_waiters(Err(error.clone()));
        followups.push(Followup::Dispatch(SessionEvent::Error(error)));

        let retry = session.origin == AttemptOrigin::Reconnect
            && self.config.auto_reconnect
            && self.config.reconnect.retry_failed_attempts;
        if retry {
            self.plan_reconnect(session, followups);
        } else {
            session.transition(self.client_id(), ConnectionState::Disconnected);
        }
    }

    fn plan_reconnect(&self, session: &mut Session, followups: &mut Vec<Followup>) {
        match should_attempt_reconnection(session.reconnect_attempts, &self.config.reconnect) {
            ReconnectionDecision::Proceed { attempt, delay } => {
                session.reconnect_attempts = attempt;
                session.transition(self.client_id(), ConnectionState::Reconnecting);
                followups.push(Followup::ScheduleReconnect {
                    generation: session.generation,
                    attempt,
                    delay,
                });
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts } => {
                warn!(max_attempts, "Max reconnection attempts exceeded, giving up");
                session.transition(self.client_id(), ConnectionState::Disconnected);
                followups.push(Followup::Dispatch(SessionEvent::Error(
                    SessionError::connect_failure(format!(
                        "Max reconnection attempts ({max_attempts}) exceeded"
                    )),
                )));
            }
        }
    }

    fn handle_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        let mut followups = Vec::new();
        {
            let mut session = self.lock_session();
            if session.generation != generation {
                debug!(
                    event_generation = generation,
                    current_generation = session.generation,
                    "Ignoring event from a discarded transport"
                );
                return;
            }

            match event {
                TransportEvent::ConnectSucceeded => {
                    self.on_connect_succeeded(&mut session, &mut followups)
                }
                TransportEvent::ConnectFailed(e) => {
                    if session.state == ConnectionState::Connecting {
                        self.fail_attempt(
                            &mut session,
                            SessionError::connect_failure(e.to_string()),
                            &mut followups,
                        );
                    } else {
                        debug!(state = %session.state, "Ignoring connect failure outside a connect attempt");
                    }
                }
                TransportEvent::ConnectionLost(loss) => {
                    self.on_connection_lost(&mut session, loss, &mut followups)
                }
                TransportEvent::MessageArrived(message) => {
                    self.on_message_arrived(&mut session, message, &mut followups)
                }
            }
        }
        self.run(followups);
    }

    fn on_connect_succeeded(&self, session: &mut Session, followups: &mut Vec<Followup>) {
        if session.state != ConnectionState::Connecting {
            warn!(state = %session.state, "Ignoring connect acknowledgement outside a connect attempt");
            return;
        }

        session.transition(self.client_id(), ConnectionState::Connected);
        session.connected_at = Some(Instant::now());
        session.reconnect_attempts = 0;

        match session.origin {
            AttemptOrigin::Reconnect => {
                session.total_reconnects += 1;
                if self.config.resubscribe_on_reconnect {
                    self.restore_subscriptions(session);
                }
            }
            AttemptOrigin::Caller => session.subscriptions.clear(),
        }

        session.resolve_waiters(Ok(()));
        followups.push(Followup::Dispatch(SessionEvent::Connected));
    }

    fn restore_subscriptions(&self, session: &mut Session) {
        let Some(handle) = session.handle.as_mut() else {
            return;
        };
        for (topic, qos) in &session.subscriptions {
            match handle.subscribe(topic, *qos) {
                Ok(()) => info!(topic = %topic, "Restored subscription"),
                Err(e) => warn!(topic = %topic, error = %e, "Failed to restore subscription"),
            }
        }
    }

    fn on_connection_lost(
        &self,
        session: &mut Session,
        loss: ConnectionLoss,
        followups: &mut Vec<Followup>,
    ) {
        if session.state != ConnectionState::Connected {
            debug!(state = %session.state, loss = %loss, "Ignoring connection loss while not connected");
            return;
        }

        let error = SessionError::connection_lost(&loss);
        if loss.is_normal_close() {
            info!(client_id = %self.config.client_id, reason = %loss, "Connection closed by peer");
        } else {
            warn!(client_id = %self.config.client_id, error = %error, "Connection lost");
        }
        session.handle = None;
        session.connected_at = None;
        followups.push(Followup::Dispatch(SessionEvent::Disconnected(Some(loss))));

        if self.config.auto_reconnect {
            session.reconnect_attempts = 0;
            self.plan_reconnect(session, followups);
        } else {
            session.transition(self.client_id(), ConnectionState::Disconnected);
        }
    }

    fn on_message_arrived(
        &self,
        session: &mut Session,
        message: InboundMessage,
        followups: &mut Vec<Followup>,
    ) {
        if session.state != ConnectionState::Connected {
            debug!(topic = %message.destination, "Dropping message received while not connected");
            return;
        }

        session.last_message_at = Some(Instant::now());
        session.messages_received += 1;
        debug!(topic = %message.destination, payload = %message.payload, "Message received");
        followups.push(Followup::Dispatch(SessionEvent::Message(message)));
    }

    fn run(self: &Arc<Self>, followups: Vec<Followup>) {
        for followup in followups {
            match followup {
                Followup::Dispatch(event) => self.dispatcher.dispatch(event),
                Followup::ScheduleReconnect {
                    generation,
                    attempt,
                    delay,
                } => self.schedule_reconnect(generation, attempt, delay),
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64, attempt: u32, delay: Duration) {
        let mut session = self.lock_session();
        if session.generation != generation || session.state != ConnectionState::Reconnecting {
            debug!("Reconnect no longer wanted, not scheduling");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!("No Tokio runtime available to schedule reconnect");
                session.transition(self.client_id(), ConnectionState::Disconnected);
                return;
            }
        };

        info!(
            delay_ms = delay.as_millis() as u64,
            attempt,
            max_attempts = ?self.config.reconnect.max_attempts,
            "Reconnecting after delay"
        );

        let inner = Arc::downgrade(self);
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.reconnect_due(generation);
            }
        });
        session.cancel_reconnect_timer();
        session.reconnect_timer = Some(timer);
    }

    fn reconnect_due(self: &Arc<Self>, generation: u64) {
        let _span = session_span!(client_id = %self.config.client_id, operation = "reconnect")
            .entered();
        let mut followups = Vec::new();
        {
            let mut session = self.lock_session();
            if session.generation != generation || session.state != ConnectionState::Reconnecting
            {
                debug!("Reconnect timer fired for a stale session, ignoring");
                return;
            }
            // This task is the timer; detach rather than abort it
            session.reconnect_timer = None;
            self.begin_attempt(&mut session, AttemptOrigin::Reconnect, &mut followups);
        }
        self.run(followups);
    }
}

/// Manages one broker session: connect, reconnect, subscriptions, publishing and
/// lifecycle notifications
///
/// Cloning is cheap and every clone controls the same session.
///
/// ```
/// use sensor_link::testing::{test_session_config, MockConnector};
/// use sensor_link::ConnectionManager;
/// use std::sync::Arc;
///
/// tokio_test::block_on(async {
///     let connector = MockConnector::accepting();
///     let manager = ConnectionManager::new(test_session_config(), Arc::new(connector));
///
///     assert!(manager.publish("X1/led", "ON").is_err());
///     manager.connect().await.unwrap();
///     assert!(manager.publish("X1/led", "ON").is_ok());
/// });
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager over an arbitrary transport
    pub fn new(config: SessionConfig, connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                connector,
                session: Mutex::new(Session::new()),
                dispatcher: Dispatcher::new(),
            }),
        }
    }

    /// Create a manager that speaks MQTT over WebSocket
    pub fn websocket(config: SessionConfig) -> Self {
        Self::new(config, Arc::new(MqttWsConnector::new()))
    }

    /// Connect to the broker
    ///
    /// Resolves once the broker accepts or rejects the session. Calling while a connect
    /// attempt is in flight joins that attempt; calling while connected returns
    /// immediately; calling while a reconnect is pending attempts now.
    pub async fn connect(&self) -> SessionResult<()> {
        let span = session_span!(client_id = %self.inner.config.client_id, operation = "connect");
        async {
            let mut followups = Vec::new();
            let outcome = {
                let mut session = self.inner.lock_session();
                match session.state {
                    ConnectionState::Connected => {
                        debug!("Already connected");
                        return Ok(());
                    }
                    ConnectionState::Connecting => {
                        info!("Connect attempt already in flight, waiting for it");
                        let (sender, receiver) = oneshot::channel();
                        session.waiters.push(sender);
                        receiver
                    }
                    ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                        let origin = if session.state == ConnectionState::Reconnecting {
                            AttemptOrigin::Reconnect
                        } else {
                            session.reconnect_attempts = 0;
                            AttemptOrigin::Caller
                        };
                        session.cancel_reconnect_timer();
                        let (sender, receiver) = oneshot::channel();
                        session.waiters.push(sender);
                        self.inner
                            .begin_attempt(&mut session, origin, &mut followups);
                        receiver
                    }
                }
            };
            self.inner.run(followups);

            outcome.await.unwrap_or_else(|_| {
                Err(SessionError::connect_failure(
                    "connect attempt was abandoned",
                ))
            })
        }
        .instrument(span)
        .await
    }

    /// Close the session and stop any pending reconnect
    ///
    /// The disconnect observer fires with `None` when a live connection was closed.
    pub fn disconnect(&self) {
        let mut followups = Vec::new();
        {
            let mut session = self.inner.lock_session();
            let client_id = self.inner.client_id();
            session.generation += 1;
            session.cancel_reconnect_timer();
            session.reconnect_attempts = 0;

            match session.state {
                ConnectionState::Connected => {
                    session.release_handle();
                    session.connected_at = None;
                    session.subscriptions.clear();
                    session.transition(client_id, ConnectionState::Disconnected);
                    followups.push(Followup::Dispatch(SessionEvent::Disconnected(None)));
                }
                ConnectionState::Connecting => {
                    session.release_handle();
                    session.subscriptions.clear();
                    session.transition(client_id, ConnectionState::Disconnected);
                    session.resolve_waiters(Err(SessionError::connect_failure(
                        "connect attempt cancelled by disconnect",
                    )));
                }
                ConnectionState::Reconnecting => {
                    session.subscriptions.clear();
                    session.transition(client_id, ConnectionState::Disconnected);
                    info!("Pending reconnect cancelled");
                }
                ConnectionState::Disconnected => {
                    debug!("Disconnect requested while already disconnected");
                }
            }
        }
        self.inner.run(followups);
    }

    /// Subscribe to a topic with the configured default QoS
    pub fn subscribe(&self, topic: &str) -> SessionResult<()> {
        self.subscribe_with_qos(topic, self.inner.config.qos)
    }

    pub fn subscribe_with_qos(&self, topic: &str, qos: QoS) -> SessionResult<()> {
        let mut session = self.inner.lock_session();
        let handle = session.connected_handle(Operation::Subscribe)?;

        handle.subscribe(topic, qos).map_err(|e| {
            error!(topic, error = %e, "Subscribe request failed");
            SessionError::operation(Operation::Subscribe, topic, &e)
        })?;

        session.subscriptions.insert(topic.to_string(), qos);
        info!(topic, qos = qos_level(qos), "Subscribed");
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str) -> SessionResult<()> {
        let mut session = self.inner.lock_session();
        let handle = session.connected_handle(Operation::Unsubscribe)?;

        handle.unsubscribe(topic).map_err(|e| {
            error!(topic, error = %e, "Unsubscribe request failed");
            SessionError::operation(Operation::Unsubscribe, topic, &e)
        })?;

        session.subscriptions.remove(topic);
        info!(topic, "Unsubscribed");
        Ok(())
    }

    /// Publish a non-retained text payload with the configured default QoS
    pub fn publish(&self, topic: &str, payload: impl Into<String>) -> SessionResult<()> {
        self.publish_with(topic, payload, self.inner.config.qos, false)
    }

    pub fn publish_with(
        &self,
        topic: &str,
        payload: impl Into<String>,
        qos: QoS,
        retain: bool,
    ) -> SessionResult<()> {
        let message = OutboundMessage {
            destination: topic.to_string(),
            payload: payload.into(),
            qos,
            retained: retain,
        };

        let mut session = self.inner.lock_session();
        let handle = session.connected_handle(Operation::Publish)?;
        let payload_len = message.payload.len();

        handle.send(message).map_err(|e| {
            error!(topic, error = %e, "Publish failed");
            SessionError::operation(Operation::Publish, topic, &e)
        })?;

        session.messages_sent += 1;
        info!(topic, payload_len, qos = qos_level(qos), retain, "Published");
        Ok(())
    }

    /// Replace the connect observer
    pub fn on_connect<F>(&self, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_on_connect(Arc::new(observer));
    }

    /// Replace the disconnect observer
    pub fn on_disconnect<F>(&self, observer: F)
    where
        F: Fn(Option<&ConnectionLoss>) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_on_disconnect(Arc::new(observer));
    }

    /// Replace the message observer
    pub fn on_message<F>(&self, observer: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_on_message(Arc::new(observer));
    }

    /// Replace the error observer
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_on_error(Arc::new(observer));
    }

    /// Receive every lifecycle event on a broadcast channel
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.dispatcher.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        let config = &self.inner.config;
        SessionStatus {
            connected: self.state() == ConnectionState::Connected,
            client_id: config.client_id.clone(),
            broker: config.endpoint.host.clone(),
            port: config.endpoint.port,
            secure: config.endpoint.secure,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_session().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Topics that will be restored after an automatic reconnect
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.lock_session().subscriptions.keys().cloned().collect()
    }

    pub fn health(&self) -> HealthMetrics {
        let session = self.inner.lock_session();
        HealthMetrics::calculate(
            session.connected_at,
            session.last_message_at,
            session.total_reconnects,
            session.messages_sent,
            session.messages_received,
        )
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.inner.config.client_id)
            .field("endpoint", &self.inner.config.endpoint.url())
            .field("state", &self.state())
            .finish()
    }
}
