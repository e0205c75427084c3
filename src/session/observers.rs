//! Observer registration and event fan-out
//!
//! Each lifecycle event has exactly one observer slot; registering again replaces the
//! previous callback. Every event is also published on a broadcast channel so async
//! consumers can `recv()` instead of registering closures.

use crate::error::SessionError;
use crate::transport::{ConnectionLoss, InboundMessage};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the session event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub type ConnectObserver = Arc<dyn Fn() + Send + Sync>;
/// Receives the loss reason, or `None` after an explicit `disconnect()`
pub type DisconnectObserver = Arc<dyn Fn(Option<&ConnectionLoss>) + Send + Sync>;
pub type MessageObserver = Arc<dyn Fn(&InboundMessage) + Send + Sync>;
pub type ErrorObserver = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Lifecycle event, as seen by observers and broadcast subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected(Option<ConnectionLoss>),
    Message(InboundMessage),
    Error(SessionError),
}

#[derive(Default)]
struct ObserverSlots {
    on_connect: Option<ConnectObserver>,
    on_disconnect: Option<DisconnectObserver>,
    on_message: Option<MessageObserver>,
    on_error: Option<ErrorObserver>,
}

/// Holds the observer slots and the broadcast sender
pub(crate) struct Dispatcher {
    slots: RwLock<ObserverSlots>,
    events: broadcast::Sender<SessionEvent>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            slots: RwLock::new(ObserverSlots::default()),
            events,
        }
    }

    pub(crate) fn set_on_connect(&self, observer: ConnectObserver) {
        self.write_slots().on_connect = Some(observer);
    }

    pub(crate) fn set_on_disconnect(&self, observer: DisconnectObserver) {
        self.write_slots().on_disconnect = Some(observer);
    }

    pub(crate) fn set_on_message(&self, observer: MessageObserver) {
        self.write_slots().on_message = Some(observer);
    }

    pub(crate) fn set_on_error(&self, observer: ErrorObserver) {
        self.write_slots().on_error = Some(observer);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Invoke the matching observer, then broadcast
    ///
    /// Must be called without the session lock held: observers may call back into
    /// the manager.
    pub(crate) fn dispatch(&self, event: SessionEvent) {
        match &event {
            SessionEvent::Connected => {
                let observer = self.read_slots().on_connect.clone();
                if let Some(observer) = observer {
                    observer();
                }
            }
            SessionEvent::Disconnected(loss) => {
                let observer = self.read_slots().on_disconnect.clone();
                if let Some(observer) = observer {
                    observer(loss.as_ref());
                }
            }
            SessionEvent::Message(message) => {
                let observer = self.read_slots().on_message.clone();
                if let Some(observer) = observer {
                    observer(message);
                }
            }
            SessionEvent::Error(error) => {
                let observer = self.read_slots().on_error.clone();
                if let Some(observer) = observer {
                    observer(error);
                }
            }
        }

        // No receivers is not an error
        if self.events.send(event).is_err() {
            trace!("No broadcast subscribers for session event");
        }
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, ObserverSlots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, ObserverSlots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_without_observers_is_noop() {
        let dispatcher = Dispatcher::new();
        dispatcher.dispatch(SessionEvent::Connected);
        dispatcher.dispatch(SessionEvent::Disconnected(None));
    }

    #[test]
    fn test_registering_replaces_previous_observer() {
        let dispatcher = Dispatcher::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        dispatcher.set_on_connect(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = second.clone();
        dispatcher.set_on_connect(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        dispatcher.dispatch(SessionEvent::Connected);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_observer_receives_loss() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sink = seen.clone();
        dispatcher.set_on_disconnect(Arc::new(move |loss| {
            sink.lock().unwrap().push(loss.cloned());
        }));

        dispatcher.dispatch(SessionEvent::Disconnected(Some(ConnectionLoss::new(7, "reset"))));
        dispatcher.dispatch(SessionEvent::Disconnected(None));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], Some(ConnectionLoss::new(7, "reset")));
        assert_eq!(seen[1], None);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let dispatcher = Dispatcher::new();
        let mut receiver = dispatcher.subscribe();

        dispatcher.dispatch(SessionEvent::Message(InboundMessage::new("X1/suhu", "21")));

        match receiver.recv().await.unwrap() {
            SessionEvent::Message(message) => assert_eq!(message.payload, "21"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
