//! Lifecycle notifications of a job.
//!
//! Listeners are registered per [`EventKind`] before the job starts, then the registry is moved
//! into the job. Dispatching is synchronous: the state machine calls every listener of the
//! event's kind, in registration order, before making any further progress.
//!
//! Listeners are caller code, not protocol code. A listener that returns an error or panics is
//! logged and skipped, and the job carries on.

use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use fedcycle_core::{CycleId, Rejection};

use crate::{error::JobError, training::CycleTask};

/// The kinds of events a job emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Accepted,
    Rejected,
    Reported,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Accepted,
        EventKind::Rejected,
        EventKind::Reported,
        EventKind::Error,
    ];
}

/// Event emitted by the job state machine as it advances through the protocol.
#[derive(Debug, Clone)]
pub enum Event {
    /// The worker was admitted to a cycle and downloaded its plans and model. The listener
    /// is expected to train and deliver the result through the task.
    Accepted(CycleTask),
    /// The worker was not admitted. A [`Rejection::Final`] means the job is over.
    Rejected(Rejection),
    /// The result of the given cycle was accepted by the service.
    Reported(CycleId),
    /// The job is about to stop on this error.
    Error(Arc<JobError>),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Accepted(_) => EventKind::Accepted,
            Event::Rejected(_) => EventKind::Rejected,
            Event::Reported(_) => EventKind::Reported,
            Event::Error(_) => EventKind::Error,
        }
    }
}

/// Error a listener can return to signal that it failed to handle an event.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(String);

impl ListenerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<String> for ListenerError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<&str> for ListenerError {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

/// A trait for types that handle job events.
///
/// It is implemented for closures, so most of the time there is no need to implement it.
pub trait Listener: Send {
    fn on_event(&mut self, event: &Event) -> Result<(), ListenerError>;
}

impl<F> Listener for F
where
    F: FnMut(&Event) -> Result<(), ListenerError> + Send,
{
    fn on_event(&mut self, event: &Event) -> Result<(), ListenerError> {
        self(event)
    }
}

/// The listeners of a job, by event kind.
#[derive(Default)]
pub struct Listeners {
    listeners: HashMap<EventKind, Vec<Box<dyn Listener>>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self
            .listeners
            .iter()
            .map(|(kind, listeners)| (kind, listeners.len()))
            .collect();
        f.debug_struct("Listeners").field("count", &counts).finish()
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for the given kind of events. Listeners of a kind are called in the
    /// order they were registered.
    pub fn register<L>(&mut self, kind: EventKind, listener: L) -> &mut Self
    where
        L: Listener + 'static,
    {
        self.listeners
            .entry(kind)
            .or_insert_with(Vec::new)
            .push(Box::new(listener));
        self
    }

    /// Add a listener for every kind of events.
    pub fn register_all<L>(&mut self, listener: L) -> &mut Self
    where
        L: Listener + Clone + 'static,
    {
        for kind in EventKind::ALL.iter() {
            self.register(*kind, listener.clone());
        }
        self
    }

    /// Number of listeners registered for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Call the listeners of the event's kind and return how many of them failed.
    pub fn dispatch(&mut self, event: &Event) -> usize {
        let kind = event.kind();
        let listeners = match self.listeners.get_mut(&kind) {
            Some(listeners) => listeners,
            None => {
                debug!("no listener for {:?} events", kind);
                return 0;
            }
        };

        let mut failures = 0;
        for (index, listener) in listeners.iter_mut().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("listener #{} failed to handle {:?} event: {}", index, kind, e);
                    failures += 1;
                }
                Err(_) => {
                    warn!("listener #{} panicked on {:?} event", index, kind);
                    failures += 1;
                }
            }
        }
        failures
    }
}

/// A listener that forwards events into a channel.
///
/// Events are sent with `try_send`: if the channel is full or closed, the event is dropped and
/// the failure is reported like any other listener failure.
#[derive(Debug, Clone)]
pub struct ChannelListener(mpsc::Sender<Event>);

impl ChannelListener {
    /// Create a listener and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self(tx), rx)
    }
}

impl From<mpsc::Sender<Event>> for ChannelListener {
    fn from(sender: mpsc::Sender<Event>) -> Self {
        Self(sender)
    }
}

impl Listener for ChannelListener {
    fn on_event(&mut self, event: &Event) -> Result<(), ListenerError> {
        self.0
            .try_send(event.clone())
            .map_err(|e| ListenerError::new(format!("failed to forward event: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> impl Listener + 'static {
        let log = log.clone();
        move |event: &Event| -> Result<(), ListenerError> {
            log.lock().unwrap().push(format!("{}:{:?}", name, event.kind()));
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::new();
        listeners
            .register(EventKind::Rejected, recorder(&log, "a"))
            .register(EventKind::Rejected, recorder(&log, "b"))
            .register(EventKind::Reported, recorder(&log, "c"));

        assert_eq!(listeners.dispatch(&Event::Rejected(Rejection::Final)), 0);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:Rejected".to_string(), "b:Rejected".to_string()]
        );

        assert_eq!(listeners.count(EventKind::Rejected), 2);
        assert_eq!(listeners.count(EventKind::Accepted), 0);
    }

    #[test]
    fn test_dispatch_without_listener() {
        let mut listeners = Listeners::new();
        assert_eq!(listeners.dispatch(&Event::Reported(CycleId::new("c"))), 0);
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::new();
        listeners
            .register(EventKind::Rejected, |_: &Event| -> Result<(), ListenerError> {
                Err(ListenerError::new("business logic failed"))
            })
            .register(EventKind::Rejected, |_: &Event| -> Result<(), ListenerError> {
                panic!("listener bug")
            })
            .register(EventKind::Rejected, recorder(&log, "last"));

        assert_eq!(listeners.dispatch(&Event::Rejected(Rejection::Final)), 2);
        // the last listener still ran
        assert_eq!(*log.lock().unwrap(), vec!["last:Rejected".to_string()]);

        // and the registry is still usable
        assert_eq!(listeners.dispatch(&Event::Rejected(Rejection::Final)), 2);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_channel_listener() {
        let (listener, mut rx) = ChannelListener::channel(1);
        let mut listeners = Listeners::new();
        listeners.register_all(listener);

        assert_eq!(listeners.dispatch(&Event::Reported(CycleId::new("c-1"))), 0);
        // the channel is full
        assert_eq!(listeners.dispatch(&Event::Rejected(Rejection::Final)), 1);

        match rx.recv().await.unwrap() {
            Event::Reported(id) => assert_eq!(id, CycleId::new("c-1")),
            other => panic!("unexpected event {:?}", other),
        }

        drop(rx);
        assert_eq!(listeners.dispatch(&Event::Rejected(Rejection::Final)), 1);
    }
}
