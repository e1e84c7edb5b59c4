//! Publishing human-readable audit events
//!
//! Events are fire-and-forget: publishing never fails from the caller's point of view and never
//! influences control flow. A recorder that talks to a cluster is expected to log and drop events
//! it cannot deliver.
use parking_lot::Mutex;
use std::{fmt, sync::Arc};

/// The event severity or type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventType {
    /// An event took place - nothing to worry about.
    Normal,
    /// Something is not working as expected - it might be worth to have a look.
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        })
    }
}

/// Required information to publish a new event via [`Recorder::publish`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEvent {
    /// The reason explaining why the event happened, in `UpperCamelCase`
    ///
    /// `reason` must be machine-readable.
    pub reason: String,
    /// A description of what happened
    ///
    /// `note` must be human-readable.
    pub note: String,
    /// The event severity.
    pub event_type: EventType,
}

/// A publisher of events about the object an operator manages
///
/// The trait is object safe; reconcilers usually hold an `Arc<dyn Recorder>`.
pub trait Recorder: Send + Sync {
    /// Publish a new event, without waiting for it to be delivered
    fn publish(&self, event: NewEvent);

    /// Publish a [`EventType::Normal`] event
    fn event(&self, reason: &str, note: String) {
        self.publish(NewEvent {
            reason: reason.to_owned(),
            note,
            event_type: EventType::Normal,
        });
    }

    /// Publish a [`EventType::Warning`] event
    fn warning(&self, reason: &str, note: String) {
        self.publish(NewEvent {
            reason: reason.to_owned(),
            note,
            event_type: EventType::Warning,
        });
    }
}

impl<R: Recorder + ?Sized> Recorder for Arc<R> {
    fn publish(&self, event: NewEvent) {
        (**self).publish(event);
    }
}

/// Writes events to the log
#[derive(Clone, Debug, Default)]
pub struct TracingRecorder {
    component: String,
}

impl TracingRecorder {
    /// A recorder tagging every event with `component`
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }
}

impl Recorder for TracingRecorder {
    fn publish(&self, event: NewEvent) {
        match event.event_type {
            EventType::Normal => tracing::info!(
                component = %self.component,
                reason = %event.reason,
                "{}",
                event.note
            ),
            EventType::Warning => tracing::warn!(
                component = %self.component,
                reason = %event.reason,
                "{}",
                event.note
            ),
        }
    }
}

/// Keeps every published event in memory, for inspection in tests
///
/// Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRecorder {
    events: Arc<Mutex<Vec<NewEvent>>>,
}

impl InMemoryRecorder {
    /// All events published so far, oldest first
    pub fn events(&self) -> Vec<NewEvent> {
        self.events.lock().clone()
    }

    /// The reasons of all events published so far, oldest first
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }

    /// Drops everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Recorder for InMemoryRecorder {
    fn publish(&self, event: NewEvent) {
        self.events.lock().push(event);
    }
}
