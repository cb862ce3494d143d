//! Named-listener event channels with synchronous, failure-isolated dispatch.
//!
//! An [`EventChannel`] owns an ordered set of listeners keyed by name.
//! [`EventChannel::dispatch`] runs every listener in registration order on the
//! caller's thread and returns only after all of them have run. A listener
//! that returns an error or panics is logged and counted; the remaining
//! listeners still run and the failure never reaches the dispatching caller.
//!
//! # Duplicate Names
//!
//! Registering under a name that already exists replaces the previous listener
//! in place. The replacement keeps the original dispatch position.
//!
//! # Blocking
//!
//! Dispatch is synchronous. A listener that performs slow work blocks the
//! mutation that triggered it; listeners needing async fan-out should enqueue
//! and return.

pub mod mutation;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::ErrorKind;
use crate::telemetry::get_core_metrics;

pub use mutation::{MutationEvent, MutationOperation};

/// Error type returned by listeners.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by channel management.
#[derive(Debug, Error)]
pub enum EventError {
    /// No listener is registered under the given name.
    #[error("no listener named '{name}' on channel '{channel}'")]
    ListenerNotFound {
        /// Channel name
        channel: String,
        /// Listener name that was looked up
        name: String,
    },
}

impl EventError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventError::ListenerNotFound { .. } => ErrorKind::NotFound,
        }
    }
}

/// A consumer of events dispatched on an [`EventChannel`].
///
/// Implemented for any `Fn(&str, &T) -> Result<(), ListenerError>` closure.
///
/// # Panic Safety
///
/// Listeners should not panic. If one does, the channel catches the panic,
/// logs the listener name at `ERROR` level, and continues with the next
/// listener.
pub trait Listener<T>: Send + Sync {
    /// Handle one event. `event_name` is the dispatching channel's name.
    fn on_event(&self, event_name: &str, data: &T) -> Result<(), ListenerError>;
}

impl<T, F> Listener<T> for F
where
    F: Fn(&str, &T) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event_name: &str, data: &T) -> Result<(), ListenerError> {
        self(event_name, data)
    }
}

/// Result of a single [`EventChannel::dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Listeners invoked.
    pub invoked: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

type Entry<T> = (String, Arc<dyn Listener<T>>);

/// Generic named-listener registry.
pub struct EventChannel<T> {
    event_name: String,
    listeners: RwLock<Vec<Entry<T>>>,
}

impl<T> fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("event_name", &self.event_name)
            .field("listeners", &self.listener_names())
            .finish()
    }
}

impl<T> EventChannel<T> {
    /// Create an empty channel for the given topic.
    #[must_use]
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// The channel's topic name, passed to every listener.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Register a listener under `name`, replacing any listener with that name.
    pub fn register(&self, name: impl Into<String>, listener: impl Listener<T> + 'static) {
        self.register_shared(name, Arc::new(listener));
    }

    /// Register a closure listener.
    ///
    /// Equivalent to [`register`](Self::register) but lets the compiler infer
    /// the closure's argument and return types.
    pub fn register_fn<F>(&self, name: impl Into<String>, listener: F)
    where
        F: Fn(&str, &T) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.register_shared(name, Arc::new(listener));
    }

    /// Register an already shared listener.
    pub fn register_shared(&self, name: impl Into<String>, listener: Arc<dyn Listener<T>>) {
        let name = name.into();
        let mut listeners = self.listeners.write();
        if let Some(slot) = listeners.iter_mut().find(|(existing, _)| *existing == name) {
            debug!(channel = %self.event_name, listener = %name, "Replacing listener");
            slot.1 = listener;
        } else {
            debug!(channel = %self.event_name, listener = %name, "Registering listener");
            listeners.push((name, listener));
        }
    }

    /// Remove the listener registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::ListenerNotFound`] if no such listener exists.
    pub fn unregister(&self, name: &str) -> Result<(), EventError> {
        let mut listeners = self.listeners.write();
        let index = listeners
            .iter()
            .position(|(existing, _)| existing == name)
            .ok_or_else(|| EventError::ListenerNotFound {
                channel: self.event_name.clone(),
                name: name.to_string(),
            })?;
        listeners.remove(index);
        debug!(channel = %self.event_name, listener = %name, "Unregistered listener");
        Ok(())
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Copy of the registered listeners, in dispatch order.
    pub fn get_listeners(&self) -> Vec<(String, Arc<dyn Listener<T>>)> {
        self.listeners.read().clone()
    }

    /// Names of the registered listeners, in dispatch order.
    pub fn listener_names(&self) -> Vec<String> {
        self.listeners
            .read()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Invoke every listener with `data`.
    ///
    /// The listener list is snapshotted first and no lock is held while
    /// listeners run, so a listener may register or unregister listeners
    /// (taking effect from the next dispatch).
    pub fn dispatch(&self, data: &T) -> DispatchSummary {
        let listeners = self.get_listeners();
        let mut summary = DispatchSummary::default();

        for (name, listener) in &listeners {
            summary.invoked += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                listener.on_event(&self.event_name, data)
            }));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    summary.failed += 1;
                    warn!(
                        channel = %self.event_name,
                        listener = %name,
                        error = %e,
                        "Event listener failed"
                    );
                    if let Some(m) = get_core_metrics() {
                        m.record_listener_failure(&self.event_name, "error");
                    }
                }
                Err(payload) => {
                    summary.failed += 1;
                    error!(
                        channel = %self.event_name,
                        listener = %name,
                        panic = %panic_message(payload.as_ref()),
                        "Event listener panicked"
                    );
                    if let Some(m) = get_core_metrics() {
                        m.record_listener_failure(&self.event_name, "panic");
                    }
                }
            }
        }

        summary
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_channel() -> (EventChannel<u32>, Arc<Mutex<Vec<String>>>) {
        (EventChannel::new("test"), Arc::new(Mutex::new(Vec::new())))
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let (channel, seen) = recording_channel();

        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            channel.register_fn(name, move |event_name, value| {
                seen.lock().push(format!("{name}:{event_name}:{value}"));
                Ok(())
            });
        }

        let summary = channel.dispatch(&7);

        assert_eq!(summary, DispatchSummary { invoked: 3, failed: 0 });
        assert_eq!(
            *seen.lock(),
            vec!["first:test:7", "second:test:7", "third:test:7"]
        );
    }

    #[test]
    fn test_failing_listener_does_not_stop_dispatch() {
        let (channel, seen) = recording_channel();

        channel.register_fn("broken", |_, _| Err("listener exploded".into()));
        let seen_clone = seen.clone();
        channel.register_fn("healthy", move |_, value| {
            seen_clone.lock().push(value.to_string());
            Ok(())
        });

        let summary = channel.dispatch(&1);

        assert_eq!(summary.failed, 1);
        assert_eq!(*seen.lock(), vec!["1"]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let (channel, seen) = recording_channel();

        channel.register_fn("panicky", |_, _| panic!("listener panicked"));
        let seen_clone = seen.clone();
        channel.register_fn("healthy", move |_, value| {
            seen_clone.lock().push(value.to_string());
            Ok(())
        });

        let summary = channel.dispatch(&2);

        assert_eq!(summary, DispatchSummary { invoked: 2, failed: 1 });
        assert_eq!(*seen.lock(), vec!["2"]);
    }

    #[test]
    fn test_unregistered_listener_never_fires_again() {
        let (channel, seen) = recording_channel();

        let seen_old = seen.clone();
        channel.register_fn("old", move |_, _| {
            seen_old.lock().push("old".to_string());
            Ok(())
        });
        channel.unregister("old").unwrap();

        let seen_new = seen.clone();
        channel.register_fn("new", move |_, _| {
            seen_new.lock().push("new".to_string());
            Ok(())
        });

        channel.dispatch(&0);

        assert_eq!(*seen.lock(), vec!["new"]);
        assert_eq!(channel.listener_count(), 1);
    }

    #[test]
    fn test_unregister_unknown_is_not_found() {
        let channel: EventChannel<u32> = EventChannel::new("test");

        let err = channel.unregister("ghost").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_name_replaces_in_place() {
        let (channel, seen) = recording_channel();

        for (name, tag) in [("a", "a1"), ("b", "b1"), ("a", "a2")] {
            let seen = seen.clone();
            channel.register_fn(name, move |_, _| {
                seen.lock().push(tag.to_string());
                Ok(())
            });
        }

        channel.dispatch(&0);

        assert_eq!(channel.listener_names(), vec!["a", "b"]);
        assert_eq!(*seen.lock(), vec!["a2", "b1"]);
    }

    #[test]
    fn test_get_listeners_is_a_copy() {
        let channel: EventChannel<u32> = EventChannel::new("test");
        channel.register_fn("one", |_, _| Ok(()));

        let mut copy = channel.get_listeners();
        copy.clear();

        assert_eq!(channel.listener_count(), 1);
    }

    #[test]
    fn test_listener_may_unregister_during_dispatch() {
        let channel = Arc::new(EventChannel::<u32>::new("test"));
        let weak = Arc::downgrade(&channel);

        channel.register_fn("once", move |_, _| {
            if let Some(channel) = weak.upgrade() {
                channel.unregister("once")?;
            }
            Ok(())
        });

        let summary = channel.dispatch(&0);

        assert_eq!(summary.failed, 0);
        assert_eq!(channel.listener_count(), 0);
    }
}
