//! Type-keyed fan-out of inbound envelopes to registered handlers.
//!
//! The dispatcher is the loosely-typed half of message delivery: consumers
//! subscribe to an envelope type string (or [`WILDCARD`]) and receive the
//! raw payload of every matching envelope. The typed half — the game state
//! reducer — runs before dispatch inside the connection loop.
//!
//! Handlers run synchronously on the connection loop task, in registration
//! order, exact-type handlers first and wildcard handlers after. A handler
//! that panics is caught and logged; it cannot prevent later handlers from
//! running or unwind into the transport loop.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::warn;

use crate::protocol::Envelope;

/// Subscription key matching every envelope type, including unknown ones.
pub const WILDCARD: &str = "*";

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    handlers: HashMap<String, Vec<(u64, Handler)>>,
    next_id: u64,
}

impl Registry {
    /// Handlers due for one envelope: exact-type matches first, then
    /// wildcard, each group in registration order.
    fn handlers_for(&self, kind: &str) -> Vec<Handler> {
        let mut due = Vec::new();
        if let Some(exact) = self.handlers.get(kind) {
            due.extend(exact.iter().map(|(_, h)| Arc::clone(h)));
        }
        if kind != WILDCARD {
            if let Some(any) = self.handlers.get(WILDCARD) {
                due.extend(any.iter().map(|(_, h)| Arc::clone(h)));
            }
        }
        due
    }

    fn remove(&mut self, kind: &str, id: u64) {
        if let Some(handlers) = self.handlers.get_mut(kind) {
            handlers.retain(|(handler_id, _)| *handler_id != id);
            if handlers.is_empty() {
                self.handlers.remove(kind);
            }
        }
    }
}

/// Cheap-to-clone handle to a shared subscription registry.
#[derive(Clone, Default)]
pub struct MessageDispatcher {
    inner: Arc<Mutex<Registry>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for envelopes of type `kind` (or [`WILDCARD`]).
    ///
    /// Multiple handlers per type are allowed and invoked in registration
    /// order. The handler stays registered until the returned
    /// [`Subscription`] is [`unsubscribe`](Subscription::unsubscribe)d.
    pub fn subscribe<F>(&self, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let kind = kind.into();
        let mut registry = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .handlers
            .entry(kind.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Fan an envelope out to its subscribers.
    ///
    /// Envelopes with an empty type are dropped with a warning. Handlers get
    /// the envelope's `data`, or the whole envelope when `data` is absent.
    /// Unknown types reach wildcard subscribers only, without error.
    pub fn dispatch(&self, envelope: &Envelope) {
        if envelope.kind.is_empty() {
            warn!("dropping envelope with empty type");
            return;
        }

        // Snapshot the handler list so handlers can subscribe/unsubscribe
        // without deadlocking on the registry lock.
        let due = {
            let registry = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            registry.handlers_for(&envelope.kind)
        };

        let payload = envelope.handler_payload();
        for handler in due {
            if catch_unwind(AssertUnwindSafe(|| handler(&payload))).is_err() {
                warn!(kind = %envelope.kind, "message handler panicked; continuing dispatch");
            }
        }
    }

    #[cfg(test)]
    fn handler_count(&self, kind: &str) -> usize {
        let registry = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        registry.handlers.get(kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MessageDispatcher")
            .field("types", &registry.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Handle to one registered handler.
#[derive(Debug)]
pub struct Subscription {
    kind: String,
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the handler from the registry. Safe to call after the
    /// dispatcher itself has been dropped.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.remove(&self.kind, self.id);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn envelope(kind: &str, data: Option<Value>) -> Envelope {
        Envelope {
            data,
            ..Envelope::new(kind)
        }
    }

    /// Returns a shared log plus a factory producing handlers that append
    /// their tag to the log when invoked.
    fn recorder() -> (
        Arc<Mutex<Vec<String>>>,
        impl Fn(&str) -> Box<dyn Fn(&Value) + Send + Sync>,
    ) {
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let log_for_factory = Arc::clone(&log);
        let factory = move |tag: &str| -> Box<dyn Fn(&Value) + Send + Sync> {
            let log = Arc::clone(&log_for_factory);
            let tag = tag.to_owned();
            Box::new(move |_payload: &Value| log.lock().unwrap().push(tag.clone()))
        };
        (log, factory)
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let dispatcher = MessageDispatcher::new();
        let (log, handler) = recorder();

        let _a = dispatcher.subscribe("phase_changed", handler("first"));
        let _b = dispatcher.subscribe("phase_changed", handler("second"));

        dispatcher.dispatch(&envelope("phase_changed", None));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn wildcard_runs_after_exact_handlers() {
        let dispatcher = MessageDispatcher::new();
        let (log, handler) = recorder();

        let _a = dispatcher.subscribe(WILDCARD, handler("wildcard"));
        let _b = dispatcher.subscribe("vote_cast", handler("exact"));

        dispatcher.dispatch(&envelope("vote_cast", None));
        assert_eq!(*log.lock().unwrap(), vec!["exact", "wildcard"]);
    }

    #[test]
    fn unknown_type_reaches_wildcard_only() {
        let dispatcher = MessageDispatcher::new();
        let (log, handler) = recorder();

        let _a = dispatcher.subscribe(WILDCARD, handler("wildcard"));
        let _b = dispatcher.subscribe("vote_cast", handler("exact"));

        dispatcher.dispatch(&envelope("lunar_eclipse", None));
        assert_eq!(*log.lock().unwrap(), vec!["wildcard"]);
    }

    #[test]
    fn handler_receives_data_or_whole_envelope() {
        let dispatcher = MessageDispatcher::new();
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let _sub = dispatcher.subscribe("success", move |payload| {
            sink.lock().unwrap().push(payload.clone());
        });

        dispatcher.dispatch(&envelope(
            "success",
            Some(serde_json::json!({"message": "ok"})),
        ));
        dispatcher.dispatch(&envelope("success", None));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["message"], "ok");
        // No data: the handler gets the envelope itself.
        assert_eq!(seen[1]["type"], "success");
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let dispatcher = MessageDispatcher::new();
        let (log, handler) = recorder();

        let _bad = dispatcher.subscribe("error", |_: &Value| panic!("handler bug"));
        let _good = dispatcher.subscribe("error", handler("survivor"));

        dispatcher.dispatch(&envelope("error", None));
        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let dispatcher = MessageDispatcher::new();
        let (log, handler) = recorder();

        let sub_first = dispatcher.subscribe("chat_message", handler("first"));
        let _sub_second = dispatcher.subscribe("chat_message", handler("second"));
        assert_eq!(dispatcher.handler_count("chat_message"), 2);

        sub_first.unsubscribe();
        assert_eq!(dispatcher.handler_count("chat_message"), 1);

        dispatcher.dispatch(&envelope("chat_message", None));
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn unsubscribe_after_dispatcher_drop_is_harmless() {
        let dispatcher = MessageDispatcher::new();
        let sub = dispatcher.subscribe("success", |_: &Value| {});
        drop(dispatcher);
        sub.unsubscribe();
    }

    #[test]
    fn subscribing_from_inside_a_handler_does_not_deadlock() {
        let dispatcher = MessageDispatcher::new();
        let inner = dispatcher.clone();
        let _sub = dispatcher.subscribe("system_message", move |_: &Value| {
            inner.subscribe("phase_changed", |_: &Value| {}).unsubscribe();
        });
        dispatcher.dispatch(&envelope("system_message", None));
    }
}
