//! Dispatch of server-initiated notifications.
//!
//! Host agents push events (VM lifecycle changes, status updates) as
//! JSON-RPC notifications. Handlers are registered per method name and
//! invoked on the reactor thread as payloads arrive, so they must be short
//! and non-blocking; hand anything heavy to a channel or task of your own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use virtlink_core::JsonRpcNotification;

/// Handler callback for one notification method.
pub type NotificationFn = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;

/// Registry of notification handlers, keyed by method name.
#[derive(Clone, Default)]
pub struct NotificationHandler {
    handlers: Arc<Mutex<HashMap<String, NotificationFn>>>,
}

impl NotificationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method, replacing any previous one.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(JsonRpcNotification) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .expect("handlers poisoned")
            .insert(method.into(), Arc::new(handler));
    }

    /// Remove a handler; true when one was registered.
    pub fn unregister(&self, method: &str) -> bool {
        self.handlers
            .lock()
            .expect("handlers poisoned")
            .remove(method)
            .is_some()
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers
            .lock()
            .expect("handlers poisoned")
            .contains_key(method)
    }

    /// Dispatch one notification to its handler, if any.
    pub fn handle(&self, notification: JsonRpcNotification) {
        let handler = self
            .handlers
            .lock()
            .expect("handlers poisoned")
            .get(&notification.method)
            .cloned();
        match handler {
            Some(handler) => handler(notification),
            None => {
                tracing::debug!(method = %notification.method, "unhandled notification")
            }
        }
    }

    /// Registered method names.
    pub fn methods(&self) -> Vec<String> {
        self.handlers
            .lock()
            .expect("handlers poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
