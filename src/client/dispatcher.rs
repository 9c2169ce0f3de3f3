//! Event Dispatcher: type-keyed pub/sub over decoded inbound frames.
//!
//! Handlers are invoked in registration order. A handler that returns an
//! error or panics is logged and skipped; the remaining handlers still run.
//! Payloads are delivered verbatim, unknown types included.
//!
//! Every registration carries an `active` flag that is checked right before
//! each invocation, so a revoked handler is never called again, even for a
//! publish that had already snapshotted the handler list.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;

use crate::protocol::InboundFrame;

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct Registration {
    id: u64,
    active: Arc<AtomicBool>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
}

impl Registry {
    fn remove(&self, event_type: &str, id: u64) {
        let mut map = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = map.get_mut(event_type) {
            list.retain(|r| r.id != id);
            if list.is_empty() {
                map.remove(event_type);
            }
        }
    }
}

/// Shared, cloneable pub/sub registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self
            .registry
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = map.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("EventDispatcher")
            .field("handlers", &counts)
            .finish()
    }
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for frames of `event_type`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or explicitly revoked.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let registration = Registration {
            id,
            active: Arc::clone(&active),
            handler: Arc::new(handler),
        };
        self.registry
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type.clone())
            .or_default()
            .push(registration);
        tracing::trace!(event_type = %event_type, id, "handler subscribed");

        Subscription {
            event_type,
            id,
            active,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invokes every active handler registered for `event_type`.
    ///
    /// Returns the number of handlers that were invoked, failed ones included.
    pub fn publish(&self, event_type: &str, payload: &Value) -> usize {
        let snapshot: Vec<(Arc<AtomicBool>, Handler)> = {
            let map = self
                .registry
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match map.get(event_type) {
                Some(list) => list
                    .iter()
                    .map(|r| (Arc::clone(&r.active), Arc::clone(&r.handler)))
                    .collect(),
                None => return 0,
            }
        };

        let mut invoked = 0;
        for (active, handler) in snapshot {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(event_type, error = %err, "event handler failed");
                }
                Err(_) => {
                    tracing::warn!(event_type, "event handler panicked");
                }
            }
        }
        invoked
    }

    /// Publishes a decoded frame under its own type.
    pub fn publish_frame(&self, frame: &InboundFrame) -> usize {
        self.publish(&frame.event_type, &frame.payload)
    }

    /// Revokes every registration.
    pub fn clear(&self) {
        let mut map = self
            .registry
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for registration in map.values().flatten() {
            registration.active.store(false, Ordering::Release);
        }
        map.clear();
    }

    /// Returns the number of handlers registered for `event_type`.
    #[must_use]
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.registry
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

/// Revocation handle for one registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    event_type: String,
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Registry>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    /// Event type this handle was registered for.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns `false` once revoked, either through this handle or by
    /// [`EventDispatcher::clear`].
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Revokes the registration.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.event_type, self.id);
        }
    }
}
