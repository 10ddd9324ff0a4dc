//! The transport seam used by [`SubscriptionClient`](crate::SubscriptionClient).
//!
//! A transport is one bidirectional connection. It can emit named events with
//! an optional one-shot reply, and it routes inbound pushes to listeners by
//! event name. [`Connection`](crate::Connection) is the TCP implementation and
//! [`MemoryTransport`](crate::MemoryTransport) the in-process one.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::Error;

/// Persistent listener for pushes on one event name.
pub type UpdateHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// One-shot handler for the reply to an emit.
pub type ReplyHandler = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Identifies one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// A bidirectional event transport.
///
/// All methods are synchronous and must not block: `emit` queues the frame
/// and returns, replies and pushes are delivered later from the transport's
/// own task.
pub trait Transport: Send + Sync {
    /// Register a persistent listener for pushes named `event`.
    fn on(&self, event: &str, listener: UpdateHandler) -> ListenerId;

    /// Remove a listener. Returns `false` if it was not registered on `event`.
    fn off(&self, event: &str, listener: ListenerId) -> bool;

    /// Emit `event` with `args`. If `reply` is given the remote side answers
    /// exactly once and the handler is invoked with the reply arguments.
    fn emit(&self, event: &str, args: Vec<Value>, reply: Option<ReplyHandler>) -> Result<(), Error>;

    /// Number of listeners currently registered on `event`.
    fn listener_count(&self, event: &str) -> usize;
}

/// Event name to listeners, in registration order.
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, UpdateHandler)>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener and return its id.
    pub fn on(&self, event: &str, listener: UpdateHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Invoke every listener on `event` with `payload`, in registration order.
    ///
    /// Returns the number of listeners invoked. The lock is released before
    /// any listener runs, so listeners may register or remove listeners.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let snapshot: Vec<UpdateHandler> = match self.listeners.read().get(event) {
            Some(entries) => entries.iter().map(|(_, l)| l.clone()).collect(),
            None => return 0,
        };

        for listener in &snapshot {
            listener(payload);
        }
        snapshot.len()
    }

    /// Number of listeners on `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Number of events with at least one listener.
    pub fn event_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("events", &self.event_count())
            .finish()
    }
}

/// Reply handlers waiting for their ack, keyed by ack id.
pub struct PendingReplies {
    pending: Mutex<HashMap<u64, ReplyHandler>>,
    next_ack: AtomicU64,
}

impl PendingReplies {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_ack: AtomicU64::new(1),
        }
    }

    /// Store a reply handler and return its ack id.
    pub fn register(&self, reply: ReplyHandler) -> u64 {
        let ack = self.next_ack.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().insert(ack, reply);
        ack
    }

    /// Drop a reply handler without invoking it.
    pub fn cancel(&self, ack: u64) -> bool {
        self.pending.lock().remove(&ack).is_some()
    }

    /// Invoke and remove the handler for `ack`.
    ///
    /// Returns `false` for unknown or already-resolved acks, so a handler runs
    /// at most once.
    pub fn resolve(&self, ack: u64, args: Vec<Value>) -> bool {
        let reply = self.pending.lock().remove(&ack);
        match reply {
            Some(reply) => {
                reply(args);
                true
            }
            None => false,
        }
    }

    /// Drop every waiting handler.
    pub fn clear(&self) -> usize {
        let drained: Vec<ReplyHandler> = self.pending.lock().drain().map(|(_, r)| r).collect();
        drained.len()
    }

    /// Number of replies still outstanding.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Check whether no replies are outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for PendingReplies {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PendingReplies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReplies")
            .field("pending", &self.len())
            .finish()
    }
}
