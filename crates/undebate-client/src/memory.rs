//! In-process transport.
//!
//! `MemoryTransport` records what is emitted and lets the caller play the
//! server: answer emits with [`MemoryTransport::reply`] and push updates with
//! [`MemoryTransport::push`]. Delivery happens synchronously on the calling
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Error;
use crate::transport::{ListenerId, ListenerRegistry, PendingReplies, ReplyHandler, Transport, UpdateHandler};

/// One recorded emission.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    /// Event name (the socket-api handle).
    pub event: String,
    /// Arguments as emitted.
    pub args: Vec<Value>,
    /// Ack id to pass to [`MemoryTransport::reply`], if a reply was requested.
    pub ack: Option<u64>,
}

/// A [`Transport`] that never leaves the process.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    listeners: ListenerRegistry,
    replies: PendingReplies,
    emitted: Mutex<Vec<EmittedEvent>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create an open transport with nothing emitted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything emitted so far, in order.
    pub fn emitted(&self) -> Vec<EmittedEvent> {
        self.emitted.lock().clone()
    }

    /// Deliver a push to every listener on `event`. Returns the listener count.
    pub fn push(&self, event: &str, payload: &Value) -> usize {
        self.listeners.dispatch(event, payload)
    }

    /// Answer the emit that carried `ack`. Returns `false` if it was already
    /// answered or never requested a reply.
    pub fn reply(&self, ack: u64, args: Vec<Value>) -> bool {
        self.replies.resolve(ack, args)
    }

    /// Close the transport; later emits fail with [`Error::Closed`] and
    /// outstanding replies are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.replies.clear();
    }

    /// Check whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of emits still waiting for a reply.
    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }
}

impl Transport for MemoryTransport {
    fn on(&self, event: &str, listener: UpdateHandler) -> ListenerId {
        self.listeners.on(event, listener)
    }

    fn off(&self, event: &str, listener: ListenerId) -> bool {
        self.listeners.off(event, listener)
    }

    fn emit(&self, event: &str, args: Vec<Value>, reply: Option<ReplyHandler>) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let ack = reply.map(|reply| self.replies.register(reply));
        self.emitted.lock().push(EmittedEvent {
            event: event.to_string(),
            args,
            ack,
        });
        Ok(())
    }

    fn listener_count(&self, event: &str) -> usize {
        self.listeners.listener_count(event)
    }
}
