//! Per-id channel subscriptions over a shared transport.
//!
//! `subscribe(handle, id, ..)` does two things on one transport:
//!
//! 1. registers the update handler as a persistent listener on the channel
//!    [`channel_name(handle, id)`](channel_name);
//! 2. emits `handle` with `(id, ...extra_args)` and routes the single reply to
//!    the result handler.
//!
//! The listener is registered before the emit, so updates pushed before the
//! reply are not lost. Updates and the reply are independent: updates are
//! routed by channel name only and may arrive before, between or after the
//! reply. Several subscriptions on the same channel each get every update.
//!
//! Nothing is retried or deduplicated, and there is no timeout on the reply.
//! After a transport reset the caller must subscribe again.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use undebate_proto::apis::UNSUBSCRIBE;
use undebate_proto::channel_name;

use crate::error::Error;
use crate::transport::{ListenerId, ReplyHandler, Transport, UpdateHandler};

/// Callback accepted by [`SubscriptionClient::subscribe_with`].
///
/// As a result handler it receives the reply arguments; as an update handler
/// it receives a one-element slice holding the pushed payload.
pub type Handler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// One positional argument of [`SubscriptionClient::subscribe_with`].
#[derive(Clone)]
pub enum Arg {
    /// A plain request argument, forwarded verbatim.
    Value(Value),
    /// A callback.
    Handler(Handler),
}

impl Arg {
    /// Wrap a closure as a handler argument.
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        Arg::Handler(Arc::new(f))
    }

    /// Name of the argument's type as reported in `InvalidArgument` errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::Handler(_) => "function",
            Arg::Value(Value::Null) => "null",
            Arg::Value(Value::Bool(_)) => "boolean",
            Arg::Value(Value::Number(_)) => "number",
            Arg::Value(Value::String(_)) => "string",
            Arg::Value(Value::Array(_)) => "array",
            Arg::Value(Value::Object(_)) => "object",
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Arg::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Subscribes to per-id channels over one transport.
pub struct SubscriptionClient<T: Transport + ?Sized> {
    transport: Arc<T>,
}

impl<T: Transport + ?Sized> SubscriptionClient<T> {
    /// Create a client over an explicit transport.
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Subscribe to `handle` for `id`.
    ///
    /// `on_result` runs once with the reply to the initial request.
    /// `on_update` runs for every push on `"{handle}:{id}"` until the returned
    /// [`Subscription`] is unsubscribed.
    ///
    /// Fails with [`Error::InvalidArgument`] for an empty handle. Transport
    /// errors from the emit are returned unchanged, and in that case no
    /// listener is left registered.
    pub fn subscribe<R, U>(
        &self,
        handle: &str,
        id: &str,
        extra_args: Vec<Value>,
        on_result: R,
        on_update: U,
    ) -> Result<Subscription<T>, Error>
    where
        R: FnOnce(Vec<Value>) + Send + 'static,
        U: Fn(&Value) + Send + Sync + 'static,
    {
        validate_handle(handle)?;
        self.register(handle, id, extra_args, Box::new(on_result), Arc::new(on_update))
    }

    /// Subscribe using positional arguments: `[...extra_args, result_handler,
    /// update_handler]`.
    ///
    /// The last argument must be a handler (the update handler) and so must
    /// the one before it (the result handler). Anything else fails with
    /// [`Error::InvalidArgument`] naming the parameter and the observed type,
    /// before any listener is registered or anything is emitted. Handlers are
    /// not allowed among the extra arguments.
    pub fn subscribe_with(
        &self,
        handle: &str,
        id: &str,
        mut args: Vec<Arg>,
    ) -> Result<Subscription<T>, Error> {
        validate_handle(handle)?;

        let update = args.pop();
        let result = args.pop();

        let on_result = match result {
            Some(Arg::Handler(handler)) => handler,
            other => return Err(Error::not_a_handler("result_handler", describe(other.as_ref()))),
        };
        let on_update = match update {
            Some(Arg::Handler(handler)) => handler,
            other => return Err(Error::not_a_handler("update_handler", describe(other.as_ref()))),
        };

        let mut extra_args = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Arg::Value(value) => extra_args.push(value),
                Arg::Handler(_) => {
                    return Err(Error::InvalidArgument {
                        parameter: "extra_args",
                        expected: "a JSON value",
                        actual: "function".to_string(),
                    })
                }
            }
        }

        let reply: ReplyHandler = Box::new(move |reply_args: Vec<Value>| on_result(&reply_args));
        let update: UpdateHandler = Arc::new(move |payload: &Value| on_update(std::slice::from_ref(payload)));
        self.register(handle, id, extra_args, reply, update)
    }

    fn register(
        &self,
        handle: &str,
        id: &str,
        extra_args: Vec<Value>,
        on_result: ReplyHandler,
        on_update: UpdateHandler,
    ) -> Result<Subscription<T>, Error> {
        let channel = channel_name(handle, id);
        let listener = self.transport.on(&channel, on_update);

        let mut args = Vec::with_capacity(extra_args.len() + 1);
        args.push(Value::String(id.to_string()));
        args.extend(extra_args);

        if let Err(e) = self.transport.emit(handle, args, Some(on_result)) {
            self.transport.off(&channel, listener);
            tracing::warn!(handle, id, channel = %channel, error = %e, "subscribe request failed");
            return Err(e);
        }

        tracing::debug!(handle, id, channel = %channel, listener = %listener, "subscribed");

        Ok(Subscription {
            channel,
            listener,
            transport: self.transport.clone(),
        })
    }
}

impl<T: Transport + ?Sized> Clone for SubscriptionClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

/// Token for one registered update handler.
///
/// Dropping the token leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription<T: Transport + ?Sized> {
    channel: String,
    listener: ListenerId,
    transport: Arc<T>,
}

impl<T: Transport + ?Sized> Subscription<T> {
    /// Channel the update handler listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Id of the registered listener.
    pub fn listener_id(&self) -> ListenerId {
        self.listener
    }

    /// Remove this subscription's update handler. Other subscriptions on the
    /// same channel keep receiving updates.
    ///
    /// Removing the last listener on the channel also emits
    /// [`UNSUBSCRIBE`] so the server stops pushing to it.
    pub fn unsubscribe(self) -> bool {
        let removed = self.transport.off(&self.channel, self.listener);
        tracing::debug!(channel = %self.channel, listener = %self.listener, removed, "unsubscribed");

        if removed && self.transport.listener_count(&self.channel) == 0 {
            let args = vec![Value::String(self.channel.clone())];
            if let Err(e) = self.transport.emit(UNSUBSCRIBE, args, None) {
                tracing::debug!(channel = %self.channel, error = %e, "leave not sent");
            }
        }
        removed
    }
}

impl<T: Transport + ?Sized> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("listener", &self.listener)
            .finish()
    }
}

fn validate_handle(handle: &str) -> Result<(), Error> {
    if handle.is_empty() {
        return Err(Error::InvalidArgument {
            parameter: "handle",
            expected: "a non-empty string",
            actual: "an empty string".to_string(),
        });
    }
    Ok(())
}

fn describe(arg: Option<&Arg>) -> &'static str {
    arg.map_or("missing", Arg::type_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client() -> (Arc<MemoryTransport>, SubscriptionClient<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        (transport.clone(), SubscriptionClient::new(transport))
    }

    fn collector() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &Value| sink.lock().push(v.clone()))
    }

    #[test]
    fn test_subscribe_emits_handle_with_id_and_extra_args() {
        let (transport, client) = client();

        let sub = client
            .subscribe("votes", "42", vec![json!({"round": 2})], |_| {}, |_| {})
            .unwrap();

        assert_eq!(sub.channel(), "votes:42");
        let emitted = transport.emitted();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].event, "votes");
        assert_eq!(emitted[0].args, vec![json!("42"), json!({"round": 2})]);
        assert!(emitted[0].ack.is_some());
        assert_eq!(transport.listener_count("votes:42"), 1);
    }

    #[test]
    fn test_pushes_delivered_in_order() {
        let (transport, client) = client();
        let (seen, on_update) = collector();

        client.subscribe("votes", "42", vec![], |_| {}, on_update).unwrap();

        assert_eq!(transport.push("votes:42", &json!({"yes": 1})), 1);
        assert_eq!(transport.push("votes:42", &json!({"yes": 2})), 1);
        assert_eq!(*seen.lock(), vec![json!({"yes": 1}), json!({"yes": 2})]);
    }

    #[test]
    fn test_pushes_on_other_ids_not_delivered() {
        let (transport, client) = client();
        let (seen, on_update) = collector();

        client.subscribe("votes", "42", vec![], |_| {}, on_update).unwrap();
        transport.push("votes:43", &json!(1));
        transport.push("tallies:42", &json!(1));

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_same_channel_fans_out() {
        let (transport, client) = client();
        let (seen_a, on_a) = collector();
        let (seen_b, on_b) = collector();

        client.subscribe("votes", "42", vec![], |_| {}, on_a).unwrap();
        client.subscribe("votes", "42", vec![], |_| {}, on_b).unwrap();

        transport.push("votes:42", &json!("first"));
        transport.push("votes:42", &json!("second"));

        assert_eq!(*seen_a.lock(), vec![json!("first"), json!("second")]);
        assert_eq!(*seen_b.lock(), vec![json!("first"), json!("second")]);
        assert_eq!(transport.emitted().len(), 2);
    }

    #[test]
    fn test_result_handler_runs_once_despite_pushes() {
        let (transport, client) = client();
        let results = Arc::new(AtomicUsize::new(0));
        let reply_args = Arc::new(Mutex::new(Vec::new()));
        let (updates, on_update) = collector();

        let counter = results.clone();
        let sink = reply_args.clone();
        client
            .subscribe(
                "votes",
                "42",
                vec![],
                move |args| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    *sink.lock() = args;
                },
                on_update,
            )
            .unwrap();

        let ack = transport.emitted()[0].ack.unwrap();
        transport.push("votes:42", &json!("early"));
        assert!(transport.reply(ack, vec![json!({"total": 10})]));
        transport.push("votes:42", &json!("late"));
        assert!(!transport.reply(ack, vec![json!({"total": 11})]));

        assert_eq!(results.load(Ordering::SeqCst), 1);
        assert_eq!(*reply_args.lock(), vec![json!({"total": 10})]);
        assert_eq!(*updates.lock(), vec![json!("early"), json!("late")]);
    }

    #[test]
    fn test_unsubscribe_stops_only_that_listener() {
        let (transport, client) = client();
        let (seen_a, on_a) = collector();
        let (seen_b, on_b) = collector();

        let a = client.subscribe("votes", "42", vec![], |_| {}, on_a).unwrap();
        let _b = client.subscribe("votes", "42", vec![], |_| {}, on_b).unwrap();

        transport.push("votes:42", &json!(1));
        assert!(a.unsubscribe());
        transport.push("votes:42", &json!(2));

        assert_eq!(*seen_a.lock(), vec![json!(1)]);
        assert_eq!(*seen_b.lock(), vec![json!(1), json!(2)]);
        assert_eq!(transport.listener_count("votes:42"), 1);
        assert_eq!(transport.emitted().len(), 2);
    }

    #[test]
    fn test_last_unsubscribe_leaves_channel() {
        let (transport, client) = client();

        let a = client.subscribe("votes", "42", vec![], |_| {}, |_| {}).unwrap();
        let b = client.subscribe("votes", "42", vec![], |_| {}, |_| {}).unwrap();

        assert!(a.unsubscribe());
        assert_eq!(transport.emitted().len(), 2);

        assert!(b.unsubscribe());
        let emitted = transport.emitted();
        assert_eq!(emitted.len(), 3);
        assert_eq!(emitted[2].event, UNSUBSCRIBE);
        assert_eq!(emitted[2].args, vec![json!("votes:42")]);
        assert_eq!(emitted[2].ack, None);
    }

    #[test]
    fn test_unsubscribe_after_close_still_removes_listener() {
        let (transport, client) = client();
        let sub = client.subscribe("votes", "42", vec![], |_| {}, |_| {}).unwrap();

        transport.close();
        assert!(sub.unsubscribe());
        assert_eq!(transport.listener_count("votes:42"), 0);
        assert_eq!(transport.emitted().len(), 1);
    }

    #[test]
    fn test_dropping_token_keeps_listener() {
        let (transport, client) = client();
        let (seen, on_update) = collector();

        drop(client.subscribe("votes", "42", vec![], |_| {}, on_update).unwrap());
        transport.push("votes:42", &json!(1));

        assert_eq!(*seen.lock(), vec![json!(1)]);
    }

    #[test]
    fn test_closed_transport_error_leaves_no_listener() {
        let (transport, client) = client();
        transport.close();

        let err = client.subscribe("votes", "42", vec![], |_| {}, |_| {}).unwrap_err();

        assert!(matches!(err, Error::Closed));
        assert_eq!(transport.listener_count("votes:42"), 0);
    }

    #[test]
    fn test_empty_handle_rejected() {
        let (transport, client) = client();
        let err = client.subscribe("", "42", vec![], |_| {}, |_| {}).unwrap_err();

        assert!(matches!(err, Error::InvalidArgument { parameter: "handle", .. }));
        assert!(transport.emitted().is_empty());
    }

    #[test]
    fn test_subscribe_with_non_function_result_handler() {
        let (transport, client) = client();

        let err = client
            .subscribe_with(
                "votes",
                "42",
                vec![Arg::Value(json!("not a function")), Arg::handler(|_| {})],
            )
            .unwrap_err();

        match err {
            Error::InvalidArgument { parameter, actual, .. } => {
                assert_eq!(parameter, "result_handler");
                assert_eq!(actual, "string");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(transport.emitted().is_empty());
        assert_eq!(transport.listener_count("votes:42"), 0);
    }

    #[test]
    fn test_subscribe_with_non_function_update_handler() {
        let (transport, client) = client();

        let err = client
            .subscribe_with("votes", "42", vec![Arg::handler(|_| {}), Arg::Value(json!(7))])
            .unwrap_err();

        match err {
            Error::InvalidArgument { parameter, actual, .. } => {
                assert_eq!(parameter, "update_handler");
                assert_eq!(actual, "number");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(transport.emitted().is_empty());
        assert_eq!(transport.listener_count("votes:42"), 0);
    }

    #[test]
    fn test_subscribe_with_missing_handlers() {
        let (_, client) = client();

        let err = client.subscribe_with("votes", "42", vec![]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument { parameter: "result_handler", ref actual, .. } if actual == "missing"
        ));
    }

    #[test]
    fn test_subscribe_with_handler_in_extra_args() {
        let (transport, client) = client();

        let err = client
            .subscribe_with(
                "votes",
                "42",
                vec![Arg::handler(|_| {}), Arg::handler(|_| {}), Arg::handler(|_| {})],
            )
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument { parameter: "extra_args", .. }));
        assert!(transport.emitted().is_empty());
    }

    #[test]
    fn test_subscribe_with_routes_reply_and_updates() {
        let (transport, client) = client();
        let replies = Arc::new(Mutex::new(Vec::new()));
        let updates = Arc::new(Mutex::new(Vec::new()));

        let reply_sink = replies.clone();
        let update_sink = updates.clone();
        client
            .subscribe_with(
                "votes",
                "42",
                vec![
                    Arg::from(json!("extra")),
                    Arg::handler(move |args| reply_sink.lock().push(args.to_vec())),
                    Arg::handler(move |args| update_sink.lock().push(args.to_vec())),
                ],
            )
            .unwrap();

        let emitted = transport.emitted();
        assert_eq!(emitted[0].args, vec![json!("42"), json!("extra")]);

        transport.push("votes:42", &json!({"n": 1}));
        transport.reply(emitted[0].ack.unwrap(), vec![json!(true), json!("ok")]);

        assert_eq!(*replies.lock(), vec![vec![json!(true), json!("ok")]]);
        assert_eq!(*updates.lock(), vec![vec![json!({"n": 1})]]);
    }

    #[test]
    fn test_arg_type_names() {
        assert_eq!(Arg::from(json!(null)).type_name(), "null");
        assert_eq!(Arg::from(json!(false)).type_name(), "boolean");
        assert_eq!(Arg::from(json!([1])).type_name(), "array");
        assert_eq!(Arg::from(json!({})).type_name(), "object");
        assert_eq!(Arg::handler(|_| {}).type_name(), "function");
    }
}
