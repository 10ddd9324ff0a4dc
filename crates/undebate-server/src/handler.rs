//! Socket-api dispatch.
//!
//! Each emitted event names a socket-api *handle*. The [`ApiRegistry`] maps
//! handles to [`SocketApi`] implementations and turns their results into the
//! reply arguments sent back with the ack.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::apis::{FindAndSetElectionDoc, SubscribeElectionDoc, Unsubscribe};
use crate::error::Error;
use crate::pubsub::ChannelManager;
use crate::store::ElectionStore;

/// Per-call context handed to a socket api.
pub struct ApiContext<'a> {
    /// Connection that emitted the event.
    pub connection_id: u64,
    /// Signed-in user of that connection.
    pub user: Option<&'a str>,
    /// Channel memberships and push fan-out.
    pub channels: &'a ChannelManager,
}

impl<'a> ApiContext<'a> {
    /// Create a context for a call from `connection_id`.
    pub fn new(connection_id: u64, user: Option<&'a str>, channels: &'a ChannelManager) -> Self {
        Self {
            connection_id,
            user,
            channels,
        }
    }

    /// Add the calling connection to `channel`.
    pub fn join(&self, channel: &str) -> Result<bool, Error> {
        self.channels.join(self.connection_id, channel)
    }

    /// Remove the calling connection from `channel`.
    pub fn leave(&self, channel: &str) -> bool {
        self.channels.leave(self.connection_id, channel)
    }

    /// Push `payload` to every member of `channel`.
    pub fn publish(&self, channel: &str, payload: &Value) -> Result<usize, Error> {
        self.channels.publish(channel, payload)
    }
}

/// A server-side socket api.
pub trait SocketApi: Send + Sync {
    /// Handle one call. The returned values become the reply arguments.
    fn handle(&self, ctx: &ApiContext<'_>, args: Vec<Value>) -> Result<Vec<Value>, Error>;
}

/// Registry of socket apis keyed by handle.
#[derive(Default)]
pub struct ApiRegistry {
    apis: HashMap<String, Arc<dyn SocketApi>>,
}

impl ApiRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry serving the election-document apis from `store`.
    pub fn with_default_apis(store: Arc<ElectionStore>) -> Self {
        let mut registry = Self::new();
        registry.register(
            undebate_proto::apis::SUBSCRIBE_ELECTION_DOC,
            SubscribeElectionDoc::new(store.clone()),
        );
        registry.register(
            undebate_proto::apis::FIND_AND_SET_ELECTION_DOC,
            FindAndSetElectionDoc::new(store),
        );
        registry.register(undebate_proto::apis::UNSUBSCRIBE, Unsubscribe);
        registry
    }

    /// Register an api under `handle`, replacing any previous one.
    pub fn register(&mut self, handle: impl Into<String>, api: impl SocketApi + 'static) {
        self.apis.insert(handle.into(), Arc::new(api));
    }

    /// Check if a handle is served.
    pub fn contains(&self, handle: &str) -> bool {
        self.apis.contains_key(handle)
    }

    /// Served handles, sorted.
    pub fn handles(&self) -> Vec<&str> {
        let mut handles: Vec<&str> = self.apis.keys().map(String::as_str).collect();
        handles.sort_unstable();
        handles
    }

    /// Dispatch a call to the api registered for `handle`.
    ///
    /// Returns `None` for unknown handles; no reply is sent for those. A
    /// failing api is logged and answered with an empty reply.
    pub fn dispatch(
        &self,
        ctx: &ApiContext<'_>,
        handle: &str,
        args: Vec<Value>,
    ) -> Option<Vec<Value>> {
        let Some(api) = self.apis.get(handle) else {
            tracing::debug!(connection_id = ctx.connection_id, handle, "no api for handle");
            return None;
        };

        match api.handle(ctx, args) {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::warn!(
                    connection_id = ctx.connection_id,
                    handle,
                    error = %e,
                    "socket api failed"
                );
                Some(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Echo;

    impl SocketApi for Echo {
        fn handle(&self, _ctx: &ApiContext<'_>, args: Vec<Value>) -> Result<Vec<Value>, Error> {
            Ok(args)
        }
    }

    struct Failing;

    impl SocketApi for Failing {
        fn handle(&self, _ctx: &ApiContext<'_>, _args: Vec<Value>) -> Result<Vec<Value>, Error> {
            Err(Error::InvalidRequest("always fails".to_string()))
        }
    }

    #[test]
    fn test_dispatch_known_handle() {
        let channels = ChannelManager::new();
        let ctx = ApiContext::new(1, None, &channels);
        let mut registry = ApiRegistry::new();
        registry.register("echo", Echo);

        let reply = registry.dispatch(&ctx, "echo", vec![json!("42"), json!(true)]);
        assert_eq!(reply, Some(vec![json!("42"), json!(true)]));
    }

    #[test]
    fn test_dispatch_unknown_handle() {
        let channels = ChannelManager::new();
        let ctx = ApiContext::new(1, None, &channels);
        let registry = ApiRegistry::new();

        assert_eq!(registry.dispatch(&ctx, "missing", vec![]), None);
    }

    #[test]
    fn test_failing_api_replies_empty() {
        let channels = ChannelManager::new();
        let ctx = ApiContext::new(1, None, &channels);
        let mut registry = ApiRegistry::new();
        registry.register("fail", Failing);

        assert_eq!(registry.dispatch(&ctx, "fail", vec![]), Some(vec![]));
    }

    #[test]
    fn test_default_apis() {
        let registry = ApiRegistry::with_default_apis(Arc::new(ElectionStore::new()));
        assert_eq!(
            registry.handles(),
            vec!["find-and-set-election-doc", "subscribe-election-doc", "unsubscribe"]
        );
    }

    #[test]
    fn test_context_join() {
        let channels = ChannelManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        channels.attach(4, tx);
        let ctx = ApiContext::new(4, Some("u"), &channels);

        assert!(ctx.join("votes:1").unwrap());
        assert_eq!(channels.members("votes:1"), vec![4]);
        assert_eq!(ctx.publish("votes:1", &json!(1)).unwrap(), 1);
        assert!(ctx.leave("votes:1"));
        assert!(channels.members("votes:1").is_empty());
    }
}
