//! Undebate client API.
//!
//! [`Client`] owns one [`Connection`] and layers request/reply helpers and the
//! election-document socket APIs over it.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::oneshot;

use undebate_proto::apis::{FIND_AND_SET_ELECTION_DOC, SUBSCRIBE_ELECTION_DOC};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::Error;
use crate::subscribe::{Arg, Subscription, SubscriptionClient};

/// A client connected to an undebate server.
///
/// # Example
///
/// ```ignore
/// use undebate_client::{Client, ClientConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::connect(ClientConfig::localhost().with_user("moderator")).await?;
///
///     let _sub = client.subscribe_election_doc(
///         "61f0c2a9e4b0a1b2c3d4e5f6",
///         |reply| println!("current: {:?}", reply),
///         |update| println!("changed: {}", update),
///     )?;
///
///     client.close();
///     Ok(())
/// }
/// ```
pub struct Client {
    connection: Arc<Connection>,
    subscriptions: SubscriptionClient<Connection>,
}

impl Client {
    /// Connect to an undebate server.
    pub async fn connect(config: ClientConfig) -> Result<Self, Error> {
        let connection = Arc::new(Connection::establish(config).await?);
        Ok(Self::from_connection(connection))
    }

    /// Connect to a server at the given address.
    pub async fn connect_to(address: impl Into<String>) -> Result<Self, Error> {
        Self::connect(ClientConfig::new(address)).await
    }

    /// Connect to localhost on the default port.
    pub async fn connect_localhost() -> Result<Self, Error> {
        Self::connect(ClientConfig::localhost()).await
    }

    /// Wrap an established connection.
    pub fn from_connection(connection: Arc<Connection>) -> Self {
        Self {
            subscriptions: SubscriptionClient::new(connection.clone()),
            connection,
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// See [`SubscriptionClient::subscribe`].
    pub fn subscribe<R, U>(
        &self,
        handle: &str,
        id: &str,
        extra_args: Vec<Value>,
        on_result: R,
        on_update: U,
    ) -> Result<Subscription<Connection>, Error>
    where
        R: FnOnce(Vec<Value>) + Send + 'static,
        U: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscriptions
            .subscribe(handle, id, extra_args, on_result, on_update)
    }

    /// See [`SubscriptionClient::subscribe_with`].
    pub fn subscribe_with(
        &self,
        handle: &str,
        id: &str,
        args: Vec<Arg>,
    ) -> Result<Subscription<Connection>, Error> {
        self.subscriptions.subscribe_with(handle, id, args)
    }

    /// Emit `handle` with `args` and wait for its reply.
    ///
    /// Fails with [`Error::Timeout`] if no reply arrives within the configured
    /// timeout, and with [`Error::Closed`] if the connection drops first.
    pub async fn request(&self, handle: &str, args: Vec<Value>) -> Result<Vec<Value>, Error> {
        let (tx, rx) = oneshot::channel();
        let ack = self.connection.emit_with_ack(
            handle,
            args,
            Box::new(move |reply: Vec<Value>| {
                let _ = tx.send(reply);
            }),
        )?;

        match tokio::time::timeout(self.connection.config().timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.connection.cancel_reply(ack);
                tracing::warn!(handle, ack, "request timed out");
                Err(Error::Timeout)
            }
        }
    }

    /// Fetch an election document and follow its updates.
    ///
    /// `on_result` receives the document (or `null` if none exists yet);
    /// `on_update` receives every later version.
    pub fn subscribe_election_doc<R, U>(
        &self,
        id: &str,
        on_result: R,
        on_update: U,
    ) -> Result<Subscription<Connection>, Error>
    where
        R: FnOnce(Value) + Send + 'static,
        U: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(
            SUBSCRIBE_ELECTION_DOC,
            id,
            Vec::new(),
            move |mut reply| on_result(if reply.is_empty() { Value::Null } else { reply.swap_remove(0) }),
            on_update,
        )
    }

    /// Validate and store an election document. Returns `true` if the server
    /// accepted it.
    pub async fn find_and_set_election_doc(&self, id: &str, doc: Value) -> Result<bool, Error> {
        let reply = self
            .request(FIND_AND_SET_ELECTION_DOC, vec![json!({ "_id": id }), doc])
            .await?;
        Ok(matches!(reply.first(), Some(Value::Bool(true))))
    }

    /// Close the connection.
    pub fn close(&self) {
        self.connection.close();
    }

    /// Check if the connection is ready for requests.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .finish()
    }
}
