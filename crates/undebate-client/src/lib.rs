//! Undebate Client - socket-api calls and per-id channel subscriptions.
//!
//! A single connection carries every subscription. Subscribing to a handle
//! for an id sends one request whose reply goes to a result handler, and
//! registers an update handler on the channel `"{handle}:{id}"` for pushes
//! that follow.
//!
//! # Quick Start
//!
//! ```ignore
//! use undebate_client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(ClientConfig::localhost()).await?;
//!
//!     let sub = client.subscribe(
//!         "subscribe-election-doc",
//!         "61f0c2a9e4b0a1b2c3d4e5f6",
//!         vec![],
//!         |reply| println!("initial: {:?}", reply),
//!         |update| println!("update: {}", update),
//!     )?;
//!
//!     sub.unsubscribe();
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! For tests, [`SubscriptionClient`] works over any [`Transport`];
//! [`MemoryTransport`] plays the server in-process.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod subscribe;
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionState};
pub use error::Error;
pub use memory::{EmittedEvent, MemoryTransport};
pub use subscribe::{Arg, Handler, Subscription, SubscriptionClient};
pub use transport::{ListenerId, ReplyHandler, Transport, UpdateHandler};

/// Re-export protocol types.
pub use undebate_proto as proto;
pub use undebate_proto::channel_name;
