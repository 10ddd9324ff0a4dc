//! Undebate Server library.
//!
//! This crate serves the undebate socket apis over TCP: connection handshake,
//! socket-api dispatch, channel memberships and push fan-out, and the
//! election document store.

pub mod apis;
pub mod config;
pub mod error;
pub mod handler;
pub mod pubsub;
pub mod store;
pub mod transport;

pub use config::{Args, ServerConfig};
pub use error::Error;
pub use handler::{ApiContext, ApiRegistry, SocketApi};
pub use pubsub::{ChannelManager, SharedChannelManager};
pub use store::ElectionStore;
pub use transport::{create_transport, Transport, TransportMetrics};
