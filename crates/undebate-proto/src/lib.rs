//! Undebate socket-api protocol types and serialization.
//!
//! This crate defines the wire protocol shared by the undebate client and
//! server. Frame envelopes are serialized with rkyv; the application payloads
//! they carry are opaque JSON values.
//!
//! # Modules
//!
//! - [`channel`] - Channel naming for per-id update pushes
//! - [`value`] - JSON payload wrapper carried inside frames
//! - [`message`] - Frame envelope (emit, ack, push, handshake)
//! - [`handshake`] - Protocol negotiation types
//! - [`framing`] - Length-prefix framing over byte streams
//! - [`error`] - Protocol error types
//!
//! # Event model
//!
//! A client emits an event named after a socket-api *handle*, carrying an id
//! and optional extra arguments plus an ack id. The server answers that emit
//! exactly once with an [`Frame::Ack`] and, for subscribable handles, later
//! pushes updates on the channel named by [`channel_name`]:
//!
//! ```
//! use undebate_proto::channel_name;
//!
//! assert_eq!(channel_name("subscribe-election-doc", "42"), "subscribe-election-doc:42");
//! ```

pub mod channel;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod message;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use channel::{channel_name, split_channel_name, CHANNEL_SEPARATOR};
pub use handshake::{Handshake, HandshakeResponse};
pub use message::Frame;
pub use value::Payload;

/// Protocol version for wire compatibility.
///
/// Sent in the handshake; client and server must agree exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Socket-api handles served by the undebate server.
pub mod apis {
    /// Returns an election document and subscribes to its updates.
    pub const SUBSCRIBE_ELECTION_DOC: &str = "subscribe-election-doc";
    /// Validates and upserts an election document.
    pub const FIND_AND_SET_ELECTION_DOC: &str = "find-and-set-election-doc";
    /// Leaves a channel; sent when its last local listener is removed.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
}
