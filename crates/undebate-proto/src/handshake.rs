//! Protocol handshake types for connection negotiation.

use rkyv::{Archive, Deserialize, Serialize};

/// Client handshake message sent when establishing a connection.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Handshake {
    /// Protocol version the client supports.
    pub protocol_version: u32,
    /// Client identifier (for logging and debugging).
    pub client_id: String,
    /// Signed-in user, if any. Write APIs refuse connections without one.
    pub user: Option<String>,
}

impl Handshake {
    /// Create a new anonymous handshake with the current protocol version.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            client_id: client_id.into(),
            user: None,
        }
    }

    /// Create a handshake with a specific protocol version.
    pub fn with_version(protocol_version: u32, client_id: impl Into<String>) -> Self {
        Self {
            protocol_version,
            client_id: client_id.into(),
            user: None,
        }
    }

    /// Attach the signed-in user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Server response to a client handshake.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Whether the handshake was accepted.
    pub accepted: bool,
    /// Protocol version the server will use for this connection.
    pub protocol_version: u32,
    /// Server identifier.
    pub server_id: String,
    /// Connection id assigned by the server.
    pub connection_id: u64,
    /// Error message if handshake was rejected.
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Create a successful handshake response.
    pub fn accept(protocol_version: u32, server_id: impl Into<String>, connection_id: u64) -> Self {
        Self {
            accepted: true,
            protocol_version,
            server_id: server_id.into(),
            connection_id,
            error: None,
        }
    }

    /// Create a rejected handshake response.
    pub fn reject(error: impl Into<String>) -> Self {
        Self {
            accepted: false,
            protocol_version: 0,
            server_id: String::new(),
            connection_id: 0,
            error: Some(error.into()),
        }
    }
}

/// Check if a protocol version is compatible with the current version.
pub fn is_version_compatible(client_version: u32, server_version: u32) -> bool {
    client_version == server_version
}

/// Negotiate the protocol version between client and server.
pub fn negotiate_version(client_version: u32, server_version: u32) -> Option<u32> {
    if is_version_compatible(client_version, server_version) {
        Some(server_version)
    } else {
        None
    }
}
