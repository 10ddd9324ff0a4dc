//! Client configuration.

use std::time::Duration;

use undebate_proto::framing::MAX_MESSAGE_SIZE;

/// Default TCP address of the undebate server.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:3011";

/// Default timeout for connecting, the handshake, and awaited requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum inbound frame size (4 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = MAX_MESSAGE_SIZE;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (e.g., "127.0.0.1:3011").
    pub address: String,

    /// Timeout for connecting, the handshake, and [`crate::Client::request`].
    pub timeout: Duration,

    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,

    /// Client identifier for server-side tracking.
    pub client_id: String,

    /// Signed-in user announced in the handshake.
    pub user: Option<String>,
}

impl ClientConfig {
    /// Create a new client configuration with the specified address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            client_id: generate_client_id(),
            user: None,
        }
    }

    /// Create a configuration for connecting to localhost on the default port.
    pub fn localhost() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum inbound frame size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(MAX_MESSAGE_SIZE);
        self
    }

    /// Set the client identifier.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the signed-in user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::localhost()
    }
}

/// Generate a unique client identifier.
fn generate_client_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    format!("client-{:x}", timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(config.client_id.starts_with("client-"));
        assert!(config.user.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("10.0.0.5:4000")
            .with_timeout(Duration::from_secs(5))
            .with_max_message_size(1024 * 1024)
            .with_client_id("ssp-ui")
            .with_user("candidate-7");

        assert_eq!(config.address, "10.0.0.5:4000");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.client_id, "ssp-ui");
        assert_eq!(config.user.as_deref(), Some("candidate-7"));
    }

    #[test]
    fn test_max_message_size_capped_at_protocol_limit() {
        let config = ClientConfig::localhost().with_max_message_size(usize::MAX);
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
    }
}
